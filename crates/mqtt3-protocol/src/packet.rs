//! Control packet framing and the inbound packet dispatch.

pub mod ack;
pub mod connack;
pub mod connect;
pub mod publish;
pub mod subscribe;
pub mod unsubscribe;

pub use ack::{PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, UnsubAckPacket};
pub use connack::{ConnAckPacket, ConnectReturnCode};
pub use connect::ConnectPacket;
pub use publish::PublishPacket;
pub use subscribe::{SubAckPacket, SubAckReturnCode, SubscribePacket};
pub use unsubscribe::UnsubscribePacket;

use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{read_variable_int, write_variable_int};
use crate::error::{MqttError, Result};

/// Complete PINGREQ frame; the packet has no body.
pub const PINGREQ_FRAME: [u8; 2] = [0xC0, 0x00];

/// Complete PINGRESP frame.
pub const PINGRESP_FRAME: [u8; 2] = [0xD0, 0x00];

/// Complete DISCONNECT frame.
pub const DISCONNECT_FRAME: [u8; 2] = [0xE0, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            other => Err(MqttError::Protocol(format!(
                "reserved packet type {other}"
            ))),
        }
    }
}

/// One-byte type+flags header plus the remaining-length declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: u32) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((self.packet_type as u8) << 4 | (self.flags & 0x0F));
        write_variable_int(buf, self.remaining_length);
    }

    /// Decodes a fixed header from the front of `data`.
    ///
    /// Returns `Ok(None)` while the remaining-length declaration is still
    /// incomplete, otherwise the header plus the number of bytes it spans.
    pub fn decode(data: &[u8]) -> Result<Option<(FixedHeader, usize)>> {
        let Some(&first) = data.first() else {
            return Ok(None);
        };
        let Some((remaining_length, size_len)) = read_variable_int(&data[1..])? else {
            return Ok(None);
        };
        let packet_type = PacketType::try_from(first >> 4)?;
        Ok(Some((
            FixedHeader {
                packet_type,
                flags: first & 0x0F,
                remaining_length,
            },
            1 + size_len,
        )))
    }
}

/// Every packet a client can legitimately receive from a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    SubAck(SubAckPacket),
    UnsubAck(UnsubAckPacket),
    PingResp,
}

impl Packet {
    /// Decodes a complete inbound frame body.
    ///
    /// `body` holds exactly `header.remaining_length` bytes. Server-only and
    /// reserved packet types are protocol violations on a client connection.
    pub fn decode(header: &FixedHeader, body: Bytes) -> Result<Packet> {
        match header.packet_type {
            PacketType::ConnAck => Ok(Packet::ConnAck(ConnAckPacket::decode_body(header, body)?)),
            PacketType::Publish => Ok(Packet::Publish(PublishPacket::decode_body(header, body)?)),
            PacketType::PubAck => Ok(Packet::PubAck(PubAckPacket::decode_body(header, body)?)),
            PacketType::PubRec => Ok(Packet::PubRec(PubRecPacket::decode_body(header, body)?)),
            PacketType::PubRel => Ok(Packet::PubRel(PubRelPacket::decode_body(header, body)?)),
            PacketType::PubComp => Ok(Packet::PubComp(PubCompPacket::decode_body(header, body)?)),
            PacketType::SubAck => Ok(Packet::SubAck(SubAckPacket::decode_body(header, body)?)),
            PacketType::UnsubAck => {
                Ok(Packet::UnsubAck(UnsubAckPacket::decode_body(header, body)?))
            }
            PacketType::PingResp => {
                if header.remaining_length != 0 {
                    return Err(MqttError::Protocol(
                        "PINGRESP with a non-empty body".to_string(),
                    ));
                }
                Ok(Packet::PingResp)
            }
            server_only => Err(MqttError::Protocol(format!(
                "client received {server_only:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_header_round_trip() {
        let header = FixedHeader::new(PacketType::Publish, 0x03, 321);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let (decoded, consumed) = FixedHeader::decode(&buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_fixed_header_incomplete() {
        assert_eq!(FixedHeader::decode(&[]).unwrap(), None);
        assert_eq!(FixedHeader::decode(&[0x30]).unwrap(), None);
        assert_eq!(FixedHeader::decode(&[0x30, 0x80]).unwrap(), None);
    }

    #[test]
    fn test_fixed_header_reserved_type() {
        assert!(FixedHeader::decode(&[0x00, 0x00]).is_err());
        assert!(FixedHeader::decode(&[0xF0, 0x00]).is_err());
    }

    #[test]
    fn test_decode_rejects_server_only_types() {
        for first in [0x10u8, 0x82, 0xA2, 0xC0] {
            let header = FixedHeader::decode(&[first, 0x00]).unwrap().unwrap().0;
            assert!(
                Packet::decode(&header, Bytes::new()).is_err(),
                "type byte {first:#x} must be rejected"
            );
        }
    }

    #[test]
    fn test_decode_pingresp() {
        let header = FixedHeader::decode(&PINGRESP_FRAME).unwrap().unwrap().0;
        assert_eq!(
            Packet::decode(&header, Bytes::new()).unwrap(),
            Packet::PingResp
        );
    }

    #[test]
    fn test_pingresp_with_body_rejected() {
        let header = FixedHeader::new(PacketType::PingResp, 0, 1);
        assert!(Packet::decode(&header, Bytes::from_static(&[0])).is_err());
    }
}
