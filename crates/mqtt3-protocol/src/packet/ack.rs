//! The two-byte acknowledgement packets: PUBACK, PUBREC, PUBREL, PUBCOMP,
//! and UNSUBACK all carry nothing but a packet identifier.

use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::read_u16;
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, PacketType};

macro_rules! define_ack_packet {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
        packet_type = $ptype:expr;
        flags = $flags:expr;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub packet_id: u16,
        }

        impl $name {
            pub fn new(packet_id: u16) -> Self {
                Self { packet_id }
            }

            pub fn encode(&self, buf: &mut BytesMut) {
                buf.put_u8(($ptype as u8) << 4 | $flags);
                buf.put_u8(2);
                buf.put_u16(self.packet_id);
            }

            /// Complete frame, ready for the wire.
            pub fn to_frame(&self) -> Bytes {
                let mut buf = BytesMut::with_capacity(4);
                self.encode(&mut buf);
                buf.freeze()
            }

            pub fn decode_body(header: &FixedHeader, mut body: Bytes) -> Result<Self> {
                if header.flags != $flags {
                    return Err(MqttError::Protocol(format!(
                        "{:?} with flags {:#04x}",
                        $ptype, header.flags
                    )));
                }
                if header.remaining_length != 2 {
                    return Err(MqttError::Protocol(format!(
                        "{:?} with remaining length {}",
                        $ptype, header.remaining_length
                    )));
                }
                let packet_id = read_u16(&mut body)?;
                if packet_id == 0 {
                    return Err(MqttError::Protocol(format!(
                        "{:?} with packet identifier 0",
                        $ptype
                    )));
                }
                Ok(Self { packet_id })
            }
        }
    };
}

define_ack_packet! {
    /// QoS 1 publish acknowledgement.
    pub struct PubAckPacket;
    packet_type = PacketType::PubAck;
    flags = 0x00;
}

define_ack_packet! {
    /// QoS 2 publish received (handshake part 1).
    pub struct PubRecPacket;
    packet_type = PacketType::PubRec;
    flags = 0x00;
}

define_ack_packet! {
    /// QoS 2 publish release (handshake part 2). Reserved flags `0b0010`.
    pub struct PubRelPacket;
    packet_type = PacketType::PubRel;
    flags = 0x02;
}

define_ack_packet! {
    /// QoS 2 publish complete (handshake part 3).
    pub struct PubCompPacket;
    packet_type = PacketType::PubComp;
    flags = 0x00;
}

define_ack_packet! {
    /// Unsubscribe acknowledgement; carries no per-filter result.
    pub struct UnsubAckPacket;
    packet_type = PacketType::UnsubAck;
    flags = 0x00;
}
