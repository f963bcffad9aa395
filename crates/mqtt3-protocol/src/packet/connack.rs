use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, PacketType};

/// CONNACK return codes per the 3.1.1 specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUserNameOrPassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            other => Err(MqttError::Protocol(format!(
                "reserved connect return code {other}"
            ))),
        }
    }
}

impl ConnectReturnCode {
    /// The refusal error for this code, or `None` when accepted.
    pub fn refusal(self) -> Option<MqttError> {
        match self {
            ConnectReturnCode::Accepted => None,
            other => Some(MqttError::connect_refusal(other as u8)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((PacketType::ConnAck as u8) << 4);
        buf.put_u8(2);
        buf.put_u8(u8::from(self.session_present));
        buf.put_u8(self.return_code as u8);
    }

    pub fn decode_body(header: &FixedHeader, mut body: Bytes) -> Result<Self> {
        if header.flags != 0 {
            return Err(MqttError::Protocol(format!(
                "CONNACK with flags {:#04x}",
                header.flags
            )));
        }
        if header.remaining_length != 2 {
            return Err(MqttError::Protocol(format!(
                "CONNACK with remaining length {}",
                header.remaining_length
            )));
        }
        let flags = body.get_u8();
        if flags > 1 {
            return Err(MqttError::Protocol(format!(
                "reserved CONNACK acknowledge flags {flags:#04x}"
            )));
        }
        let return_code = ConnectReturnCode::try_from(body.get_u8())?;
        Ok(ConnAckPacket {
            session_present: flags == 1,
            return_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(frame: &[u8]) -> Result<ConnAckPacket> {
        let (header, consumed) = FixedHeader::decode(frame).unwrap().unwrap();
        ConnAckPacket::decode_body(&header, Bytes::copy_from_slice(&frame[consumed..]))
    }

    #[test]
    fn test_connack_accepted() {
        let packet = decode(&[0x20, 0x02, 0x00, 0x00]).unwrap();
        assert!(!packet.session_present);
        assert_eq!(packet.return_code, ConnectReturnCode::Accepted);
        assert_eq!(packet.return_code.refusal(), None);
    }

    #[test]
    fn test_connack_session_present() {
        let packet = decode(&[0x20, 0x02, 0x01, 0x00]).unwrap();
        assert!(packet.session_present);
    }

    #[test]
    fn test_connack_refusals() {
        for (code, expect) in [
            (1u8, MqttError::ProtocolLevel),
            (2, MqttError::ClientId),
            (3, MqttError::Unavailable),
            (4, MqttError::AuthBad),
            (5, MqttError::Auth),
        ] {
            let packet = decode(&[0x20, 0x02, 0x00, code]).unwrap();
            assert_eq!(packet.return_code.refusal(), Some(expect));
        }
    }

    #[test]
    fn test_connack_reserved_flags_rejected() {
        assert!(decode(&[0x20, 0x02, 0x02, 0x00]).is_err());
    }

    #[test]
    fn test_connack_reserved_code_rejected() {
        assert!(decode(&[0x20, 0x02, 0x00, 0x06]).is_err());
    }

    #[test]
    fn test_connack_round_trip() {
        let packet = ConnAckPacket {
            session_present: true,
            return_code: ConnectReturnCode::Accepted,
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        assert_eq!(decode(&buf).unwrap(), packet);
    }
}
