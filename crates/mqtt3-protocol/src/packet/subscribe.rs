use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::encoding::{read_u16, write_string, write_variable_int};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, PacketType};
use crate::types::QoS;

/// Subscription request; each filter carries the maximum QoS the client is
/// willing to receive at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

impl SubscribePacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(!self.filters.is_empty());

        let remaining: usize = 2 + self
            .filters
            .iter()
            .map(|(filter, _)| 2 + filter.len() + 1)
            .sum::<usize>();

        // reserved flags 0b0010
        buf.put_u8((PacketType::Subscribe as u8) << 4 | 0x02);
        write_variable_int(buf, remaining as u32);
        buf.put_u16(self.packet_id);
        for (filter, max_qos) in &self.filters {
            write_string(buf, filter);
            buf.put_u8(*max_qos as u8);
        }
    }

    pub fn to_frame(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Per-filter SUBACK result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAckReturnCode {
    GrantedQoS0,
    GrantedQoS1,
    GrantedQoS2,
    Failure,
}

impl TryFrom<u8> for SubAckReturnCode {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(SubAckReturnCode::GrantedQoS0),
            0x01 => Ok(SubAckReturnCode::GrantedQoS1),
            0x02 => Ok(SubAckReturnCode::GrantedQoS2),
            0x80 => Ok(SubAckReturnCode::Failure),
            other => Err(MqttError::Protocol(format!(
                "reserved SUBACK return code {other:#04x}"
            ))),
        }
    }
}

impl SubAckReturnCode {
    pub fn granted_qos(self) -> Option<QoS> {
        match self {
            SubAckReturnCode::GrantedQoS0 => Some(QoS::AtMostOnce),
            SubAckReturnCode::GrantedQoS1 => Some(QoS::AtLeastOnce),
            SubAckReturnCode::GrantedQoS2 => Some(QoS::ExactlyOnce),
            SubAckReturnCode::Failure => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub return_codes: Vec<SubAckReturnCode>,
}

impl SubAckPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((PacketType::SubAck as u8) << 4);
        write_variable_int(buf, (2 + self.return_codes.len()) as u32);
        buf.put_u16(self.packet_id);
        for code in &self.return_codes {
            let byte = match code {
                SubAckReturnCode::GrantedQoS0 => 0x00,
                SubAckReturnCode::GrantedQoS1 => 0x01,
                SubAckReturnCode::GrantedQoS2 => 0x02,
                SubAckReturnCode::Failure => 0x80,
            };
            buf.put_u8(byte);
        }
    }

    pub fn decode_body(header: &FixedHeader, mut body: Bytes) -> Result<Self> {
        if header.remaining_length < 3 {
            return Err(MqttError::Protocol(format!(
                "SUBACK with remaining length {}",
                header.remaining_length
            )));
        }
        let packet_id = read_u16(&mut body)?;
        if packet_id == 0 {
            return Err(MqttError::Protocol(
                "SUBACK with packet identifier 0".to_string(),
            ));
        }
        let mut return_codes = Vec::with_capacity(body.remaining());
        while body.has_remaining() {
            return_codes.push(SubAckReturnCode::try_from(body.get_u8())?);
        }
        Ok(SubAckPacket {
            packet_id,
            return_codes,
        })
    }
}
