use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{read_binary, read_u16, write_variable_int};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, PacketType};
use crate::types::QoS;

const DUP_FLAG: u8 = 0x08;
const RETAIN_FLAG: u8 = 0x01;

/// An application message in transit, either direction.
///
/// Decoded topic and payload are zero-copy slices of the reader's frame
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic: Bytes,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl PublishPacket {
    pub fn new(topic: &str, payload: &[u8], qos: QoS) -> Self {
        Self {
            topic: Bytes::copy_from_slice(topic.as_bytes()),
            packet_id: None,
            payload: Bytes::copy_from_slice(payload),
            qos,
            retain: false,
            dup: false,
        }
    }

    pub fn with_packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    fn flags(&self) -> u8 {
        let mut flags = (self.qos as u8) << 1;
        if self.dup {
            flags |= DUP_FLAG;
        }
        if self.retain {
            flags |= RETAIN_FLAG;
        }
        flags
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert_eq!(self.qos == QoS::AtMostOnce, self.packet_id.is_none());

        let mut remaining = 2 + self.topic.len() + self.payload.len();
        if self.packet_id.is_some() {
            remaining += 2;
        }

        buf.put_u8((PacketType::Publish as u8) << 4 | self.flags());
        write_variable_int(buf, remaining as u32);
        buf.put_u16(self.topic.len() as u16);
        buf.put_slice(&self.topic);
        if let Some(id) = self.packet_id {
            buf.put_u16(id);
        }
        buf.put_slice(&self.payload);
    }

    /// Complete frame, ready for the wire or the inflight store.
    pub fn to_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(7 + self.topic.len() + self.payload.len());
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode_body(header: &FixedHeader, mut body: Bytes) -> Result<Self> {
        let qos = QoS::try_from((header.flags >> 1) & 0x03)?;
        let dup = header.flags & DUP_FLAG != 0;
        let retain = header.flags & RETAIN_FLAG != 0;

        let topic = read_binary(&mut body)?;
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            let id = read_u16(&mut body)?;
            if id == 0 {
                return Err(MqttError::Protocol(
                    "PUBLISH with packet identifier 0".to_string(),
                ));
            }
            Some(id)
        };

        Ok(PublishPacket {
            topic,
            packet_id,
            payload: body,
            qos,
            retain,
            dup,
        })
    }
}

/// Sets the DUP bit on an already-encoded PUBLISH frame.
///
/// Returns false (and leaves the frame alone) when the bytes are not a
/// PUBLISH, e.g. a stored PUBREL template during session resumption.
pub fn mark_duplicate(frame: &mut [u8]) -> bool {
    match frame.first() {
        Some(&first) if first >> 4 == PacketType::Publish as u8 => {
            frame[0] = first | DUP_FLAG;
            true
        }
        _ => false,
    }
}
