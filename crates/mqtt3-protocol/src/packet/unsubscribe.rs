use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{write_string, write_variable_int};
use crate::packet::PacketType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

impl UnsubscribePacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(!self.filters.is_empty());

        let remaining: usize = 2 + self.filters.iter().map(|f| 2 + f.len()).sum::<usize>();

        // reserved flags 0b0010
        buf.put_u8((PacketType::Unsubscribe as u8) << 4 | 0x02);
        write_variable_int(buf, remaining as u32);
        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            write_string(buf, filter);
        }
    }

    pub fn to_frame(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsubscribe_wire_bytes() {
        let packet = UnsubscribePacket {
            packet_id: 9,
            filters: vec!["t/+".to_string()],
        };
        let frame = packet.to_frame();
        assert_eq!(
            &frame[..],
            &[0xA2, 0x07, 0x00, 0x09, 0x00, 0x03, b't', b'/', b'+']
        );
    }

    #[test]
    fn test_unsubscribe_multiple() {
        let packet = UnsubscribePacket {
            packet_id: 10,
            filters: vec!["a".to_string(), "b/c".to_string()],
        };
        let frame = packet.to_frame();
        assert_eq!(frame[1] as usize, frame.len() - 2);
    }
}
