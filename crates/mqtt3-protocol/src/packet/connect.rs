use bytes::{BufMut, BytesMut};

use crate::encoding::{write_binary, write_string, write_variable_int};
use crate::packet::PacketType;
use crate::types::ConnectOptions;

const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4;

const FLAG_USER_NAME: u8 = 1 << 7;
const FLAG_PASSWORD: u8 = 1 << 6;
const FLAG_WILL_RETAIN: u8 = 1 << 5;
const FLAG_WILL: u8 = 1 << 2;
const FLAG_CLEAN_SESSION: u8 = 1 << 1;

/// The session-opening request. Clients only ever encode this packet.
#[derive(Debug, Clone)]
pub struct ConnectPacket {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive_secs: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<crate::types::Will>,
}

impl ConnectPacket {
    pub fn from_options(options: &ConnectOptions) -> Self {
        Self {
            client_id: options.client_id.clone(),
            clean_session: options.clean_session,
            keep_alive_secs: options.keep_alive.as_secs().try_into().unwrap_or(u16::MAX),
            username: options.username.clone(),
            password: options.password.clone(),
            will: options.will.clone(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        let mut payload_len = 2 + self.client_id.len();
        if let Some(will) = &self.will {
            flags |= FLAG_WILL | (will.qos as u8) << 3;
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
            payload_len += 2 + will.topic.len();
            payload_len += 2 + will.message.len();
        }
        if let Some(username) = &self.username {
            flags |= FLAG_USER_NAME;
            payload_len += 2 + username.len();
        }
        if let Some(password) = &self.password {
            flags |= FLAG_PASSWORD;
            payload_len += 2 + password.len();
        }
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }

        buf.put_u8((PacketType::Connect as u8) << 4);
        write_variable_int(buf, (10 + payload_len) as u32);

        // variable header
        write_binary(buf, PROTOCOL_NAME);
        buf.put_u8(PROTOCOL_LEVEL);
        buf.put_u8(flags);
        buf.put_u16(self.keep_alive_secs);

        // payload
        write_string(buf, &self.client_id);
        if let Some(will) = &self.will {
            write_string(buf, &will.topic);
            write_binary(buf, &will.message);
        }
        if let Some(username) = &self.username {
            write_string(buf, username);
        }
        if let Some(password) = &self.password {
            write_binary(buf, password);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QoS, Will};
    use std::time::Duration;

    #[test]
    fn test_connect_minimal() {
        let packet = ConnectPacket {
            client_id: "c1".to_string(),
            clean_session: true,
            keep_alive_secs: 60,
            username: None,
            password: None,
            will: None,
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);

        assert_eq!(
            &buf[..],
            &[
                0x10, 14, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 60, // variable header
                0x00, 0x02, b'c', b'1', // client identifier
            ]
        );
    }

    #[test]
    fn test_connect_with_credentials_and_will() {
        let packet = ConnectPacket {
            client_id: "c".to_string(),
            clean_session: false,
            keep_alive_secs: 0,
            username: Some("u".to_string()),
            password: Some(b"p".to_vec()),
            will: Some(Will {
                topic: "w".to_string(),
                message: b"bye".to_vec(),
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);

        // user name + password + will retain + will QoS 1 + will flag
        let flags = buf[9];
        assert_eq!(flags, 0x80 | 0x40 | 0x20 | 0x08 | 0x04);

        // payload order: client id, will topic, will message, user name, password
        assert_eq!(
            &buf[12..],
            &[
                0x00, 0x01, b'c', 0x00, 0x01, b'w', 0x00, 0x03, b'b', b'y', b'e', 0x00, 0x01,
                b'u', 0x00, 0x01, b'p',
            ]
        );
    }

    #[test]
    fn test_connect_keep_alive_saturates() {
        let options = ConnectOptions::new("c1").with_keep_alive(Duration::from_secs(1 << 20));
        let packet = ConnectPacket::from_options(&options);
        assert_eq!(packet.keep_alive_secs, u16::MAX);
    }
}
