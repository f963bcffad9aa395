//! End-to-end session flows against a scripted broker on a local listener.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use mqtt3::{
    ConnectOptions, Dialer, InboundMessage, MemoryStore, MqttClient, MqttError, QoS, Store,
    StoreKey,
};

const WAIT: Duration = Duration::from_secs(5);

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    (listener, addr)
}

/// One scripted broker connection, speaking raw frames.
struct BrokerConn {
    stream: TcpStream,
    buf: BytesMut,
}

impl BrokerConn {
    async fn accept(listener: TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("no connection within the deadline")
            .unwrap();
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Reads the CONNECT packet and acknowledges with the given return code.
    async fn handshake(mut self, return_code: u8) -> Self {
        let connect = self.read_frame().await;
        assert_eq!(connect[0] >> 4, 1, "expected CONNECT, got {connect:#04x?}");
        assert_eq!(&connect[2..8], b"\x00\x04MQTT");
        assert_eq!(connect[8], 4, "protocol level");
        self.send(&[0x20, 0x02, 0x00, return_code]).await;
        self
    }

    async fn read_frame(&mut self) -> Vec<u8> {
        loop {
            if let Some(frame) = self.split_frame() {
                return frame;
            }
            let n = timeout(WAIT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("no frame within the deadline")
                .unwrap();
            assert!(n > 0, "peer closed while awaiting a frame");
        }
    }

    fn split_frame(&mut self) -> Option<Vec<u8>> {
        let mut remaining = 0usize;
        let mut idx = 1;
        loop {
            if idx >= self.buf.len() {
                return None;
            }
            let byte = self.buf[idx];
            remaining |= usize::from(byte & 0x7F) << (7 * (idx - 1));
            idx += 1;
            if byte & 0x80 == 0 {
                break;
            }
            assert!(idx <= 4, "overlong remaining length from client");
        }
        let total = idx + remaining;
        if self.buf.len() < total {
            return None;
        }
        Some(self.buf.split_to(total).to_vec())
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn expect_eof(&mut self) {
        let mut probe = [0u8; 16];
        let n = timeout(WAIT, self.stream.read(&mut probe))
            .await
            .expect("no close within the deadline")
            .unwrap();
        assert_eq!(n, 0, "expected end of stream");
    }
}

fn client_with_store(addr: &str, options: ConnectOptions, store: Arc<MemoryStore>) -> MqttClient {
    MqttClient::new(options, store, Dialer::new(addr).unwrap())
}

/// Client plus an accepted, acknowledged broker connection.
async fn connected(options: ConnectOptions) -> (MqttClient, Arc<MemoryStore>, BrokerConn) {
    let (listener, addr) = listener().await;
    let store = Arc::new(MemoryStore::new());
    let client = client_with_store(&addr, options, Arc::clone(&store));

    let accept = tokio::spawn(async move { BrokerConn::accept(listener).await.handshake(0).await });
    client.connect().await.unwrap();
    (client, store, accept.await.unwrap())
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{what} did not happen within the deadline");
}

#[tokio::test]
async fn test_qos0_publish_wire_bytes() {
    let (client, _store, mut conn) = connected(ConnectOptions::new("c1")).await;

    client.publish(pending(), b"hello", "t/a").await.unwrap();

    let frame = conn.read_frame().await;
    assert_eq!(
        frame,
        [0x30, 0x0A, 0x00, 0x03, b't', b'/', b'a', b'h', b'e', b'l', b'l', b'o']
    );
}

#[tokio::test]
async fn test_qos1_round_trip() {
    let (client, store, mut conn) = connected(ConnectOptions::new("c1")).await;

    let ack = client.publish_at_least_once(b"x", "t/b").await.unwrap();
    assert!(store.load(StoreKey::local(1)).unwrap().is_some());

    let frame = conn.read_frame().await;
    assert_eq!(frame[0], 0x32, "PUBLISH with QoS 1");
    assert_eq!(&frame[2..7], b"\x00\x03t/b");
    assert_eq!(&frame[7..9], &[0x00, 0x01], "first identifier");
    assert_eq!(&frame[9..], b"x");

    conn.send(&[0x40, 0x02, 0x00, 0x01]).await;
    ack.wait().await.unwrap();
    assert!(store.load(StoreKey::local(1)).unwrap().is_none());
}

#[tokio::test]
async fn test_qos2_pubrel_resume() {
    let (listener, addr) = listener().await;
    let store = Arc::new(MemoryStore::new());
    let pubrel = [0x62, 0x02, 0x00, 0x07];
    store.persist(StoreKey::local(7), &pubrel).unwrap();

    let client = client_with_store(&addr, ConnectOptions::new("c1"), Arc::clone(&store));
    let accept = tokio::spawn(async move { BrokerConn::accept(listener).await.handshake(0).await });
    client.connect().await.unwrap();
    let mut conn = accept.await.unwrap();

    // the stored release precedes any new traffic, verbatim
    assert_eq!(conn.read_frame().await, pubrel);

    conn.send(&[0x70, 0x02, 0x00, 0x07]).await;
    wait_until("stored release deletion", || {
        store.load(StoreKey::local(7)).unwrap().is_none()
    })
    .await;
}

#[tokio::test]
async fn test_restart_resends_publish_with_dup() {
    let (listener, addr) = listener().await;
    let store = Arc::new(MemoryStore::new());

    // previous process run: persisted but never sent
    {
        let offline = client_with_store(&addr, ConnectOptions::new("c1"), Arc::clone(&store));
        let _ack = offline.publish_at_least_once(b"x", "t/b").await.unwrap();
    }

    let client = client_with_store(&addr, ConnectOptions::new("c1"), Arc::clone(&store));
    let accept = tokio::spawn(async move { BrokerConn::accept(listener).await.handshake(0).await });
    client.connect().await.unwrap();
    let mut conn = accept.await.unwrap();

    let frame = conn.read_frame().await;
    assert_eq!(frame[0], 0x3A, "resent PUBLISH carries DUP");
    assert_eq!(&frame[7..9], &[0x00, 0x01]);

    conn.send(&[0x40, 0x02, 0x00, 0x01]).await;
    wait_until("record deletion", || {
        store.load(StoreKey::local(1)).unwrap().is_none()
    })
    .await;
}

#[tokio::test]
async fn test_oversized_inbound_skipped() {
    let options = ConnectOptions::new("c1").with_in_size_limit(16);
    let (client, _store, mut conn) = connected(options).await;

    let mut oversized = vec![0x30, 100];
    oversized.extend_from_slice(&[0xAB; 100]);
    conn.send(&oversized).await;

    // the stream stays synchronized: the next packet parses and delivers
    conn.send(&[0x30, 0x05, 0x00, 0x01, b't', b'o', b'k']).await;

    match timeout(WAIT, client.read_slices()).await.unwrap().unwrap() {
        InboundMessage::Slices { message, topic } => {
            assert_eq!(&topic[..], b"t");
            assert_eq!(&message[..], b"ok");
        }
        other => panic!("unexpected delivery {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_refused() {
    let (listener, addr) = listener().await;
    let client = MqttClient::volatile_session("c1", Dialer::new(&addr).unwrap());

    let accept = tokio::spawn(async move { BrokerConn::accept(listener).await.handshake(5).await });
    assert_eq!(client.connect().await.err(), Some(MqttError::Auth));

    // refusal ends the connection; no loops were started
    accept.await.unwrap().expect_eof().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_subscribe_grants_and_denial() {
    let (client, _store, mut conn) = connected(ConnectOptions::new("c1")).await;

    let subscriber = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .subscribe(
                    pending(),
                    &[("t/+", QoS::ExactlyOnce), ("u/#", QoS::AtLeastOnce)],
                )
                .await
        })
    };

    let frame = conn.read_frame().await;
    assert_eq!(frame[0], 0x82);
    assert_eq!(&frame[4..10], b"\x00\x03t/+\x02");
    assert_eq!(&frame[10..], b"\x00\x03u/#\x01");

    conn.send(&[0x90, 0x04, frame[2], frame[3], 0x02, 0x80]).await;

    let results = subscriber.await.unwrap().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].filter, "t/+");
    assert_eq!(results[0].grant, Ok(QoS::ExactlyOnce));
    assert_eq!(results[1].filter, "u/#");
    assert_eq!(
        results[1].grant,
        Err(MqttError::SubscribeDenied("u/#".to_string()))
    );
}

#[tokio::test]
async fn test_unsubscribe_round_trip() {
    let (client, _store, mut conn) = connected(ConnectOptions::new("c1")).await;

    let unsubscriber = {
        let client = client.clone();
        tokio::spawn(async move { client.unsubscribe(pending(), &["t/+"]).await })
    };

    let frame = conn.read_frame().await;
    assert_eq!(frame[0], 0xA2);
    conn.send(&[0xB0, 0x02, frame[2], frame[3]]).await;

    unsubscriber.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_ping_roundtrip() {
    let (client, _store, mut conn) = connected(ConnectOptions::new("c1")).await;

    let pinger = {
        let client = client.clone();
        tokio::spawn(async move { client.ping(pending()).await })
    };

    assert_eq!(conn.read_frame().await, [0xC0, 0x00]);
    conn.send(&[0xD0, 0x00]).await;
    pinger.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_keepalive_pingreq_on_idle() {
    let options = ConnectOptions::new("c1").with_keep_alive(Duration::from_secs(1));
    let (_client, _store, mut conn) = connected(options).await;

    // idle for 0.9 · keepalive produces a PINGREQ
    assert_eq!(conn.read_frame().await, [0xC0, 0x00]);
    conn.send(&[0xD0, 0x00]).await;

    // the timer re-arms for another period
    assert_eq!(conn.read_frame().await, [0xC0, 0x00]);
    conn.send(&[0xD0, 0x00]).await;
}

#[tokio::test]
async fn test_inbound_qos1_delivery_then_puback() {
    let (client, _store, mut conn) = connected(ConnectOptions::new("c1")).await;

    conn.send(&[0x32, 0x06, 0x00, 0x01, b't', 0x00, 0x05, b'm'])
        .await;

    match timeout(WAIT, client.read_slices()).await.unwrap().unwrap() {
        InboundMessage::Slices { message, topic } => {
            assert_eq!(&topic[..], b"t");
            assert_eq!(&message[..], b"m");
        }
        other => panic!("unexpected delivery {other:?}"),
    }

    assert_eq!(conn.read_frame().await, [0x40, 0x02, 0x00, 0x05]);
}

#[tokio::test]
async fn test_inbound_qos2_exactly_once_exposure() {
    let (client, store, mut conn) = connected(ConnectOptions::new("c1")).await;

    let publish = [0x34, 0x06, 0x00, 0x01, b't', 0x00, 0x09, b'm'];
    conn.send(&publish).await;

    match timeout(WAIT, client.read_slices()).await.unwrap().unwrap() {
        InboundMessage::Slices { message, .. } => assert_eq!(&message[..], b"m"),
        other => panic!("unexpected delivery {other:?}"),
    }
    assert_eq!(conn.read_frame().await, [0x50, 0x02, 0x00, 0x09]);
    assert!(store.load(StoreKey::remote(9)).unwrap().is_some());

    // a duplicate is acknowledged but never redelivered
    conn.send(&publish).await;
    assert_eq!(conn.read_frame().await, [0x50, 0x02, 0x00, 0x09]);

    conn.send(&[0x62, 0x02, 0x00, 0x09]).await;
    assert_eq!(conn.read_frame().await, [0x70, 0x02, 0x00, 0x09]);
    wait_until("reception record deletion", || {
        store.load(StoreKey::remote(9)).unwrap().is_none()
    })
    .await;

    // only the marker publish comes out next; the duplicate never did
    conn.send(&[0x30, 0x07, 0x00, 0x01, b't', b'd', b'o', b'n', b'e'])
        .await;
    match timeout(WAIT, client.read_slices()).await.unwrap().unwrap() {
        InboundMessage::Slices { message, .. } => assert_eq!(&message[..], b"done"),
        other => panic!("unexpected delivery {other:?}"),
    }
}

#[tokio::test]
async fn test_big_message_streams() {
    let options = ConnectOptions::new("c1").with_big_message_limit(8);
    let (client, _store, mut conn) = connected(options).await;

    let payload = [0x5A; 32];
    let mut publish = vec![0x30, 35, 0x00, 0x01, b't'];
    publish.extend_from_slice(&payload);
    conn.send(&publish).await;

    let big = match timeout(WAIT, client.read_slices()).await.unwrap().unwrap() {
        InboundMessage::Big(big) => big,
        other => panic!("expected a big message, got {other:?}"),
    };
    assert_eq!(big.size, 32);
    assert_eq!(&big.topic[..], b"t");
    assert_eq!(big.read_all().await.unwrap(), payload);
}

#[tokio::test]
async fn test_disconnect_is_graceful_and_terminal() {
    let (client, _store, mut conn) = connected(ConnectOptions::new("c1")).await;

    client.disconnect(pending()).await.unwrap();

    assert_eq!(conn.read_frame().await, [0xE0, 0x00]);
    conn.expect_eof().await;

    assert_eq!(
        client.publish(pending(), b"m", "t").await,
        Err(MqttError::Closed)
    );
    assert_eq!(
        timeout(WAIT, client.read_slices()).await.unwrap().err(),
        Some(MqttError::Closed)
    );
}

#[tokio::test]
async fn test_connection_loss_unblocks_waiters() {
    let (client, store, mut conn) = connected(ConnectOptions::new("c1")).await;

    let mut ack = client.publish_at_least_once(b"x", "t/b").await.unwrap();
    let _ = conn.read_frame().await;

    // broker goes away without acknowledging
    drop(conn);

    assert_eq!(
        timeout(WAIT, ack.recv()).await.unwrap(),
        Some(Err(MqttError::Down))
    );
    // the record stays for resumption
    assert!(store.load(StoreKey::local(1)).unwrap().is_some());
    assert_eq!(
        timeout(WAIT, client.read_slices()).await.unwrap().err(),
        Some(MqttError::Down)
    );
    wait_until("down detection", || !client.is_connected()).await;
}
