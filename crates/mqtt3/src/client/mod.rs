//! The client: public operations, the connect handshake, and connection
//! lifecycle. One reader task and one writer task run per connection; every
//! other piece of state is session-wide and survives reconnects.

mod reader;
pub(crate) mod writer;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use mqtt3_protocol::encoding::REMAINING_LENGTH_MAX;
use mqtt3_protocol::packet::publish::mark_duplicate;
use mqtt3_protocol::packet::{ConnectPacket, PublishPacket, SubscribePacket, UnsubscribePacket};
use mqtt3_protocol::packet::PINGREQ_FRAME;
use mqtt3_protocol::{
    validate_topic_filter, validate_topic_name, ConnectOptions, ConnectResult, MqttError, QoS,
    Result,
};

use crate::session::{AckUpdate, SessionState};
use crate::store::{MemoryStore, Store, StoreKey};
use crate::transport::{Dialer, UnifiedWriter};

use writer::{PingState, WriteJob};

/// Admission bound between application calls and the writer loop.
const WRITE_QUEUE_DEPTH: usize = 64;

/// Inbound deliveries buffered ahead of `read_slices`. A single slot keeps
/// the QoS acknowledgements trailing application consumption.
const DELIVERY_QUEUE_DEPTH: usize = 1;

/// One inbound application message.
#[derive(Debug)]
pub enum InboundMessage {
    /// Message and topic are slices of the reader's frame buffer.
    Slices { message: Bytes, topic: Bytes },
    /// Payload above the in-memory threshold, consumed via
    /// [`BigMessage::read_all`].
    Big(BigMessage),
}

/// Handle on an inbound payload that exceeds the in-memory threshold.
///
/// The reader forwards payload bytes in chunks as they arrive off the wire;
/// dropping the handle discards the remainder without stalling the session.
#[derive(Debug)]
pub struct BigMessage {
    pub size: usize,
    pub topic: Bytes,
    pub(crate) chunks: mpsc::Receiver<Bytes>,
}

impl BigMessage {
    /// Streams the full payload into memory.
    ///
    /// Fails with [`MqttError::Down`] when the connection is lost before the
    /// final chunk.
    pub async fn read_all(mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(self.size);
        while let Some(chunk) = self.chunks.recv().await {
            payload.extend_from_slice(&chunk);
        }
        if payload.len() < self.size {
            return Err(MqttError::Down);
        }
        Ok(payload)
    }
}

/// Acknowledgement stream of one QoS ≥ 1 publish.
///
/// Yields `Ok(())` once the terminal acknowledgement arrives, then ends.
/// Transient `Err(Down)` values report connection losses along the way; the
/// persisted record makes the exchange resume on the next connect.
#[derive(Debug)]
pub struct PublishAck {
    rx: mpsc::UnboundedReceiver<AckUpdate>,
}

impl PublishAck {
    /// The next acknowledgement update; `None` once the stream ends.
    pub async fn recv(&mut self) -> Option<AckUpdate> {
        self.rx.recv().await
    }

    /// Waits out transient errors until the exchange completes or the client
    /// closes.
    pub async fn wait(mut self) -> Result<()> {
        while let Some(update) = self.rx.recv().await {
            match update {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(MqttError::Closed)
    }
}

/// Per-filter subscribe outcome.
#[derive(Debug)]
pub struct SubscribeResult {
    pub filter: String,
    /// The granted QoS, or [`MqttError::SubscribeDenied`].
    pub grant: Result<QoS>,
}

struct ConnHandles {
    app_tx: mpsc::Sender<WriteJob>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

pub(crate) struct ClientInner {
    pub(crate) options: ConnectOptions,
    dialer: Dialer,
    pub(crate) session: SessionState,
    pub(crate) ping: Mutex<PingState>,
    conn: Mutex<Option<ConnHandles>>,
    connected: AtomicBool,
    closed: AtomicBool,
    pub(crate) delivery_tx: mpsc::Sender<InboundMessage>,
    delivery_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    read_error: Mutex<Option<MqttError>>,
    read_notify: Notify,
}

impl ClientInner {
    fn ensure_live(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MqttError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MqttError::Down);
        }
        Ok(())
    }

    fn app_tx(&self) -> Option<mpsc::Sender<WriteJob>> {
        self.conn.lock().as_ref().map(|h| h.app_tx.clone())
    }

    /// Races an operation against the caller's quit signal and the session's
    /// pause timeout.
    async fn with_quit<T>(
        &self,
        quit: impl Future<Output = ()>,
        op: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::pin!(quit);
        tokio::pin!(op);
        tokio::select! {
            () = &mut quit => Err(MqttError::Canceled),
            result = tokio::time::timeout(self.options.pause_timeout, &mut op) => {
                match result {
                    Ok(r) => r,
                    Err(_) => Err(MqttError::Canceled),
                }
            }
        }
    }

    fn teardown(&self, stash: Option<MqttError>) {
        let Some(handles) = self.conn.lock().take() else {
            return;
        };
        self.connected.store(false, Ordering::SeqCst);
        handles.reader_handle.abort();
        handles.writer_handle.abort();
        self.session.connection_lost();
        self.ping.lock().reset();

        if let Some(err) = stash {
            if !self.closed.load(Ordering::SeqCst) {
                let mut slot = self.read_error.lock();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
        }
        self.read_notify.notify_one();
    }

    pub(crate) fn connection_lost(&self, err: MqttError) {
        tracing::info!(error = %err, "connection lost");
        self.teardown(Some(err));
    }

    fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // waiters learn Closed before the connection fan-out runs on them
        self.session.close();
        self.teardown(None);
        self.read_notify.notify_one();
        tracing::debug!("client closed");
    }
}

/// An MQTT 3.1.1 session toward one broker.
///
/// Cheap to clone through its inner `Arc`; all operations take `&self` and
/// may run concurrently from any task.
pub struct MqttClient {
    inner: Arc<ClientInner>,
}

impl MqttClient {
    pub fn new(options: ConnectOptions, store: Arc<dyn Store>, dialer: Dialer) -> Self {
        let request_limit = options.request_limit;
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_QUEUE_DEPTH);
        Self {
            inner: Arc::new(ClientInner {
                session: SessionState::new(store, request_limit),
                options,
                dialer,
                ping: Mutex::new(PingState::default()),
                conn: Mutex::new(None),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                delivery_tx,
                delivery_rx: tokio::sync::Mutex::new(delivery_rx),
                read_error: Mutex::new(None),
                read_notify: Notify::new(),
            }),
        }
    }

    /// A session without resumption: inflight state lives in memory only.
    pub fn volatile_session(client_id: impl Into<String>, dialer: Dialer) -> Self {
        Self::new(
            ConnectOptions::new(client_id),
            Arc::new(MemoryStore::new()),
            dialer,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Dials the broker and runs the connect handshake.
    ///
    /// On acceptance, every persisted outbound exchange is re-sent (publishes
    /// with DUP set, PUBREL templates verbatim) before any new traffic, then
    /// the reader and writer loops start.
    pub async fn connect(&self) -> Result<ConnectResult> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MqttError::Closed);
        }
        self.inner.options.validate()?;
        // a half-dead previous connection is dropped, not reused
        self.inner.teardown(None);

        let wire_timeout = self.inner.options.wire_timeout;
        let retry_delay = self.inner.options.retry_delay;

        let transport = self.inner.dialer.dial(wire_timeout).await?;
        let (mut read_half, mut write_half) = transport.into_split();

        let mut connect_frame = BytesMut::with_capacity(128);
        ConnectPacket::from_options(&self.inner.options).encode(&mut connect_frame);
        writer::write_frame(&mut write_half, &connect_frame, wire_timeout, retry_delay).await?;

        // the acknowledgement is exactly 4 bytes; validate them as they come
        let mut ack = BytesMut::with_capacity(64);
        while ack.len() < 4 {
            let n = tokio::time::timeout(wire_timeout, read_half.read_buf(&mut ack))
                .await
                .map_err(|_| MqttError::Io("connect acknowledge deadline expired".to_string()))?
                .map_err(MqttError::from)?;
            if n == 0 {
                return Err(MqttError::Io(
                    "connection closed during connect handshake".to_string(),
                ));
            }
            if !ack.is_empty() && ack[0] != 0x20 {
                return Err(MqttError::Protocol(format!(
                    "received packet type {} on connect",
                    ack[0] >> 4
                )));
            }
            if ack.len() > 1 && ack[1] != 2 {
                return Err(MqttError::Protocol(format!(
                    "connect acknowledge remaining length {} instead of 2",
                    ack[1]
                )));
            }
            if ack.len() > 2 && ack[2] > 1 {
                return Err(MqttError::Protocol(format!(
                    "reserved connect acknowledge flags {:#04x}",
                    ack[2]
                )));
            }
        }
        let session_present = ack[2] == 1;
        if let Some(refusal) = (ack[3] != 0).then(|| MqttError::connect_refusal(ack[3])) {
            let _ = write_half.shutdown().await;
            return Err(refusal);
        }
        ack.advance(4);

        self.resume(&mut write_half).await?;

        let (app_tx, app_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        // connection_lost contends on the conn lock; the handles must be in
        // the slot before either loop can observe a failure
        {
            let mut conn = self.inner.conn.lock();

            let reader_inner = Arc::clone(&self.inner);
            let reader_handle = tokio::spawn(async move {
                match reader::reader_task(Arc::clone(&reader_inner), read_half, ack, ack_tx).await
                {
                    Ok(()) => {
                        tracing::debug!("reader loop ended at end of stream");
                        reader_inner.connection_lost(MqttError::Down);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reader loop failed");
                        reader_inner.connection_lost(e);
                    }
                }
            });

            let writer_inner = Arc::clone(&self.inner);
            let writer_handle = tokio::spawn(async move {
                match writer::writer_task(Arc::clone(&writer_inner), write_half, ack_rx, app_rx)
                    .await
                {
                    Ok(()) => tracing::debug!("writer loop ended"),
                    Err(e) => {
                        tracing::warn!(error = %e, "writer loop failed");
                        writer_inner.connection_lost(e);
                    }
                }
            });

            *conn = Some(ConnHandles {
                app_tx,
                reader_handle,
                writer_handle,
            });
            self.inner.connected.store(true, Ordering::SeqCst);
        }
        tracing::info!(
            host = self.inner.dialer.host(),
            port = self.inner.dialer.port(),
            session_present,
            "connected"
        );

        Ok(ConnectResult { session_present })
    }

    /// Replays every stored outbound exchange ahead of new traffic.
    async fn resume(&self, write_half: &mut UnifiedWriter) -> Result<()> {
        let wire_timeout = self.inner.options.wire_timeout;
        let retry_delay = self.inner.options.retry_delay;

        let mut keys = self.inner.session.store.list()?;
        keys.sort();
        for key in keys {
            if !key.is_local() {
                // inbound records only gate redelivery; nothing to send
                continue;
            }
            let Some(mut frame) = self.inner.session.store.load(key)? else {
                continue;
            };
            mark_duplicate(&mut frame);
            writer::write_frame(write_half, &frame, wire_timeout, retry_delay).await?;
            self.inner.session.packet_ids.reclaim(key.packet_id());
            tracing::debug!(packet_id = key.packet_id(), "resumed inflight exchange");
        }
        Ok(())
    }

    /// Fire-and-forget publish: completes when the bytes are written.
    pub async fn publish(
        &self,
        quit: impl Future<Output = ()>,
        message: &[u8],
        topic: &str,
    ) -> Result<()> {
        self.publish_at_most_once(quit, message, topic, false).await
    }

    /// Like [`publish`](Self::publish), with the RETAIN flag set so the
    /// broker keeps the message for future subscribers.
    pub async fn publish_retained(
        &self,
        quit: impl Future<Output = ()>,
        message: &[u8],
        topic: &str,
    ) -> Result<()> {
        self.publish_at_most_once(quit, message, topic, true).await
    }

    async fn publish_at_most_once(
        &self,
        quit: impl Future<Output = ()>,
        message: &[u8],
        topic: &str,
        retain: bool,
    ) -> Result<()> {
        validate_topic_name(topic)?;
        check_message_size(topic, message, QoS::AtMostOnce)?;
        self.inner.ensure_live()?;
        let app_tx = self.inner.app_tx().ok_or(MqttError::Down)?;

        let frame = PublishPacket::new(topic, message, QoS::AtMostOnce)
            .with_retain(retain)
            .to_frame();
        let (done_tx, done_rx) = oneshot::channel();

        self.inner
            .with_quit(quit, async move {
                app_tx
                    .send(WriteJob::Frame {
                        frame,
                        done: Some(done_tx),
                    })
                    .await
                    .map_err(|_| MqttError::Down)?;
                match done_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(MqttError::Abandoned),
                }
            })
            .await
    }

    /// At-least-once publish. Returns right after the exchange is persisted;
    /// the returned stream reports the PUBACK.
    pub async fn publish_at_least_once(&self, message: &[u8], topic: &str) -> Result<PublishAck> {
        self.publish_persisted(message, topic, QoS::AtLeastOnce, false)
            .await
    }

    pub async fn publish_at_least_once_retained(
        &self,
        message: &[u8],
        topic: &str,
    ) -> Result<PublishAck> {
        self.publish_persisted(message, topic, QoS::AtLeastOnce, true)
            .await
    }

    /// Exactly-once publish; the stream completes on PUBCOMP.
    pub async fn publish_exactly_once(&self, message: &[u8], topic: &str) -> Result<PublishAck> {
        self.publish_persisted(message, topic, QoS::ExactlyOnce, false)
            .await
    }

    pub async fn publish_exactly_once_retained(
        &self,
        message: &[u8],
        topic: &str,
    ) -> Result<PublishAck> {
        self.publish_persisted(message, topic, QoS::ExactlyOnce, true)
            .await
    }

    async fn publish_persisted(
        &self,
        message: &[u8],
        topic: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishAck> {
        validate_topic_name(topic)?;
        check_message_size(topic, message, qos)?;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MqttError::Closed);
        }

        let id = self.inner.session.packet_ids.reserve()?;
        let frame = PublishPacket::new(topic, message, qos)
            .with_packet_id(id)
            .with_retain(retain)
            .to_frame();
        if let Err(e) = self.inner.session.store.persist(StoreKey::local(id), &frame) {
            self.inner.session.packet_ids.free(id);
            return Err(e);
        }
        let rx = self.inner.session.register_publish(id);

        // the record is what guarantees delivery; a live connection just
        // speeds it up
        if let Some(app_tx) = self.inner.app_tx() {
            let _ = app_tx.send(WriteJob::Frame { frame, done: None }).await;
        }
        Ok(PublishAck { rx })
    }

    /// Requests a subscription for every filter, each with its maximum QoS.
    ///
    /// The identifier stays reserved until the matching SUBACK arrives, even
    /// when the caller quits early.
    pub async fn subscribe(
        &self,
        quit: impl Future<Output = ()>,
        filters: &[(&str, QoS)],
    ) -> Result<Vec<SubscribeResult>> {
        if filters.is_empty() {
            return Err(MqttError::TopicFilter(String::new()));
        }
        for (filter, _) in filters {
            validate_topic_filter(filter)?;
        }
        self.inner.ensure_live()?;
        let app_tx = self.inner.app_tx().ok_or(MqttError::Down)?;

        let id = self.inner.session.packet_ids.reserve()?;
        let frame = SubscribePacket {
            packet_id: id,
            filters: filters
                .iter()
                .map(|(filter, max_qos)| ((*filter).to_string(), *max_qos))
                .collect(),
        }
        .to_frame();
        let suback_rx = self.inner.session.register_suback(id);

        self.inner
            .with_quit(quit, async move {
                app_tx
                    .send(WriteJob::Frame { frame, done: None })
                    .await
                    .map_err(|_| MqttError::Down)?;

                let suback = match suback_rx.await {
                    Ok(Ok(suback)) => suback,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(MqttError::Abandoned),
                };
                if suback.return_codes.len() != filters.len() {
                    return Err(MqttError::Protocol(format!(
                        "SUBACK with {} return codes for {} filters",
                        suback.return_codes.len(),
                        filters.len()
                    )));
                }

                Ok(filters
                    .iter()
                    .zip(suback.return_codes)
                    .map(|((filter, _), code)| SubscribeResult {
                        filter: (*filter).to_string(),
                        grant: code
                            .granted_qos()
                            .ok_or_else(|| MqttError::SubscribeDenied((*filter).to_string())),
                    })
                    .collect())
            })
            .await
    }

    /// Cancels subscriptions. UNSUBACK carries no per-filter result.
    pub async fn unsubscribe(
        &self,
        quit: impl Future<Output = ()>,
        filters: &[&str],
    ) -> Result<()> {
        if filters.is_empty() {
            return Err(MqttError::TopicFilter(String::new()));
        }
        for filter in filters {
            validate_topic_filter(filter)?;
        }
        self.inner.ensure_live()?;
        let app_tx = self.inner.app_tx().ok_or(MqttError::Down)?;

        let id = self.inner.session.packet_ids.reserve()?;
        let frame = UnsubscribePacket {
            packet_id: id,
            filters: filters.iter().map(|f| (*f).to_string()).collect(),
        }
        .to_frame();
        let unsuback_rx = self.inner.session.register_unsuback(id);

        self.inner
            .with_quit(quit, async move {
                app_tx
                    .send(WriteJob::Frame { frame, done: None })
                    .await
                    .map_err(|_| MqttError::Down)?;
                match unsuback_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(MqttError::Abandoned),
                }
            })
            .await
    }

    /// One PINGREQ/PINGRESP roundtrip to validate the connection. A second
    /// concurrent ping is rejected while the first is outstanding.
    pub async fn ping(&self, quit: impl Future<Output = ()>) -> Result<()> {
        self.inner.ensure_live()?;
        let app_tx = self.inner.app_tx().ok_or(MqttError::Down)?;
        let pong_rx = self.inner.session.claim_pong_slot()?;

        let result = self
            .inner
            .with_quit(quit, async move {
                app_tx
                    .send(WriteJob::Frame {
                        frame: Bytes::from_static(&PINGREQ_FRAME),
                        done: None,
                    })
                    .await
                    .map_err(|_| MqttError::Down)?;
                pong_rx.await.map_err(|_| MqttError::Abandoned)
            })
            .await;

        if result.is_err() {
            self.inner.session.clear_pong_slot();
        }
        result
    }

    /// Graceful termination: DISCONNECT is written, the broker discards the
    /// will, and the client transitions to closed.
    pub async fn disconnect(&self, quit: impl Future<Output = ()>) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MqttError::Closed);
        }
        let app_tx = self.inner.app_tx().ok_or(MqttError::Down)?;
        let (done_tx, done_rx) = oneshot::channel();

        let result = self
            .inner
            .with_quit(quit, async move {
                app_tx
                    .send(WriteJob::Disconnect { done: done_tx })
                    .await
                    .map_err(|_| MqttError::Down)?;
                match done_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(MqttError::Abandoned),
                }
            })
            .await;

        self.inner.terminate();
        result
    }

    /// Aborts the connection without DISCONNECT; the broker may publish the
    /// will. Idempotent.
    pub fn close(&self) {
        self.inner.terminate();
    }

    /// The next inbound application message.
    ///
    /// Slices stay valid for as long as the caller holds them. After a fatal
    /// connection error this returns that error exactly once, then
    /// [`MqttError::Closed`] once the client is closed.
    pub async fn read_slices(&self) -> Result<InboundMessage> {
        let mut rx = self.inner.delivery_rx.lock().await;
        loop {
            match rx.try_recv() {
                Ok(message) => return Ok(message),
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(MqttError::Closed),
            }
            if let Some(err) = self.inner.read_error.lock().take() {
                return Err(err);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(MqttError::Closed);
            }

            tokio::select! {
                message = rx.recv() => match message {
                    Some(m) => return Ok(m),
                    None => return Err(MqttError::Closed),
                },
                () = self.inner.read_notify.notified() => {}
            }
        }
    }
}

impl Clone for MqttClient {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn check_message_size(topic: &str, message: &[u8], qos: QoS) -> Result<()> {
    let overhead = 2 + topic.len() + if qos == QoS::AtMostOnce { 0 } else { 2 };
    let size = overhead + message.len();
    if size > REMAINING_LENGTH_MAX as usize {
        return Err(MqttError::MessageSize {
            size: message.len(),
            max: REMAINING_LENGTH_MAX as usize - overhead,
        });
    }
    Ok(())
}
