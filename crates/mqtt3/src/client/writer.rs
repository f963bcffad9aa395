//! The writer loop: sole owner of the connection's write half.
//!
//! Three sources drain in priority order: acknowledgements produced by the
//! reader, application-submitted frames, and the keepalive timer. A packet is
//! always written whole; partial writes resume from the offset after a
//! temporary-error pause, anything else tears the connection down.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use mqtt3_protocol::packet::{DISCONNECT_FRAME, PINGREQ_FRAME};
use mqtt3_protocol::{MqttError, Result};

use crate::client::ClientInner;
use crate::transport::UnifiedWriter;

/// Application-side entries on the writer queue.
pub(crate) enum WriteJob {
    Frame {
        frame: Bytes,
        /// Fired once the bytes are on the wire; QoS 0 completions hang off
        /// this, QoS ≥ 1 completions wait for the acknowledgement instead.
        done: Option<oneshot::Sender<Result<()>>>,
    },
    Disconnect {
        done: oneshot::Sender<Result<()>>,
    },
}

/// Ping bookkeeping shared with the reader, which records PINGRESP arrivals.
#[derive(Debug, Default)]
pub(crate) struct PingState {
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

impl PingState {
    pub(crate) fn record_ping_sent(&mut self) {
        self.last_ping = Some(Instant::now());
    }

    pub(crate) fn record_pong(&mut self) {
        self.last_pong = Some(Instant::now());
    }

    pub(crate) fn awaiting_pong(&self) -> bool {
        match (self.last_ping, self.last_pong) {
            (Some(ping), Some(pong)) => ping > pong,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = PingState::default();
    }
}

pub(crate) fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Writes one packet atomically: each attempt runs under the wire timeout,
/// temporary errors sleep the retry delay and continue from the partial
/// offset, and any other failure is fatal to the connection.
pub(crate) async fn write_frame(
    writer: &mut UnifiedWriter,
    frame: &[u8],
    wire_timeout: Duration,
    retry_delay: Duration,
) -> Result<()> {
    let mut offset = 0;
    while offset < frame.len() {
        match tokio::time::timeout(wire_timeout, writer.write(&frame[offset..])).await {
            Err(_) => {
                return Err(MqttError::Io("write deadline expired".to_string()));
            }
            Ok(Ok(0)) => {
                return Err(MqttError::Io("connection closed during write".to_string()));
            }
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) if is_temporary(&e) => {
                tracing::warn!(error = %e, delay = ?retry_delay, "write retry on temporary network error");
                tokio::time::sleep(retry_delay).await;
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    Ok(())
}

pub(crate) async fn writer_task(
    inner: Arc<ClientInner>,
    mut writer: UnifiedWriter,
    mut ack_rx: mpsc::UnboundedReceiver<Bytes>,
    mut app_rx: mpsc::Receiver<WriteJob>,
) -> Result<()> {
    let wire_timeout = inner.options.wire_timeout;
    let retry_delay = inner.options.retry_delay;

    let ping_enabled = !inner.options.keep_alive.is_zero();
    let ping_interval = inner.options.keep_alive * 9 / 10;
    let mut next_ping = Instant::now() + ping_interval;
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            ack = ack_rx.recv() => match ack {
                Some(frame) => {
                    write_frame(&mut writer, &frame, wire_timeout, retry_delay).await?;
                    next_ping = Instant::now() + ping_interval;
                }
                None => return Ok(()),
            },

            job = app_rx.recv() => match job {
                Some(WriteJob::Frame { frame, done }) => {
                    let result = write_frame(&mut writer, &frame, wire_timeout, retry_delay).await;
                    if let Some(done) = done {
                        let _ = done.send(result.clone());
                    }
                    result?;
                    next_ping = Instant::now() + ping_interval;
                }
                Some(WriteJob::Disconnect { done }) => {
                    let result =
                        write_frame(&mut writer, &DISCONNECT_FRAME, wire_timeout, retry_delay)
                            .await;
                    let _ = writer.shutdown().await;
                    let _ = done.send(result.clone());
                    result?;
                    tracing::debug!("wrote DISCONNECT, writer loop done");
                    return Ok(());
                }
                None => return Ok(()),
            },

            () = tokio::time::sleep_until(next_ping), if ping_enabled => {
                write_frame(&mut writer, &PINGREQ_FRAME, wire_timeout, retry_delay).await?;
                inner.ping.lock().record_ping_sent();
                pong_deadline = Some(Instant::now() + wire_timeout);
                next_ping = Instant::now() + ping_interval;
                tracing::trace!("keepalive PINGREQ sent");
            },

            () = tokio::time::sleep_until(pong_deadline.unwrap_or(next_ping)),
                if pong_deadline.is_some() =>
            {
                if inner.ping.lock().awaiting_pong() {
                    return Err(MqttError::Io(
                        "no PINGRESP within the wire timeout".to_string(),
                    ));
                }
                pong_deadline = None;
            },
        }
    }
}
