//! The reader loop: sole owner of the connection's read half and of every
//! state-machine mutation caused by inbound packets.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::mpsc;

use mqtt3_protocol::packet::{
    PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, PublishPacket, SubAckPacket,
};
use mqtt3_protocol::{FixedHeader, MqttError, Packet, PacketType, QoS, Result};

use crate::client::{BigMessage, ClientInner, InboundMessage};
use crate::client::writer::is_temporary;
use crate::store::StoreKey;
use crate::transport::UnifiedReader;

/// Chunk backlog for one streamed big message.
const BIG_MESSAGE_CHANNEL: usize = 8;

pub(crate) async fn reader_task(
    inner: Arc<ClientInner>,
    mut reader: UnifiedReader,
    mut buf: BytesMut,
    ack_tx: mpsc::UnboundedSender<Bytes>,
) -> Result<()> {
    let in_size_limit = inner.options.in_size_limit;
    let big_message_limit = inner.options.big_message_limit;
    let retry_delay = inner.options.retry_delay;

    // bytes of an oversized packet still to discard
    let mut flush_n: usize = 0;

    loop {
        // drain as many full packets as the buffer holds
        loop {
            if flush_n > 0 {
                let n = flush_n.min(buf.len());
                buf.advance(n);
                flush_n -= n;
                if flush_n > 0 {
                    break;
                }
            }

            let Some((header, header_len)) = FixedHeader::decode(&buf)? else {
                break;
            };
            let total = header_len + header.remaining_length as usize;

            if total > in_size_limit {
                tracing::warn!(
                    size = total,
                    limit = in_size_limit,
                    "skipping oversized inbound packet"
                );
                flush_n = total;
                continue;
            }

            if header.packet_type == PacketType::Publish && total > big_message_limit {
                stream_big_publish(&inner, &mut reader, &mut buf, &header, header_len, &ack_tx)
                    .await?;
                continue;
            }

            if buf.len() < total {
                // grow to the next power of two that fits; never shrink
                buf.reserve(total.next_power_of_two().saturating_sub(buf.len()));
                break;
            }

            let mut frame = buf.split_to(total).freeze();
            frame.advance(header_len);
            dispatch(&inner, &header, frame, &ack_tx).await?;
        }

        match reader.read_buf(&mut buf).await {
            // end of stream between packets is a clean terminal state
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) if is_temporary(&e) => {
                tracing::warn!(error = %e, delay = ?retry_delay, "read retry on temporary network error");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn dispatch(
    inner: &Arc<ClientInner>,
    header: &FixedHeader,
    body: Bytes,
    ack_tx: &mpsc::UnboundedSender<Bytes>,
) -> Result<()> {
    match Packet::decode(header, body)? {
        Packet::Publish(publish) => handle_publish(inner, publish, ack_tx).await,
        Packet::PubAck(ack) => {
            outbound_done(inner, ack.packet_id, "PUBACK");
            Ok(())
        }
        Packet::PubRec(ack) => handle_pubrec(inner, ack.packet_id, ack_tx),
        Packet::PubRel(ack) => handle_pubrel(inner, ack.packet_id, ack_tx),
        Packet::PubComp(ack) => {
            outbound_done(inner, ack.packet_id, "PUBCOMP");
            Ok(())
        }
        Packet::SubAck(suback) => {
            route_suback(inner, suback);
            Ok(())
        }
        Packet::UnsubAck(ack) => {
            match inner.session.take_unsuback(ack.packet_id) {
                Some(tx) => {
                    let _ = tx.send(Ok(()));
                }
                None => {
                    tracing::warn!(
                        packet_id = ack.packet_id,
                        "ignoring UNSUBACK with no pending unsubscribe"
                    );
                }
            }
            inner.session.packet_ids.free(ack.packet_id);
            Ok(())
        }
        Packet::PingResp => {
            inner.ping.lock().record_pong();
            if let Some(tx) = inner.session.take_pong_waiter() {
                let _ = tx.send(());
            }
            Ok(())
        }
        Packet::ConnAck(_) => Err(MqttError::Protocol(
            "redundant connection acknowledgement".to_string(),
        )),
    }
}

fn route_suback(inner: &Arc<ClientInner>, suback: SubAckPacket) {
    let packet_id = suback.packet_id;
    match inner.session.take_suback(packet_id) {
        Some(tx) => {
            let _ = tx.send(Ok(suback));
        }
        None => {
            tracing::warn!(packet_id, "ignoring SUBACK with no pending subscribe");
        }
    }
    // released only now, even if the caller canceled long ago
    inner.session.packet_ids.free(packet_id);
}

async fn handle_publish(
    inner: &Arc<ClientInner>,
    publish: PublishPacket,
    ack_tx: &mpsc::UnboundedSender<Bytes>,
) -> Result<()> {
    match publish.qos {
        QoS::AtMostOnce => {
            deliver(inner, publish.payload, publish.topic).await
        }
        QoS::AtLeastOnce => {
            let Some(id) = publish.packet_id else {
                return Err(MqttError::Protocol("PUBLISH without identifier".to_string()));
            };
            deliver(inner, publish.payload, publish.topic).await?;
            // acknowledge only once the delivery has been consumed
            send_ack(ack_tx, PubAckPacket::new(id).to_frame())
        }
        QoS::ExactlyOnce => {
            let Some(id) = publish.packet_id else {
                return Err(MqttError::Protocol("PUBLISH without identifier".to_string()));
            };
            let key = StoreKey::remote(id);
            let duplicate = match inner.session.store.load(key) {
                Ok(record) => record.is_some(),
                Err(e) => {
                    tracing::error!(error = %e, packet_id = id, "reception persistence malfunction");
                    return Ok(());
                }
            };
            if !duplicate {
                if let Err(e) = inner.session.store.persist(key, &publish.payload) {
                    // no PUBREC either, so the broker redelivers later
                    tracing::error!(error = %e, packet_id = id, "reception persistence malfunction");
                    return Ok(());
                }
                deliver(inner, publish.payload, publish.topic).await?;
            }
            send_ack(ack_tx, PubRecPacket::new(id).to_frame())
        }
    }
}

/// Terminal acknowledgement of an outbound QoS 1 or QoS 2 publish. The store
/// record goes first, then the identifier, then the caller learns about it.
fn outbound_done(inner: &Arc<ClientInner>, id: u16, what: &str) {
    let key = StoreKey::local(id);
    let known = match inner.session.store.load(key) {
        Ok(record) => record.is_some(),
        Err(e) => {
            tracing::error!(error = %e, packet_id = id, "submission persistence malfunction");
            true
        }
    };
    if !known && !inner.session.has_publish_waiter(id) {
        tracing::warn!(packet_id = id, "ignoring {what} that is not inflight");
        return;
    }

    if let Err(e) = inner.session.store.delete(key) {
        tracing::error!(error = %e, packet_id = id, "submission persistence malfunction");
    }
    inner.session.packet_ids.free(id);
    inner.session.complete_publish(id);
}

fn handle_pubrec(
    inner: &Arc<ClientInner>,
    id: u16,
    ack_tx: &mpsc::UnboundedSender<Bytes>,
) -> Result<()> {
    let key = StoreKey::local(id);
    match inner.session.store.load(key) {
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::warn!(packet_id = id, "ignoring PUBREC that is not inflight");
            return Ok(());
        }
        Err(e) => {
            tracing::error!(error = %e, packet_id = id, "submission persistence malfunction");
            return Ok(());
        }
    }

    let pubrel = PubRelPacket::new(id).to_frame();
    // the stored stage advances to PUBREL before the packet leaves, so a
    // resume never regresses to the publish
    if let Err(e) = inner.session.store.persist(key, &pubrel) {
        tracing::error!(error = %e, packet_id = id, "submission persistence malfunction");
        return Ok(());
    }
    send_ack(ack_tx, pubrel)
}

fn handle_pubrel(
    inner: &Arc<ClientInner>,
    id: u16,
    ack_tx: &mpsc::UnboundedSender<Bytes>,
) -> Result<()> {
    if let Err(e) = inner.session.store.delete(StoreKey::remote(id)) {
        tracing::error!(error = %e, packet_id = id, "reception persistence malfunction");
    }
    send_ack(ack_tx, PubCompPacket::new(id).to_frame())
}

async fn deliver(inner: &Arc<ClientInner>, message: Bytes, topic: Bytes) -> Result<()> {
    inner
        .delivery_tx
        .send(InboundMessage::Slices { message, topic })
        .await
        .map_err(|_| MqttError::Closed)
}

fn send_ack(ack_tx: &mpsc::UnboundedSender<Bytes>, frame: Bytes) -> Result<()> {
    ack_tx.send(frame).map_err(|_| MqttError::Down)
}

/// Delivers a PUBLISH whose payload exceeds the in-memory threshold without
/// buffering it: the variable header is parsed in place, then payload bytes
/// stream to the application in chunks as they arrive off the wire.
async fn stream_big_publish(
    inner: &Arc<ClientInner>,
    reader: &mut UnifiedReader,
    buf: &mut BytesMut,
    header: &FixedHeader,
    header_len: usize,
    ack_tx: &mpsc::UnboundedSender<Bytes>,
) -> Result<()> {
    let retry_delay = inner.options.retry_delay;
    let qos = QoS::try_from((header.flags >> 1) & 0x03)?;
    let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };

    while buf.len() < header_len + 2 {
        read_more(reader, buf, retry_delay).await?;
    }
    let topic_len = usize::from(u16::from_be_bytes([buf[header_len], buf[header_len + 1]]));
    let Some(payload_len) =
        (header.remaining_length as usize).checked_sub(2 + topic_len + id_len)
    else {
        return Err(MqttError::Protocol(
            "PUBLISH shorter than its topic declaration".to_string(),
        ));
    };
    while buf.len() < header_len + 2 + topic_len + id_len {
        read_more(reader, buf, retry_delay).await?;
    }

    let mut head = buf.split_to(header_len + 2 + topic_len + id_len).freeze();
    head.advance(header_len + 2);
    let topic = head.split_to(topic_len);
    let packet_id = if id_len == 0 {
        None
    } else {
        let id = u16::from_be_bytes([head[0], head[1]]);
        if id == 0 {
            return Err(MqttError::Protocol(
                "PUBLISH with packet identifier 0".to_string(),
            ));
        }
        Some(id)
    };

    // exactly-once duplicates are consumed, never redelivered
    if qos == QoS::ExactlyOnce {
        if let Some(id) = packet_id {
            let duplicate = match inner.session.store.load(StoreKey::remote(id)) {
                Ok(record) => record.is_some(),
                Err(e) => {
                    tracing::error!(error = %e, packet_id = id, "reception persistence malfunction");
                    false
                }
            };
            if duplicate {
                discard(reader, buf, payload_len, retry_delay).await?;
                return send_ack(ack_tx, PubRecPacket::new(id).to_frame());
            }
        }
    }

    let (chunk_tx, chunk_rx) = mpsc::channel(BIG_MESSAGE_CHANNEL);
    let big = BigMessage {
        size: payload_len,
        topic,
        chunks: chunk_rx,
    };
    inner
        .delivery_tx
        .send(InboundMessage::Big(big))
        .await
        .map_err(|_| MqttError::Closed)?;

    let mut remaining = payload_len;
    let mut receiver_gone = false;
    while remaining > 0 {
        if buf.is_empty() {
            read_more(reader, buf, retry_delay).await?;
        }
        let take = buf.len().min(remaining);
        let chunk = buf.split_to(take).freeze();
        remaining -= take;
        if !receiver_gone && chunk_tx.send(chunk).await.is_err() {
            // handle dropped without ReadAll; keep consuming the wire
            receiver_gone = true;
        }
    }
    drop(chunk_tx);

    match (qos, packet_id) {
        (QoS::AtMostOnce, _) | (_, None) => Ok(()),
        (QoS::AtLeastOnce, Some(id)) => send_ack(ack_tx, PubAckPacket::new(id).to_frame()),
        (QoS::ExactlyOnce, Some(id)) => {
            // marker only: the payload already went to the application, the
            // key's presence is what blocks redelivery
            if let Err(e) = inner.session.store.persist(StoreKey::remote(id), &[]) {
                tracing::error!(error = %e, packet_id = id, "reception persistence malfunction");
                return Ok(());
            }
            send_ack(ack_tx, PubRecPacket::new(id).to_frame())
        }
    }
}

async fn discard(
    reader: &mut UnifiedReader,
    buf: &mut BytesMut,
    mut n: usize,
    retry_delay: std::time::Duration,
) -> Result<()> {
    while n > 0 {
        if buf.is_empty() {
            read_more(reader, buf, retry_delay).await?;
        }
        let take = buf.len().min(n);
        buf.advance(take);
        n -= take;
    }
    Ok(())
}

/// Reads at least one more byte mid-packet; end of stream here is truncation,
/// not a clean close.
async fn read_more(
    reader: &mut UnifiedReader,
    buf: &mut BytesMut,
    retry_delay: std::time::Duration,
) -> Result<()> {
    loop {
        match reader.read_buf(buf).await {
            Ok(0) => {
                return Err(MqttError::Io(
                    "connection closed mid-packet".to_string(),
                ));
            }
            Ok(_) => return Ok(()),
            Err(e) if is_temporary(&e) => {
                tracing::warn!(error = %e, delay = ?retry_delay, "read retry on temporary network error");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
