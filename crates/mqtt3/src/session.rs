//! Session-wide state shared between application calls and the reader loop.
//!
//! The packet-ID register, the store handle, and the completion tables keyed
//! by packet identifier all live here and survive individual connections,
//! which is what lets a persisted QoS exchange resume after a reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use mqtt3_protocol::packet::SubAckPacket;
use mqtt3_protocol::{MqttError, PacketIdRegister, Result};

use crate::store::Store;

/// One update on a QoS ≥ 1 publish: `Ok(())` is the terminal acknowledgement,
/// transient errors report connection losses along the way.
pub(crate) type AckUpdate = Result<()>;

pub(crate) struct SessionState {
    pub(crate) packet_ids: PacketIdRegister,
    pub(crate) store: Arc<dyn Store>,
    pending_publish: Mutex<HashMap<u16, mpsc::UnboundedSender<AckUpdate>>>,
    pending_subacks: Mutex<HashMap<u16, oneshot::Sender<Result<SubAckPacket>>>>,
    pending_unsubacks: Mutex<HashMap<u16, oneshot::Sender<Result<()>>>>,
    pending_pong: Mutex<Option<oneshot::Sender<()>>>,
}

impl SessionState {
    pub(crate) fn new(store: Arc<dyn Store>, request_limit: usize) -> Self {
        Self {
            packet_ids: PacketIdRegister::new(request_limit),
            store,
            pending_publish: Mutex::new(HashMap::new()),
            pending_subacks: Mutex::new(HashMap::new()),
            pending_unsubacks: Mutex::new(HashMap::new()),
            pending_pong: Mutex::new(None),
        }
    }

    pub(crate) fn register_publish(&self, id: u16) -> mpsc::UnboundedReceiver<AckUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending_publish.lock().insert(id, tx);
        rx
    }

    pub(crate) fn has_publish_waiter(&self, id: u16) -> bool {
        self.pending_publish.lock().contains_key(&id)
    }

    /// Fires the terminal acknowledgement for an outbound publish, if a
    /// caller is still listening. Records resumed from a restarted store
    /// have no listener; completing them is not an error.
    pub(crate) fn complete_publish(&self, id: u16) -> bool {
        match self.pending_publish.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(Ok(()));
                true
            }
            None => false,
        }
    }

    pub(crate) fn register_suback(&self, id: u16) -> oneshot::Receiver<Result<SubAckPacket>> {
        let (tx, rx) = oneshot::channel();
        self.pending_subacks.lock().insert(id, tx);
        rx
    }

    pub(crate) fn take_suback(&self, id: u16) -> Option<oneshot::Sender<Result<SubAckPacket>>> {
        self.pending_subacks.lock().remove(&id)
    }

    pub(crate) fn register_unsuback(&self, id: u16) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.pending_unsubacks.lock().insert(id, tx);
        rx
    }

    pub(crate) fn take_unsuback(&self, id: u16) -> Option<oneshot::Sender<Result<()>>> {
        self.pending_unsubacks.lock().remove(&id)
    }

    /// Claims the single pending-pong slot. A second concurrent ping is
    /// rejected until the first roundtrip completes.
    pub(crate) fn claim_pong_slot(&self) -> Result<oneshot::Receiver<()>> {
        let mut slot = self.pending_pong.lock();
        if slot.is_some() {
            return Err(MqttError::PingPending);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(tx);
        Ok(rx)
    }

    pub(crate) fn take_pong_waiter(&self) -> Option<oneshot::Sender<()>> {
        self.pending_pong.lock().take()
    }

    pub(crate) fn clear_pong_slot(&self) {
        self.pending_pong.lock().take();
    }

    /// Unblocks everything waiting on the connection that just went away.
    ///
    /// Subscribe and unsubscribe exchanges die with the connection, so their
    /// identifiers free up. Publish-ack streams stay registered: their
    /// records are persisted and the exchanges continue on the next
    /// connection.
    pub(crate) fn connection_lost(&self) {
        for (id, tx) in self.pending_subacks.lock().drain() {
            let _ = tx.send(Err(MqttError::Abandoned));
            self.packet_ids.free(id);
        }
        for (id, tx) in self.pending_unsubacks.lock().drain() {
            let _ = tx.send(Err(MqttError::Abandoned));
            self.packet_ids.free(id);
        }
        self.pending_pong.lock().take();
        for tx in self.pending_publish.lock().values() {
            let _ = tx.send(Err(MqttError::Down));
        }
    }

    /// Terminal teardown: every waiter learns the client is closed.
    pub(crate) fn close(&self) {
        for (id, tx) in self.pending_subacks.lock().drain() {
            let _ = tx.send(Err(MqttError::Closed));
            self.packet_ids.free(id);
        }
        for (id, tx) in self.pending_unsubacks.lock().drain() {
            let _ = tx.send(Err(MqttError::Closed));
            self.packet_ids.free(id);
        }
        self.pending_pong.lock().take();
        for (_, tx) in self.pending_publish.lock().drain() {
            let _ = tx.send(Err(MqttError::Closed));
        }
    }
}
