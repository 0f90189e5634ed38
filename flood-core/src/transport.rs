//! Transport adapter contract: the opaque datagram link the engine drives.

use std::fmt;
use std::sync::Arc;

use crate::address::{NodeAddress, NodeRole};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("initialization failed: {reason}")]
    Init { reason: String },
    #[error("send not accepted: {reason}")]
    SendRejected { reason: String },
    #[error("peer registration failed: {reason}")]
    Register { reason: String },
    #[error("peer deregistration failed: {reason}")]
    Deregister { reason: String },
}

/// Hooks a transport drives when a datagram arrives or a send outcome
/// becomes known. Clonable; intended to be called from the transport's own
/// receive/completion context, never from inside the engine call that
/// issued the send.
#[derive(Clone)]
pub struct EventSink {
    on_receive: Arc<dyn Fn(NodeAddress, &[u8]) + Send + Sync>,
    on_send_result: Arc<dyn Fn(NodeAddress, bool) + Send + Sync>,
}

impl EventSink {
    pub fn new(
        on_receive: impl Fn(NodeAddress, &[u8]) + Send + Sync + 'static,
        on_send_result: impl Fn(NodeAddress, bool) + Send + Sync + 'static,
    ) -> EventSink {
        EventSink {
            on_receive: Arc::new(on_receive),
            on_send_result: Arc::new(on_send_result),
        }
    }

    /// Deliver one received datagram.
    pub fn receive(&self, source: NodeAddress, frame: &[u8]) {
        (self.on_receive)(source, frame);
    }

    /// Report the delivery outcome of an accepted send.
    pub fn send_result(&self, dest: NodeAddress, success: bool) {
        (self.on_send_result)(dest, success);
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// The datagram link the protocol engine drives. Implementations wrap the
/// actual radio stack (a UDP broadcast socket in flood-node; an ESP-NOW
/// style link on field hardware).
pub trait Transport: Send {
    /// Bring the link up and return this node's own hardware address.
    /// Called once; the sink must be retained for the life of the link.
    /// Failure is fatal to the caller (no retry).
    fn initialize(
        &mut self,
        role: NodeRole,
        channel: u8,
        events: EventSink,
    ) -> Result<NodeAddress, TransportError>;

    /// Hand one frame to the link for `dest` (or [`NodeAddress::BROADCAST`]).
    /// `Ok` means accepted for transmission; the delivery outcome arrives
    /// later through [`EventSink::send_result`].
    fn send(&mut self, dest: NodeAddress, frame: &[u8]) -> Result<(), TransportError>;

    /// Link-level bookkeeping required before unicast to `addr` is possible.
    fn register_peer(&mut self, addr: NodeAddress, channel: u8) -> Result<(), TransportError>;

    /// Drop link-level state for `addr`.
    fn deregister_peer(&mut self, addr: NodeAddress) -> Result<(), TransportError>;
}
