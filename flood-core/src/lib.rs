//! Flood-alert network protocol reference implementation.
//! The engine owns the peer table and drives an opaque datagram transport;
//! hosts supply the transport, the clock, and the periodic tick.

pub mod address;
pub mod engine;
pub mod peers;
pub mod shared;
pub mod transport;
pub mod wire;

pub use address::{NodeAddress, NodeRole};
pub use engine::{
    FloodAlertNetwork, NetworkConfig, NetworkError, NetworkStatus, PeerStatus, SendError,
    DISCOVERY_FAST_MS, DISCOVERY_SLOW_MS, MAX_SEND_FAILURES, PEER_TIMEOUT_MS, STATUS_INTERVAL_MS,
};
pub use peers::{Peer, PeerTable, TableFull, MAX_PEERS};
pub use shared::{monotonic_clock, Clock, SharedNetwork};
pub use transport::{EventSink, Transport, TransportError};
pub use wire::{decode, encode, DecodeError, EncodeError, Message, MessageKind, MESSAGE_LEN};
