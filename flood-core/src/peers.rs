//! Peer table: fixed-capacity slot arena keyed by hardware address.

use crate::address::{NodeAddress, NodeRole};

/// Maximum number of peers a node tracks.
pub const MAX_PEERS: usize = 20;

/// One tracked network participant.
#[derive(Debug, Clone)]
pub struct Peer {
    pub address: NodeAddress,
    pub role: NodeRole,
    pub ready: bool,
    pub last_seen_ms: u64,
    pub failure_streak: u8,
}

impl Peer {
    pub fn new(address: NodeAddress, role: NodeRole, now_ms: u64) -> Peer {
        Peer {
            address,
            role,
            ready: true,
            last_seen_ms: now_ms,
            failure_streak: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
#[error("peer table full")]
pub struct TableFull;

/// Fixed arena of peer slots. A `Some` slot is occupied; iteration follows
/// slot order, so it is deterministic. No allocation after construction.
pub struct PeerTable {
    slots: [Option<Peer>; MAX_PEERS],
    count: usize,
}

impl PeerTable {
    pub fn new() -> PeerTable {
        PeerTable {
            slots: std::array::from_fn(|_| None),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == MAX_PEERS
    }

    pub fn contains(&self, address: NodeAddress) -> bool {
        self.find(address).is_some()
    }

    /// Linear scan, first match by byte equality.
    pub fn find(&self, address: NodeAddress) -> Option<&Peer> {
        self.slots
            .iter()
            .flatten()
            .find(|peer| peer.address == address)
    }

    pub fn find_mut(&mut self, address: NodeAddress) -> Option<&mut Peer> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|peer| peer.address == address)
    }

    /// Place a peer in the first unoccupied slot. A full table rejects the
    /// insert and leaves every existing slot untouched. The caller checks
    /// for an existing entry first; addresses are unique within the table.
    pub fn insert(&mut self, peer: Peer) -> Result<(), TableFull> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(TableFull)?;
        *slot = Some(peer);
        self.count += 1;
        Ok(())
    }

    pub fn remove(&mut self, address: NodeAddress) -> Option<Peer> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|p| p.address == address))?;
        let peer = slot.take();
        self.count -= 1;
        peer
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.slots.iter().flatten()
    }

    /// Addresses of occupied slots silent for longer than `timeout_ms`.
    pub fn expired(&self, now_ms: u64, timeout_ms: u64) -> Vec<NodeAddress> {
        self.iter()
            .filter(|peer| now_ms.saturating_sub(peer.last_seen_ms) > timeout_ms)
            .map(|peer| peer.address)
            .collect()
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}
