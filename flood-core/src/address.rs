//! Node addressing: 6-byte hardware identifiers and device roles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 6-byte hardware address of a node. Byte-wise equality; fixed once the
/// transport assigns it at startup.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeAddress([u8; 6]);

impl NodeAddress {
    /// All-nodes address used for discovery broadcasts.
    pub const BROADCAST: NodeAddress = NodeAddress([0xFF; 6]);

    /// Placeholder address before the transport has assigned one.
    pub const UNASSIGNED: NodeAddress = NodeAddress([0x00; 6]);

    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        NodeAddress(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Role a node plays in the network. Fixed at initialization.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Coordinator,
    Leaf,
}

impl NodeRole {
    pub fn is_coordinator(self) -> bool {
        self == NodeRole::Coordinator
    }
}
