//! Protocol engine: discovery, peer lifecycle, role-aware routing,
//! readiness computation.

use serde::Serialize;

use crate::address::{NodeAddress, NodeRole};
use crate::peers::{Peer, PeerTable};
use crate::transport::{EventSink, Transport, TransportError};
use crate::wire::{self, Message, MessageKind};

/// Silence interval after which a peer is considered gone (ms).
pub const PEER_TIMEOUT_MS: u64 = 30_000;

/// Consecutive send failures beyond which a peer is evicted.
pub const MAX_SEND_FAILURES: u8 = 5;

/// Discovery cadence while the network is not yet ready (ms). Faster than
/// the steady-state cadence so startup converges quickly.
pub const DISCOVERY_FAST_MS: u64 = 2_000;

/// Discovery cadence once the network is ready (ms).
pub const DISCOVERY_SLOW_MS: u64 = 30_000;

/// Coordinator status broadcast interval (ms).
pub const STATUS_INTERVAL_MS: u64 = 5_000;

pub type MessageObserver = Box<dyn FnMut(&Message, NodeAddress) + Send>;
pub type DataReadyObserver = Box<dyn FnMut(&[f32]) + Send>;
pub type DeliveryObserver = Box<dyn FnMut(NodeAddress, bool) + Send>;

/// Engine parameters fixed at initialization.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub role: NodeRole,
    pub min_peers: u8,
    pub channel: u8,
    pub device_name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            role: NodeRole::Leaf,
            min_peers: 1,
            channel: 1,
            device_name: "FloodDevice".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("network not initialized")]
    NotInitialized,
    #[error("operation requires the {required:?} role")]
    WrongRole { required: NodeRole },
    #[error("no coordinator discovered yet")]
    NoCoordinator,
    #[error("unknown peer {0}")]
    UnknownPeer(NodeAddress),
    #[error(transparent)]
    Encode(#[from] wire::EncodeError),
    #[error("transport rejected send: {0}")]
    Transport(#[from] TransportError),
    #[error("{failed} of {total} leaf sends were not accepted")]
    Partial { failed: usize, total: usize },
}

/// Snapshot of engine state for status serving and logging.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub role: NodeRole,
    pub address: String,
    pub device_name: String,
    pub ready: bool,
    pub peer_count: usize,
    pub min_peers: u8,
    pub coordinator: Option<String>,
    pub ready_since_ms: Option<u64>,
    pub peers: Vec<PeerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub address: String,
    pub role: NodeRole,
    pub ready: bool,
    pub last_seen_ms: u64,
    pub failure_streak: u8,
}

/// The peer discovery and messaging layer. One instance per node; the role
/// never changes after construction. Driven by a periodic [`tick`] and by
/// the transport's receive/send-result events.
///
/// [`tick`]: FloodAlertNetwork::tick
pub struct FloodAlertNetwork<T: Transport> {
    transport: T,
    config: NetworkConfig,
    initialized: bool,
    own_address: NodeAddress,
    coordinator: Option<NodeAddress>,
    sequence: u32,
    battery_level: u8,
    peers: PeerTable,
    last_discovery_ms: u64,
    last_status_ms: u64,
    ready_since_ms: Option<u64>,
    on_message: Option<MessageObserver>,
    on_data_ready: Option<DataReadyObserver>,
    on_delivery: Option<DeliveryObserver>,
}

impl<T: Transport> FloodAlertNetwork<T> {
    pub fn new(transport: T, config: NetworkConfig) -> Self {
        FloodAlertNetwork {
            transport,
            config,
            initialized: false,
            own_address: NodeAddress::UNASSIGNED,
            coordinator: None,
            sequence: 0,
            battery_level: 100,
            peers: PeerTable::new(),
            last_discovery_ms: 0,
            last_status_ms: 0,
            ready_since_ms: None,
            on_message: None,
            on_data_ready: None,
            on_delivery: None,
        }
    }

    /// Bring the link up: hand the event sink to the transport and capture
    /// our own address. Leaves immediately start looking for a coordinator.
    /// Transport failure is fatal; the caller aborts startup.
    pub fn initialize(&mut self, events: EventSink, now_ms: u64) -> Result<(), NetworkError> {
        let address = self
            .transport
            .initialize(self.config.role, self.config.channel, events)?;
        self.own_address = address;
        self.initialized = true;
        tracing::info!(address = %address, role = ?self.config.role, "network initialized");
        if !self.config.role.is_coordinator() {
            self.broadcast_discovery(now_ms);
        }
        Ok(())
    }

    /// Announce ourselves to the all-nodes address and restart the
    /// discovery timer.
    pub fn broadcast_discovery(&mut self, now_ms: u64) {
        if !self.initialized {
            return;
        }
        let mut msg = self.new_message(MessageKind::Discovery);
        msg.set_text(&self.config.device_name);
        match wire::encode(&msg) {
            Ok(frame) => {
                if let Err(err) = self.transport.send(NodeAddress::BROADCAST, &frame) {
                    tracing::warn!(error = %err, "discovery broadcast not accepted");
                }
            }
            Err(err) => tracing::error!(error = %err, "discovery encoding failed"),
        }
        self.last_discovery_ms = now_ms;
    }

    /// Leaf-only: unicast sensor readings to the discovered coordinator.
    pub fn send_to_coordinator(
        &mut self,
        values: &[f32],
        text: Option<&str>,
    ) -> Result<(), SendError> {
        if !self.initialized {
            return Err(SendError::NotInitialized);
        }
        if self.config.role.is_coordinator() {
            return Err(SendError::WrongRole {
                required: NodeRole::Leaf,
            });
        }
        let dest = self.coordinator.ok_or(SendError::NoCoordinator)?;
        let mut msg = self.new_message(MessageKind::SensorData);
        msg.set_values(values);
        if let Some(text) = text {
            msg.set_text(text);
        }
        let frame = wire::encode(&msg)?;
        self.transport.send(dest, &frame)?;
        Ok(())
    }

    /// Coordinator-only: send an alert (level > 0) or a status update to
    /// every known leaf. `Ok` only when every send was accepted.
    pub fn broadcast_to_leaves(
        &mut self,
        values: &[f32],
        alert_level: u8,
        text: Option<&str>,
    ) -> Result<(), SendError> {
        if !self.initialized {
            return Err(SendError::NotInitialized);
        }
        if !self.config.role.is_coordinator() {
            return Err(SendError::WrongRole {
                required: NodeRole::Coordinator,
            });
        }
        let kind = if alert_level > 0 {
            MessageKind::Alert
        } else {
            MessageKind::StatusUpdate
        };
        let mut msg = self.new_message(kind);
        msg.set_values(values);
        msg.alert_level = alert_level;
        if let Some(text) = text {
            msg.set_text(text);
        }
        let frame = wire::encode(&msg)?;

        let leaves: Vec<NodeAddress> = self
            .peers
            .iter()
            .filter(|peer| peer.role == NodeRole::Leaf)
            .map(|peer| peer.address)
            .collect();
        let total = leaves.len();
        let mut failed = 0;
        for dest in leaves {
            if let Err(err) = self.transport.send(dest, &frame) {
                tracing::warn!(peer = %dest, error = %err, "leaf send not accepted");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(SendError::Partial { failed, total });
        }
        Ok(())
    }

    /// Coordinator-only: command one specific leaf. Fails when `dest` is
    /// not a known peer.
    pub fn send_to_leaf(
        &mut self,
        dest: NodeAddress,
        values: &[f32],
        text: Option<&str>,
    ) -> Result<(), SendError> {
        if !self.initialized {
            return Err(SendError::NotInitialized);
        }
        if !self.config.role.is_coordinator() {
            return Err(SendError::WrongRole {
                required: NodeRole::Coordinator,
            });
        }
        if !self.peers.contains(dest) {
            return Err(SendError::UnknownPeer(dest));
        }
        let mut msg = self.new_message(MessageKind::Command);
        msg.set_values(values);
        if let Some(text) = text {
            msg.set_text(text);
        }
        let frame = wire::encode(&msg)?;
        self.transport.send(dest, &frame)?;
        Ok(())
    }

    /// Periodic maintenance, driven by the embedding application.
    pub fn tick(&mut self, now_ms: u64) {
        if !self.initialized {
            return;
        }

        let ready = self.is_network_ready();
        let since_discovery = now_ms.saturating_sub(self.last_discovery_ms);
        if (!ready && since_discovery > DISCOVERY_FAST_MS)
            || (ready && since_discovery > DISCOVERY_SLOW_MS)
        {
            self.broadcast_discovery(now_ms);
        }

        if self.config.role.is_coordinator()
            && self.is_network_ready()
            && now_ms.saturating_sub(self.last_status_ms) > STATUS_INTERVAL_MS
        {
            if let Err(err) = self.broadcast_to_leaves(&[0.0], 0, Some("Status OK")) {
                tracing::warn!(error = %err, "status broadcast incomplete");
            }
            self.last_status_ms = now_ms;
        }

        for address in self.peers.expired(now_ms, PEER_TIMEOUT_MS) {
            self.evict_peer(address, "silence timeout");
        }

        self.update_readiness(now_ms);
    }

    /// Coordinator: enough peers registered. Leaf: coordinator discovered.
    pub fn is_network_ready(&self) -> bool {
        match self.config.role {
            NodeRole::Coordinator => self.peers.len() >= self.config.min_peers as usize,
            NodeRole::Leaf => self.coordinator.is_some(),
        }
    }

    /// Entry point for the transport's receive event. Wrong-size datagrams
    /// are dropped; everything else refreshes the sender's liveness and is
    /// dispatched to the message observer.
    pub fn handle_receive(&mut self, source: NodeAddress, frame: &[u8], now_ms: u64) {
        let msg = match wire::decode(frame) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(source = %source, error = %err, "dropping malformed datagram");
                return;
            }
        };

        if let Some(peer) = self.peers.find_mut(source) {
            peer.last_seen_ms = now_ms;
            peer.role = if msg.is_coordinator() {
                NodeRole::Coordinator
            } else {
                NodeRole::Leaf
            };
            peer.ready = msg.is_ready();
        } else if msg.kind() == Some(MessageKind::Discovery) {
            self.process_discovery(&msg, source, now_ms);
        }

        match msg.kind() {
            Some(MessageKind::SensorData) => {
                if self.config.role.is_coordinator() {
                    if let Some(observer) = self.on_data_ready.as_mut() {
                        observer(msg.values());
                    }
                }
            }
            Some(_) => {}
            None => tracing::warn!(kind = msg.kind, source = %source, "unknown message kind"),
        }

        if let Some(observer) = self.on_message.as_mut() {
            observer(&msg, source);
        }
    }

    /// Entry point for the transport's send-result event. Failures
    /// accumulate per peer; a streak past [`MAX_SEND_FAILURES`] turns into
    /// an eviction, which is recovery, not an error.
    pub fn handle_send_result(&mut self, dest: NodeAddress, success: bool) {
        if let Some(peer) = self.peers.find_mut(dest) {
            if success {
                peer.failure_streak = 0;
            } else {
                peer.failure_streak = peer.failure_streak.saturating_add(1);
                let streak = peer.failure_streak;
                if streak > MAX_SEND_FAILURES {
                    tracing::warn!(peer = %dest, streak, "too many failed sends");
                    self.evict_peer(dest, "send failures");
                }
            }
        }

        if let Some(observer) = self.on_delivery.as_mut() {
            observer(dest, success);
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn min_peers(&self) -> u8 {
        self.config.min_peers
    }

    pub fn set_min_peers(&mut self, min_peers: u8) {
        self.config.min_peers = min_peers;
    }

    pub fn own_address(&self) -> NodeAddress {
        self.own_address
    }

    pub fn coordinator_address(&self) -> Option<NodeAddress> {
        self.coordinator
    }

    pub fn role(&self) -> NodeRole {
        self.config.role
    }

    pub fn device_name(&self) -> &str {
        &self.config.device_name
    }

    pub fn set_battery_level(&mut self, percent: u8) {
        self.battery_level = percent.min(100);
    }

    pub fn on_message(&mut self, observer: impl FnMut(&Message, NodeAddress) + Send + 'static) {
        self.on_message = Some(Box::new(observer));
    }

    /// Coordinator-only in practice: fired for every SENSOR_DATA payload.
    pub fn on_data_ready(&mut self, observer: impl FnMut(&[f32]) + Send + 'static) {
        self.on_data_ready = Some(Box::new(observer));
    }

    pub fn on_delivery_result(&mut self, observer: impl FnMut(NodeAddress, bool) + Send + 'static) {
        self.on_delivery = Some(Box::new(observer));
    }

    pub fn status_snapshot(&self) -> NetworkStatus {
        NetworkStatus {
            role: self.config.role,
            address: self.own_address.to_string(),
            device_name: self.config.device_name.clone(),
            ready: self.is_network_ready(),
            peer_count: self.peers.len(),
            min_peers: self.config.min_peers,
            coordinator: self.coordinator.map(|addr| addr.to_string()),
            ready_since_ms: self.ready_since_ms,
            peers: self
                .peers
                .iter()
                .map(|peer| PeerStatus {
                    address: peer.address.to_string(),
                    role: peer.role,
                    ready: peer.ready,
                    last_seen_ms: peer.last_seen_ms,
                    failure_streak: peer.failure_streak,
                })
                .collect(),
        }
    }

    fn new_message(&mut self, kind: MessageKind) -> Message {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let mut msg = Message::new(kind, self.own_address, sequence);
        msg.coordinator = self.config.role.is_coordinator() as u8;
        msg.ready = 1;
        msg.battery = self.battery_level;
        msg
    }

    fn process_discovery(&mut self, msg: &Message, source: NodeAddress, now_ms: u64) {
        match self.config.role {
            // First claimed coordinator wins; a second claimant is ignored
            // while one is tracked.
            NodeRole::Leaf => {
                if msg.is_coordinator()
                    && self.coordinator.is_none()
                    && self.upsert_peer(source, NodeRole::Coordinator, now_ms)
                {
                    self.coordinator = Some(source);
                    tracing::info!(coordinator = %source, "coordinator discovered");
                }
            }
            NodeRole::Coordinator => {
                if !msg.is_coordinator() {
                    self.upsert_peer(source, NodeRole::Leaf, now_ms);
                }
            }
        }
    }

    /// Refresh an existing peer, or allocate a slot and register the
    /// address with the transport. The table never holds an entry unknown
    /// to the transport: a failed registration rolls the slot back.
    fn upsert_peer(&mut self, address: NodeAddress, role: NodeRole, now_ms: u64) -> bool {
        if let Some(peer) = self.peers.find_mut(address) {
            peer.last_seen_ms = now_ms;
            return true;
        }
        if self.peers.insert(Peer::new(address, role, now_ms)).is_err() {
            tracing::warn!(peer = %address, "peer table full, registration rejected");
            return false;
        }
        if let Err(err) = self.transport.register_peer(address, self.config.channel) {
            self.peers.remove(address);
            tracing::warn!(peer = %address, error = %err, "transport registration failed");
            return false;
        }
        tracing::info!(peer = %address, role = ?role, "peer added");
        true
    }

    fn evict_peer(&mut self, address: NodeAddress, reason: &str) {
        if !self.peers.contains(address) {
            return;
        }
        if let Err(err) = self.transport.deregister_peer(address) {
            tracing::warn!(peer = %address, error = %err, "transport deregistration failed");
        }
        self.peers.remove(address);
        if self.coordinator == Some(address) {
            self.coordinator = None;
            tracing::warn!(coordinator = %address, "coordinator lost");
        }
        tracing::info!(peer = %address, reason, "peer evicted");
    }

    fn update_readiness(&mut self, now_ms: u64) {
        match (self.is_network_ready(), self.ready_since_ms) {
            (true, None) => {
                self.ready_since_ms = Some(now_ms);
                tracing::info!(peers = self.peers.len(), "network ready");
            }
            (false, Some(_)) => {
                self.ready_since_ms = None;
                tracing::warn!(peers = self.peers.len(), "network no longer ready");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::transport::mock::{MockState, MockTransport};

    fn addr(n: u8) -> NodeAddress {
        NodeAddress::from_bytes([0x20, 0, 0, 0, 0, n])
    }

    fn sink() -> EventSink {
        EventSink::new(|_, _| {}, |_, _| {})
    }

    fn engine(
        role: NodeRole,
        min_peers: u8,
        own: NodeAddress,
    ) -> (FloodAlertNetwork<MockTransport>, Arc<Mutex<MockState>>) {
        let (transport, state) = MockTransport::new(own);
        let config = NetworkConfig {
            role,
            min_peers,
            device_name: match role {
                NodeRole::Coordinator => "AlertStation".to_string(),
                NodeRole::Leaf => "WaterSensor".to_string(),
            },
            ..NetworkConfig::default()
        };
        let mut net = FloodAlertNetwork::new(transport, config);
        net.initialize(sink(), 0).unwrap();
        (net, state)
    }

    fn discovery_from(sender: NodeAddress, coordinator: bool) -> Vec<u8> {
        let mut msg = Message::new(MessageKind::Discovery, sender, 0);
        msg.coordinator = coordinator as u8;
        msg.ready = 1;
        wire::encode(&msg).unwrap()
    }

    fn sent_kinds(state: &Arc<Mutex<MockState>>) -> Vec<(NodeAddress, Option<MessageKind>)> {
        state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(dest, frame)| (*dest, wire::decode(frame).unwrap().kind()))
            .collect()
    }

    #[test]
    fn leaf_broadcasts_discovery_on_initialize() {
        let (net, state) = engine(NodeRole::Leaf, 1, addr(1));
        let sent = state.lock().unwrap().sent.clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, NodeAddress::BROADCAST);
        let msg = wire::decode(&sent[0].1).unwrap();
        assert_eq!(msg.kind(), Some(MessageKind::Discovery));
        assert_eq!(msg.sender, addr(1));
        assert!(!msg.is_coordinator());
        assert_eq!(msg.text(), "WaterSensor");
        assert!(!net.is_network_ready());
    }

    #[test]
    fn coordinator_does_not_discover_on_initialize() {
        let (_, state) = engine(NodeRole::Coordinator, 1, addr(1));
        assert!(state.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn leaf_registers_first_coordinator_only() {
        let (mut net, state) = engine(NodeRole::Leaf, 1, addr(1));
        assert_eq!(net.coordinator_address(), None);

        net.handle_receive(addr(2), &discovery_from(addr(2), true), 100);
        assert_eq!(net.coordinator_address(), Some(addr(2)));
        assert!(net.is_network_ready());
        assert_eq!(state.lock().unwrap().registered, vec![addr(2)]);

        // A rival claimant does not replace the tracked coordinator.
        net.handle_receive(addr(3), &discovery_from(addr(3), true), 200);
        assert_eq!(net.coordinator_address(), Some(addr(2)));
        assert_eq!(net.peer_count(), 1);
    }

    #[test]
    fn leaf_ignores_discovery_from_other_leaves() {
        let (mut net, _) = engine(NodeRole::Leaf, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 100);
        assert_eq!(net.peer_count(), 0);
        assert!(!net.is_network_ready());
    }

    #[test]
    fn coordinator_readiness_follows_min_peers() {
        let (mut net, _) = engine(NodeRole::Coordinator, 2, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);
        assert_eq!(net.peer_count(), 1);
        assert!(!net.is_network_ready());

        net.handle_receive(addr(3), &discovery_from(addr(3), false), 1_000);
        assert_eq!(net.peer_count(), 2);
        assert!(net.is_network_ready());

        // One peer stays fresh; the other times out and readiness drops.
        net.handle_receive(addr(3), &discovery_from(addr(3), false), 20_000);
        net.tick(30_001);
        assert_eq!(net.peer_count(), 1);
        assert!(!net.is_network_ready());
    }

    #[test]
    fn timeout_eviction_deregisters_exactly_once() {
        let (mut net, state) = engine(NodeRole::Coordinator, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);

        net.tick(30_000); // exactly at the limit: kept
        assert_eq!(net.peer_count(), 1);

        net.tick(30_001);
        assert_eq!(net.peer_count(), 0);
        assert_eq!(state.lock().unwrap().deregistered, vec![addr(2)]);

        net.tick(31_000);
        assert_eq!(state.lock().unwrap().deregistered.len(), 1);
    }

    #[test]
    fn coordinator_timeout_clears_tracked_coordinator() {
        let (mut net, _) = engine(NodeRole::Leaf, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), true), 0);
        assert!(net.is_network_ready());

        net.tick(30_001);
        assert_eq!(net.coordinator_address(), None);
        assert!(!net.is_network_ready());
    }

    #[test]
    fn eviction_on_sixth_consecutive_failure() {
        let (mut net, _) = engine(NodeRole::Coordinator, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);

        for _ in 0..5 {
            net.handle_send_result(addr(2), false);
        }
        assert_eq!(net.peer_count(), 1);

        net.handle_send_result(addr(2), false);
        assert_eq!(net.peer_count(), 0);
    }

    #[test]
    fn success_resets_failure_streak() {
        let (mut net, _) = engine(NodeRole::Coordinator, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);

        for _ in 0..5 {
            net.handle_send_result(addr(2), false);
        }
        net.handle_send_result(addr(2), true);

        // The streak starts over: five more failures still keep the peer.
        for _ in 0..5 {
            net.handle_send_result(addr(2), false);
        }
        assert_eq!(net.peer_count(), 1);
        net.handle_send_result(addr(2), false);
        assert_eq!(net.peer_count(), 0);
    }

    #[test]
    fn coordinator_failure_eviction_clears_tracked_coordinator() {
        let (mut net, _) = engine(NodeRole::Leaf, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), true), 0);

        for _ in 0..6 {
            net.handle_send_result(addr(2), false);
        }
        assert_eq!(net.coordinator_address(), None);
        assert!(!net.is_network_ready());
    }

    #[test]
    fn full_table_rejects_new_peers() {
        let (mut net, _) = engine(NodeRole::Coordinator, 1, addr(1));
        for n in 0..crate::peers::MAX_PEERS {
            net.handle_receive(
                addr(10 + n as u8),
                &discovery_from(addr(10 + n as u8), false),
                0,
            );
        }
        assert_eq!(net.peer_count(), crate::peers::MAX_PEERS);

        net.handle_receive(addr(200), &discovery_from(addr(200), false), 0);
        assert_eq!(net.peer_count(), crate::peers::MAX_PEERS);
        assert!(net.status_snapshot().peers.iter().all(|p| p.address != addr(200).to_string()));
    }

    #[test]
    fn failed_transport_registration_rolls_back_slot() {
        let (mut net, state) = engine(NodeRole::Coordinator, 1, addr(1));
        state.lock().unwrap().fail_register = true;
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);
        assert_eq!(net.peer_count(), 0);
    }

    #[test]
    fn send_to_coordinator_requires_discovery() {
        let (mut net, state) = engine(NodeRole::Leaf, 1, addr(1));
        assert!(matches!(
            net.send_to_coordinator(&[1.0], None),
            Err(SendError::NoCoordinator)
        ));

        net.handle_receive(addr(2), &discovery_from(addr(2), true), 0);
        net.send_to_coordinator(&[4.2], Some("WaterSensor")).unwrap();

        let sent = sent_kinds(&state);
        let (dest, kind) = sent.last().unwrap();
        assert_eq!(*dest, addr(2));
        assert_eq!(*kind, Some(MessageKind::SensorData));
    }

    #[test]
    fn role_checks_decline_mismatched_sends() {
        let (mut coordinator, _) = engine(NodeRole::Coordinator, 1, addr(1));
        assert!(matches!(
            coordinator.send_to_coordinator(&[1.0], None),
            Err(SendError::WrongRole { required: NodeRole::Leaf })
        ));

        let (mut leaf, _) = engine(NodeRole::Leaf, 1, addr(2));
        assert!(matches!(
            leaf.broadcast_to_leaves(&[1.0], 0, None),
            Err(SendError::WrongRole { required: NodeRole::Coordinator })
        ));
        assert!(matches!(
            leaf.send_to_leaf(addr(3), &[1.0], None),
            Err(SendError::WrongRole { required: NodeRole::Coordinator })
        ));
    }

    #[test]
    fn send_to_leaf_requires_known_peer() {
        let (mut net, state) = engine(NodeRole::Coordinator, 1, addr(1));
        assert!(matches!(
            net.send_to_leaf(addr(2), &[1.0], None),
            Err(SendError::UnknownPeer(_))
        ));

        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);
        net.send_to_leaf(addr(2), &[1.0], Some("drain")).unwrap();
        let sent = sent_kinds(&state);
        assert_eq!(*sent.last().unwrap(), (addr(2), Some(MessageKind::Command)));
    }

    #[test]
    fn broadcast_to_leaves_reports_partial_acceptance() {
        let (mut net, state) = engine(NodeRole::Coordinator, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);
        net.handle_receive(addr(3), &discovery_from(addr(3), false), 0);

        net.broadcast_to_leaves(&[7.0], 2, Some("Flood alert")).unwrap();
        let sent = sent_kinds(&state);
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, kind)| *kind == Some(MessageKind::Alert)));

        state.lock().unwrap().reject_sends = true;
        assert!(matches!(
            net.broadcast_to_leaves(&[0.0], 0, None),
            Err(SendError::Partial { failed: 2, total: 2 })
        ));
    }

    #[test]
    fn discovery_cadence_speeds_up_until_ready() {
        let (mut net, state) = engine(NodeRole::Leaf, 1, addr(1));
        assert_eq!(state.lock().unwrap().sent.len(), 1); // initialize

        net.tick(1_500);
        assert_eq!(state.lock().unwrap().sent.len(), 1);
        net.tick(2_001);
        assert_eq!(state.lock().unwrap().sent.len(), 2);

        // Once connected, the cadence stretches to the slow interval.
        net.handle_receive(addr(9), &discovery_from(addr(9), true), 2_500);
        net.tick(10_000);
        assert_eq!(state.lock().unwrap().sent.len(), 2);
        net.tick(32_002);
        assert_eq!(state.lock().unwrap().sent.len(), 3);
    }

    #[test]
    fn malformed_datagrams_are_dropped() {
        let (mut net, _) = engine(NodeRole::Coordinator, 1, addr(1));
        let seen = Arc::new(Mutex::new(0usize));
        let seen_in = seen.clone();
        net.on_message(move |_, _| *seen_in.lock().unwrap() += 1);

        net.handle_receive(addr(2), &[0u8; 3], 0);
        net.handle_receive(addr(2), &vec![0u8; wire::MESSAGE_LEN + 1], 0);
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(net.peer_count(), 0);
    }

    #[test]
    fn sensor_data_triggers_data_ready_on_coordinator_only() {
        let (mut net, _) = engine(NodeRole::Coordinator, 1, addr(1));
        let got = Arc::new(Mutex::new(Vec::new()));
        let got_in = got.clone();
        net.on_data_ready(move |values| got_in.lock().unwrap().push(values.to_vec()));

        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);
        let mut msg = Message::new(MessageKind::SensorData, addr(2), 1);
        msg.set_values(&[13.5, 21.0]);
        msg.ready = 1;
        net.handle_receive(addr(2), &wire::encode(&msg).unwrap(), 100);
        assert_eq!(got.lock().unwrap().as_slice(), &[vec![13.5, 21.0]]);

        let (mut leaf, _) = engine(NodeRole::Leaf, 1, addr(3));
        let leaf_got = Arc::new(Mutex::new(Vec::new()));
        let leaf_got_in = leaf_got.clone();
        leaf.on_data_ready(move |values| leaf_got_in.lock().unwrap().push(values.to_vec()));
        leaf.handle_receive(addr(2), &wire::encode(&msg).unwrap(), 100);
        assert!(leaf_got.lock().unwrap().is_empty());
    }

    #[test]
    fn any_datagram_refreshes_known_peer() {
        let (mut net, _) = engine(NodeRole::Coordinator, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);

        let mut ping = Message::new(MessageKind::Ping, addr(2), 5);
        ping.ready = 0;
        net.handle_receive(addr(2), &wire::encode(&ping).unwrap(), 25_000);

        // Refreshed at 25 s: survives the sweep at 31 s.
        net.tick(31_000);
        assert_eq!(net.peer_count(), 1);
        let snapshot = net.status_snapshot();
        assert!(!snapshot.peers[0].ready);
        assert_eq!(snapshot.peers[0].last_seen_ms, 25_000);
    }

    #[test]
    fn readiness_transition_recorded_once() {
        let (mut net, _) = engine(NodeRole::Coordinator, 1, addr(1));
        net.tick(100);
        assert_eq!(net.status_snapshot().ready_since_ms, None);

        net.handle_receive(addr(2), &discovery_from(addr(2), false), 200);
        net.tick(300);
        assert_eq!(net.status_snapshot().ready_since_ms, Some(300));
        net.tick(400);
        assert_eq!(net.status_snapshot().ready_since_ms, Some(300));

        net.tick(31_000);
        assert_eq!(net.status_snapshot().ready_since_ms, None);
    }

    #[test]
    fn delivery_observer_sees_every_outcome() {
        let (mut net, _) = engine(NodeRole::Coordinator, 1, addr(1));
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let outcomes_in = outcomes.clone();
        net.on_delivery_result(move |dest, ok| outcomes_in.lock().unwrap().push((dest, ok)));

        net.handle_send_result(addr(2), false); // unknown peer still reported
        net.handle_receive(addr(2), &discovery_from(addr(2), false), 0);
        net.handle_send_result(addr(2), true);
        assert_eq!(
            outcomes.lock().unwrap().as_slice(),
            &[(addr(2), false), (addr(2), true)]
        );
    }

    #[test]
    fn sequence_numbers_advance_per_message() {
        let (mut net, state) = engine(NodeRole::Leaf, 1, addr(1));
        net.handle_receive(addr(2), &discovery_from(addr(2), true), 0);
        net.send_to_coordinator(&[1.0], None).unwrap();
        net.send_to_coordinator(&[2.0], None).unwrap();

        let sequences: Vec<u32> = state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, frame)| wire::decode(frame).unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    // End-to-end: a leaf finds the coordinator, the coordinator registers
    // the leaf and pushes a status update on its next qualifying tick.
    #[test]
    fn leaf_and_coordinator_exchange_status() {
        let (mut coordinator, coord_state) = engine(NodeRole::Coordinator, 1, addr(1));
        let (mut leaf, leaf_state) = engine(NodeRole::Leaf, 1, addr(2));

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_in = received.clone();
        leaf.on_message(move |msg, source| {
            received_in
                .lock()
                .unwrap()
                .push((msg.kind(), msg.is_coordinator(), source));
        });

        // Leaf discovery broadcast reaches the coordinator.
        let (dest, frame) = leaf_state.lock().unwrap().sent[0].clone();
        assert!(dest.is_broadcast());
        coordinator.handle_receive(addr(2), &frame, 0);
        assert_eq!(coordinator.peer_count(), 1);
        assert!(coordinator.is_network_ready());

        // Next qualifying tick pushes one STATUS_UPDATE to the leaf.
        coordinator.tick(6_000);
        let status_sends: Vec<(NodeAddress, Vec<u8>)> = coord_state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(dest, _)| *dest == addr(2))
            .cloned()
            .collect();
        assert_eq!(status_sends.len(), 1);

        leaf.handle_receive(addr(1), &status_sends[0].1, 6_100);
        let events = received.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            *events.first().unwrap(),
            (Some(MessageKind::StatusUpdate), true, addr(1))
        );
    }
}
