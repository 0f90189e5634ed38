//! Shared engine handle: explicit mutual exclusion between the
//! application's tick loop and the transport's asynchronous events.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use crate::address::NodeAddress;
use crate::engine::{FloodAlertNetwork, NetworkConfig, NetworkError, NetworkStatus, SendError};
use crate::transport::{EventSink, Transport};
use crate::wire::Message;

/// Monotonic clock supplying engine timestamps in milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Clock measuring milliseconds since its creation.
pub fn monotonic_clock() -> Clock {
    let start = Instant::now();
    Arc::new(move || start.elapsed().as_millis() as u64)
}

/// The engine behind a mutex, shared between the periodic tick and the
/// transport's receive/send-result events, which arrive on the link's own
/// threads. Peer-table mutations stay atomic across both triggers.
pub struct SharedNetwork<T: Transport> {
    inner: Arc<Mutex<FloodAlertNetwork<T>>>,
    clock: Clock,
}

impl<T: Transport> Clone for SharedNetwork<T> {
    fn clone(&self) -> Self {
        SharedNetwork {
            inner: self.inner.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<T: Transport + 'static> SharedNetwork<T> {
    /// Bring the network up: construct the engine, bind the event sink to
    /// it, and initialize the transport. Transport failure is fatal.
    pub fn initialize(
        transport: T,
        config: NetworkConfig,
        clock: Clock,
    ) -> Result<SharedNetwork<T>, NetworkError> {
        let inner = Arc::new(Mutex::new(FloodAlertNetwork::new(transport, config)));
        let events = bind_events(&inner, clock.clone());
        let now = clock();
        lock(&inner).initialize(events, now)?;
        Ok(SharedNetwork { inner, clock })
    }

    /// Run one engine tick at the current clock time.
    pub fn tick(&self) {
        let now = (self.clock)();
        self.lock().tick(now);
    }

    pub fn send_to_coordinator(&self, values: &[f32], text: Option<&str>) -> Result<(), SendError> {
        self.lock().send_to_coordinator(values, text)
    }

    pub fn broadcast_to_leaves(
        &self,
        values: &[f32],
        alert_level: u8,
        text: Option<&str>,
    ) -> Result<(), SendError> {
        self.lock().broadcast_to_leaves(values, alert_level, text)
    }

    pub fn send_to_leaf(
        &self,
        dest: NodeAddress,
        values: &[f32],
        text: Option<&str>,
    ) -> Result<(), SendError> {
        self.lock().send_to_leaf(dest, values, text)
    }

    pub fn is_network_ready(&self) -> bool {
        self.lock().is_network_ready()
    }

    pub fn peer_count(&self) -> usize {
        self.lock().peer_count()
    }

    pub fn min_peers(&self) -> u8 {
        self.lock().min_peers()
    }

    pub fn set_min_peers(&self, min_peers: u8) {
        self.lock().set_min_peers(min_peers);
    }

    pub fn own_address(&self) -> NodeAddress {
        self.lock().own_address()
    }

    pub fn coordinator_address(&self) -> Option<NodeAddress> {
        self.lock().coordinator_address()
    }

    pub fn status_snapshot(&self) -> NetworkStatus {
        self.lock().status_snapshot()
    }

    pub fn on_message(&self, observer: impl FnMut(&Message, NodeAddress) + Send + 'static) {
        self.lock().on_message(observer);
    }

    pub fn on_data_ready(&self, observer: impl FnMut(&[f32]) + Send + 'static) {
        self.lock().on_data_ready(observer);
    }

    pub fn on_delivery_result(&self, observer: impl FnMut(NodeAddress, bool) + Send + 'static) {
        self.lock().on_delivery_result(observer);
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut FloodAlertNetwork<T>) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, FloodAlertNetwork<T>> {
        lock(&self.inner)
    }
}

fn lock<T: Transport>(
    inner: &Arc<Mutex<FloodAlertNetwork<T>>>,
) -> MutexGuard<'_, FloodAlertNetwork<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the sink the transport drives. It holds only a weak reference:
/// once every handle is dropped, late events become no-ops instead of
/// keeping the engine alive.
fn bind_events<T: Transport + 'static>(
    inner: &Arc<Mutex<FloodAlertNetwork<T>>>,
    clock: Clock,
) -> EventSink {
    let receive_target: Weak<Mutex<FloodAlertNetwork<T>>> = Arc::downgrade(inner);
    let result_target = receive_target.clone();
    EventSink::new(
        move |source, frame| {
            if let Some(engine) = receive_target.upgrade() {
                let now = clock();
                lock(&engine).handle_receive(source, frame, now);
            }
        },
        move |dest, success| {
            if let Some(engine) = result_target.upgrade() {
                lock(&engine).handle_send_result(dest, success);
            }
        },
    )
}
