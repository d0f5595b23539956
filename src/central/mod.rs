//! Central façade (C3): the application-facing "central manager" that records scan/connect
//! intent and translates it into Bus operations, and the registration point the Bus pushes
//! spontaneous events (discovery, notifications, connection events) back through.

pub mod delegate;
pub mod proxy;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::{CentralHandle, ConnectionEvent, EmulatorBus, RestoredCentralState};
use crate::error::{ConnectionError, Result};
use crate::gatt::AdvertisementData;
use crate::identifier::{CentralId, PeripheralId};
use crate::queue::DelegateQueue;
use crate::scheduler;
use crate::state::ManagerState;

pub use delegate::{CentralDelegate, RemotePeripheralDelegate};
pub use proxy::{PeripheralState, RemotePeripheral};

/// Construction-time options: a restore identifier and a power-alert flag.
#[derive(Default, Clone)]
pub struct CentralOptions {
    pub restore_identifier: Option<String>,
    pub show_power_alert: bool,
}

/// Options accepted by `scanForPeripherals`.
#[derive(Default, Clone)]
pub struct ScanOptions {
    pub allow_duplicates: bool,
    pub solicited_service_uuids: Option<Vec<Uuid>>,
}

/// Options accepted by `registerForConnectionEvents`. The emulator has no per-peripheral
/// event filter to honor, so this is advisory storage only.
#[derive(Default, Clone)]
pub struct ConnectionEventOptions {
    pub peripheral: Option<PeripheralId>,
}

/// Options accepted by `connect`. No connect-timeout or priority knob exists in the
/// configuration model, so this is currently a marker the Bus does not consult.
#[derive(Default, Clone)]
pub struct ConnectOptions;

/// The central-side manager façade (C3). Always constructed behind an `Arc`: it registers
/// itself with the Bus as a trait object and must outlive that registration.
pub struct Central {
    id: CentralId,
    bus: Arc<EmulatorBus>,
    delegate: RwLock<Option<Arc<dyn CentralDelegate>>>,
    queue: DelegateQueue,
    state: RwLock<ManagerState>,
    is_scanning: AtomicBool,
    discovered: DashMap<PeripheralId, Arc<RemotePeripheral>>,
    connected: DashMap<PeripheralId, ()>,
    registered_for_connection_events: AtomicBool,
    restore_identifier: Option<String>,
}

impl Central {
    /// Construct against the process-wide singleton Bus.
    pub fn new(delegate: Option<Arc<dyn CentralDelegate>>, queue: Option<DelegateQueue>, options: CentralOptions) -> Arc<Self> {
        Self::with_bus(EmulatorBus::shared(), delegate, queue, options)
    }

    /// Construct against an explicit Bus instance, for isolated tests; the singleton is the
    /// default application-facing shape.
    pub fn with_bus(
        bus: Arc<EmulatorBus>,
        delegate: Option<Arc<dyn CentralDelegate>>,
        queue: Option<DelegateQueue>,
        options: CentralOptions,
    ) -> Arc<Self> {
        let central = Arc::new(Self {
            id: CentralId::new(),
            bus: bus.clone(),
            delegate: RwLock::new(delegate),
            queue: queue.unwrap_or_default(),
            state: RwLock::new(ManagerState::Unknown),
            is_scanning: AtomicBool::new(false),
            discovered: DashMap::new(),
            connected: DashMap::new(),
            registered_for_connection_events: AtomicBool::new(false),
            restore_identifier: options.restore_identifier,
        });
        bus.register_central(central.clone() as Arc<dyn CentralHandle>);

        let spawned = central.clone();
        scheduler::spawn(async move { spawned.power_on_sequence().await });

        central
    }

    pub fn id(&self) -> CentralId {
        self.id
    }

    pub async fn set_delegate(&self, delegate: Arc<dyn CentralDelegate>) {
        *self.delegate.write().await = Some(delegate);
    }

    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Restore saved state (if a restore identifier was supplied), then transition to
    /// `poweredOn` after `stateUpdateDelay`; restoration always precedes the power-on
    /// callback for the same façade.
    async fn power_on_sequence(self: Arc<Self>) {
        if let Some(key) = self.restore_identifier.clone() {
            self.bus.restore_central_state(&key, self.id).await;
        }
        let delay = self.bus.configuration().await.timing.state_update_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        *self.state.write().await = ManagerState::PoweredOn;
        let delegate = self.delegate.read().await.clone();
        let state = ManagerState::PoweredOn;
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.state_did_update(state).await });
        }
    }

    pub async fn scan_for_peripherals(&self, services: Option<Vec<Uuid>>, options: ScanOptions) -> Result<()> {
        if *self.state.read().await != ManagerState::PoweredOn {
            return Err(ConnectionError::OperationNotSupported.into());
        }
        self.is_scanning.store(true, Ordering::SeqCst);
        self.bus
            .start_scanning(self.id, services, options.allow_duplicates, options.solicited_service_uuids)
            .await;
        Ok(())
    }

    pub async fn stop_scan(&self) {
        self.is_scanning.store(false, Ordering::SeqCst);
        self.bus.stop_scanning(self.id).await;
    }

    /// Pin the peripheral into the discovered set (creating a proxy if this is the first
    /// time it's been seen), then ask the Bus to connect.
    pub async fn connect(self: &Arc<Self>, peripheral: PeripheralId, _options: ConnectOptions) -> Result<Arc<RemotePeripheral>> {
        let proxy = self.discovered.entry(peripheral).or_insert_with(|| {
            RemotePeripheral::new(peripheral, self.bus.clone(), self.queue.clone(), None)
        }).clone();
        proxy.set_state(PeripheralState::Connecting).await;

        match self.bus.connect(self.id, peripheral).await {
            Ok(()) => {
                proxy.set_state(PeripheralState::Connected).await;
                self.connected.insert(peripheral, ());
                let mtu = self.bus.get_mtu(self.id, peripheral).await;
                log::trace!("central {} connected to {peripheral}, mtu={mtu}", self.id);
                let delegate = self.delegate.read().await.clone();
                if let Some(delegate) = delegate {
                    self.queue.submit(async move { delegate.did_connect(peripheral).await });
                }
                Ok(proxy)
            }
            Err(error) => {
                proxy.set_state(PeripheralState::Disconnected).await;
                let delegate = self.delegate.read().await.clone();
                let error_for_delegate = error.clone();
                if let Some(delegate) = delegate {
                    self.queue.submit(async move { delegate.did_fail_to_connect(peripheral, error_for_delegate).await });
                }
                Err(error)
            }
        }
    }

    pub async fn cancel_peripheral_connection(&self, peripheral: PeripheralId) -> Result<()> {
        let result = self.bus.disconnect(self.id, peripheral).await;
        self.connected.remove(&peripheral);
        if let Some(proxy) = self.discovered.get(&peripheral) {
            proxy.set_state(PeripheralState::Disconnected).await;
        }
        let delegate = self.delegate.read().await.clone();
        let error = result.clone().err();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_disconnect_peripheral(peripheral, error).await });
        }
        result
    }

    pub fn retrieve_peripherals(&self, ids: &[PeripheralId]) -> Vec<Arc<RemotePeripheral>> {
        ids.iter().filter_map(|id| self.discovered.get(id).map(|e| e.clone())).collect()
    }

    /// Peripherals already in the discovered set, connected, and whose cached services
    /// intersect `services` (DESIGN.md Open Question 1: filters on cached, post-discovery
    /// services, not a fresh Bus round-trip).
    pub async fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<Arc<RemotePeripheral>> {
        let mut matches = Vec::new();
        for entry in self.discovered.iter() {
            let proxy = entry.value();
            if proxy.state().await != PeripheralState::Connected {
                continue;
            }
            if services.is_empty() {
                matches.push(proxy.clone());
                continue;
            }
            let cached: BTreeSet<Uuid> = proxy.cached_services().await.iter().map(|s| s.uuid).collect();
            if services.iter().any(|u| cached.contains(u)) {
                matches.push(proxy.clone());
            }
        }
        matches
    }

    pub fn register_for_connection_events(&self, _options: ConnectionEventOptions) {
        self.registered_for_connection_events.store(true, Ordering::SeqCst);
        self.bus.register_for_connection_events(self.id);
    }

    pub fn unregister_for_connection_events(&self) {
        self.registered_for_connection_events.store(false, Ordering::SeqCst);
        self.bus.unregister_for_connection_events(self.id);
    }

    pub async fn save_state(&self, restore_identifier: &str) {
        self.bus.save_central_state(restore_identifier, self.id).await;
    }
}

impl Drop for Central {
    fn drop(&mut self) {
        let bus = self.bus.clone();
        let id = self.id;
        tokio::spawn(async move { bus.unregister_central(id).await });
    }
}

#[async_trait]
impl CentralHandle for Central {
    fn id(&self) -> CentralId {
        self.id
    }

    async fn on_state_update(&self, state: ManagerState) {
        *self.state.write().await = state;
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.state_did_update(state).await });
        }
    }

    async fn on_discovered(&self, peripheral: PeripheralId, advertisement: AdvertisementData, rssi: i16) {
        let name = advertisement.local_name().map(|s| s.to_string());
        self.discovered
            .entry(peripheral)
            .or_insert_with(|| RemotePeripheral::new(peripheral, self.bus.clone(), self.queue.clone(), name));
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_discover(peripheral, advertisement, rssi).await });
        }
    }

    async fn on_value_update(&self, peripheral: PeripheralId, characteristic: Uuid, value: Result<Vec<u8>>) {
        if let Some(proxy) = self.discovered.get(&peripheral) {
            if let Some(delegate) = proxy.delegate_for_push().await {
                let error = value.clone().err();
                self.queue.submit(async move { delegate.did_update_value_for(characteristic, error).await });
            }
        }
    }

    async fn on_connection_event(&self, peripheral: PeripheralId, event: ConnectionEvent) {
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.connection_event_did_occur(peripheral, event).await });
        }
    }

    async fn on_ready_to_send_write_without_response(&self, peripheral: PeripheralId) {
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.peripheral_is_ready_to_send_write_without_response(peripheral).await });
        }
        if let Some(proxy) = self.discovered.get(&peripheral) {
            if let Some(proxy_delegate) = proxy.delegate_for_push().await {
                self.queue.submit(async move { proxy_delegate.is_ready_to_send_write_without_response().await });
            }
        }
    }

    async fn on_ancs_authorization_update(&self, peripheral: PeripheralId, authorized: bool) {
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_update_ancs_authorization_for(peripheral, authorized).await });
        }
    }

    async fn on_will_restore_state(&self, state: RestoredCentralState) {
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.will_restore_state(state).await });
        }
    }
}

static_assertions::assert_impl_all!(Central: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::config::Configuration;
    use crate::error::EmulatorError;
    use crate::gatt::Service;
    use crate::peripheral::{Peripheral, PeripheralOptions};
    use crate::uuid_ext::uuid_from_u16;

    #[derive(Default)]
    struct TestDelegate {
        events: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl CentralDelegate for TestDelegate {
        async fn state_did_update(&self, state: ManagerState) {
            self.events.lock().unwrap().push(format!("state:{state:?}"));
        }
        async fn did_connect(&self, peripheral: PeripheralId) {
            self.events.lock().unwrap().push(format!("connect:{peripheral}"));
        }
        async fn did_fail_to_connect(&self, peripheral: PeripheralId, _error: EmulatorError) {
            self.events.lock().unwrap().push(format!("fail:{peripheral}"));
        }
        async fn did_disconnect_peripheral(&self, peripheral: PeripheralId, _error: Option<EmulatorError>) {
            self.events.lock().unwrap().push(format!("disconnect:{peripheral}"));
        }
    }

    async fn wait_for_power_on(central: &Central) {
        for _ in 0..50 {
            if central.state().await == ManagerState::PoweredOn {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("central never powered on");
    }

    #[tokio::test]
    async fn powers_on_and_notifies_delegate() {
        let bus = EmulatorBus::new(Configuration::instant());
        let delegate = Arc::new(TestDelegate::default());
        let central = Central::with_bus(bus, Some(delegate.clone()), None, CentralOptions::default());
        wait_for_power_on(&central).await;
        assert!(delegate.events.lock().unwrap().iter().any(|e| e == "state:PoweredOn"));
    }

    #[tokio::test]
    async fn scan_before_power_on_is_rejected() {
        let mut config = Configuration::instant();
        config.timing.state_update_delay = std::time::Duration::from_millis(200);
        let bus = EmulatorBus::new(config);
        let central = Central::with_bus(bus, None, None, CentralOptions::default());
        let result = central.scan_for_peripherals(None, ScanOptions::default()).await;
        assert!(matches!(result, Err(EmulatorError::Connection(ConnectionError::OperationNotSupported))));
    }

    #[tokio::test]
    async fn connect_and_disconnect_notify_delegate() {
        let bus = EmulatorBus::new(Configuration::instant());
        let delegate = Arc::new(TestDelegate::default());
        let central = Central::with_bus(bus.clone(), Some(delegate.clone()), None, CentralOptions::default());
        wait_for_power_on(&central).await;

        let peripheral = PeripheralId::new();
        let proxy = central.connect(peripheral, ConnectOptions::default()).await.unwrap();
        assert_eq!(proxy.id(), peripheral);
        assert!(bus.is_connected(central.id(), peripheral));

        central.cancel_peripheral_connection(peripheral).await.unwrap();
        assert!(!bus.is_connected(central.id(), peripheral));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let events = delegate.events.lock().unwrap();
        assert!(events.iter().any(|e| e.starts_with("connect:")));
        assert!(events.iter().any(|e| e.starts_with("disconnect:")));
    }

    #[tokio::test]
    async fn retrieve_connected_peripherals_filters_by_cached_services() {
        let bus = EmulatorBus::new(Configuration::instant());
        let central = Central::with_bus(bus.clone(), None, None, CentralOptions::default());
        wait_for_power_on(&central).await;

        let peripheral = Peripheral::with_bus(bus.clone(), None, None, PeripheralOptions::default());
        let peripheral_id = peripheral.id();
        let service_uuid = uuid_from_u16(0x180D);
        peripheral.add(Service::new(service_uuid, true, peripheral_id)).await;

        let proxy = central.connect(peripheral_id, ConnectOptions::default()).await.unwrap();
        proxy.discover_services().await.unwrap();

        let matches = central.retrieve_connected_peripherals(&[service_uuid]).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id(), peripheral_id);

        let none = central.retrieve_connected_peripherals(&[uuid_from_u16(0xFFFF)]).await;
        assert!(none.is_empty());
    }
}
