//! The EmulatorBus (C5): the process-wide coordinator that owns the graph of managers,
//! connections, queues, and schedules. This module wires together the registries
//! (`registry`), the scan/advertise matcher (`scan`), connection establishment and
//! MTU/pairing/ANCS (`connection`), attribute read/write/notify/back-pressure
//! (`attributes`), and state restoration (`restoration`); each lives in its own file as an
//! `impl EmulatorBus` block so the core stays navigable despite owning most of the crate's
//! hard logic.

pub mod attributes;
pub mod connection;
pub mod l2cap;
pub mod registry;
pub mod restoration;
pub mod scan;

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::Configuration;
use crate::gatt::AdvertisementData;
use crate::identifier::{CentralId, PeripheralId};
use crate::scheduler::DelayHandle;
use crate::transport::Transport;

pub use registry::{CentralHandle, ConnectionEvent, PeripheralHandle, RestoredCentralState, RestoredPeripheralState};

/// Per-scanning-central registration: an optional service filter, the scan option map, and
/// the de-duplication set.
#[derive(Debug, Default)]
pub(crate) struct ScanRegistration {
    pub services: Vec<Uuid>,
    pub allow_duplicates: bool,
    pub solicited_services: Option<Vec<Uuid>>,
    pub already_delivered: DashSet<PeripheralId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RestorationKind {
    Central,
    Peripheral,
}

pub(crate) enum RestorationBlob {
    Central(RestoredCentralState),
    Peripheral(RestoredPeripheralState),
}

/// The central coordinator. All mutable process-wide state lives here; C1/C2/C3/C4 hold no
/// shared mutable state of their own.
pub struct EmulatorBus {
    pub(crate) config: RwLock<Configuration>,

    pub(crate) centrals: Arc<DashMap<CentralId, Arc<dyn CentralHandle>>>,
    pub(crate) peripherals: Arc<DashMap<PeripheralId, Arc<dyn PeripheralHandle>>>,

    pub(crate) scan_registrations: DashMap<CentralId, ScanRegistration>,
    pub(crate) scan_tasks: DashMap<CentralId, DelayHandle>,

    pub(crate) advertising: DashMap<PeripheralId, AdvertisementData>,

    /// Published PSMs per peripheral; an open only succeeds against a PSM present here.
    pub(crate) l2cap_publications: DashMap<PeripheralId, BTreeSet<u16>>,

    /// central -> set of connected peripherals.
    pub(crate) connections: DashMap<CentralId, BTreeSet<PeripheralId>>,
    pub(crate) mtu: DashMap<(CentralId, PeripheralId), u16>,
    /// Shared (`Arc`-wrapped) so the back-pressure drain task spawned by `attributes::write_value`
    /// mutates the live table rather than a point-in-time clone.
    pub(crate) write_without_response_queue: Arc<DashMap<(CentralId, PeripheralId), u32>>,
    pub(crate) notification_queue: Arc<DashMap<(PeripheralId, Uuid), u32>>,
    pub(crate) pairing: DashSet<(CentralId, PeripheralId)>,
    pub(crate) connection_event_registrants: DashSet<CentralId>,
    pub(crate) ancs_authorization: DashMap<CentralId, bool>,

    pub(crate) restoration_store: DashMap<String, RestorationBlob>,

    /// Outstanding cancellable delays owned per-entity, so `unregister_*`/`reset` can cancel
    /// deterministically.
    pub(crate) central_delays: DashMap<CentralId, Vec<DelayHandle>>,
    pub(crate) peripheral_delays: DashMap<PeripheralId, Vec<DelayHandle>>,

    /// Coarse lock guarding any operation that mutates more than one table atomically
    /// (connect, disconnect, pairing completion, reset); see DESIGN.md for why this
    /// replaces a literal single-writer mailbox actor.
    pub(crate) bus_lock: Mutex<()>,

    pub(crate) transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl EmulatorBus {
    /// Construct a fresh, isolated Bus. Always returned behind an `Arc`: several
    /// operations (the scan loop, back-pressure drains) must hold a `'static` handle back
    /// to the Bus to spawn their own cancellable tasks, so an `Arc<EmulatorBus>` is the only
    /// supported ownership shape.
    pub fn new(config: Configuration) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            centrals: Arc::new(DashMap::new()),
            peripherals: Arc::new(DashMap::new()),
            scan_registrations: DashMap::new(),
            scan_tasks: DashMap::new(),
            advertising: DashMap::new(),
            l2cap_publications: DashMap::new(),
            connections: DashMap::new(),
            mtu: DashMap::new(),
            write_without_response_queue: Arc::new(DashMap::new()),
            notification_queue: Arc::new(DashMap::new()),
            pairing: DashSet::new(),
            connection_event_registrants: DashSet::new(),
            ancs_authorization: DashMap::new(),
            restoration_store: DashMap::new(),
            central_delays: DashMap::new(),
            peripheral_delays: DashMap::new(),
            bus_lock: Mutex::new(()),
            transport: RwLock::new(None),
        })
    }

    /// The process-wide singleton, created lazily with the default configuration. Prefer
    /// [`EmulatorBus::new`] for isolated tests; the singleton is provided for application
    /// code that expects exactly one Bus per process.
    pub fn shared() -> Arc<EmulatorBus> {
        static SHARED: OnceLock<Arc<EmulatorBus>> = OnceLock::new();
        SHARED.get_or_init(|| EmulatorBus::new(Configuration::default())).clone()
    }

    pub async fn configure(&self, config: Configuration) {
        *self.config.write().await = config;
    }

    pub async fn configuration(&self) -> Configuration {
        *self.config.read().await
    }

    pub async fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write().await = Some(transport);
    }

    /// Register a central façade. Idempotent registries: re-registering the same id
    /// replaces the handle.
    pub fn register_central(&self, handle: Arc<dyn CentralHandle>) {
        log::trace!("registering central {}", handle.id());
        self.centrals.insert(handle.id(), handle);
    }

    /// Register a peripheral façade.
    pub fn register_peripheral(&self, handle: Arc<dyn PeripheralHandle>) {
        log::trace!("registering peripheral {}", handle.id());
        self.peripherals.insert(handle.id(), handle);
    }

    /// Remove a central and all derived state: scan registration/task, connection table
    /// entries, MTU/back-pressure/pairing entries, ANCS authorization, connection-event
    /// registration.
    pub async fn unregister_central(&self, id: CentralId) {
        log::trace!("unregistering central {id}");
        self.stop_scanning(id).await;
        self.centrals.remove(&id);
        if let Some((_, peripherals)) = self.connections.remove(&id) {
            for peripheral in peripherals {
                self.mtu.remove(&(id, peripheral));
                self.write_without_response_queue.remove(&(id, peripheral));
                self.pairing.remove(&(id, peripheral));
            }
        }
        self.connection_event_registrants.remove(&id);
        self.ancs_authorization.remove(&id);
        if let Some((_, handles)) = self.central_delays.remove(&id) {
            for h in handles {
                h.cancel();
            }
        }
    }

    /// Remove a peripheral and all derived state: advertising entry, connections
    /// referencing it, MTU/back-pressure/pairing/notification-queue entries.
    pub async fn unregister_peripheral(&self, id: PeripheralId) {
        log::trace!("unregistering peripheral {id}");
        self.peripherals.remove(&id);
        self.advertising.remove(&id);
        self.l2cap_publications.remove(&id);
        for mut entry in self.connections.iter_mut() {
            entry.value_mut().remove(&id);
        }
        self.mtu.retain(|(_, p), _| *p != id);
        self.write_without_response_queue.retain(|(_, p), _| *p != id);
        self.notification_queue.retain(|(p, _), _| *p != id);
        self.pairing.retain(|(_, p)| *p != id);
        if let Some((_, handles)) = self.peripheral_delays.remove(&id) {
            for h in handles {
                h.cancel();
            }
        }
    }

    pub fn all_centrals(&self) -> Vec<CentralId> {
        self.centrals.iter().map(|e| *e.key()).collect()
    }

    pub fn all_peripherals(&self) -> Vec<PeripheralId> {
        self.peripherals.iter().map(|e| *e.key()).collect()
    }

    pub fn is_connected(&self, central: CentralId, peripheral: PeripheralId) -> bool {
        self.connections
            .get(&central)
            .map(|set| set.contains(&peripheral))
            .unwrap_or(false)
    }

    pub fn connected_peripherals(&self, central: CentralId) -> BTreeSet<PeripheralId> {
        self.connections.get(&central).map(|set| set.clone()).unwrap_or_default()
    }

    /// Cancel every outstanding task and clear every map; intended for test teardown.
    pub async fn reset(&self) {
        let _guard = self.bus_lock.lock().await;
        log::debug!("resetting EmulatorBus");
        for entry in self.scan_tasks.iter() {
            entry.value().cancel();
        }
        self.scan_tasks.clear();
        for entry in self.central_delays.iter() {
            for h in entry.value() {
                h.cancel();
            }
        }
        for entry in self.peripheral_delays.iter() {
            for h in entry.value() {
                h.cancel();
            }
        }
        self.centrals.clear();
        self.peripherals.clear();
        self.scan_registrations.clear();
        self.advertising.clear();
        self.l2cap_publications.clear();
        self.connections.clear();
        self.mtu.clear();
        self.write_without_response_queue.clear();
        self.notification_queue.clear();
        self.pairing.clear();
        self.connection_event_registrants.clear();
        self.ancs_authorization.clear();
        self.restoration_store.clear();
        self.central_delays.clear();
        self.peripheral_delays.clear();
    }

    pub(crate) fn track_central_delay(&self, id: CentralId, handle: DelayHandle) {
        self.central_delays.entry(id).or_default().push(handle);
    }

    pub(crate) fn track_peripheral_delay(&self, id: PeripheralId, handle: DelayHandle) {
        self.peripheral_delays.entry(id).or_default().push(handle);
    }

    pub async fn update_ancs_authorization(&self, central: CentralId, authorized: bool) {
        self.ancs_authorization.insert(central, authorized);
        let fire = self.config.read().await.connection_events.fire_ancs_authorization_updates;
        if !fire {
            return;
        }
        if let Some(peripherals) = self.connections.iter().find_map(|e| {
            if *e.key() == central {
                Some(e.value().clone())
            } else {
                None
            }
        }) {
            for peripheral in peripherals {
                if let Some(handle) = self.peripherals.get(&peripheral) {
                    handle.on_ancs_authorization_update(central, authorized).await;
                }
            }
        }
    }

    pub fn ancs_authorization(&self, central: CentralId) -> bool {
        self.ancs_authorization.get(&central).map(|v| *v).unwrap_or(false)
    }

    /// A read-only snapshot of a peripheral's GATT tree, for proxy-side discovery caching.
    pub fn services_snapshot_for(&self, peripheral: PeripheralId) -> Vec<crate::gatt::Service> {
        self.peripherals.get(&peripheral).map(|h| h.services_snapshot()).unwrap_or_default()
    }

    /// Sample the RSSI policy outside of a scan cycle, used by
    /// `RemotePeripheral::read_rssi` since there is no dedicated RSSI Bus operation.
    pub async fn sample_rssi(&self) -> i16 {
        scan::simulate_rssi(self.config.read().await.rssi)
    }
}
