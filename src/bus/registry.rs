//! Registration tables and the handle traits façades implement so the Bus can push
//! spontaneous events to them (discovery, notifications, connection events, ...).
//!
//! A `DashMap` keyed by identifier, generalized here into two registries (central,
//! peripheral) of trait objects rather than one registry of a single concrete `Peripheral`
//! type, since the Bus must call back into both façade kinds.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::gatt::{AdvertisementData, Service};
use crate::identifier::{CentralId, PeripheralId};
use crate::l2cap::L2capChannel;
use crate::state::ManagerState;

/// A connection/ANCS auxiliary event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    PeerConnected,
    PeerDisconnected,
}

/// Restoration payload delivered to a central façade.
#[derive(Debug, Clone, Default)]
pub struct RestoredCentralState {
    pub restored_peripherals: Vec<PeripheralId>,
    pub restored_scan_services: Vec<Uuid>,
    pub restored_scan_options: Vec<(String, bool)>,
}

/// Restoration payload delivered to a peripheral façade.
#[derive(Debug, Clone, Default)]
pub struct RestoredPeripheralState {
    pub restored_services: Vec<Uuid>,
    pub was_advertising: bool,
    pub restored_advertisement_data: Option<AdvertisementData>,
}

/// Push-side callbacks the Bus invokes on a registered central façade. Every method here
/// corresponds to an event the Bus originates spontaneously (i.e. not as the direct return
/// value of a call that façade itself made): discovery, asynchronous notifications,
/// auxiliary connection/ANCS events, and restoration.
#[async_trait]
pub trait CentralHandle: Send + Sync {
    fn id(&self) -> CentralId;
    async fn on_state_update(&self, state: ManagerState);
    async fn on_discovered(&self, peripheral: PeripheralId, advertisement: AdvertisementData, rssi: i16);
    async fn on_value_update(&self, peripheral: PeripheralId, characteristic: Uuid, value: Result<Vec<u8>>);
    async fn on_connection_event(&self, peripheral: PeripheralId, event: ConnectionEvent);
    async fn on_ready_to_send_write_without_response(&self, peripheral: PeripheralId);
    async fn on_ancs_authorization_update(&self, peripheral: PeripheralId, authorized: bool);
    async fn on_will_restore_state(&self, state: RestoredCentralState);
}

/// Push-side callbacks the Bus invokes on a registered peripheral façade.
#[async_trait]
pub trait PeripheralHandle: Send + Sync {
    fn id(&self) -> PeripheralId;
    async fn on_state_update(&self, state: ManagerState);
    /// True iff the peripheral requires pairing before `central` may touch `characteristic`.
    fn requires_pairing(&self, characteristic: Uuid) -> bool;
    /// Current GATT tree, for discovery (read-only snapshot of the façade's own state).
    fn services_snapshot(&self) -> Vec<Service>;
    async fn handle_read(&self, central: CentralId, characteristic: Uuid) -> Result<Vec<u8>>;
    async fn handle_write(&self, central: CentralId, characteristic: Uuid, value: Vec<u8>) -> Result<()>;
    async fn handle_read_descriptor(&self, central: CentralId, characteristic: Uuid, descriptor: Uuid) -> Result<Vec<u8>>;
    async fn handle_write_descriptor(
        &self,
        central: CentralId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    ) -> Result<()>;
    /// Validate and apply a subscribe/unsubscribe request; returns the new `isNotifying` state.
    async fn handle_set_notify(&self, central: CentralId, characteristic: Uuid, enabled: bool) -> Result<bool>;
    async fn notify_central_disconnected(&self, central: CentralId);
    /// Accept an inbound L2CAP open already validated by the Bus against a published PSM.
    async fn handle_open_l2cap(&self, central: CentralId, psm: u16) -> Result<L2capChannel>;
    async fn on_ready_to_update_subscribers(&self, characteristic: Uuid);
    async fn on_ancs_authorization_update(&self, central: CentralId, authorized: bool);
    async fn on_will_restore_state(&self, state: RestoredPeripheralState);
}
