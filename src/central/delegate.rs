//! Delegate contracts for the central façade and the remote-peripheral proxy.
//!
//! Every method has a no-op default so application code implements only the callbacks it
//! cares about.

use async_trait::async_trait;
use uuid::Uuid;

use crate::bus::{ConnectionEvent, RestoredCentralState};
use crate::error::EmulatorError;
use crate::identifier::PeripheralId;
use crate::gatt::AdvertisementData;
use crate::l2cap::L2capChannel;
use crate::state::ManagerState;

/// Events the central façade delivers to application code.
#[async_trait]
pub trait CentralDelegate: Send + Sync {
    async fn state_did_update(&self, _state: ManagerState) {}
    async fn did_discover(&self, _peripheral: PeripheralId, _advertisement: AdvertisementData, _rssi: i16) {}
    async fn did_connect(&self, _peripheral: PeripheralId) {}
    async fn did_fail_to_connect(&self, _peripheral: PeripheralId, _error: EmulatorError) {}
    async fn did_disconnect_peripheral(&self, _peripheral: PeripheralId, _error: Option<EmulatorError>) {}
    async fn connection_event_did_occur(&self, _peripheral: PeripheralId, _event: ConnectionEvent) {}
    async fn will_restore_state(&self, _state: RestoredCentralState) {}
    async fn did_update_ancs_authorization_for(&self, _peripheral: PeripheralId, _authorized: bool) {}
    async fn peripheral_is_ready_to_send_write_without_response(&self, _peripheral: PeripheralId) {}
}

/// Events a remote-peripheral proxy delivers to application code.
#[async_trait]
pub trait RemotePeripheralDelegate: Send + Sync {
    async fn did_discover_services(&self, _error: Option<EmulatorError>) {}
    async fn did_discover_included_services_for(&self, _service: Uuid, _error: Option<EmulatorError>) {}
    async fn did_discover_characteristics_for(&self, _service: Uuid, _error: Option<EmulatorError>) {}
    async fn did_update_value_for(&self, _characteristic: Uuid, _error: Option<EmulatorError>) {}
    async fn did_write_value_for(&self, _characteristic: Uuid, _error: Option<EmulatorError>) {}
    async fn did_update_notification_state_for(&self, _characteristic: Uuid, _error: Option<EmulatorError>) {}
    async fn did_discover_descriptors_for(&self, _characteristic: Uuid, _error: Option<EmulatorError>) {}
    async fn did_update_value_for_descriptor(&self, _descriptor: Uuid, _error: Option<EmulatorError>) {}
    async fn did_write_value_for_descriptor(&self, _descriptor: Uuid, _error: Option<EmulatorError>) {}
    async fn did_read_rssi(&self, _rssi: i16, _error: Option<EmulatorError>) {}
    async fn did_modify_services(&self, _invalidated: Vec<Uuid>) {}
    async fn did_open_l2cap_channel(&self, _channel: Option<L2capChannel>, _error: Option<EmulatorError>) {}
    async fn is_ready_to_send_write_without_response(&self) {}
}
