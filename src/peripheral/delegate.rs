//! Delegate contract for the peripheral façade.

use async_trait::async_trait;
use uuid::Uuid;

use crate::bus::RestoredPeripheralState;
use crate::error::EmulatorError;
use crate::identifier::CentralId;
use crate::l2cap::L2capChannel;
use crate::state::ManagerState;

/// Events the peripheral façade delivers to application code. All methods default to a
/// no-op so implementors only override what they need.
#[async_trait]
pub trait PeripheralDelegate: Send + Sync {
    async fn state_did_update(&self, _state: ManagerState) {}
    async fn did_start_advertising(&self, _error: Option<EmulatorError>) {}
    async fn did_add_service(&self, _service: Uuid, _error: Option<EmulatorError>) {}
    async fn did_subscribe_to(&self, _central: CentralId, _characteristic: Uuid) {}
    async fn did_unsubscribe_from(&self, _central: CentralId, _characteristic: Uuid) {}
    async fn did_receive_read(&self, _central: CentralId, _characteristic: Uuid) {}
    async fn did_receive_write(&self, _central: CentralId, _characteristic: Uuid) {}
    async fn is_ready_to_update_subscribers(&self) {}
    async fn did_publish_l2cap(&self, _psm: u16, _error: Option<EmulatorError>) {}
    async fn did_unpublish_l2cap(&self, _psm: u16, _error: Option<EmulatorError>) {}
    async fn did_open_l2cap(&self, _channel: Option<L2capChannel>, _error: Option<EmulatorError>) {}
    async fn will_restore_state(&self, _state: RestoredPeripheralState) {}
    async fn did_update_ancs_authorization(&self, _central: CentralId, _authorized: bool) {}
}
