//! State restoration: a central or peripheral may save a snapshot under a caller-chosen key
//! and have it replayed to the next façade that registers under that key, mirroring platform
//! "state restoration" on app relaunch.

use crate::identifier::{CentralId, PeripheralId};

use super::registry::{RestoredCentralState, RestoredPeripheralState};
use super::{EmulatorBus, RestorationBlob};

impl EmulatorBus {
    /// Snapshot everything restorable for a central: its connected peripherals and its
    /// active scan filter, if any.
    pub async fn save_central_state(&self, key: &str, central: CentralId) {
        if !self.configuration().await.restoration.state_restoration_enabled {
            return;
        }
        let restored_peripherals = self.connected_peripherals(central).into_iter().collect();
        let restored_scan_services = self
            .scan_registrations
            .get(&central)
            .map(|r| r.services.clone())
            .unwrap_or_default();
        let restored_scan_options = vec![
            (
                "allowDuplicates".to_string(),
                self.scan_registrations.get(&central).map(|r| r.allow_duplicates).unwrap_or(false),
            ),
        ];
        self.restoration_store.insert(
            key.to_string(),
            RestorationBlob::Central(RestoredCentralState {
                restored_peripherals,
                restored_scan_services,
                restored_scan_options,
            }),
        );
    }

    /// Snapshot everything restorable for a peripheral: its published service UUIDs and
    /// whether it was advertising.
    pub async fn save_peripheral_state(&self, key: &str, peripheral: PeripheralId) {
        if !self.configuration().await.restoration.state_restoration_enabled {
            return;
        }
        let restored_services = self
            .peripherals
            .get(&peripheral)
            .map(|h| h.services_snapshot().iter().map(|s| s.uuid).collect())
            .unwrap_or_default();
        let was_advertising = self.is_advertising(peripheral);
        let restored_advertisement_data = self.advertising.get(&peripheral).map(|e| e.clone());
        self.restoration_store.insert(
            key.to_string(),
            RestorationBlob::Peripheral(RestoredPeripheralState {
                restored_services,
                was_advertising,
                restored_advertisement_data,
            }),
        );
    }

    /// Deliver a previously saved snapshot to a newly-registered central, if one exists
    /// under `key`. The blob is consumed: restoration fires once per save.
    pub async fn restore_central_state(&self, key: &str, central: CentralId) {
        let Some((_, blob)) = self.restoration_store.remove(key) else {
            return;
        };
        let RestorationBlob::Central(state) = blob else {
            return;
        };
        if let Some(handle) = self.centrals.get(&central) {
            handle.on_will_restore_state(state).await;
        }
    }

    pub async fn restore_peripheral_state(&self, key: &str, peripheral: PeripheralId) {
        let Some((_, blob)) = self.restoration_store.remove(key) else {
            return;
        };
        let RestorationBlob::Peripheral(state) = blob else {
            return;
        };
        if let Some(handle) = self.peripherals.get(&peripheral) {
            handle.on_will_restore_state(state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::bus::{CentralHandle, ConnectionEvent, EmulatorBus, PeripheralHandle};
    use crate::config::{Configuration, RestorationConfig};
    use crate::error::Result;
    use crate::gatt::{AdvertisementData, Service};
    use crate::state::ManagerState;

    struct RecordingCentral {
        id: CentralId,
        restored: StdMutex<Option<RestoredCentralState>>,
    }

    #[async_trait]
    impl CentralHandle for RecordingCentral {
        fn id(&self) -> CentralId {
            self.id
        }
        async fn on_state_update(&self, _state: ManagerState) {}
        async fn on_discovered(&self, _peripheral: PeripheralId, _advertisement: AdvertisementData, _rssi: i16) {}
        async fn on_value_update(&self, _peripheral: PeripheralId, _characteristic: Uuid, _value: Result<Vec<u8>>) {}
        async fn on_connection_event(&self, _peripheral: PeripheralId, _event: ConnectionEvent) {}
        async fn on_ready_to_send_write_without_response(&self, _peripheral: PeripheralId) {}
        async fn on_ancs_authorization_update(&self, _peripheral: PeripheralId, _authorized: bool) {}
        async fn on_will_restore_state(&self, state: RestoredCentralState) {
            *self.restored.lock().unwrap() = Some(state);
        }
    }

    struct StubPeripheral {
        id: PeripheralId,
    }

    #[async_trait]
    impl PeripheralHandle for StubPeripheral {
        fn id(&self) -> PeripheralId {
            self.id
        }
        async fn on_state_update(&self, _state: ManagerState) {}
        fn requires_pairing(&self, _characteristic: Uuid) -> bool {
            false
        }
        fn services_snapshot(&self) -> Vec<Service> {
            Vec::new()
        }
        async fn handle_read(&self, _central: CentralId, _characteristic: Uuid) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn handle_write(&self, _central: CentralId, _characteristic: Uuid, _value: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn handle_read_descriptor(&self, _central: CentralId, _characteristic: Uuid, _descriptor: Uuid) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn handle_write_descriptor(
            &self,
            _central: CentralId,
            _characteristic: Uuid,
            _descriptor: Uuid,
            _value: Vec<u8>,
        ) -> Result<()> {
            Ok(())
        }
        async fn handle_set_notify(&self, _central: CentralId, _characteristic: Uuid, enabled: bool) -> Result<bool> {
            Ok(enabled)
        }
        async fn notify_central_disconnected(&self, _central: CentralId) {}
        async fn handle_open_l2cap(&self, _central: CentralId, psm: u16) -> Result<crate::l2cap::L2capChannel> {
            Ok(crate::l2cap::L2capChannel { psm, peripheral: self.id, channel_id: 0 })
        }
        async fn on_ready_to_update_subscribers(&self, _characteristic: Uuid) {}
        async fn on_ancs_authorization_update(&self, _central: CentralId, _authorized: bool) {}
        async fn on_will_restore_state(&self, _state: RestoredPeripheralState) {}
    }

    #[tokio::test]
    async fn save_then_restore_central_state_delivers_connected_peripherals() {
        let bus = EmulatorBus::new(Configuration::instant());
        let central = CentralId::new();
        let peripheral = PeripheralId::new();
        bus.connect(central, peripheral).await.unwrap();
        bus.save_central_state("key-a", central).await;

        let recorder = Arc::new(RecordingCentral { id: central, restored: StdMutex::new(None) });
        bus.register_central(recorder.clone());
        bus.restore_central_state("key-a", central).await;

        let restored = recorder.restored.lock().unwrap().clone().expect("restoration delivered");
        assert_eq!(restored.restored_peripherals, vec![peripheral]);
    }

    #[tokio::test]
    async fn restoration_is_consumed_once() {
        let bus = EmulatorBus::new(Configuration::instant());
        let central = CentralId::new();
        bus.save_central_state("key-b", central).await;

        let first = Arc::new(RecordingCentral { id: central, restored: StdMutex::new(None) });
        bus.register_central(first.clone());
        bus.restore_central_state("key-b", central).await;
        assert!(first.restored.lock().unwrap().is_some());

        let second = Arc::new(RecordingCentral { id: central, restored: StdMutex::new(None) });
        bus.register_central(second.clone());
        bus.restore_central_state("key-b", central).await;
        assert!(second.restored.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_restoration_config_skips_saving() {
        let mut config = Configuration::instant();
        config.restoration = RestorationConfig { state_restoration_enabled: false };
        let bus = EmulatorBus::new(config);
        let peripheral_id = PeripheralId::new();
        bus.register_peripheral(Arc::new(StubPeripheral { id: peripheral_id }));
        bus.save_peripheral_state("key-c", peripheral_id).await;
        bus.restore_peripheral_state("key-c", peripheral_id).await;
        // Nothing was stored, so the store stays empty; not directly observable from here
        // beyond the absence of a panic, so this mainly guards against a future regression
        // that makes `save_peripheral_state` unconditional.
        assert!(bus.restoration_store.is_empty());
    }
}
