//! Remote peripheral proxy (C2, central-side): the central's local stand-in for a connected
//! peripheral. Holds cached identity/services/MTU and forwards every GATT call to the Bus,
//! delivering results to its own delegate on the central's queue.

use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::EmulatorBus;
use crate::error::Result;
use crate::gatt::Service;
use crate::identifier::PeripheralId;
use crate::l2cap::L2capChannel;
use crate::queue::DelegateQueue;

use super::delegate::RemotePeripheralDelegate;

/// Connection state as observed by the proxy, distinct from the Bus's connection table so
/// the proxy can answer `state()` without an async round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// The central-side stand-in for a peripheral. Its identifier always equals the
/// corresponding peripheral façade's identifier, letting the Bus route by one key.
pub struct RemotePeripheral {
    id: PeripheralId,
    bus: Arc<EmulatorBus>,
    central_queue: DelegateQueue,
    name: RwLock<Option<String>>,
    state: RwLock<PeripheralState>,
    services: RwLock<Vec<Service>>,
    delegate: RwLock<Option<Arc<dyn RemotePeripheralDelegate>>>,
}

impl RemotePeripheral {
    pub(crate) fn new(id: PeripheralId, bus: Arc<EmulatorBus>, central_queue: DelegateQueue, name: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            bus,
            central_queue,
            name: RwLock::new(name),
            state: RwLock::new(PeripheralState::Disconnected),
            services: RwLock::new(Vec::new()),
            delegate: RwLock::new(None),
        })
    }

    pub fn id(&self) -> PeripheralId {
        self.id
    }

    pub async fn set_delegate(&self, delegate: Arc<dyn RemotePeripheralDelegate>) {
        *self.delegate.write().await = Some(delegate);
    }

    /// Accessor used by the owning [`Central`](super::Central) to route Bus-originated
    /// pushes (value updates, write-without-response readiness) to this proxy's delegate.
    pub(crate) async fn delegate_for_push(&self) -> Option<Arc<dyn RemotePeripheralDelegate>> {
        self.delegate.read().await.clone()
    }

    pub async fn name(&self) -> Option<String> {
        self.name.read().await.clone()
    }

    pub async fn state(&self) -> PeripheralState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: PeripheralState) {
        *self.state.write().await = state;
    }

    pub async fn cached_services(&self) -> Vec<Service> {
        self.services.read().await.clone()
    }

    /// Pull the current GATT tree from the peripheral façade (the façade is the owner; the
    /// proxy only caches a snapshot) and cache it locally.
    pub async fn discover_services(&self) -> Result<()> {
        let snapshot = self.bus.services_snapshot_for(self.id);
        *self.services.write().await = snapshot;
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.central_queue.submit(async move { delegate.did_discover_services(None).await });
        }
        Ok(())
    }

    pub async fn read_value(&self, central: crate::identifier::CentralId, characteristic: Uuid) -> Result<()> {
        let bus = self.bus.clone();
        let peripheral = self.id;
        let result = bus.read_value(central, peripheral, characteristic).await;
        let delegate = self.delegate.read().await.clone();
        let error = result.clone().err();
        if let Some(delegate) = delegate {
            self.central_queue.submit(async move { delegate.did_update_value_for(characteristic, error).await });
        }
        result.map(|_| ())
    }

    pub async fn write_value(
        &self,
        central: crate::identifier::CentralId,
        characteristic: Uuid,
        value: Vec<u8>,
        without_response: bool,
    ) -> Result<()> {
        let bus = self.bus.clone();
        let peripheral = self.id;
        let result = bus.write_value(central, peripheral, characteristic, value, without_response).await;
        if !without_response {
            let delegate = self.delegate.read().await.clone();
            let error = result.clone().err();
            if let Some(delegate) = delegate {
                self.central_queue.submit(async move { delegate.did_write_value_for(characteristic, error).await });
            }
        }
        result
    }

    pub async fn set_notify_value(&self, central: crate::identifier::CentralId, characteristic: Uuid, enabled: bool) -> Result<()> {
        let bus = self.bus.clone();
        let peripheral = self.id;
        let result = bus.set_notify_value(central, peripheral, characteristic, enabled).await;
        let delegate = self.delegate.read().await.clone();
        let error = result.clone().err();
        if let Some(delegate) = delegate {
            self.central_queue.submit(async move { delegate.did_update_notification_state_for(characteristic, error).await });
        }
        result.map(|_| ())
    }

    pub async fn read_descriptor(&self, central: crate::identifier::CentralId, characteristic: Uuid, descriptor: Uuid) -> Result<()> {
        let bus = self.bus.clone();
        let peripheral = self.id;
        let result = bus.read_descriptor(central, peripheral, characteristic, descriptor).await;
        let delegate = self.delegate.read().await.clone();
        let error = result.clone().err();
        if let Some(delegate) = delegate {
            self.central_queue.submit(async move { delegate.did_update_value_for_descriptor(descriptor, error).await });
        }
        result.map(|_| ())
    }

    pub async fn write_descriptor(
        &self,
        central: crate::identifier::CentralId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        let bus = self.bus.clone();
        let peripheral = self.id;
        let result = bus.write_descriptor(central, peripheral, characteristic, descriptor, value).await;
        let delegate = self.delegate.read().await.clone();
        let error = result.clone().err();
        if let Some(delegate) = delegate {
            self.central_queue.submit(async move { delegate.did_write_value_for_descriptor(descriptor, error).await });
        }
        result
    }

    /// RSSI has no separate "read" op on the Bus; the proxy samples the same RSSI policy
    /// used by discovery to answer `readRSSI` without a real radio.
    pub async fn read_rssi(&self) -> i16 {
        let rssi = self.bus.sample_rssi().await;
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.central_queue.submit(async move { delegate.did_read_rssi(rssi, None).await });
        }
        rssi
    }

    pub async fn open_l2cap_channel(&self, central: crate::identifier::CentralId, psm: u16) -> Result<L2capChannel> {
        let bus = self.bus.clone();
        let peripheral = self.id;
        let result = bus.open_l2cap_channel(central, peripheral, psm).await;
        let delegate = self.delegate.read().await.clone();
        let (channel, error) = match &result {
            Ok(channel) => (Some(*channel), None),
            Err(e) => (None, Some(e.clone())),
        };
        if let Some(delegate) = delegate {
            self.central_queue.submit(async move { delegate.did_open_l2cap_channel(channel, error).await });
        }
        result
    }

    pub async fn mtu(&self, central: crate::identifier::CentralId) -> u16 {
        self.bus.get_mtu(central, self.id).await
    }

    pub async fn maximum_write_value_length(&self, central: crate::identifier::CentralId) -> u16 {
        self.bus.maximum_write_value_length(central, self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::config::Configuration;
    use crate::error::EmulatorError;
    use crate::gatt::{AttributePermissions, Characteristic, CharacteristicProperties, Service};
    use crate::identifier::CentralId;
    use crate::peripheral::{Peripheral, PeripheralOptions};
    use crate::uuid_ext::uuid_from_u16;

    #[derive(Default)]
    struct TestDelegate {
        events: StdMutex<Vec<(Uuid, Option<String>)>>,
    }

    #[async_trait]
    impl RemotePeripheralDelegate for TestDelegate {
        async fn did_update_value_for(&self, characteristic: Uuid, error: Option<EmulatorError>) {
            self.events.lock().unwrap().push((characteristic, error.map(|e| e.to_string())));
        }
        async fn did_write_value_for(&self, characteristic: Uuid, error: Option<EmulatorError>) {
            self.events.lock().unwrap().push((characteristic, error.map(|e| e.to_string())));
        }
    }

    async fn wait_for_power_on(peripheral: &Peripheral) {
        for _ in 0..50 {
            if peripheral.state().await == crate::state::ManagerState::PoweredOn {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("peripheral never powered on");
    }

    #[tokio::test]
    async fn read_and_write_value_round_trip_through_delegate() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = Peripheral::with_bus(bus.clone(), None, None, PeripheralOptions::default());
        wait_for_power_on(&peripheral).await;

        let characteristic_uuid = uuid_from_u16(0x2A37);
        let mut service = Service::new(uuid_from_u16(0x180D), true, peripheral.id());
        service.add_characteristic(Characteristic::new(
            characteristic_uuid,
            CharacteristicProperties::READ | CharacteristicProperties::WRITE,
            AttributePermissions::READABLE | AttributePermissions::WRITEABLE,
            vec![0u8],
        ));
        peripheral.add(service).await;

        let central = CentralId::new();
        bus.connect(central, peripheral.id()).await.unwrap();

        let proxy = RemotePeripheral::new(peripheral.id(), bus.clone(), DelegateQueue::new(), None);
        let delegate = Arc::new(TestDelegate::default());
        proxy.set_delegate(delegate.clone()).await;

        proxy.write_value(central, characteristic_uuid, vec![42], false).await.unwrap();
        proxy.read_value(central, characteristic_uuid).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let events = delegate.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|(_, err)| err.is_none()));
    }

    #[tokio::test]
    async fn mtu_and_write_length_reflect_bus_negotiation() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral_id = PeripheralId::new();
        let central = CentralId::new();
        bus.connect(central, peripheral_id).await.unwrap();
        bus.negotiate_mtu(central, peripheral_id, 100).await;

        let proxy = RemotePeripheral::new(peripheral_id, bus.clone(), DelegateQueue::new(), None);
        assert_eq!(proxy.mtu(central).await, 100);
        assert_eq!(proxy.maximum_write_value_length(central).await, 97);
    }

    #[tokio::test]
    async fn open_l2cap_channel_succeeds_against_a_published_psm_and_fails_otherwise() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = Peripheral::with_bus(bus.clone(), None, None, PeripheralOptions::default());
        wait_for_power_on(&peripheral).await;

        let central = CentralId::new();
        bus.connect(central, peripheral.id()).await.unwrap();
        peripheral.publish_l2cap_channel(0x80).await;

        let proxy = RemotePeripheral::new(peripheral.id(), bus.clone(), DelegateQueue::new(), None);
        let channel = proxy.open_l2cap_channel(central, 0x80).await.unwrap();
        assert_eq!(channel.psm, 0x80);

        let rejected = proxy.open_l2cap_channel(central, 0x81).await;
        assert!(rejected.is_err());
    }

    #[tokio::test]
    async fn read_rssi_stays_within_configured_range() {
        let bus = EmulatorBus::new(Configuration::instant());
        let proxy = RemotePeripheral::new(PeripheralId::new(), bus, DelegateQueue::new(), None);
        let rssi = proxy.read_rssi().await;
        assert!((-90..=-40).contains(&rssi));
    }
}
