//! Peripheral façade (C4): owns the GATT tree it has published and answers the Bus's
//! read/write/subscribe dispatch. Attribute values, subscriber lists, and the local
//! notification queue are owned here and mutated only under this façade's own lock.

pub mod delegate;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::{EmulatorBus, PeripheralHandle, RestoredPeripheralState};
use crate::error::{AttError, Result};
use crate::gatt::{AdvertisementData, AttributePermissions, CharacteristicProperties, Service};
use crate::identifier::{CentralId, PeripheralId};
use crate::l2cap::L2capChannel;
use crate::queue::DelegateQueue;
use crate::scheduler;
use crate::state::ManagerState;

pub use delegate::PeripheralDelegate;

/// Local per-characteristic notification-queue cap (capped at 10 by default), providing
/// immediate back-pressure ahead of the Bus's own queue.
pub const DEFAULT_LOCAL_NOTIFICATION_QUEUE_CAP: u32 = 10;

/// Construction-time options, mirroring [`crate::central::CentralOptions`].
#[derive(Default, Clone)]
pub struct PeripheralOptions {
    pub restore_identifier: Option<String>,
    pub show_power_alert: bool,
}

/// The peripheral-side manager façade (C4).
pub struct Peripheral {
    id: PeripheralId,
    bus: Arc<EmulatorBus>,
    delegate: RwLock<Option<Arc<dyn PeripheralDelegate>>>,
    queue: DelegateQueue,
    state: RwLock<ManagerState>,
    services: RwLock<HashMap<Uuid, Service>>,
    /// Flattened characteristic -> owning service index, since the Bus dispatches by
    /// characteristic UUID alone (Design Notes: arena + identifier resolver).
    characteristic_index: DashMap<Uuid, Uuid>,
    local_notification_queue: DashMap<Uuid, u32>,
    is_advertising: AtomicBool,
    restore_identifier: Option<String>,
    l2cap_next_channel_id: AtomicU32,
}

impl Peripheral {
    pub fn new(delegate: Option<Arc<dyn PeripheralDelegate>>, queue: Option<DelegateQueue>, options: PeripheralOptions) -> Arc<Self> {
        Self::with_bus(EmulatorBus::shared(), delegate, queue, options)
    }

    pub fn with_bus(
        bus: Arc<EmulatorBus>,
        delegate: Option<Arc<dyn PeripheralDelegate>>,
        queue: Option<DelegateQueue>,
        options: PeripheralOptions,
    ) -> Arc<Self> {
        let peripheral = Arc::new(Self {
            id: PeripheralId::new(),
            bus: bus.clone(),
            delegate: RwLock::new(delegate),
            queue: queue.unwrap_or_default(),
            state: RwLock::new(ManagerState::Unknown),
            services: RwLock::new(HashMap::new()),
            characteristic_index: DashMap::new(),
            local_notification_queue: DashMap::new(),
            is_advertising: AtomicBool::new(false),
            restore_identifier: options.restore_identifier,
            l2cap_next_channel_id: AtomicU32::new(1),
        });
        bus.register_peripheral(peripheral.clone() as Arc<dyn PeripheralHandle>);

        let spawned = peripheral.clone();
        scheduler::spawn(async move { spawned.power_on_sequence().await });

        peripheral
    }

    pub fn id(&self) -> PeripheralId {
        self.id
    }

    pub async fn set_delegate(&self, delegate: Arc<dyn PeripheralDelegate>) {
        *self.delegate.write().await = Some(delegate);
    }

    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    async fn power_on_sequence(self: Arc<Self>) {
        if let Some(key) = self.restore_identifier.clone() {
            self.bus.restore_peripheral_state(&key, self.id).await;
        }
        let delay = self.bus.configuration().await.timing.state_update_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        *self.state.write().await = ManagerState::PoweredOn;
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.state_did_update(ManagerState::PoweredOn).await });
        }
    }

    pub async fn add(&self, service: Service) {
        let uuid = service.uuid;
        for characteristic in &service.characteristics {
            self.characteristic_index.insert(characteristic.uuid, uuid);
        }
        self.services.write().await.insert(uuid, service);
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_add_service(uuid, None).await });
        }
    }

    pub async fn remove(&self, service_uuid: Uuid) {
        if let Some(service) = self.services.write().await.remove(&service_uuid) {
            for characteristic in &service.characteristics {
                self.characteristic_index.remove(&characteristic.uuid);
            }
        }
    }

    pub async fn remove_all_services(&self) {
        self.services.write().await.clear();
        self.characteristic_index.clear();
    }

    pub fn start_advertising(&self, data: AdvertisementData) {
        self.bus.start_advertising(self.id, data);
        self.is_advertising.store(true, Ordering::SeqCst);
    }

    pub fn stop_advertising(&self) {
        self.bus.stop_advertising(self.id);
        self.is_advertising.store(false, Ordering::SeqCst);
    }

    pub fn is_advertising(&self) -> bool {
        self.is_advertising.load(Ordering::SeqCst)
    }

    /// Acknowledges but is a no-op: reads resolve synchronously from attribute state, so
    /// there is no pending request to respond to.
    pub fn respond(&self, _request: Uuid, _result_code: Result<()>) {}

    /// Publish a PSM so a connected central may open an L2CAP channel against it.
    pub async fn publish_l2cap_channel(&self, psm: u16) {
        self.bus.publish_l2cap_channel(self.id, psm);
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_publish_l2cap(psm, None).await });
        }
    }

    pub async fn unpublish_l2cap_channel(&self, psm: u16) {
        self.bus.unpublish_l2cap_channel(self.id, psm);
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_unpublish_l2cap(psm, None).await });
        }
    }

    /// No-op: the emulator does not model connection-interval negotiation.
    pub fn set_desired_connection_latency(&self, _central: CentralId, _latency: ConnectionLatency) {}

    /// Push an updated value to subscribers. Checks the *local* notification queue first
    /// for immediate back-pressure, ahead of the Bus's own queue; returns `false` (not an
    /// error) if either layer is saturated or the characteristic isn't currently notifying.
    pub async fn update_value(&self, characteristic: Uuid, value: Vec<u8>, subset: Option<Vec<CentralId>>) -> Result<bool> {
        let (is_notifying, subscribers, service_uuid) = {
            let services = self.services.read().await;
            let Some(&service_uuid) = self.characteristic_index.get(&characteristic).as_deref() else {
                return Err(AttError::InvalidHandle.into());
            };
            let Some(service) = services.get(&service_uuid) else {
                return Err(AttError::InvalidHandle.into());
            };
            let Some(c) = service.characteristic(characteristic) else {
                return Err(AttError::InvalidHandle.into());
            };
            (c.is_notifying, c.subscribers.iter().copied().collect::<Vec<_>>(), service_uuid)
        };

        if !is_notifying {
            return Ok(false);
        }

        let cap = DEFAULT_LOCAL_NOTIFICATION_QUEUE_CAP;
        let local_count = self.local_notification_queue.get(&characteristic).map(|v| *v).unwrap_or(0);
        if local_count >= cap {
            return Ok(false);
        }
        self.local_notification_queue.entry(characteristic).and_modify(|n| *n += 1).or_insert(1);

        {
            let mut value_guard = self.services.write().await;
            if let Some(service) = value_guard.get_mut(&service_uuid) {
                if let Some(c) = service.characteristic_mut(characteristic) {
                    c.value = value.clone();
                }
            }
        }

        let targets = subset.unwrap_or(subscribers);
        match self.bus.update_value(self.id, characteristic, targets, Ok(value)).await {
            Ok(()) => Ok(true),
            Err(crate::error::EmulatorError::Att(AttError::PrepareQueueFull)) => {
                self.local_notification_queue.entry(characteristic).and_modify(|n| *n = n.saturating_sub(1));
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn services_snapshot(&self) -> Vec<Service> {
        self.services.read().await.values().cloned().collect()
    }

    pub async fn save_state(&self, restore_identifier: &str) {
        self.bus.save_peripheral_state(restore_identifier, self.id).await;
    }
}

/// Placeholder parameter type for [`Peripheral::set_desired_connection_latency`]; the
/// emulator has no interval model to apply it to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLatency {
    Low,
    Medium,
    High,
}

impl Drop for Peripheral {
    fn drop(&mut self) {
        let bus = self.bus.clone();
        let id = self.id;
        tokio::spawn(async move { bus.unregister_peripheral(id).await });
    }
}

#[async_trait]
impl PeripheralHandle for Peripheral {
    fn id(&self) -> PeripheralId {
        self.id
    }

    async fn on_state_update(&self, state: ManagerState) {
        *self.state.write().await = state;
    }

    fn requires_pairing(&self, characteristic: Uuid) -> bool {
        let Some(service_uuid) = self.characteristic_index.get(&characteristic).map(|e| *e) else {
            return false;
        };
        let Ok(services) = self.services.try_read() else {
            return false;
        };
        services
            .get(&service_uuid)
            .and_then(|s| s.characteristic(characteristic))
            .map(|c| c.requires_pairing())
            .unwrap_or(false)
    }

    fn services_snapshot(&self) -> Vec<Service> {
        self.services.try_read().map(|s| s.values().cloned().collect()).unwrap_or_default()
    }

    async fn handle_read(&self, central: CentralId, characteristic: Uuid) -> Result<Vec<u8>> {
        let services = self.services.read().await;
        let service_uuid = self
            .characteristic_index
            .get(&characteristic)
            .map(|e| *e)
            .ok_or(AttError::InvalidHandle)?;
        let c = services
            .get(&service_uuid)
            .and_then(|s| s.characteristic(characteristic))
            .ok_or(AttError::InvalidHandle)?;
        if !c.permissions.contains(AttributePermissions::READABLE) {
            return Err(AttError::ReadNotPermitted.into());
        }
        let value = c.value.clone();
        drop(services);

        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_receive_read(central, characteristic).await });
        }
        Ok(value)
    }

    async fn handle_write(&self, central: CentralId, characteristic: Uuid, value: Vec<u8>) -> Result<()> {
        let mut services = self.services.write().await;
        let service_uuid = self
            .characteristic_index
            .get(&characteristic)
            .map(|e| *e)
            .ok_or(AttError::InvalidHandle)?;
        let c = services
            .get_mut(&service_uuid)
            .and_then(|s| s.characteristic_mut(characteristic))
            .ok_or(AttError::InvalidHandle)?;
        if !c.permissions.contains(AttributePermissions::WRITEABLE) {
            return Err(AttError::WriteNotPermitted.into());
        }
        c.value = value;
        drop(services);

        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_receive_write(central, characteristic).await });
        }
        Ok(())
    }

    async fn handle_read_descriptor(&self, _central: CentralId, characteristic: Uuid, descriptor: Uuid) -> Result<Vec<u8>> {
        let services = self.services.read().await;
        let service_uuid = self
            .characteristic_index
            .get(&characteristic)
            .map(|e| *e)
            .ok_or(AttError::InvalidHandle)?;
        let d = services
            .get(&service_uuid)
            .and_then(|s| s.characteristic(characteristic))
            .and_then(|c| c.descriptors.iter().find(|d| d.uuid == descriptor))
            .ok_or(AttError::AttributeNotFound)?;
        if !d.permissions.contains(AttributePermissions::READABLE) {
            return Err(AttError::ReadNotPermitted.into());
        }
        Ok(d.value.clone())
    }

    async fn handle_write_descriptor(
        &self,
        _central: CentralId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        let mut services = self.services.write().await;
        let service_uuid = self
            .characteristic_index
            .get(&characteristic)
            .map(|e| *e)
            .ok_or(AttError::InvalidHandle)?;
        let d = services
            .get_mut(&service_uuid)
            .and_then(|s| s.characteristic_mut(characteristic))
            .and_then(|c| c.descriptors.iter_mut().find(|d| d.uuid == descriptor))
            .ok_or(AttError::AttributeNotFound)?;
        if !d.permissions.contains(AttributePermissions::WRITEABLE) {
            return Err(AttError::WriteNotPermitted.into());
        }
        d.value = value;
        Ok(())
    }

    async fn handle_set_notify(&self, central: CentralId, characteristic: Uuid, enabled: bool) -> Result<bool> {
        let mut services = self.services.write().await;
        let service_uuid = self
            .characteristic_index
            .get(&characteristic)
            .map(|e| *e)
            .ok_or(AttError::InvalidHandle)?;
        let c = services
            .get_mut(&service_uuid)
            .and_then(|s| s.characteristic_mut(characteristic))
            .ok_or(AttError::InvalidHandle)?;
        if !c
            .properties
            .intersects(CharacteristicProperties::NOTIFY | CharacteristicProperties::INDICATE)
        {
            return Err(AttError::RequestNotSupported.into());
        }

        if enabled {
            c.subscribe(central);
        } else {
            c.unsubscribe(&central);
        }
        let is_notifying = c.is_notifying;
        drop(services);

        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            if enabled {
                self.queue.submit(async move { delegate.did_subscribe_to(central, characteristic).await });
            } else {
                self.queue.submit(async move { delegate.did_unsubscribe_from(central, characteristic).await });
            }
        }
        Ok(is_notifying)
    }

    /// Disconnection is bidirectional: remove `central` from every characteristic's
    /// subscriber list and fire `didUnsubscribe` for each, independent of any other
    /// subscriber (see DESIGN.md Open Question 3).
    async fn notify_central_disconnected(&self, central: CentralId) {
        let mut unsubscribed = Vec::new();
        {
            let mut services = self.services.write().await;
            for service in services.values_mut() {
                for c in &mut service.characteristics {
                    if c.subscribers.contains(&central) {
                        c.unsubscribe(&central);
                        unsubscribed.push(c.uuid);
                    }
                }
            }
        }
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            for characteristic in unsubscribed {
                let delegate = delegate.clone();
                self.queue.submit(async move { delegate.did_unsubscribe_from(central, characteristic).await });
            }
        }
    }

    /// The Bus has already confirmed `psm` is published and `central` is connected; just
    /// mint a channel identifier and inform the delegate of the accepted open.
    async fn handle_open_l2cap(&self, _central: CentralId, psm: u16) -> Result<L2capChannel> {
        let channel_id = self.l2cap_next_channel_id.fetch_add(1, Ordering::SeqCst);
        let channel = L2capChannel { psm, peripheral: self.id, channel_id };
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_open_l2cap(Some(channel), None).await });
        }
        Ok(channel)
    }

    async fn on_ready_to_update_subscribers(&self, characteristic: Uuid) {
        self.local_notification_queue.entry(characteristic).and_modify(|n| *n = n.saturating_sub(1));
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.is_ready_to_update_subscribers().await });
        }
    }

    async fn on_ancs_authorization_update(&self, central: CentralId, authorized: bool) {
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.did_update_ancs_authorization(central, authorized).await });
        }
    }

    async fn on_will_restore_state(&self, state: RestoredPeripheralState) {
        let was_advertising = state.was_advertising;
        let advertisement_data = state.restored_advertisement_data.clone();
        let delegate = self.delegate.read().await.clone();
        if let Some(delegate) = delegate {
            self.queue.submit(async move { delegate.will_restore_state(state).await });
        }
        if was_advertising {
            if let Some(data) = advertisement_data {
                let bus = self.bus.clone();
                let id = self.id;
                let handle = scheduler::schedule(RESTORE_ADVERTISING_GRACE_DELAY, async move {
                    bus.start_advertising(id, data);
                });
                self.bus.track_peripheral_delay(self.id, handle);
            }
        }
    }
}

/// Grace delay before restarting advertising after restoration.
const RESTORE_ADVERTISING_GRACE_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

static_assertions::assert_impl_all!(Peripheral: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::gatt::Characteristic;
    use crate::uuid_ext::uuid_from_u16;

    async fn wait_for_power_on(peripheral: &Peripheral) {
        for _ in 0..50 {
            if peripheral.state().await == ManagerState::PoweredOn {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("peripheral never powered on");
    }

    fn notifying_characteristic(uuid: Uuid) -> Characteristic {
        Characteristic::new(
            uuid,
            CharacteristicProperties::NOTIFY | CharacteristicProperties::READ,
            AttributePermissions::READABLE,
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn add_and_remove_service_updates_characteristic_index() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = Peripheral::with_bus(bus, None, None, PeripheralOptions::default());
        wait_for_power_on(&peripheral).await;

        let characteristic_uuid = uuid_from_u16(0x2A37);
        let service_uuid = uuid_from_u16(0x180D);
        let mut service = Service::new(service_uuid, true, peripheral.id());
        service.add_characteristic(notifying_characteristic(characteristic_uuid));
        peripheral.add(service).await;

        assert!(peripheral.characteristic_index.contains_key(&characteristic_uuid));
        peripheral.remove(service_uuid).await;
        assert!(!peripheral.characteristic_index.contains_key(&characteristic_uuid));
    }

    #[tokio::test]
    async fn handle_read_respects_permissions() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = Peripheral::with_bus(bus, None, None, PeripheralOptions::default());
        wait_for_power_on(&peripheral).await;

        let characteristic_uuid = uuid_from_u16(0x2A37);
        let mut service = Service::new(uuid_from_u16(0x180D), true, peripheral.id());
        service.add_characteristic(Characteristic::new(
            characteristic_uuid,
            CharacteristicProperties::WRITE,
            AttributePermissions::WRITEABLE,
            Vec::new(),
        ));
        peripheral.add(service).await;

        let central = CentralId::new();
        let result = PeripheralHandle::handle_read(&*peripheral, central, characteristic_uuid).await;
        assert!(matches!(result, Err(crate::error::EmulatorError::Att(AttError::ReadNotPermitted))));
    }

    #[tokio::test]
    async fn update_value_requires_notifying_characteristic() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = Peripheral::with_bus(bus, None, None, PeripheralOptions::default());
        wait_for_power_on(&peripheral).await;

        let characteristic_uuid = uuid_from_u16(0x2A37);
        let mut service = Service::new(uuid_from_u16(0x180D), true, peripheral.id());
        service.add_characteristic(notifying_characteristic(characteristic_uuid));
        peripheral.add(service).await;

        let sent = peripheral.update_value(characteristic_uuid, vec![1], None).await.unwrap();
        assert!(!sent); // no subscriber has enabled notifications yet

        let central = CentralId::new();
        PeripheralHandle::handle_set_notify(&*peripheral, central, characteristic_uuid, true).await.unwrap();
        let sent = peripheral.update_value(characteristic_uuid, vec![2], None).await.unwrap();
        assert!(sent);
    }

    #[tokio::test]
    async fn local_notification_queue_caps_at_default() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = Peripheral::with_bus(bus, None, None, PeripheralOptions::default());
        wait_for_power_on(&peripheral).await;

        let characteristic_uuid = uuid_from_u16(0x2A37);
        let mut service = Service::new(uuid_from_u16(0x180D), true, peripheral.id());
        service.add_characteristic(notifying_characteristic(characteristic_uuid));
        peripheral.add(service).await;

        let central = CentralId::new();
        PeripheralHandle::handle_set_notify(&*peripheral, central, characteristic_uuid, true).await.unwrap();

        for _ in 0..DEFAULT_LOCAL_NOTIFICATION_QUEUE_CAP {
            let sent = peripheral.update_value(characteristic_uuid, vec![0], None).await.unwrap();
            assert!(sent);
        }
        let overflowed = peripheral.update_value(characteristic_uuid, vec![0], None).await.unwrap();
        assert!(!overflowed);
    }

    #[tokio::test]
    async fn disconnect_clears_subscriptions() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = Peripheral::with_bus(bus, None, None, PeripheralOptions::default());
        wait_for_power_on(&peripheral).await;

        let characteristic_uuid = uuid_from_u16(0x2A37);
        let mut service = Service::new(uuid_from_u16(0x180D), true, peripheral.id());
        service.add_characteristic(notifying_characteristic(characteristic_uuid));
        peripheral.add(service).await;

        let central = CentralId::new();
        PeripheralHandle::handle_set_notify(&*peripheral, central, characteristic_uuid, true).await.unwrap();
        PeripheralHandle::notify_central_disconnected(&*peripheral, central).await;

        let sent = peripheral.update_value(characteristic_uuid, vec![1], None).await.unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn publish_then_open_l2cap_mints_a_channel() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = Peripheral::with_bus(bus.clone(), None, None, PeripheralOptions::default());
        wait_for_power_on(&peripheral).await;

        let central = CentralId::new();
        bus.connect(central, peripheral.id()).await.unwrap();

        peripheral.publish_l2cap_channel(0x80).await;
        let channel = bus.open_l2cap_channel(central, peripheral.id(), 0x80).await.unwrap();
        assert_eq!(channel.psm, 0x80);
        assert_eq!(channel.peripheral, peripheral.id());

        peripheral.unpublish_l2cap_channel(0x80).await;
        let result = bus.open_l2cap_channel(central, peripheral.id(), 0x80).await;
        assert!(result.is_err());
    }
}
