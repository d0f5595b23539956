//! GATT attribute objects (C1): services, characteristics, descriptors, and the
//! advertisement record a peripheral broadcasts. These are passive value containers; all
//! routing and mutation discipline lives in the Bus and the peripheral façade.

use std::collections::{BTreeSet, HashMap};

use bitflags::bitflags;
use uuid::Uuid;

use crate::identifier::{CentralId, PeripheralId};

bitflags! {
    /// Properties a characteristic advertises, gating which operations the Bus allows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CharacteristicProperties: u16 {
        const BROADCAST = 0x0001;
        const READ = 0x0002;
        const WRITE_WITHOUT_RESPONSE = 0x0004;
        const WRITE = 0x0008;
        const NOTIFY = 0x0010;
        const INDICATE = 0x0020;
        const AUTHENTICATED_SIGNED_WRITES = 0x0040;
        const EXTENDED_PROPERTIES = 0x0080;
        const NOTIFY_ENCRYPTION_REQUIRED = 0x0100;
        const INDICATE_ENCRYPTION_REQUIRED = 0x0200;
    }
}

bitflags! {
    /// Permissions guarding a characteristic's or descriptor's value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttributePermissions: u8 {
        const READABLE = 0x01;
        const WRITEABLE = 0x02;
        const READ_ENCRYPTION_REQUIRED = 0x04;
        const WRITE_ENCRYPTION_REQUIRED = 0x08;
    }
}

impl AttributePermissions {
    /// Default descriptor permissions (readable + writeable); not currently negotiable.
    pub fn descriptor_default() -> Self {
        Self::READABLE | Self::WRITEABLE
    }
}

/// A GATT descriptor: metadata attached to a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub value: Vec<u8>,
    pub permissions: AttributePermissions,
}

impl Descriptor {
    pub fn new(uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        Self {
            uuid,
            value: value.into(),
            permissions: AttributePermissions::descriptor_default(),
        }
    }
}

/// A GATT characteristic owned by a peripheral façade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: AttributePermissions,
    pub value: Vec<u8>,
    pub descriptors: Vec<Descriptor>,
    /// True iff `subscribers` is non-empty.
    pub is_notifying: bool,
    pub subscribers: BTreeSet<CentralId>,
    /// Non-owning back-reference to the owning service, resolved via `PeripheralId` +
    /// `Uuid` lookup rather than a pointer (Design Notes: arena + identifier resolver).
    pub service_uuid: Uuid,
}

impl Characteristic {
    pub fn new(
        uuid: Uuid,
        properties: CharacteristicProperties,
        permissions: AttributePermissions,
        initial_value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            uuid,
            properties,
            permissions,
            value: initial_value.into(),
            descriptors: Vec::new(),
            is_notifying: false,
            subscribers: BTreeSet::new(),
            service_uuid: Uuid::nil(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn requires_pairing(&self) -> bool {
        self.permissions.contains(AttributePermissions::READ_ENCRYPTION_REQUIRED)
            || self.permissions.contains(AttributePermissions::WRITE_ENCRYPTION_REQUIRED)
            || self
                .properties
                .contains(CharacteristicProperties::NOTIFY_ENCRYPTION_REQUIRED)
            || self
                .properties
                .contains(CharacteristicProperties::INDICATE_ENCRYPTION_REQUIRED)
    }

    /// Add `central` to the subscriber set; returns whether the set transitioned empty -> non-empty.
    pub fn subscribe(&mut self, central: CentralId) -> bool {
        let was_empty = self.subscribers.is_empty();
        self.subscribers.insert(central);
        self.is_notifying = true;
        was_empty && !self.subscribers.is_empty()
    }

    /// Remove `central` from the subscriber set; returns whether the set became empty.
    pub fn unsubscribe(&mut self, central: &CentralId) -> bool {
        self.subscribers.remove(central);
        let became_empty = self.subscribers.is_empty();
        if became_empty {
            self.is_notifying = false;
        }
        became_empty
    }
}

/// A GATT service owned by a peripheral façade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
    pub included_services: Vec<Uuid>,
    /// Non-owning back-reference to the owning peripheral.
    pub peripheral: PeripheralId,
}

impl Service {
    pub fn new(uuid: Uuid, primary: bool, peripheral: PeripheralId) -> Self {
        Self {
            uuid,
            primary,
            characteristics: Vec::new(),
            included_services: Vec::new(),
            peripheral,
        }
    }

    pub fn add_characteristic(&mut self, mut characteristic: Characteristic) -> &Characteristic {
        characteristic.service_uuid = self.uuid;
        self.characteristics.push(characteristic);
        self.characteristics.last().unwrap()
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }

    pub fn characteristic_mut(&mut self, uuid: Uuid) -> Option<&mut Characteristic> {
        self.characteristics.iter_mut().find(|c| c.uuid == uuid)
    }
}

/// The tagged-union value type backing an advertisement record, shared between the
/// in-process representation and the cross-process transport envelope (Design Notes).
#[derive(Debug, Clone, PartialEq)]
pub enum AdvertisementValue {
    String(String),
    Bytes(Vec<u8>),
    Number(i64),
    Bool(bool),
    List(Vec<AdvertisementValue>),
    Dict(HashMap<String, AdvertisementValue>),
    Uuid(Uuid),
}

/// Well-known advertisement record keys.
pub mod keys {
    pub const LOCAL_NAME: &str = "local-name";
    pub const SERVICE_UUIDS: &str = "service-UUIDs";
    pub const SOLICITED_SERVICE_UUIDS: &str = "solicited-service-UUIDs";
    pub const OVERFLOW_SERVICE_UUIDS: &str = "overflow-service-UUIDs";
    pub const MANUFACTURER_DATA: &str = "manufacturer-data";
    pub const SERVICE_DATA: &str = "service-data";
    pub const TX_POWER_LEVEL: &str = "tx-power-level";
    pub const IS_CONNECTABLE: &str = "is-connectable";
}

/// An advertisement record: a verbatim, application-supplied mapping of well-known keys to
/// typed values. The Bus never mutates application-supplied keys; it may append synthesized
/// keys on delivery when `autoGenerateAdvertisementFields` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvertisementData {
    fields: HashMap<String, AdvertisementValue>,
}

impl AdvertisementData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: AdvertisementValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AdvertisementValue> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: AdvertisementValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        extract_uuid_list(self.fields.get(keys::SERVICE_UUIDS))
    }

    pub fn solicited_service_uuids(&self) -> Vec<Uuid> {
        extract_uuid_list(self.fields.get(keys::SOLICITED_SERVICE_UUIDS))
    }

    pub fn local_name(&self) -> Option<&str> {
        match self.fields.get(keys::LOCAL_NAME) {
            Some(AdvertisementValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AdvertisementValue)> {
        self.fields.iter()
    }
}

fn extract_uuid_list(value: Option<&AdvertisementValue>) -> Vec<Uuid> {
    match value {
        Some(AdvertisementValue::List(items)) => items
            .iter()
            .filter_map(|v| match v {
                AdvertisementValue::Uuid(u) => Some(*u),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
