//! Cross-process transport envelope: the wire format is an extension point, not default
//! behavior. Disabled unless the `transport` feature is enabled; the in-process path never
//! touches this module.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use futures::StreamExt;
use uuid::Uuid;

use crate::error::Result;
use crate::gatt::AdvertisementValue;
use crate::identifier::{CentralId, PeripheralId};

/// Either side of a cross-process pairing, addressed generically so `Transport` doesn't
/// need to know which façade kind originated an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityId {
    Central(CentralId),
    Peripheral(PeripheralId),
}

/// The tagged-union event carried over a transport, built from the same
/// [`AdvertisementValue`] vocabulary used for in-process advertisement data so a single
/// serializer covers both (Design Notes).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportEventKind {
    Discovered { peripheral: PeripheralId, rssi: i16 },
    ValueUpdate { peripheral: PeripheralId, characteristic: Uuid, value: Vec<u8> },
    ConnectionEvent { peripheral: PeripheralId, connected: bool },
    Custom { tag: String, payload: Vec<(String, AdvertisementValue)> },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransportEvent {
    pub source: EntityId,
    pub kind: TransportEventKind,
}

#[cfg(feature = "serde")]
impl serde::Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            EntityId::Central(id) => serializer.serialize_str(&format!("central:{}", id.as_uuid())),
            EntityId::Peripheral(id) => serializer.serialize_str(&format!("peripheral:{}", id.as_uuid())),
        }
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let raw = String::deserialize(deserializer)?;
        let (kind, uuid_str) = raw.split_once(':').ok_or_else(|| D::Error::custom("malformed EntityId"))?;
        let uuid: Uuid = uuid_str.parse().map_err(D::Error::custom)?;
        match kind {
            "central" => Ok(EntityId::Central(uuid.into())),
            "peripheral" => Ok(EntityId::Peripheral(uuid.into())),
            _ => Err(D::Error::custom("unknown EntityId kind")),
        }
    }
}

/// The boundary the Bus pushes through when a remote peer needs to observe events that
/// would otherwise only reach an in-process façade. An emulator with no transport
/// installed never constructs a `TransportEvent`; this trait is exercised only by
/// multi-process test harnesses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, event: TransportEvent, target: EntityId) -> Result<()>;
    fn subscribe(&self) -> Pin<Box<dyn Stream<Item = (EntityId, TransportEvent)> + Send>>;
}

/// An in-process reference transport: every sent event is immediately visible to every
/// subscriber, addressed but not filtered by `target`. Useful for exercising the
/// transport-feature code paths without an actual process boundary.
pub struct LoopbackTransport {
    sender: tokio::sync::broadcast::Sender<(EntityId, TransportEvent)>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(256);
        Self { sender }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, event: TransportEvent, target: EntityId) -> Result<()> {
        let _ = self.sender.send((target, event));
        Ok(())
    }

    fn subscribe(&self) -> Pin<Box<dyn Stream<Item = (EntityId, TransportEvent)> + Send>> {
        let receiver = self.sender.subscribe();
        Box::pin(tokio_stream::wrappers::BroadcastStream::new(receiver).filter_map(|r| async move { r.ok() }))
    }
}

#[cfg(all(test, feature = "transport"))]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn loopback_delivers_sent_events() {
        let transport = LoopbackTransport::new();
        let mut stream = transport.subscribe();
        let peripheral = PeripheralId::new();
        let target = EntityId::Peripheral(peripheral);
        transport
            .send(
                TransportEvent {
                    source: target,
                    kind: TransportEventKind::Discovered { peripheral, rssi: -50 },
                },
                target,
            )
            .await
            .unwrap();
        let (received_target, event) = stream.next().await.unwrap();
        assert_eq!(received_target, target);
        assert!(matches!(event.kind, TransportEventKind::Discovered { .. }));
    }
}
