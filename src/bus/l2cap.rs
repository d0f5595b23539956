//! L2CAP PSM publication registry and the central-initiated open path.

use crate::error::{ConnectionError, Result};
use crate::identifier::{CentralId, PeripheralId};
use crate::l2cap::L2capChannel;

use super::EmulatorBus;

impl EmulatorBus {
    pub fn publish_l2cap_channel(&self, peripheral: PeripheralId, psm: u16) {
        self.l2cap_publications.entry(peripheral).or_default().insert(psm);
    }

    pub fn unpublish_l2cap_channel(&self, peripheral: PeripheralId, psm: u16) {
        if let Some(mut published) = self.l2cap_publications.get_mut(&peripheral) {
            published.remove(&psm);
        }
    }

    pub fn is_l2cap_psm_published(&self, peripheral: PeripheralId, psm: u16) -> bool {
        self.l2cap_publications.get(&peripheral).map(|p| p.contains(&psm)).unwrap_or(false)
    }

    /// Open a channel against a PSM the peripheral has published. Validates connection and
    /// publication state here; the accept decision itself is delegated to the peripheral via
    /// [`super::PeripheralHandle::handle_open_l2cap`], mirroring how attribute reads/writes are
    /// validated by the Bus before being handed to the peripheral façade.
    pub async fn open_l2cap_channel(&self, central: CentralId, peripheral: PeripheralId, psm: u16) -> Result<L2capChannel> {
        if !self.is_connected(central, peripheral) {
            return Err(ConnectionError::NotConnected.into());
        }
        if !self.is_l2cap_psm_published(peripheral, psm) {
            return Err(ConnectionError::L2capPsmNotPublished.into());
        }

        let config = self.configuration().await;
        if !config.timing.connection_delay.is_zero() {
            tokio::time::sleep(config.timing.connection_delay).await;
        }

        let Some(handle) = self.peripherals.get(&peripheral).map(|e| e.clone()) else {
            return Err(ConnectionError::UnknownDevice.into());
        };
        handle.handle_open_l2cap(central, psm).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EmulatorBus;
    use crate::config::Configuration;
    use crate::identifier::PeripheralId;

    #[tokio::test]
    async fn publish_then_unpublish_toggles_open_eligibility() {
        let bus = EmulatorBus::new(Configuration::instant());
        let peripheral = PeripheralId::new();
        assert!(!bus.is_l2cap_psm_published(peripheral, 0x80));
        bus.publish_l2cap_channel(peripheral, 0x80);
        assert!(bus.is_l2cap_psm_published(peripheral, 0x80));
        bus.unpublish_l2cap_channel(peripheral, 0x80);
        assert!(!bus.is_l2cap_psm_published(peripheral, 0x80));
    }

    #[tokio::test]
    async fn open_fails_when_not_connected() {
        let bus = EmulatorBus::new(Configuration::instant());
        let central = CentralId::new();
        let peripheral = PeripheralId::new();
        bus.publish_l2cap_channel(peripheral, 0x80);
        let result = bus.open_l2cap_channel(central, peripheral, 0x80).await;
        assert!(matches!(result, Err(crate::error::EmulatorError::Connection(ConnectionError::NotConnected))));
    }

    #[tokio::test]
    async fn open_fails_when_psm_not_published() {
        let bus = EmulatorBus::new(Configuration::instant());
        let central = CentralId::new();
        let peripheral = PeripheralId::new();
        bus.connect(central, peripheral).await.unwrap();
        let result = bus.open_l2cap_channel(central, peripheral, 0x80).await;
        assert!(matches!(result, Err(crate::error::EmulatorError::Connection(ConnectionError::L2capPsmNotPublished))));
    }
}
