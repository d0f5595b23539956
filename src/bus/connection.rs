//! Connection establishment and teardown, MTU negotiation, pairing, and connection events.

use rand::Rng;

use crate::error::{ConnectionError, Result};
use crate::identifier::{CentralId, PeripheralId};

use super::{ConnectionEvent, EmulatorBus};

impl EmulatorBus {
    pub async fn connect(&self, central: CentralId, peripheral: PeripheralId) -> Result<()> {
        let config = self.configuration().await;
        if !config.timing.connection_delay.is_zero() {
            tokio::time::sleep(config.timing.connection_delay).await;
        }

        if config.error_injection.simulate_connection_failure {
            let roll: f64 = rand::rng().random();
            if roll < config.error_injection.connection_failure_rate {
                log::debug!("connection {central}->{peripheral} failed (injected)");
                return Err(ConnectionError::ConnectionFailed.into());
            }
        }

        {
            let _guard = self.bus_lock.lock().await;
            self.connections.entry(central).or_default().insert(peripheral);
            self.mtu.insert((central, peripheral), config.mtu.default_mtu);
        }
        log::debug!("connected {central}->{peripheral}");

        if config.connection_events.fire_connection_events && self.connection_event_registrants.contains(&central) {
            if let Some(handle) = self.centrals.get(&central) {
                handle.on_connection_event(peripheral, ConnectionEvent::PeerConnected).await;
            }
        }
        Ok(())
    }

    /// Disconnection is bidirectional: the connection table entry is removed, MTU/queue/
    /// pairing state is cleared, and the peripheral façade is notified so it can clean up
    /// subscriptions for every characteristic the central subscribed to, the most subtle
    /// contract of the core.
    pub async fn disconnect(&self, central: CentralId, peripheral: PeripheralId) -> Result<()> {
        let config = self.configuration().await;
        if !config.timing.disconnection_delay.is_zero() {
            tokio::time::sleep(config.timing.disconnection_delay).await;
        }

        {
            let _guard = self.bus_lock.lock().await;
            if let Some(mut set) = self.connections.get_mut(&central) {
                set.remove(&peripheral);
            }
            self.mtu.remove(&(central, peripheral));
            self.write_without_response_queue.remove(&(central, peripheral));
            self.pairing.remove(&(central, peripheral));
        }
        log::debug!("disconnected {central}->{peripheral}");

        if let Some(handle) = self.peripherals.get(&peripheral) {
            handle.notify_central_disconnected(central).await;
        }

        if config.connection_events.fire_connection_events && self.connection_event_registrants.contains(&central) {
            if let Some(handle) = self.centrals.get(&central) {
                handle.on_connection_event(peripheral, ConnectionEvent::PeerDisconnected).await;
            }
        }
        Ok(())
    }

    pub fn register_for_connection_events(&self, central: CentralId) {
        self.connection_event_registrants.insert(central);
    }

    pub fn unregister_for_connection_events(&self, central: CentralId) {
        self.connection_event_registrants.remove(&central);
    }

    /// `min(requested, maximumMTU)`.
    pub async fn negotiate_mtu(&self, central: CentralId, peripheral: PeripheralId, requested: u16) -> u16 {
        let maximum = self.configuration().await.mtu.maximum_mtu;
        let negotiated = requested.min(maximum);
        self.mtu.insert((central, peripheral), negotiated);
        negotiated
    }

    /// The current MTU, or `defaultMTU` if no connection entry exists.
    pub async fn get_mtu(&self, central: CentralId, peripheral: PeripheralId) -> u16 {
        if let Some(mtu) = self.mtu.get(&(central, peripheral)) {
            return *mtu;
        }
        self.configuration().await.mtu.default_mtu
    }

    /// `MTU - 3`.
    pub async fn maximum_write_value_length(&self, central: CentralId, peripheral: PeripheralId) -> u16 {
        self.get_mtu(central, peripheral).await.saturating_sub(3)
    }

    pub fn is_paired(&self, central: CentralId, peripheral: PeripheralId) -> bool {
        self.pairing.contains(&(central, peripheral))
    }

    /// The pairing sub-protocol. Pairing state is cleared on disconnect.
    pub async fn pair(&self, central: CentralId, peripheral: PeripheralId) -> Result<()> {
        let config = self.configuration().await;
        if !config.security.simulate_pairing {
            self.pairing.insert((central, peripheral));
            return Ok(());
        }
        if !config.timing.pairing_delay.is_zero() {
            tokio::time::sleep(config.timing.pairing_delay).await;
        }
        if config.security.pairing_succeeds {
            self.pairing.insert((central, peripheral));
            Ok(())
        } else {
            Err(crate::error::AttError::InsufficientAuthentication.into())
        }
    }

    /// Ensure `central`/`peripheral` are paired if `characteristic` requires it, running
    /// the pairing sub-protocol on demand.
    pub async fn ensure_paired_if_required(
        &self,
        central: CentralId,
        peripheral: PeripheralId,
        requires_pairing: bool,
    ) -> Result<()> {
        if !requires_pairing || self.is_paired(central, peripheral) {
            return Ok(());
        }
        self.pair(central, peripheral).await
    }
}
