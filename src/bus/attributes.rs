//! Attribute read/write, the notification push path and its back-pressure, and the
//! write-without-response back-pressure model.

use rand::Rng;
use uuid::Uuid;

use crate::error::{AttError, ConnectionError, Result};
use crate::identifier::{CentralId, PeripheralId};
use crate::scheduler;

use super::EmulatorBus;

impl EmulatorBus {
    fn require_connected(&self, central: CentralId, peripheral: PeripheralId) -> Result<()> {
        if self.is_connected(central, peripheral) {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected.into())
        }
    }

    async fn maybe_inject_read_write_error(&self, for_write: bool) -> Result<()> {
        let config = self.configuration().await;
        if config.error_injection.simulate_read_write_errors {
            let roll: f64 = rand::rng().random();
            if roll < config.error_injection.read_write_error_rate {
                return Err(if for_write {
                    AttError::WriteNotPermitted.into()
                } else {
                    AttError::ReadNotPermitted.into()
                });
            }
        }
        Ok(())
    }

    pub async fn read_value(&self, central: CentralId, peripheral: PeripheralId, characteristic: Uuid) -> Result<Vec<u8>> {
        self.require_connected(central, peripheral)?;
        let Some(peripheral_handle) = self.peripherals.get(&peripheral).map(|e| e.clone()) else {
            return Err(ConnectionError::UnknownDevice.into());
        };

        let requires_pairing = peripheral_handle.requires_pairing(characteristic);
        self.ensure_paired_if_required(central, peripheral, requires_pairing).await?;

        let delay = self.configuration().await.timing.read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.maybe_inject_read_write_error(false).await?;

        peripheral_handle.handle_read(central, characteristic).await
    }

    /// Writes with response run inline; writes without response are accounted against the
    /// per-pair queue and may return `OutOfSpace` if the caller ignored back-pressure.
    pub async fn write_value(
        &self,
        central: CentralId,
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
        without_response: bool,
    ) -> Result<()> {
        self.require_connected(central, peripheral)?;
        let Some(peripheral_handle) = self.peripherals.get(&peripheral).map(|e| e.clone()) else {
            return Err(ConnectionError::UnknownDevice.into());
        };

        let requires_pairing = peripheral_handle.requires_pairing(characteristic);
        self.ensure_paired_if_required(central, peripheral, requires_pairing).await?;

        if without_response {
            if !self.can_send_write_without_response(central, peripheral).await {
                return Err(ConnectionError::OutOfSpace.into());
            }
            self.write_without_response_queue.entry((central, peripheral)).and_modify(|n| *n += 1).or_insert(1);
        }

        let delay = self.configuration().await.timing.write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = if without_response {
            Ok(())
        } else {
            self.maybe_inject_read_write_error(true).await
        };
        let write_result = match result {
            Ok(()) => peripheral_handle.handle_write(central, characteristic, value).await,
            Err(e) => Err(e),
        };

        if without_response {
            let config = self.configuration().await;
            let delay = config.timing.backpressure_processing_delay;
            let cap = config.backpressure.max_write_without_response_queue;
            self.drain_write_without_response_queue(central, peripheral, delay, cap);
        }

        write_result
    }

    /// Schedule the queue-depth drain that fires `onReadyToSendWriteWithoutResponse` only on
    /// the cap->cap-1 transition, independent of whether the write itself succeeded
    /// (DESIGN.md Open Question 2: the readiness callback fires on queue-depth transition
    /// alone). `cap` is the configured queue depth at enqueue time, captured so the ready
    /// event does not fire on every drain, only the one that empties the queue from full.
    fn drain_write_without_response_queue(&self, central: CentralId, peripheral: PeripheralId, delay: std::time::Duration, cap: u32) {
        let bus_centrals = self.centrals.clone();
        let queue = self.write_without_response_queue.clone();
        let handle = scheduler::schedule(delay, async move {
            let was_full = queue.get(&(central, peripheral)).map(|v| *v).unwrap_or(0);
            if let Some(mut entry) = queue.get_mut(&(central, peripheral)) {
                if *entry > 0 {
                    *entry -= 1;
                }
            }
            if was_full == cap {
                if let Some(handle) = bus_centrals.get(&central) {
                    handle.on_ready_to_send_write_without_response(peripheral).await;
                }
            }
        });
        self.track_central_delay(central, handle);
    }

    pub async fn read_descriptor(
        &self,
        central: CentralId,
        peripheral: PeripheralId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Vec<u8>> {
        self.require_connected(central, peripheral)?;
        let Some(peripheral_handle) = self.peripherals.get(&peripheral).map(|e| e.clone()) else {
            return Err(ConnectionError::UnknownDevice.into());
        };
        let delay = self.configuration().await.timing.descriptor_discovery_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        peripheral_handle.handle_read_descriptor(central, characteristic, descriptor).await
    }

    pub async fn write_descriptor(
        &self,
        central: CentralId,
        peripheral: PeripheralId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        self.require_connected(central, peripheral)?;
        let Some(peripheral_handle) = self.peripherals.get(&peripheral).map(|e| e.clone()) else {
            return Err(ConnectionError::UnknownDevice.into());
        };
        let delay = self.configuration().await.timing.write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        peripheral_handle.handle_write_descriptor(central, characteristic, descriptor, value).await
    }

    /// Subscribe/unsubscribe; the peripheral façade validates that the characteristic
    /// declares notify or indicate.
    pub async fn set_notify_value(
        &self,
        central: CentralId,
        peripheral: PeripheralId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<bool> {
        self.require_connected(central, peripheral)?;
        let Some(peripheral_handle) = self.peripherals.get(&peripheral).map(|e| e.clone()) else {
            return Err(ConnectionError::UnknownDevice.into());
        };
        peripheral_handle.handle_set_notify(central, characteristic, enabled).await
    }

    /// `true` iff the write-without-response queue for this pair is below cap.
    pub async fn can_send_write_without_response(&self, central: CentralId, peripheral: PeripheralId) -> bool {
        let config = self.configuration().await;
        if !config.backpressure.simulate_backpressure {
            return true;
        }
        let count = self.write_without_response_queue.get(&(central, peripheral)).map(|v| *v).unwrap_or(0);
        count < config.backpressure.max_write_without_response_queue
    }

    /// Push an updated characteristic value to every subscribed central.
    /// Queues per `(peripheral, characteristic)` against `maxNotificationQueue`; returns
    /// `PrepareQueueFull` if the caller should back off instead of enqueuing further. The
    /// queue-depth accounting and drain run unconditionally (not just when
    /// `simulate_backpressure` is set) since the peripheral façade's own local queue relies
    /// on `onReadyToUpdateSubscribers` draining it regardless of whether the Bus layer is
    /// also enforcing a cap.
    pub async fn update_value(
        &self,
        peripheral: PeripheralId,
        characteristic: Uuid,
        subscribers: Vec<CentralId>,
        value: Result<Vec<u8>>,
    ) -> Result<()> {
        if subscribers.is_empty() {
            return Ok(());
        }

        let config = self.configuration().await;
        let cap = config.backpressure.max_notification_queue;
        if config.backpressure.simulate_backpressure {
            let count = self.notification_queue.get(&(peripheral, characteristic)).map(|v| *v).unwrap_or(0);
            if count >= cap {
                return Err(AttError::PrepareQueueFull.into());
            }
        }
        self.notification_queue.entry((peripheral, characteristic)).and_modify(|n| *n += 1).or_insert(1);

        if !config.timing.notification_delay.is_zero() {
            tokio::time::sleep(config.timing.notification_delay).await;
        }

        for central in subscribers {
            if let Some(handle) = self.centrals.get(&central) {
                handle.on_value_update(peripheral, characteristic, value.clone()).await;
            }
        }

        self.drain_notification_queue(peripheral, characteristic, config.timing.backpressure_processing_delay, cap);
        Ok(())
    }

    /// Schedule the queue-depth drain that fires `onReadyToUpdateSubscribers` only on the
    /// cap->cap-1 transition. `cap` is the configured queue depth captured at enqueue time.
    fn drain_notification_queue(&self, peripheral: PeripheralId, characteristic: Uuid, delay: std::time::Duration, cap: u32) {
        let bus_peripherals = self.peripherals.clone();
        let queue = self.notification_queue.clone();
        let handle = scheduler::schedule(delay, async move {
            let was_full = queue.get(&(peripheral, characteristic)).map(|v| *v).unwrap_or(0);
            if let Some(mut entry) = queue.get_mut(&(peripheral, characteristic)) {
                if *entry > 0 {
                    *entry -= 1;
                }
            }
            if was_full == cap {
                if let Some(handle) = bus_peripherals.get(&peripheral) {
                    handle.on_ready_to_update_subscribers(characteristic).await;
                }
            }
        });
        self.track_peripheral_delay(peripheral, handle);
    }
}
