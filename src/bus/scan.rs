//! Scanning and discovery matcher and advertising.

use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use crate::gatt::{keys, AdvertisementData, AdvertisementValue};
use crate::identifier::{CentralId, PeripheralId};
use crate::scheduler;

use super::{EmulatorBus, ScanRegistration};

impl EmulatorBus {
    /// Record the scan filter and spawn the scan loop bound to `central`.
    pub async fn start_scanning(
        self: &Arc<Self>,
        central: CentralId,
        services: Option<Vec<Uuid>>,
        allow_duplicates_option: bool,
        solicited_services: Option<Vec<Uuid>>,
    ) {
        self.stop_scanning(central).await;
        self.scan_registrations.insert(
            central,
            ScanRegistration {
                services: services.unwrap_or_default(),
                allow_duplicates: allow_duplicates_option,
                solicited_services,
                already_delivered: Default::default(),
            },
        );

        let bus = self.clone();
        let interval = self.config.read().await.timing.scan_discovery_interval;
        let handle = scheduler::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                bus.run_scan_cycle(central).await;
            }
        });
        self.scan_tasks.insert(central, handle);
    }

    pub async fn stop_scanning(&self, central: CentralId) {
        if let Some((_, handle)) = self.scan_tasks.remove(&central) {
            handle.cancel();
        }
        if let Some((_, reg)) = self.scan_registrations.remove(&central) {
            reg.already_delivered.clear();
        }
    }

    async fn run_scan_cycle(&self, central: CentralId) {
        let Some(central_handle) = self.centrals.get(&central).map(|e| e.clone()) else {
            return;
        };
        let Some(registration) = self.scan_registrations.get(&central) else {
            return;
        };
        let config = self.config.read().await;
        let honor_duplicates = config.scan_options.honor_allow_duplicates_option;
        let honor_solicited = config.scan_options.honor_solicited_service_uuids;
        let auto_generate = config.advertisement.auto_generate_advertisement_fields;
        let rssi_cfg = config.rssi;
        drop(config);

        let peripherals: Vec<PeripheralId> = self.advertising.iter().map(|e| *e.key()).collect();
        for peripheral in peripherals {
            let Some(advertisement) = self.advertising.get(&peripheral).map(|e| e.clone()) else {
                continue;
            };

            if !registration.services.is_empty() {
                let advertised = advertisement.service_uuids();
                if !registration.services.iter().any(|u| advertised.contains(u)) {
                    continue;
                }
            }

            if honor_solicited {
                if let Some(solicited_filter) = &registration.solicited_services {
                    let advertised_solicited = advertisement.solicited_service_uuids();
                    if !solicited_filter.iter().any(|u| advertised_solicited.contains(u)) {
                        continue;
                    }
                }
            }

            let allow_duplicates = honor_duplicates && registration.allow_duplicates;
            if !allow_duplicates {
                if !registration.already_delivered.insert(peripheral) {
                    continue;
                }
            }

            let mut delivered = advertisement;
            if auto_generate {
                delivered = augment_advertisement(delivered);
            }

            let rssi = simulate_rssi(rssi_cfg);
            central_handle.on_discovered(peripheral, delivered, rssi).await;
        }
    }

    /// Store the advertisement map verbatim and mark the peripheral as advertising; there is
    /// no independent advertising packet lifecycle.
    pub fn start_advertising(&self, peripheral: PeripheralId, data: AdvertisementData) {
        self.advertising.insert(peripheral, data);
    }

    pub fn stop_advertising(&self, peripheral: PeripheralId) {
        self.advertising.remove(&peripheral);
    }

    pub fn is_advertising(&self, peripheral: PeripheralId) -> bool {
        self.advertising.contains_key(&peripheral)
    }
}

fn augment_advertisement(mut data: AdvertisementData) -> AdvertisementData {
    if !data.contains_key(keys::TX_POWER_LEVEL) {
        let tx_power = rand::rng().random_range(-12..=-4);
        data.set(keys::TX_POWER_LEVEL, AdvertisementValue::Number(tx_power));
    }
    if !data.contains_key(keys::IS_CONNECTABLE) {
        data.set(keys::IS_CONNECTABLE, AdvertisementValue::Bool(true));
    }
    data
}

pub(crate) fn simulate_rssi(cfg: crate::config::RssiConfig) -> i16 {
    let (low, high) = cfg.range;
    let mut rng = rand::rng();
    let base = rng.random_range(low..=high);
    let jitter = if cfg.variation > 0 {
        rng.random_range(-cfg.variation..=cfg.variation)
    } else {
        0
    };
    (base + jitter).clamp(low, high)
}
