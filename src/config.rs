//! Immutable configuration snapshot (C6) installed atomically on the Bus, plus named
//! presets for common deployment shapes (instant, slow, unreliable).

use std::time::Duration;

/// Timing knobs: each governs the delay inserted before the corresponding event is
/// delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub state_update_delay: Duration,
    pub scan_discovery_interval: Duration,
    pub connection_delay: Duration,
    pub disconnection_delay: Duration,
    pub service_discovery_delay: Duration,
    pub characteristic_discovery_delay: Duration,
    pub descriptor_discovery_delay: Duration,
    pub read_delay: Duration,
    pub write_delay: Duration,
    pub notification_delay: Duration,
    pub pairing_delay: Duration,
    pub backpressure_processing_delay: Duration,
}

/// Simulated RSSI: `clamp(range, uniform(range) + uniform(-variation, +variation))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssiConfig {
    pub range: (i16, i16),
    pub variation: i16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorInjectionConfig {
    pub simulate_connection_failure: bool,
    pub connection_failure_rate: f64,
    pub simulate_read_write_errors: bool,
    pub read_write_error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtuConfig {
    pub default_mtu: u16,
    pub maximum_mtu: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureConfig {
    pub max_write_without_response_queue: u32,
    pub max_notification_queue: u32,
    pub simulate_backpressure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConfig {
    pub require_pairing: bool,
    pub simulate_pairing: bool,
    pub pairing_succeeds: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptionsConfig {
    pub honor_allow_duplicates_option: bool,
    pub honor_solicited_service_uuids: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorationConfig {
    pub state_restoration_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEventsConfig {
    pub fire_connection_events: bool,
    pub fire_ancs_authorization_updates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementConfig {
    pub auto_generate_advertisement_fields: bool,
}

/// The full immutable snapshot, installed atomically via `EmulatorBus::configure`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Configuration {
    pub timing: TimingConfig,
    pub rssi: RssiConfig,
    pub error_injection: ErrorInjectionConfig,
    pub mtu: MtuConfig,
    pub backpressure: BackpressureConfig,
    pub security: SecurityConfig,
    pub scan_options: ScanOptionsConfig,
    pub restoration: RestorationConfig,
    pub connection_events: ConnectionEventsConfig,
    pub advertisement: AdvertisementConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        ConfigurationBuilder::new().build()
    }
}

impl Configuration {
    /// Realistic default delays, matching real-radio order of magnitude.
    pub fn default_preset() -> Self {
        Self::default()
    }

    /// All delays zero; for deterministic unit tests.
    pub fn instant() -> Self {
        ConfigurationBuilder::new()
            .timing(TimingConfig {
                state_update_delay: Duration::ZERO,
                scan_discovery_interval: Duration::from_millis(1),
                connection_delay: Duration::ZERO,
                disconnection_delay: Duration::ZERO,
                service_discovery_delay: Duration::ZERO,
                characteristic_discovery_delay: Duration::ZERO,
                descriptor_discovery_delay: Duration::ZERO,
                read_delay: Duration::ZERO,
                write_delay: Duration::ZERO,
                notification_delay: Duration::ZERO,
                pairing_delay: Duration::ZERO,
                backpressure_processing_delay: Duration::ZERO,
            })
            .build()
    }

    /// Elongated delays, small MTU, and back-pressure enabled.
    pub fn slow() -> Self {
        ConfigurationBuilder::new()
            .timing(TimingConfig {
                state_update_delay: Duration::from_millis(500),
                scan_discovery_interval: Duration::from_millis(500),
                connection_delay: Duration::from_millis(800),
                disconnection_delay: Duration::from_millis(400),
                service_discovery_delay: Duration::from_millis(300),
                characteristic_discovery_delay: Duration::from_millis(300),
                descriptor_discovery_delay: Duration::from_millis(200),
                read_delay: Duration::from_millis(250),
                write_delay: Duration::from_millis(250),
                notification_delay: Duration::from_millis(200),
                pairing_delay: Duration::from_millis(600),
                backpressure_processing_delay: Duration::from_millis(700),
            })
            .mtu(MtuConfig { default_mtu: 23, maximum_mtu: 64 })
            .backpressure(BackpressureConfig {
                max_write_without_response_queue: 2,
                max_notification_queue: 2,
                simulate_backpressure: true,
            })
            .build()
    }

    /// Error rates high enough to exercise failure paths in tests.
    pub fn unreliable() -> Self {
        ConfigurationBuilder::new()
            .error_injection(ErrorInjectionConfig {
                simulate_connection_failure: true,
                connection_failure_rate: 0.3,
                simulate_read_write_errors: true,
                read_write_error_rate: 0.3,
            })
            .build()
    }
}

/// Builder for [`Configuration`], preferring explicit typed construction (e.g. `ScanFilter`,
/// `PeripheralProperties`) over loosely-typed option maps.
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            config: Configuration {
                timing: TimingConfig {
                    state_update_delay: Duration::from_millis(50),
                    scan_discovery_interval: Duration::from_millis(100),
                    connection_delay: Duration::from_millis(150),
                    disconnection_delay: Duration::from_millis(50),
                    service_discovery_delay: Duration::from_millis(80),
                    characteristic_discovery_delay: Duration::from_millis(60),
                    descriptor_discovery_delay: Duration::from_millis(40),
                    read_delay: Duration::from_millis(30),
                    write_delay: Duration::from_millis(30),
                    notification_delay: Duration::from_millis(20),
                    pairing_delay: Duration::from_millis(200),
                    backpressure_processing_delay: Duration::from_millis(100),
                },
                rssi: RssiConfig { range: (-90, -40), variation: 5 },
                error_injection: ErrorInjectionConfig {
                    simulate_connection_failure: false,
                    connection_failure_rate: 0.0,
                    simulate_read_write_errors: false,
                    read_write_error_rate: 0.0,
                },
                mtu: MtuConfig { default_mtu: 23, maximum_mtu: 517 },
                backpressure: BackpressureConfig {
                    max_write_without_response_queue: 10,
                    max_notification_queue: 10,
                    simulate_backpressure: false,
                },
                security: SecurityConfig {
                    require_pairing: false,
                    simulate_pairing: false,
                    pairing_succeeds: true,
                },
                scan_options: ScanOptionsConfig {
                    honor_allow_duplicates_option: true,
                    honor_solicited_service_uuids: true,
                },
                restoration: RestorationConfig { state_restoration_enabled: true },
                connection_events: ConnectionEventsConfig {
                    fire_connection_events: false,
                    fire_ancs_authorization_updates: false,
                },
                advertisement: AdvertisementConfig { auto_generate_advertisement_fields: true },
            },
        }
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn rssi(mut self, rssi: RssiConfig) -> Self {
        self.config.rssi = rssi;
        self
    }

    pub fn error_injection(mut self, error_injection: ErrorInjectionConfig) -> Self {
        self.config.error_injection = error_injection;
        self
    }

    pub fn mtu(mut self, mtu: MtuConfig) -> Self {
        self.config.mtu = mtu;
        self
    }

    pub fn backpressure(mut self, backpressure: BackpressureConfig) -> Self {
        self.config.backpressure = backpressure;
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.config.security = security;
        self
    }

    pub fn scan_options(mut self, scan_options: ScanOptionsConfig) -> Self {
        self.config.scan_options = scan_options;
        self
    }

    pub fn restoration(mut self, restoration: RestorationConfig) -> Self {
        self.config.restoration = restoration;
        self
    }

    pub fn connection_events(mut self, connection_events: ConnectionEventsConfig) -> Self {
        self.config.connection_events = connection_events;
        self
    }

    pub fn advertisement(mut self, advertisement: AdvertisementConfig) -> Self {
        self.config.advertisement = advertisement;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_preset_zeroes_delays() {
        let cfg = Configuration::instant();
        assert_eq!(cfg.timing.connection_delay, Duration::ZERO);
        assert_eq!(cfg.timing.read_delay, Duration::ZERO);
    }

    #[test]
    fn unreliable_preset_injects_errors() {
        let cfg = Configuration::unreliable();
        assert!(cfg.error_injection.simulate_connection_failure);
        assert!(cfg.error_injection.connection_failure_rate > 0.0);
    }
}
