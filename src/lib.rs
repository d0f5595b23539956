//! An in-process emulator of a Bluetooth Low Energy central/peripheral GATT stack, for
//! exercising BLE application code without radio hardware.
//!
//! The [`bus::EmulatorBus`] is the core: a process-wide coordinator that owns connections,
//! scan/advertise state, MTU and back-pressure accounting, and pairing and restoration
//! state. Applications interact with it through four façades: [`central::Central`] and
//! [`peripheral::Peripheral`] (the application-facing managers), and the remote-peripheral
//! proxy each central hands out ([`central::proxy::RemotePeripheral`]); a remote-central
//! equivalent is not separately typed; the peripheral façade addresses centrals by
//! [`identifier::CentralId`] directly.
//!
//! ```no_run
//! use ble_emulator::central::{Central, CentralOptions};
//! use ble_emulator::peripheral::{Peripheral, PeripheralOptions};
//!
//! # async fn example() {
//! let peripheral = Peripheral::new(None, None, PeripheralOptions::default());
//! let central = Central::new(None, None, CentralOptions::default());
//! # let _ = (peripheral, central);
//! # }
//! ```

pub mod bus;
pub mod central;
pub mod config;
pub mod error;
pub mod gatt;
pub mod identifier;
pub mod l2cap;
pub mod peripheral;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod uuid_ext;

pub use bus::EmulatorBus;
pub use config::Configuration;
pub use error::{AttError, ConnectionError, EmulatorError, Result};
pub use identifier::{CentralId, PeripheralId};
pub use state::ManagerState;
