// TMC2209 stepper driver over single-wire UART
//
// Provides:
// - Datagram codec (sync, address, register, data, CRC-8)
// - Register map with unit conversions (current, microsteps, thresholds)
// - Shared half-duplex bus session with serialized transactions and retries
// - High-level driver API
// - Simulated bus for tests and dry runs

pub mod bus;
pub mod datagram;
mod driver;
pub mod error;
pub mod registers;
pub mod sim;

pub use bus::{BusConfig, BusSession, HalfDuplex};
pub use datagram::DeviceAddress;
pub use driver::Tmc2209;
pub use error::{Result, Tmc2209Error};
pub use registers::{Register, StatusFields};
pub use sim::SimulatedBus;
