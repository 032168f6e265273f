// Error taxonomy for the TMC2209 UART stack

/// Error types for TMC2209 communication and configuration
#[derive(Debug, thiserror::Error)]
pub enum Tmc2209Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    Checksum { expected: u8, received: u8 },

    #[error("Malformed datagram: {reason}")]
    Framing { reason: String },

    #[error("Unexpected address in reply: expected 0x{expected:02X}, got 0x{received:02X}")]
    UnexpectedAddress { expected: u8, received: u8 },

    #[error("Reply for register 0x{received:02X}, requested 0x{expected:02X}")]
    UnexpectedRegister { expected: u8, received: u8 },

    #[error("Device {address} unresponsive after {attempts} attempts")]
    DeviceUnresponsive { address: u8, attempts: u32 },

    #[error("{field} value {value} out of range (max {max})")]
    ValueOutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("Invalid microstep resolution {0} (allowed: 0, 2, 4, ..., 256)")]
    InvalidMicrostep(u16),

    #[error("Register 0x{0:02X} is write-only")]
    WriteOnlyRegister(u8),

    #[error("Register 0x{0:02X} is read-only")]
    ReadOnlyRegister(u8),

    #[error("Invalid device address {0} (must be 0-3)")]
    InvalidAddress(u8),

    #[error("Device {address} did not acknowledge write to register 0x{register:02X}")]
    WriteNotAcknowledged { address: u8, register: u8 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Tmc2209Error>;

impl Tmc2209Error {
    /// Whether the transport may retry after this error
    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, Tmc2209Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut)
    }
}
