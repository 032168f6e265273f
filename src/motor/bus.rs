// Shared half-duplex UART bus for TMC2209 drivers
//
// One BusSession per physical UART. Clones share the same port; every
// transaction (request, echo, optional reply) runs under one lock, so
// datagrams from different drivers never interleave on the wire.

use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::datagram::{self, DeviceAddress, REPLY_LEN};
use super::error::{Result, Tmc2209Error};
use super::registers::Register;
use crate::config::{DEFAULT_BAUDRATE, DEFAULT_REPLY_TIMEOUT, DEFAULT_RETRIES};

/// Byte-level access to a single-wire UART
pub trait HalfDuplex: Send {
    /// Write all bytes and wait until they have left the transmitter
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Fill `buf` completely or fail with `ErrorKind::TimedOut`
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()>;

    /// Drop anything waiting in the receive buffer
    fn clear_input(&mut self) -> io::Result<()>;
}

impl HalfDuplex for Box<dyn SerialPort> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout)?;
        self.read_exact(buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Transaction timing and retry policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusConfig {
    /// How long to wait for a reply datagram
    pub reply_timeout: Duration,
    /// Extra attempts after a read times out
    pub retries: u32,
    /// TX is tied to RX, so every sent byte is read back first
    pub echo: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            retries: DEFAULT_RETRIES,
            echo: true,
        }
    }
}

/// Shared handle to one UART with TMC2209 drivers attached
#[derive(Clone)]
pub struct BusSession {
    port: Arc<Mutex<Box<dyn HalfDuplex>>>,
    config: BusConfig,
}

impl BusSession {
    /// Open a serial port at the default baudrate
    pub fn open(port_name: &str, config: BusConfig) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE, config)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32, config: BusConfig) -> Result<Self> {
        let mut port = serialport::new(port_name, baudrate)
            .timeout(config.reply_timeout)
            .open()?;
        port.clear_input()?;

        Ok(Self::new(port, config))
    }

    /// Wrap an already opened transport
    pub fn new(port: impl HalfDuplex + 'static, config: BusConfig) -> Self {
        Self {
            port: Arc::new(Mutex::new(Box::new(port))),
            config,
        }
    }

    /// Exclusive access for one transaction. A panic mid-transaction leaves
    /// the port usable; the next read clears stale input on retry anyway.
    fn lock(&self) -> MutexGuard<'_, Box<dyn HalfDuplex>> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send bytes and, on an echoing bus, consume and check our own echo
    fn transmit(&self, port: &mut Box<dyn HalfDuplex>, bytes: &[u8]) -> Result<()> {
        port.send(bytes)?;
        if !self.config.echo {
            return Ok(());
        }

        let mut echo = vec![0u8; bytes.len()];
        match port.receive(&mut echo, self.config.reply_timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(Tmc2209Error::Framing {
                    reason: "no echo on bus (check TX/RX wiring)".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        if echo != bytes {
            warn!("Echo mismatch: sent {:02X?}, read {:02X?}", bytes, echo);
            return Err(Tmc2209Error::Framing {
                reason: format!("echo mismatch: {:02X?}", echo),
            });
        }
        Ok(())
    }

    /// Write a register. The driver does not acknowledge writes; the call
    /// returns once the datagram is flushed (and echoed).
    pub fn write(&self, address: DeviceAddress, register: Register, value: u32) -> Result<()> {
        if !register.is_writable() {
            return Err(Tmc2209Error::ReadOnlyRegister(register.addr()));
        }

        let frame = datagram::encode_write(address, register, value);
        debug!(
            "Write to driver {}: reg={:?}, value=0x{:08X}, frame={:02X?}",
            address, register, value, frame
        );

        let mut port = self.lock();
        // A reply that arrived after an earlier timeout would read as our echo
        port.clear_input()?;
        self.transmit(&mut port, &frame)
    }

    /// Read a register, retrying on timeout
    pub fn read(&self, address: DeviceAddress, register: Register) -> Result<u32> {
        if !register.is_readable() {
            return Err(Tmc2209Error::WriteOnlyRegister(register.addr()));
        }

        let request = datagram::encode_read(address, register);
        let attempts = self.config.retries + 1;

        let mut port = self.lock();
        for attempt in 1..=attempts {
            if attempt > 1 {
                warn!(
                    "No reply from driver {} for {:?}, retry {}/{}",
                    address, register, attempt - 1, self.config.retries
                );
            }
            port.clear_input()?;

            self.transmit(&mut port, &request)?;

            let mut reply = [0u8; REPLY_LEN];
            if let Err(e) = port.receive(&mut reply, self.config.reply_timeout) {
                let err = Tmc2209Error::from(e);
                if err.is_timeout() {
                    continue;
                }
                return Err(err);
            }

            let (reply_register, value) = datagram::decode_reply(&reply)?;
            if reply_register != register.addr() {
                return Err(Tmc2209Error::UnexpectedRegister {
                    expected: register.addr(),
                    received: reply_register,
                });
            }

            debug!(
                "Read from driver {}: reg={:?}, value=0x{:08X}",
                address, register, value
            );
            return Ok(value);
        }

        Err(Tmc2209Error::DeviceUnresponsive {
            address: address.get(),
            attempts,
        })
    }

    /// Read the interface transmission counter (increments on every accepted write)
    pub fn interface_count(&self, address: DeviceAddress) -> Result<u8> {
        Ok((self.read(address, Register::Ifcnt)? & 0xFF) as u8)
    }

    /// Check whether a driver answers at this address
    pub fn ping(&self, address: DeviceAddress) -> Result<bool> {
        match self.interface_count(address) {
            Ok(_) => Ok(true),
            Err(Tmc2209Error::DeviceUnresponsive { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
