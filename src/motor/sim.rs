// In-memory TMC2209 bus for tests and dry runs
//
// Each simulated driver keeps a register file and an IFCNT counter, answers
// read requests with reply datagrams and swallows writes, like the chip.
// Clones share state, so a test can keep a handle while the BusSession owns
// another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::bus::HalfDuplex;
use super::datagram::{self, Request};
use super::registers::Register;

#[derive(Debug, Default)]
struct SimDevice {
    registers: HashMap<u8, u32>,
    ifcnt: u8,
}

impl SimDevice {
    fn read(&self, register: u8) -> u32 {
        if register == Register::Ifcnt.addr() {
            return self.ifcnt as u32;
        }
        self.registers.get(&register).copied().unwrap_or_else(|| {
            Register::from_addr(register)
                .map(Register::reset_value)
                .unwrap_or(0)
        })
    }

    fn write(&mut self, register: u8, value: u32) {
        if register == Register::Gstat.addr() {
            // write 1 to clear
            let current = self.read(register);
            self.registers.insert(register, current & !value);
        } else {
            self.registers.insert(register, value);
        }
        self.ifcnt = self.ifcnt.wrapping_add(1);
    }
}

#[derive(Debug)]
struct SimState {
    devices: HashMap<u8, SimDevice>,
    silent: HashSet<u8>,
    deaf: HashSet<u8>,
    echo: bool,
    corrupt_replies: usize,
    misroute_replies: usize,
    rx: VecDeque<u8>,
    wire: Vec<u8>,
    requests: Vec<Request>,
}

/// Simulated single-wire UART with zero or more TMC2209s attached
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// Empty bus with echo enabled (TX and RX joined through a resistor)
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                devices: HashMap::new(),
                silent: HashSet::new(),
                deaf: HashSet::new(),
                echo: true,
                corrupt_replies: 0,
                misroute_replies: 0,
                rx: VecDeque::new(),
                wire: Vec::new(),
                requests: Vec::new(),
            })),
        }
    }

    /// Attach a driver at `address` with power-on register values
    pub fn with_device(self, address: u8) -> Self {
        self.state().devices.entry(address).or_default();
        self
    }

    pub fn with_echo(self, echo: bool) -> Self {
        self.state().echo = echo;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop a driver from answering (it still accepts writes)
    pub fn silence(&self, address: u8) {
        self.state().silent.insert(address);
    }

    /// Make a driver drop writes (it still answers reads)
    pub fn ignore_writes(&self, address: u8) {
        self.state().deaf.insert(address);
    }

    /// Flip a data bit in the next `count` replies
    pub fn corrupt_replies(&self, count: usize) {
        self.state().corrupt_replies = count;
    }

    /// Answer the next `count` reads as if for the following register
    pub fn misroute_replies(&self, count: usize) {
        self.state().misroute_replies = count;
    }

    /// Current register value of a simulated driver
    pub fn register(&self, address: u8, register: Register) -> Option<u32> {
        self.state()
            .devices
            .get(&address)
            .map(|d| d.read(register.addr()))
    }

    /// Preload a register, e.g. DRV_STATUS flags
    pub fn set_register(&self, address: u8, register: Register, value: u32) {
        self.state()
            .devices
            .entry(address)
            .or_default()
            .registers
            .insert(register.addr(), value);
    }

    /// Every request datagram the host sent, in order
    pub fn requests(&self) -> Vec<Request> {
        self.state().requests.clone()
    }

    /// Raw bytes the host transmitted, in order
    pub fn wire(&self) -> Vec<u8> {
        self.state().wire.clone()
    }
}

impl HalfDuplex for SimulatedBus {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        state.wire.extend_from_slice(bytes);
        if state.echo {
            state.rx.extend(bytes.iter().copied());
        }

        let request = match datagram::decode_request(bytes) {
            Ok((request, _)) => request,
            Err(e) => {
                debug!("Simulated bus ignored datagram: {}", e);
                return Ok(());
            }
        };
        state.requests.push(request);

        match request {
            Request::Write {
                address,
                register,
                value,
            } => {
                if state.deaf.contains(&address) {
                    return Ok(());
                }
                if let Some(device) = state.devices.get_mut(&address) {
                    device.write(register, value);
                }
            }
            Request::Read { address, register } => {
                if state.silent.contains(&address) {
                    return Ok(());
                }
                let Some(device) = state.devices.get(&address) else {
                    return Ok(());
                };
                let value = device.read(register);
                let reply_register = if state.misroute_replies > 0 {
                    state.misroute_replies -= 1;
                    register.wrapping_add(1)
                } else {
                    register
                };
                let mut reply = datagram::encode_reply(reply_register, value);
                if state.corrupt_replies > 0 {
                    state.corrupt_replies -= 1;
                    reply[4] ^= 0x10;
                }
                state.rx.extend(reply);
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<()> {
        let mut state = self.state();
        if state.rx.len() < buf.len() {
            // A real port would block until the timeout; the partial bytes are lost
            state.rx.clear();
            return Err(io::Error::new(io::ErrorKind::TimedOut, "simulated timeout"));
        }
        for b in buf.iter_mut() {
            *b = state.rx.pop_front().unwrap_or_default();
        }
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state().rx.clear();
        Ok(())
    }
}
