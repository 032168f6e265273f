// TMC2209 single-wire UART datagrams
//
// Write:        [0x05, addr, reg | 0x80, d3, d2, d1, d0, crc]
// Read request: [0x05, addr, reg, crc]
// Read reply:   [0x05, 0xFF, reg, d3, d2, d1, d0, crc]
//
// Data is big-endian. CRC-8 covers every byte before it.

use std::fmt;

use super::error::{Result, Tmc2209Error};
use super::registers::Register;

/// Sync nibble plus reserved bits, first byte of every datagram
pub const SYNC_BYTE: u8 = 0x05;

/// Address the driver uses when replying to the host
pub const MASTER_ADDRESS: u8 = 0xFF;

/// Set on the register byte of write datagrams
const WRITE_FLAG: u8 = 0x80;

pub const WRITE_LEN: usize = 8;
pub const READ_REQUEST_LEN: usize = 4;
pub const REPLY_LEN: usize = 8;

/// Node address of a driver on a shared bus (MS1/MS2 strapping)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub const MAX: u8 = 3;

    pub fn new(address: u8) -> Result<Self> {
        if address > Self::MAX {
            return Err(Tmc2209Error::InvalidAddress(address));
        }
        Ok(Self(address))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DeviceAddress {
    type Error = Tmc2209Error;

    fn try_from(address: u8) -> Result<Self> {
        Self::new(address)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CRC-8 as given in the datasheet: polynomial 0x07, init 0,
/// each byte fed least significant bit first.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut byte = byte;
        for _ in 0..8 {
            crc = if ((crc >> 7) ^ (byte & 0x01)) != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
            byte >>= 1;
        }
    }
    crc
}

/// Build a write datagram
pub fn encode_write(address: DeviceAddress, register: Register, value: u32) -> [u8; WRITE_LEN] {
    let mut frame = [0u8; WRITE_LEN];
    frame[0] = SYNC_BYTE;
    frame[1] = address.get();
    frame[2] = register.addr() | WRITE_FLAG;
    frame[3..7].copy_from_slice(&value.to_be_bytes());
    frame[7] = crc8(&frame[..7]);
    frame
}

/// Build a read request datagram
pub fn encode_read(address: DeviceAddress, register: Register) -> [u8; READ_REQUEST_LEN] {
    let mut frame = [0u8; READ_REQUEST_LEN];
    frame[0] = SYNC_BYTE;
    frame[1] = address.get();
    frame[2] = register.addr();
    frame[3] = crc8(&frame[..3]);
    frame
}

/// Parse a reply datagram into (register address, value)
///
/// Checks run in order: length, CRC, sync byte, master address. A corrupted
/// frame therefore always reports `Checksum` rather than a field mismatch.
pub fn decode_reply(frame: &[u8]) -> Result<(u8, u32)> {
    if frame.len() != REPLY_LEN {
        return Err(Tmc2209Error::Framing {
            reason: format!("expected {} bytes, got {}", REPLY_LEN, frame.len()),
        });
    }

    let expected = crc8(&frame[..REPLY_LEN - 1]);
    let received = frame[REPLY_LEN - 1];
    if expected != received {
        return Err(Tmc2209Error::Checksum { expected, received });
    }

    if frame[0] & 0x0F != SYNC_BYTE {
        return Err(Tmc2209Error::Framing {
            reason: format!("invalid sync byte 0x{:02X}", frame[0]),
        });
    }

    if frame[1] != MASTER_ADDRESS {
        return Err(Tmc2209Error::UnexpectedAddress {
            expected: MASTER_ADDRESS,
            received: frame[1],
        });
    }

    let register = frame[2] & !WRITE_FLAG;
    let value = u32::from_be_bytes([frame[3], frame[4], frame[5], frame[6]]);
    Ok((register, value))
}

/// Build a reply datagram as the driver would send it
pub fn encode_reply(register: u8, value: u32) -> [u8; REPLY_LEN] {
    let mut frame = [0u8; REPLY_LEN];
    frame[0] = SYNC_BYTE;
    frame[1] = MASTER_ADDRESS;
    frame[2] = register & !WRITE_FLAG;
    frame[3..7].copy_from_slice(&value.to_be_bytes());
    frame[7] = crc8(&frame[..7]);
    frame
}

/// A request datagram as seen on the wire by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Write { address: u8, register: u8, value: u32 },
    Read { address: u8, register: u8 },
}

/// Parse a host request (write or read) from the front of `bytes`
///
/// Returns the request and the number of bytes it occupied.
pub fn decode_request(bytes: &[u8]) -> Result<(Request, usize)> {
    if bytes.len() < READ_REQUEST_LEN {
        return Err(Tmc2209Error::Framing {
            reason: format!("request too short ({} bytes)", bytes.len()),
        });
    }
    if bytes[0] & 0x0F != SYNC_BYTE {
        return Err(Tmc2209Error::Framing {
            reason: format!("invalid sync byte 0x{:02X}", bytes[0]),
        });
    }

    let is_write = bytes[2] & WRITE_FLAG != 0;
    let len = if is_write { WRITE_LEN } else { READ_REQUEST_LEN };
    if bytes.len() < len {
        return Err(Tmc2209Error::Framing {
            reason: format!("write request truncated ({} bytes)", bytes.len()),
        });
    }

    let expected = crc8(&bytes[..len - 1]);
    let received = bytes[len - 1];
    if expected != received {
        return Err(Tmc2209Error::Checksum { expected, received });
    }

    let address = bytes[1];
    let register = bytes[2] & !WRITE_FLAG;
    let request = if is_write {
        Request::Write {
            address,
            register,
            value: u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
        }
    } else {
        Request::Read { address, register }
    };
    Ok((request, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: u8) -> DeviceAddress {
        DeviceAddress::new(a).unwrap()
    }

    #[test]
    fn test_crc8_datasheet_vectors() {
        // Read request for GCONF at address 0
        assert_eq!(crc8(&[0x05, 0x00, 0x00]), 0x48);
        // Read request for IFCNT at address 0
        assert_eq!(crc8(&[0x05, 0x00, 0x02]), 0x8F);
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn test_address_range() {
        assert!(DeviceAddress::new(3).is_ok());
        assert!(matches!(
            DeviceAddress::try_from(4),
            Err(Tmc2209Error::InvalidAddress(4))
        ));
    }

    #[test]
    fn test_encode_write() {
        let frame = encode_write(addr(2), Register::Chopconf, 0x1000_0053);
        assert_eq!(frame[0], SYNC_BYTE);
        assert_eq!(frame[1], 2);
        assert_eq!(frame[2], 0xEC);
        assert_eq!(&frame[3..7], &[0x10, 0x00, 0x00, 0x53]);
        assert_eq!(frame[7], crc8(&frame[..7]));
    }

    #[test]
    fn test_encode_read() {
        let frame = encode_read(addr(0), Register::Gconf);
        assert_eq!(frame, [0x05, 0x00, 0x00, 0x48]);
    }

    #[test]
    fn test_decode_reply() {
        let frame = encode_reply(0x6F, 0x8000_0001);
        assert_eq!(decode_reply(&frame).unwrap(), (0x6F, 0x8000_0001));
    }

    #[test]
    fn test_decode_reply_wrong_length() {
        let frame = encode_reply(0x02, 7);
        assert!(matches!(
            decode_reply(&frame[..7]),
            Err(Tmc2209Error::Framing { .. })
        ));
    }

    #[test]
    fn test_decode_reply_single_bit_flip_is_checksum_error() {
        let frame = encode_reply(0x6C, 0x1000_0053);
        for byte in 0..REPLY_LEN {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(decode_reply(&corrupted), Err(Tmc2209Error::Checksum { .. })),
                    "flip byte {} bit {} not detected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_decode_reply_wrong_address() {
        let mut frame = encode_reply(0x02, 1);
        frame[1] = 0x01;
        frame[7] = crc8(&frame[..7]);
        assert!(matches!(
            decode_reply(&frame),
            Err(Tmc2209Error::UnexpectedAddress { expected: 0xFF, received: 0x01 })
        ));
    }

    #[test]
    fn test_decode_reply_bad_sync() {
        let mut frame = encode_reply(0x02, 1);
        frame[0] = 0x0A;
        frame[7] = crc8(&frame[..7]);
        assert!(matches!(decode_reply(&frame), Err(Tmc2209Error::Framing { .. })));
    }

    #[test]
    fn test_decode_request() {
        let write = encode_write(addr(1), Register::Sgthrs, 42);
        let (req, len) = decode_request(&write).unwrap();
        assert_eq!(len, WRITE_LEN);
        assert_eq!(
            req,
            Request::Write { address: 1, register: 0x40, value: 42 }
        );

        let read = encode_read(addr(3), Register::DrvStatus);
        let (req, len) = decode_request(&read).unwrap();
        assert_eq!(len, READ_REQUEST_LEN);
        assert_eq!(req, Request::Read { address: 3, register: 0x6F });
    }
}
