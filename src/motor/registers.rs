// TMC2209 register map
//
// Register addresses, power-on reset values, bit layouts, and the conversions
// between engineering units (amps, microsteps, thresholds) and field values.

use serde::Serialize;
use std::f32::consts::SQRT_2;

use super::error::{Result, Tmc2209Error};

/// Register addresses used by this driver
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Gconf = 0x00,     // read/write
    Gstat = 0x01,     // read/write-1-to-clear
    Ifcnt = 0x02,     // read-only, counts accepted writes
    Ioin = 0x06,      // read-only, pin states + version
    IholdIrun = 0x10, // write-only
    Tcoolthrs = 0x14, // write-only, 20 bits
    Sgthrs = 0x40,    // write-only, 8 bits
    SgResult = 0x41,  // read-only, 10 bits
    Chopconf = 0x6C,  // read/write
    DrvStatus = 0x6F, // read-only
}

impl Register {
    pub fn addr(self) -> u8 {
        self as u8
    }

    pub fn from_addr(addr: u8) -> Option<Self> {
        Some(match addr {
            0x00 => Register::Gconf,
            0x01 => Register::Gstat,
            0x02 => Register::Ifcnt,
            0x06 => Register::Ioin,
            0x10 => Register::IholdIrun,
            0x14 => Register::Tcoolthrs,
            0x40 => Register::Sgthrs,
            0x41 => Register::SgResult,
            0x6C => Register::Chopconf,
            0x6F => Register::DrvStatus,
            _ => return None,
        })
    }

    /// Write-only registers cannot be read back, their shadow is authoritative
    pub fn is_readable(self) -> bool {
        !matches!(
            self,
            Register::IholdIrun | Register::Tcoolthrs | Register::Sgthrs
        )
    }

    pub fn is_writable(self) -> bool {
        !matches!(
            self,
            Register::Ifcnt | Register::Ioin | Register::SgResult | Register::DrvStatus
        )
    }

    /// Power-on reset value from the datasheet
    pub fn reset_value(self) -> u32 {
        match self {
            Register::Gconf => 0x0000_0001,
            Register::IholdIrun => 0x0001_1F10,
            Register::Chopconf => 0x1000_0053,
            _ => 0,
        }
    }
}

fn field(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & ((1 << width) - 1)
}

fn with_field(word: u32, shift: u32, width: u32, value: u32) -> u32 {
    let mask = ((1u32 << width) - 1) << shift;
    (word & !mask) | ((value << shift) & mask)
}

fn with_bit(word: u32, bit: u32, set: bool) -> u32 {
    with_field(word, bit, 1, set as u32)
}

// ==================== GCONF ====================

/// GCONF, general configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gconf(pub u32);

impl Gconf {
    pub fn i_scale_analog(self) -> bool {
        field(self.0, 0, 1) != 0
    }
    pub fn set_i_scale_analog(&mut self, on: bool) {
        self.0 = with_bit(self.0, 0, on);
    }

    pub fn internal_rsense(self) -> bool {
        field(self.0, 1, 1) != 0
    }
    pub fn set_internal_rsense(&mut self, on: bool) {
        self.0 = with_bit(self.0, 1, on);
    }

    pub fn en_spreadcycle(self) -> bool {
        field(self.0, 2, 1) != 0
    }
    pub fn set_en_spreadcycle(&mut self, on: bool) {
        self.0 = with_bit(self.0, 2, on);
    }

    /// Inverts motor direction
    pub fn shaft(self) -> bool {
        field(self.0, 3, 1) != 0
    }
    pub fn set_shaft(&mut self, on: bool) {
        self.0 = with_bit(self.0, 3, on);
    }

    /// Must be set for UART operation, otherwise PDN_UART also controls standstill power down
    pub fn pdn_disable(self) -> bool {
        field(self.0, 6, 1) != 0
    }
    pub fn set_pdn_disable(&mut self, on: bool) {
        self.0 = with_bit(self.0, 6, on);
    }

    /// Microstep resolution comes from CHOPCONF.MRES instead of MS1/MS2
    pub fn mstep_reg_select(self) -> bool {
        field(self.0, 7, 1) != 0
    }
    pub fn set_mstep_reg_select(&mut self, on: bool) {
        self.0 = with_bit(self.0, 7, on);
    }
}

// ==================== CHOPCONF ====================

/// CHOPCONF, chopper and microstep configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chopconf(pub u32);

impl Chopconf {
    pub fn toff(self) -> u8 {
        field(self.0, 0, 4) as u8
    }

    /// High sensitivity, low sense resistor voltage (0.18 V full scale)
    pub fn vsense(self) -> bool {
        field(self.0, 17, 1) != 0
    }

    pub fn mres(self) -> u8 {
        field(self.0, 24, 4) as u8
    }
    pub fn set_mres(&mut self, mres: u8) {
        self.0 = with_field(self.0, 24, 4, mres as u32);
    }

    /// Interpolation to 256 microsteps
    pub fn intpol(self) -> bool {
        field(self.0, 28, 1) != 0
    }
    pub fn set_intpol(&mut self, on: bool) {
        self.0 = with_bit(self.0, 28, on);
    }
}

// ==================== IHOLD_IRUN ====================

/// IHOLD_IRUN, current scale fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IholdIrun(pub u32);

impl IholdIrun {
    pub fn ihold(self) -> u8 {
        field(self.0, 0, 5) as u8
    }
    pub fn irun(self) -> u8 {
        field(self.0, 8, 5) as u8
    }
    pub fn ihold_delay(self) -> u8 {
        field(self.0, 16, 4) as u8
    }

    /// Replace both current scales, keeping IHOLDDELAY
    pub fn set_scales(&mut self, ihold: u8, irun: u8) {
        self.0 = with_field(self.0, 0, 5, ihold as u32);
        self.0 = with_field(self.0, 8, 5, irun as u32);
    }
}

// ==================== Current ====================

/// Offset added to the sense resistor for internal trace resistance
pub const SENSE_RESISTOR_OFFSET: f32 = 0.02;
/// Full-scale sense voltage with vsense = 0
pub const VFS_NORMAL: f32 = 0.325;
/// Full-scale sense voltage with vsense = 1
pub const VFS_HIGH_SENSITIVITY: f32 = 0.180;
/// Largest IRUN/IHOLD value (5 bits)
pub const CURRENT_SCALE_MAX: u8 = 31;

fn full_scale_voltage(vsense: bool) -> f32 {
    if vsense { VFS_HIGH_SENSITIVITY } else { VFS_NORMAL }
}

pub(crate) fn validate_sense_resistor(sense_resistor_ohm: f32) -> Result<()> {
    if !sense_resistor_ohm.is_finite() || sense_resistor_ohm <= 0.0 {
        return Err(Tmc2209Error::ValueOutOfRange {
            field: "sense_resistor",
            value: sense_resistor_ohm as f64,
            max: f64::INFINITY,
        });
    }
    Ok(())
}

/// Largest RMS current representable with this resistor and sensitivity
pub fn max_current(sense_resistor_ohm: f32, vsense: bool) -> f32 {
    scale_to_current(CURRENT_SCALE_MAX, sense_resistor_ohm, vsense)
}

/// Convert an RMS current (amps) to a 0-31 current scale
///
/// CS = 32 * sqrt(2) * I * (R + 0.02) / Vfs - 1, rounded. Results outside
/// the 5-bit range are rejected, never clamped.
pub fn current_to_scale(
    field_name: &'static str,
    rms_amps: f32,
    sense_resistor_ohm: f32,
    vsense: bool,
) -> Result<u8> {
    validate_sense_resistor(sense_resistor_ohm)?;
    let out_of_range = || Tmc2209Error::ValueOutOfRange {
        field: field_name,
        value: rms_amps as f64,
        max: max_current(sense_resistor_ohm, vsense) as f64,
    };

    if !rms_amps.is_finite() || rms_amps < 0.0 {
        return Err(out_of_range());
    }

    let scale = (32.0 * SQRT_2 * rms_amps * (sense_resistor_ohm + SENSE_RESISTOR_OFFSET)
        / full_scale_voltage(vsense)
        - 1.0)
        .round();
    if scale < 0.0 || scale > CURRENT_SCALE_MAX as f32 {
        return Err(out_of_range());
    }
    Ok(scale as u8)
}

/// Convert a current scale back to RMS amps
pub fn scale_to_current(scale: u8, sense_resistor_ohm: f32, vsense: bool) -> f32 {
    (scale as f32 + 1.0) * full_scale_voltage(vsense)
        / (32.0 * SQRT_2 * (sense_resistor_ohm + SENSE_RESISTOR_OFFSET))
}

/// Encode run and hold currents into (ihold, irun) fields, vsense = 0
pub fn encode_current(
    run_current_a: f32,
    hold_current_a: f32,
    sense_resistor_ohm: f32,
) -> Result<(u8, u8)> {
    encode_current_with_vsense(run_current_a, hold_current_a, sense_resistor_ohm, false)
}

/// Encode run and hold currents for an explicit sense voltage range
pub fn encode_current_with_vsense(
    run_current_a: f32,
    hold_current_a: f32,
    sense_resistor_ohm: f32,
    vsense: bool,
) -> Result<(u8, u8)> {
    let irun = current_to_scale("run_current", run_current_a, sense_resistor_ohm, vsense)?;
    let ihold = current_to_scale("hold_current", hold_current_a, sense_resistor_ohm, vsense)?;
    Ok((ihold, irun))
}

/// Hold scale as a fraction of the run scale (0 lets the motor freewheel)
pub fn hold_scale(irun: u8, multiplier: f32) -> u8 {
    (irun as f32 * multiplier.clamp(0.0, 1.0)) as u8
}

// ==================== Microsteps ====================

/// Microstep resolutions accepted by the driver; 0 selects full steps
pub const ALLOWED_MICROSTEPS: [u16; 9] = [256, 128, 64, 32, 16, 8, 4, 2, 0];

/// MRES value selecting full-step operation
pub const MRES_FULL_STEP: u8 = 8;

/// Convert a microstep resolution to the CHOPCONF.MRES field
pub fn encode_microsteps(microsteps: u16) -> Result<u8> {
    match microsteps {
        0 => Ok(MRES_FULL_STEP),
        n if n.is_power_of_two() && (2..=256).contains(&n) => {
            // 256 -> 0, 128 -> 1, ..., 2 -> 7
            Ok((8 - n.trailing_zeros()) as u8)
        }
        n => Err(Tmc2209Error::InvalidMicrostep(n)),
    }
}

/// Inverse of `encode_microsteps`; full step decodes as 0
pub fn decode_microsteps(mres: u8) -> u16 {
    match mres {
        0..=7 => 256 >> mres,
        _ => 0,
    }
}

// ==================== Thresholds ====================

/// TCOOLTHRS width
pub const TCOOLTHRS_BITS: u32 = 20;
/// SGTHRS width
pub const SGTHRS_BITS: u32 = 8;

/// Range-check an integer threshold against a field width
pub fn encode_threshold(field_name: &'static str, value: i64, bits: u32) -> Result<u32> {
    let max = (1i64 << bits) - 1;
    if !(0..=max).contains(&value) {
        return Err(Tmc2209Error::ValueOutOfRange {
            field: field_name,
            value: value as f64,
            max: max as f64,
        });
    }
    Ok(value as u32)
}

pub fn encode_tcool_threshold(value: i64) -> Result<u32> {
    encode_threshold("tcool_threshold", value, TCOOLTHRS_BITS)
}

pub fn encode_stall_threshold(value: i64) -> Result<u32> {
    encode_threshold("stall_threshold", value, SGTHRS_BITS)
}

// ==================== DRV_STATUS ====================

/// Decoded DRV_STATUS bits, plus the stall flag derived from SG_RESULT
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFields {
    /// Overtemperature pre-warning
    pub otpw: bool,
    /// Overtemperature shutdown
    pub ot: bool,
    pub s2ga: bool,
    pub s2gb: bool,
    pub s2vsa: bool,
    pub s2vsb: bool,
    /// Open load indicators (only valid while moving slowly)
    pub ola: bool,
    pub olb: bool,
    pub t120: bool,
    pub t143: bool,
    pub t150: bool,
    pub t157: bool,
    /// Actual current scale (0-31)
    pub cs_actual: u8,
    /// StealthChop active
    pub stealth: bool,
    pub standstill: bool,
    /// Last SG_RESULT, 0 when not read
    pub sg_result: u16,
    pub stall: bool,
}

impl StatusFields {
    pub fn from_drv_status(value: u32) -> Self {
        let bit = |n: u32| field(value, n, 1) != 0;
        Self {
            otpw: bit(0),
            ot: bit(1),
            s2ga: bit(2),
            s2gb: bit(3),
            s2vsa: bit(4),
            s2vsb: bit(5),
            ola: bit(6),
            olb: bit(7),
            t120: bit(8),
            t143: bit(9),
            t150: bit(10),
            t157: bit(11),
            cs_actual: field(value, 16, 5) as u8,
            stealth: bit(30),
            standstill: bit(31),
            sg_result: 0,
            stall: false,
        }
    }

    /// Merge a SG_RESULT reading: stall when moving and
    /// SG_RESULT <= 2 * SGTHRS (same rule as the DIAG output)
    pub fn with_stallguard(mut self, sg_result: u32, sgthrs: u32) -> Self {
        self.sg_result = field(sg_result, 0, 10) as u16;
        self.stall = !self.standstill && sgthrs > 0 && (self.sg_result as u32) <= 2 * sgthrs;
        self
    }

    pub fn overtemperature(&self) -> bool {
        self.otpw || self.ot
    }

    pub fn has_fault(&self) -> bool {
        self.ot || self.s2ga || self.s2gb || self.s2vsa || self.s2vsb
    }
}
