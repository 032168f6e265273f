// High-level TMC2209 driver
//
// Translates engineering units into register fields and writes them through
// a shared BusSession. Every setter validates first, so a bad value never
// reaches the wire, and only updates its shadow register after the write
// went out.

use tracing::{debug, info, warn};

use super::bus::BusSession;
use super::datagram::DeviceAddress;
use super::error::{Result, Tmc2209Error};
use super::registers::{
    self, Chopconf, Gconf, IholdIrun, Register, StatusFields, encode_microsteps,
    encode_stall_threshold, encode_tcool_threshold,
};
use crate::config::{DEFAULT_HOLD_MULTIPLIER, StepperConfig};
use crate::messages::SetupRequest;

/// One TMC2209 on a shared UART
pub struct Tmc2209 {
    bus: BusSession,
    address: DeviceAddress,
    sense_resistor: f32,
    reverse_direction: bool,
    hold_multiplier: f32,
    verify_writes: bool,

    // Last known register contents
    gconf: Gconf,
    chopconf: Chopconf,
    ihold_irun: IholdIrun,
    tcoolthrs: u32,
    sgthrs: u32,
}

impl Tmc2209 {
    /// Create a driver; no bus traffic happens until a setter is called
    pub fn new(
        bus: BusSession,
        address: u8,
        sense_resistor: f32,
        reverse_direction: bool,
    ) -> Result<Self> {
        let address = DeviceAddress::new(address)?;
        registers::validate_sense_resistor(sense_resistor)?;

        Ok(Self {
            bus,
            address,
            sense_resistor,
            reverse_direction,
            hold_multiplier: DEFAULT_HOLD_MULTIPLIER,
            verify_writes: false,
            gconf: Gconf(Register::Gconf.reset_value()),
            chopconf: Chopconf(Register::Chopconf.reset_value()),
            ihold_irun: IholdIrun(Register::IholdIrun.reset_value()),
            tcoolthrs: Register::Tcoolthrs.reset_value(),
            sgthrs: Register::Sgthrs.reset_value(),
        })
    }

    /// Create from a board configuration entry
    pub fn from_config(bus: BusSession, config: &StepperConfig) -> Result<Self> {
        let mut driver = Self::new(
            bus,
            config.uart_address,
            config.sense_resistor,
            config.reverse_direction,
        )?;
        driver.hold_multiplier = config.hold_multiplier;
        Ok(driver)
    }

    /// Confirm every write through the interface counter (two extra reads per write)
    pub fn with_verified_writes(mut self, enable: bool) -> Self {
        self.verify_writes = enable;
        self
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn sense_resistor(&self) -> f32 {
        self.sense_resistor
    }

    pub fn reverse_direction(&self) -> bool {
        self.reverse_direction
    }

    /// Put the driver in UART-controlled mode
    ///
    /// Refreshes the readable shadows, then enables register-selected
    /// microsteps with external sense resistors and StealthChop.
    pub fn initialize(&mut self) -> Result<()> {
        info!(
            "Initializing TMC2209 at address {} (sense resistor {:.3} ohm)",
            self.address, self.sense_resistor
        );

        self.refresh()?;

        let mut gconf = self.gconf;
        gconf.set_pdn_disable(true);
        gconf.set_i_scale_analog(false);
        gconf.set_internal_rsense(false);
        gconf.set_mstep_reg_select(true);
        gconf.set_en_spreadcycle(false);
        gconf.set_shaft(self.reverse_direction);

        self.write_register(Register::Gconf, gconf.0)?;
        self.gconf = gconf;

        let gstat = self.bus.read(self.address, Register::Gstat)?;
        if gstat != 0 {
            debug!("Clearing GSTAT 0x{:X} on driver {}", gstat, self.address);
            self.write_register(Register::Gstat, gstat)?;
        }

        info!("TMC2209 at address {} initialized", self.address);
        Ok(())
    }

    /// Reload GCONF and CHOPCONF from the device
    pub fn refresh(&mut self) -> Result<()> {
        self.gconf = Gconf(self.bus.read(self.address, Register::Gconf)?);
        self.chopconf = Chopconf(self.bus.read(self.address, Register::Chopconf)?);
        debug!(
            "Driver {} shadows: GCONF=0x{:08X} CHOPCONF=0x{:08X}",
            self.address, self.gconf.0, self.chopconf.0
        );
        Ok(())
    }

    fn write_register(&self, register: Register, value: u32) -> Result<()> {
        if !self.verify_writes {
            return self.bus.write(self.address, register, value);
        }

        let before = self.bus.interface_count(self.address)?;
        self.bus.write(self.address, register, value)?;
        let after = self.bus.interface_count(self.address)?;
        if after != before.wrapping_add(1) {
            warn!(
                "Driver {} IFCNT {} -> {} after writing {:?}",
                self.address, before, after, register
            );
            return Err(Tmc2209Error::WriteNotAcknowledged {
                address: self.address.get(),
                register: register.addr(),
            });
        }
        Ok(())
    }

    fn encode_current(&self, run_a: f32, hold_a: f32) -> Result<IholdIrun> {
        let (ihold, irun) = registers::encode_current_with_vsense(
            run_a,
            hold_a,
            self.sense_resistor,
            self.chopconf.vsense(),
        )?;
        let mut reg = self.ihold_irun;
        reg.set_scales(ihold, irun);
        Ok(reg)
    }

    // Hold scale follows the run scale, so a zero multiplier gives IHOLD = 0
    fn encode_rms_current(&self, run_a: f32) -> Result<IholdIrun> {
        let irun = registers::current_to_scale(
            "run_current",
            run_a,
            self.sense_resistor,
            self.chopconf.vsense(),
        )?;
        let mut reg = self.ihold_irun;
        reg.set_scales(registers::hold_scale(irun, self.hold_multiplier), irun);
        Ok(reg)
    }

    fn write_current(&mut self, reg: IholdIrun) -> Result<()> {
        self.write_register(Register::IholdIrun, reg.0)?;
        self.ihold_irun = reg;
        Ok(())
    }

    fn encode_chopconf_microsteps(&self, microsteps: u16) -> Result<Chopconf> {
        let mres = encode_microsteps(microsteps)?;
        let mut chop = self.chopconf;
        chop.set_mres(mres);
        chop.set_intpol(microsteps != 0);
        Ok(chop)
    }

    /// Set run and hold currents (amps RMS)
    pub fn set_current(&mut self, run_a: f32, hold_a: f32) -> Result<()> {
        let reg = self.encode_current(run_a, hold_a)?;
        debug!(
            "Driver {}: current run={:.3}A (IRUN={}) hold={:.3}A (IHOLD={})",
            self.address,
            run_a,
            reg.irun(),
            hold_a,
            reg.ihold()
        );
        self.write_current(reg)
    }

    /// Set run current; IHOLD is IRUN scaled by the hold multiplier
    pub fn set_rms_current(&mut self, run_a: f32) -> Result<()> {
        let reg = self.encode_rms_current(run_a)?;
        debug!(
            "Driver {}: current run={:.3}A (IRUN={}) IHOLD={}",
            self.address,
            run_a,
            reg.irun(),
            reg.ihold()
        );
        self.write_current(reg)
    }

    /// Configured (run, hold) currents in amps, quantized to register steps
    pub fn current(&self) -> (f32, f32) {
        let vsense = self.chopconf.vsense();
        (
            registers::scale_to_current(self.ihold_irun.irun(), self.sense_resistor, vsense),
            registers::scale_to_current(self.ihold_irun.ihold(), self.sense_resistor, vsense),
        )
    }

    /// Set microstep resolution; 0 selects full steps without interpolation
    pub fn set_microsteps(&mut self, microsteps: u16) -> Result<()> {
        let chop = self.encode_chopconf_microsteps(microsteps)?;
        debug!(
            "Driver {}: microsteps={} (MRES={})",
            self.address,
            microsteps,
            chop.mres()
        );
        self.write_register(Register::Chopconf, chop.0)?;
        self.chopconf = chop;
        Ok(())
    }

    pub fn microsteps(&self) -> u16 {
        registers::decode_microsteps(self.chopconf.mres())
    }

    /// Lower velocity bound (as TSTEP) for CoolStep and StallGuard
    pub fn set_tcool_threshold(&mut self, value: i64) -> Result<()> {
        let field = encode_tcool_threshold(value)?;
        self.write_register(Register::Tcoolthrs, field)?;
        self.tcoolthrs = field;
        Ok(())
    }

    pub fn tcool_threshold(&self) -> u32 {
        self.tcoolthrs
    }

    /// StallGuard sensitivity; higher values detect stalls earlier
    pub fn set_stall_threshold(&mut self, value: i64) -> Result<()> {
        let field = encode_stall_threshold(value)?;
        self.write_register(Register::Sgthrs, field)?;
        self.sgthrs = field;
        Ok(())
    }

    pub fn stall_threshold(&self) -> u32 {
        self.sgthrs
    }

    /// Apply a setup request
    ///
    /// All present fields are validated before anything is written, so an
    /// invalid request leaves the driver untouched.
    pub fn apply(&mut self, request: &SetupRequest) -> Result<()> {
        let chop = request
            .microsteps
            .map(|n| self.encode_chopconf_microsteps(n))
            .transpose()?;
        let tcool = request
            .tcool_threshold
            .map(encode_tcool_threshold)
            .transpose()?;
        let stall = request
            .stall_threshold
            .map(encode_stall_threshold)
            .transpose()?;
        let current = match (request.current, request.hold_current) {
            (Some(run), Some(hold)) => Some(self.encode_current(run, hold)?),
            (Some(run), None) => Some(self.encode_rms_current(run)?),
            (None, Some(_)) => {
                return Err(Tmc2209Error::Config(
                    "hold_current requires current".to_string(),
                ));
            }
            (None, None) => None,
        };

        info!("Applying setup to driver {}: {:?}", self.address, request);

        if let Some(chop) = chop {
            self.write_register(Register::Chopconf, chop.0)?;
            self.chopconf = chop;
        }
        if let Some(field) = tcool {
            self.write_register(Register::Tcoolthrs, field)?;
            self.tcoolthrs = field;
        }
        if let Some(field) = stall {
            self.write_register(Register::Sgthrs, field)?;
            self.sgthrs = field;
        }
        if let Some(reg) = current {
            self.write_current(reg)?;
        }
        Ok(())
    }

    /// Read DRV_STATUS and SG_RESULT
    pub fn get_status(&self) -> Result<StatusFields> {
        let drv_status = self.bus.read(self.address, Register::DrvStatus)?;
        let sg_result = self.bus.read(self.address, Register::SgResult)?;
        Ok(StatusFields::from_drv_status(drv_status).with_stallguard(sg_result, self.sgthrs))
    }

    /// Check if the driver answers
    pub fn ping(&self) -> Result<bool> {
        self.bus.ping(self.address)
    }
}
