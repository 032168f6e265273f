// Driver diagnostic: READ-ONLY probe of every UART address
//
// Sends only read requests, so driver settings are left untouched.
// Use this first before running setup_test.
//
// Usage: cargo run --example diagnostic -- [port]
// Example: cargo run --example diagnostic -- /dev/ttyUSB0

use std::io::{self, Write};
use tmc2209_uart::config::{DEFAULT_BAUDRATE, DEFAULT_PORT};
use tmc2209_uart::motor::registers::{Chopconf, Gconf, IholdIrun, decode_microsteps};
use tmc2209_uart::motor::{BusConfig, BusSession, DeviceAddress, Register, StatusFields};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse()?),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_PORT.to_string());

    println!("TMC2209 diagnostic (read-only)");
    println!("Serial port: {} at {} baud", port, DEFAULT_BAUDRATE);
    println!();

    println!("Step 1: Opening serial port...");
    let bus = match BusSession::open(&port, BusConfig::default()) {
        Ok(bus) => {
            println!("  ✓ Serial port opened");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - PDN_UART needs a 1k resistor between TX and RX");
            println!("  - The driver needs VM power to answer on UART");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging addresses 0-{}...", DeviceAddress::MAX);
    let mut found = Vec::new();
    for raw in 0..=DeviceAddress::MAX {
        let address = DeviceAddress::new(raw)?;
        print!("  Address {}: ", address);
        io::stdout().flush()?;

        match bus.ping(address) {
            Ok(true) => {
                println!("✓ RESPONDING");
                found.push(address);
            }
            Ok(false) => println!("- no response"),
            Err(e) => println!("✗ ERROR: {}", e),
        }
    }
    println!();

    if found.is_empty() {
        println!("⚠ No driver answered.");
        println!("  - Check MS1/MS2 address straps");
        println!("  - Try without echo if TX and RX are not joined");
        return Ok(());
    }

    println!("Step 3: Reading registers...");
    println!();
    for address in found {
        println!("  === Address {} ===", address);

        match bus.read(address, Register::Gconf) {
            Ok(raw) => {
                let gconf = Gconf(raw);
                println!(
                    "    GCONF:      0x{:08X} (pdn_disable={} mstep_reg_select={} spreadcycle={} shaft={})",
                    raw,
                    gconf.pdn_disable(),
                    gconf.mstep_reg_select(),
                    gconf.en_spreadcycle(),
                    gconf.shaft()
                );
            }
            Err(e) => println!("    GCONF:      ERROR - {}", e),
        }

        match bus.read(address, Register::Gstat) {
            Ok(raw) => println!("    GSTAT:      0b{:03b} (reset, drv_err, uv_cp)", raw & 0b111),
            Err(e) => println!("    GSTAT:      ERROR - {}", e),
        }

        match bus.interface_count(address) {
            Ok(count) => println!("    IFCNT:      {}", count),
            Err(e) => println!("    IFCNT:      ERROR - {}", e),
        }

        match bus.read(address, Register::Chopconf) {
            Ok(raw) => {
                let chopconf = Chopconf(raw);
                println!(
                    "    CHOPCONF:   0x{:08X} ({} microsteps, intpol={} vsense={} toff={})",
                    raw,
                    decode_microsteps(chopconf.mres()),
                    chopconf.intpol(),
                    chopconf.vsense(),
                    chopconf.toff()
                );
            }
            Err(e) => println!("    CHOPCONF:   ERROR - {}", e),
        }

        // IHOLD_IRUN is write-only; show what a fresh driver would hold
        let ihold_irun = IholdIrun(Register::IholdIrun.reset_value());
        println!(
            "    IHOLD_IRUN: write-only (power-on ihold={} irun={})",
            ihold_irun.ihold(),
            ihold_irun.irun()
        );

        match bus.read(address, Register::DrvStatus) {
            Ok(raw) => {
                let status = StatusFields::from_drv_status(raw);
                println!(
                    "    DRV_STATUS: 0x{:08X} (cs_actual={} standstill={} stealth={} otpw={} fault={})",
                    raw,
                    status.cs_actual,
                    status.standstill,
                    status.stealth,
                    status.otpw,
                    status.has_fault()
                );
            }
            Err(e) => println!("    DRV_STATUS: ERROR - {}", e),
        }

        match bus.read(address, Register::SgResult) {
            Ok(raw) => println!("    SG_RESULT:  {}", raw),
            Err(e) => println!("    SG_RESULT:  ERROR - {}", e),
        }
        println!();
    }

    println!("Diagnostic complete.");
    println!("Next step: cargo run --example setup_test -- {}", port);
    Ok(())
}
