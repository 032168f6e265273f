// Setup test: step-by-step configuration of one driver
//
// IMPORTANT: Run diagnostic FIRST to verify read-only communication.
//
// Usage: cargo run --example setup_test -- [port] [address]
// Example: cargo run --example setup_test -- /dev/ttyUSB0 0
//
// Safety features:
// - Explicit confirmation before any writes
// - Low test current (0.3A run)
// - Every write confirmed through IFCNT

use std::io::{self, Write};
use tmc2209_uart::config::DEFAULT_PORT;
use tmc2209_uart::messages::{DriverHealth, SetupRequest};
use tmc2209_uart::motor::{BusConfig, BusSession, Tmc2209};

const SENSE_RESISTOR: f32 = 0.11;
const TEST_CURRENT: f32 = 0.3;

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| DEFAULT_PORT.to_string());
    let address: u8 = args.next().map(|a| a.parse()).transpose()?.unwrap_or(0);

    println!("TMC2209 setup test (WITH WRITES)");
    println!("Serial port: {}, address {}", port, address);
    println!();

    if !confirm("Have you run the diagnostic and seen this address respond?")? {
        println!("Please run: cargo run --example diagnostic -- {}", port);
        return Ok(());
    }
    if !confirm("Is the motor free to turn with no load attached?")? {
        println!("Please disconnect the load before energizing the motor.");
        return Ok(());
    }

    let bus = BusSession::open(&port, BusConfig::default())?;
    let mut driver = Tmc2209::new(bus, address, SENSE_RESISTOR, false)?.with_verified_writes(true);
    println!(
        "✓ Connected to address {} (sense resistor {:.3} ohm, reverse direction {})",
        driver.address(),
        driver.sense_resistor(),
        driver.reverse_direction()
    );
    println!();

    println!("Step 1: Checking the driver answers...");
    if !driver.ping()? {
        println!("  ✗ No response from address {}", address);
        return Ok(());
    }
    println!("  ✓ Responding");
    println!();

    println!("Step 2: Initializing (UART control, StealthChop)...");
    driver.initialize()?;
    println!("  ✓ GCONF written, {} microsteps", driver.microsteps());
    println!();

    if !confirm(&format!("Apply {:.2}A run current and 16 microsteps?", TEST_CURRENT))? {
        println!("Aborted.");
        return Ok(());
    }

    println!("Step 3: Applying settings...");
    driver.apply(&SetupRequest {
        microsteps: Some(16),
        current: Some(TEST_CURRENT),
        ..SetupRequest::default()
    })?;
    let (run, hold) = driver.current();
    println!(
        "  ✓ run {:.2}A, hold {:.2}A, {} microsteps",
        run,
        hold,
        driver.microsteps()
    );
    println!();

    println!("Step 4: Reading status...");
    let status = driver.get_status()?;
    println!("  Health:     {:?}", DriverHealth::from(&status));
    println!("  cs_actual:  {}", status.cs_actual);
    println!("  standstill: {}", status.standstill);
    println!("  stealth:    {}", status.stealth);
    println!("  otpw/ot:    {}/{}", status.otpw, status.ot);
    println!("  open load:  A={} B={}", status.ola, status.olb);
    println!();

    println!("Test complete.");
    Ok(())
}
