// Board-level operations behind the CLI: connect, setup, status, watch
//
// `watch` polls every driver at STATUS_POLL_HZ and logs health transitions
// (only on change, so a steady fault does not flood the log). Bus calls are
// blocking and run on tokio's blocking pool.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{BoardConfig, STATUS_POLL_HZ};
use crate::messages::{DriverHealth, SetupRequest, StatusReport};
use crate::motor::error::Result;
use crate::motor::{BusSession, SimulatedBus, Tmc2209};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// All drivers on one UART
pub struct Board {
    config: BoardConfig,
    drivers: Vec<Tmc2209>,
}

impl Board {
    /// Open the bus (or a simulated one) and create one driver per stepper
    pub fn connect(config: BoardConfig, simulate: bool) -> Result<Self> {
        config.validate()?;
        let bus_config = config.bus_config();

        let bus = if simulate {
            info!("Using simulated bus ({} drivers)", config.steppers.len());
            let sim = config
                .steppers
                .iter()
                .fold(SimulatedBus::new().with_echo(bus_config.echo), |sim, s| {
                    sim.with_device(s.uart_address)
                });
            BusSession::new(sim, bus_config)
        } else {
            info!("Opening TMC2209 bus on {} at {} baud", config.port, config.baudrate);
            BusSession::open_with_baudrate(&config.port, config.baudrate, bus_config)?
        };

        let drivers = config
            .steppers
            .iter()
            .map(|s| Tmc2209::from_config(bus.clone(), s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { config, drivers })
    }

    fn names(&self) -> impl Iterator<Item = String> + '_ {
        self.config.steppers.iter().map(|s| s.display_name())
    }

    /// Check each driver answers
    pub fn ping(&self) -> Vec<(String, Result<bool>)> {
        self.names()
            .zip(self.drivers.iter().map(Tmc2209::ping))
            .collect()
    }

    /// Initialize every driver and apply its setup (or `overrides` where given)
    pub fn setup(&mut self, overrides: &SetupRequest) -> Result<()> {
        for (stepper, driver) in self.config.steppers.iter().zip(self.drivers.iter_mut()) {
            let request = overrides.or(&stepper.setup);
            driver.initialize()?;
            if !request.is_empty() {
                driver.apply(&request)?;
            }

            let (run, hold) = driver.current();
            info!(
                "{}: address {}, {} microsteps, run {:.2}A, hold {:.2}A, SGTHRS {}, TCOOLTHRS {}",
                stepper.display_name(),
                driver.address(),
                driver.microsteps(),
                run,
                hold,
                driver.stall_threshold(),
                driver.tcool_threshold()
            );
        }
        Ok(())
    }

    /// Read status of every driver; unreachable drivers are reported, not fatal
    pub fn status(&self) -> Vec<StatusReport> {
        self.config
            .steppers
            .iter()
            .zip(self.drivers.iter())
            .map(|(stepper, driver)| match driver.get_status() {
                Ok(status) => StatusReport {
                    name: stepper.display_name(),
                    address: stepper.uart_address,
                    health: DriverHealth::from(&status),
                    status: Some(status),
                    error: None,
                },
                Err(e) => StatusReport {
                    name: stepper.display_name(),
                    address: stepper.uart_address,
                    health: DriverHealth::Unresponsive,
                    status: None,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }
}

/// Tracks per-driver health between polls
pub struct Monitor {
    last_health: HashMap<u8, DriverHealth>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            last_health: HashMap::new(),
        }
    }

    /// Record reports, returning those whose health changed
    pub fn update<'a>(&mut self, reports: &'a [StatusReport]) -> Vec<&'a StatusReport> {
        reports
            .iter()
            .filter(|r| self.last_health.insert(r.address, r.health) != Some(r.health))
            .collect()
    }
}

pub fn print_reports(reports: &[StatusReport], json: bool) -> std::result::Result<(), BoxError> {
    if json {
        println!("{}", serde_json::to_string(reports)?);
        return Ok(());
    }

    for report in reports {
        match (&report.status, &report.error) {
            (Some(s), _) => println!(
                "{:<12} addr {}  {:?}  cs={:>2} sg={:>3} stall={} standstill={} stealth={} otpw={} ot={}",
                report.name,
                report.address,
                report.health,
                s.cs_actual,
                s.sg_result,
                s.stall,
                s.standstill,
                s.stealth,
                s.otpw,
                s.ot
            ),
            (None, Some(e)) => println!("{:<12} addr {}  {:?}  {}", report.name, report.address, report.health, e),
            (None, None) => println!("{:<12} addr {}  {:?}", report.name, report.address, report.health),
        }
    }
    Ok(())
}

/// Poll status until Ctrl+C
pub async fn watch(board: Board, json: bool) -> std::result::Result<(), BoxError> {
    let mut board = board;
    let mut monitor = Monitor::new();
    let mut tick = interval(Duration::from_millis(1000 / STATUS_POLL_HZ));

    info!("Watching {} drivers at {}Hz, Ctrl+C to stop", board.drivers.len(), STATUS_POLL_HZ);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                info!("Stopping watch");
                return Ok(());
            }
        }

        let (returned, reports) = tokio::task::spawn_blocking(move || {
            let reports = board.status();
            (board, reports)
        })
        .await?;
        board = returned;

        for report in monitor.update(&reports) {
            match report.health {
                DriverHealth::Ok => info!("{} healthy", report.name),
                DriverHealth::Warning => warn!("{} warning: {:?}", report.name, report.status),
                DriverHealth::Fault => error!("{} fault: {:?}", report.name, report.status),
                DriverHealth::Unresponsive => {
                    warn!("{} unresponsive: {}", report.name, report.error.as_deref().unwrap_or(""))
                }
            }
        }

        if json {
            print_reports(&reports, true)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StepperConfig;
    use crate::motor::registers::scale_to_current;

    fn board_config() -> BoardConfig {
        let stepper = |name: &str, address: u8, microsteps: u16| StepperConfig {
            name: name.to_string(),
            uart_address: address,
            sense_resistor: 0.11,
            reverse_direction: false,
            hold_multiplier: 0.5,
            setup: SetupRequest {
                microsteps: Some(microsteps),
                current: Some(0.8),
                ..SetupRequest::default()
            },
        };
        BoardConfig {
            steppers: vec![stepper("x", 0, 16), stepper("y", 1, 32)],
            ..BoardConfig::single("sim", stepper("unused", 3, 2))
        }
    }

    #[test]
    fn test_simulated_board_setup_and_status() {
        let mut board = Board::connect(board_config(), true).unwrap();
        board.setup(&SetupRequest::default()).unwrap();

        assert_eq!(board.drivers[0].microsteps(), 16);
        assert_eq!(board.drivers[1].microsteps(), 32);

        let reports = board.status();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.health == DriverHealth::Ok));
        assert!(board.ping().iter().all(|(_, r)| matches!(r, Ok(true))));
    }

    #[test]
    fn test_overrides_apply_to_all() {
        let mut board = Board::connect(board_config(), true).unwrap();
        let overrides = SetupRequest {
            microsteps: Some(8),
            ..SetupRequest::default()
        };
        board.setup(&overrides).unwrap();
        assert!(board.drivers.iter().all(|d| d.microsteps() == 8));
    }

    #[test]
    fn test_setup_with_freewheel_hold() {
        let mut config = board_config();
        config.steppers[0].hold_multiplier = 0.0;
        config.validate().unwrap();

        let mut board = Board::connect(config, true).unwrap();
        board.setup(&SetupRequest::default()).unwrap();
        // IHOLD = 0 is the lowest scale, not an error
        let (run, hold) = board.drivers[0].current();
        assert_eq!(hold, scale_to_current(0, 0.11, false));
        assert!(run > 0.7);
        assert!(board.drivers[1].current().1 > hold);
    }

    #[test]
    fn test_monitor_reports_only_transitions() {
        let report = |health| StatusReport {
            name: "x".to_string(),
            address: 0,
            health,
            status: None,
            error: None,
        };
        let mut monitor = Monitor::new();

        assert_eq!(monitor.update(&[report(DriverHealth::Ok)]).len(), 1);
        assert_eq!(monitor.update(&[report(DriverHealth::Ok)]).len(), 0);
        assert_eq!(monitor.update(&[report(DriverHealth::Fault)]).len(), 1);
        assert_eq!(monitor.update(&[report(DriverHealth::Fault)]).len(), 0);
    }
}
