use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tmc2209_uart::config::{BoardConfig, DEFAULT_HOLD_MULTIPLIER, DEFAULT_PORT, StepperConfig};
use tmc2209_uart::messages::SetupRequest;
use tmc2209_uart::runtime::{self, Board, BoxError};

/// Configure and monitor TMC2209 stepper drivers over UART
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// JSON board description (port + steppers)
    #[arg(short, long, conflicts_with = "port")]
    config: Option<PathBuf>,

    /// Serial port for a single driver
    #[arg(short, long)]
    port: Option<String>,

    /// Driver address (0-3) when using --port
    #[arg(long, default_value_t = 0)]
    address: u8,

    /// Sense resistor in ohms when using --port
    #[arg(long, default_value_t = 0.11)]
    sense_resistor: f32,

    /// Invert motor direction when using --port
    #[arg(long)]
    reverse_direction: bool,

    /// Talk to an in-memory simulated bus instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check which drivers answer
    Ping,
    /// Read driver status once
    Status,
    /// Initialize drivers and write settings
    Setup {
        /// 256, 128, 64, 32, 16, 8, 4, 2, or 0 for full steps
        #[arg(long)]
        microsteps: Option<u16>,
        #[arg(long)]
        tcool_threshold: Option<i64>,
        #[arg(long)]
        stall_threshold: Option<i64>,
        /// Run current, amps RMS
        #[arg(long)]
        current: Option<f32>,
        /// Hold current, amps RMS
        #[arg(long, requires = "current")]
        hold_current: Option<f32>,
    },
    /// Poll status until Ctrl+C
    Watch,
}

fn board_config(cli: &Cli) -> Result<BoardConfig, BoxError> {
    if let Some(path) = &cli.config {
        return Ok(BoardConfig::load(path)?);
    }

    let port = cli.port.as_deref().unwrap_or(DEFAULT_PORT);
    Ok(BoardConfig::single(
        port,
        StepperConfig {
            name: String::new(),
            uart_address: cli.address,
            sense_resistor: cli.sense_resistor,
            reverse_direction: cli.reverse_direction,
            hold_multiplier: DEFAULT_HOLD_MULTIPLIER,
            setup: SetupRequest::default(),
        },
    ))
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = board_config(&cli)?;
    let mut board = Board::connect(config, cli.simulate)?;

    match cli.command {
        Command::Ping => {
            for (name, result) in board.ping() {
                match result {
                    Ok(true) => println!("{:<12} responding", name),
                    Ok(false) => println!("{:<12} NO RESPONSE", name),
                    Err(e) => println!("{:<12} ERROR: {}", name, e),
                }
            }
        }
        Command::Status => runtime::print_reports(&board.status(), cli.json)?,
        Command::Setup {
            microsteps,
            tcool_threshold,
            stall_threshold,
            current,
            hold_current,
        } => {
            let overrides = SetupRequest {
                microsteps,
                tcool_threshold,
                stall_threshold,
                current,
                hold_current,
            };
            board.setup(&overrides)?;
            runtime::print_reports(&board.status(), cli.json)?;
        }
        Command::Watch => runtime::watch(board, cli.json).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
