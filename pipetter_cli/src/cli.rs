//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use pipetter_traits::Mount;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

/// Keeps the file writer alive; dropping the guard flushes pending lines.
pub static FILE_GUARD: Mutex<Option<tracing_appender::non_blocking::WorkerGuard>> =
    Mutex::new(None);
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "pipetter", version, about = "Pipetting robot control CLI")]
pub struct Cli {
    /// Path to config TOML (typed). Without it a simulated robot with a
    /// single-channel p300 on the left mount is used.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG takes precedence
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Pipette mount selector.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum MountArg {
    Left,
    Right,
}

impl From<MountArg> for Mount {
    fn from(m: MountArg) -> Self {
        match m {
            MountArg::Left => Mount::Left,
            MountArg::Right => Mount::Right,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Exercise a full liquid-handling cycle on the simulator
    SelfCheck {
        /// Mount carrying the pipette under test
        #[arg(long, value_enum, default_value = "left")]
        mount: MountArg,
        /// Volume to aspirate and dispense (ul); half the pipette maximum if unset
        #[arg(long, value_name = "UL")]
        volume: Option<f64>,
        /// Tip length used for the pick-up (mm)
        #[arg(long, value_name = "MM", default_value_t = 51.83)]
        tip_length: f64,
        /// Print total runtime on completion
        #[arg(long, action = ArgAction::SetTrue)]
        print_runtime: bool,
    },
    /// Home all axes and report the gantry position of a mount
    Home {
        #[arg(long, value_enum, default_value = "left")]
        mount: MountArg,
    },
    /// List attached instruments
    Instruments,
    /// Health check for operational monitoring
    Health,
}
