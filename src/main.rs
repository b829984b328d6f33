//! CLI Entry Point for smart_traffic
//!
//! # Usage
//!
//! Run the controller against the board's GPIO lines:
//! ```bash
//! smart_traffic run
//! ```
//!
//! Run against simulated traffic, two phases only:
//! ```bash
//! smart_traffic run --simulate --phases 2
//! ```
//!
//! Print the effective configuration:
//! ```bash
//! smart_traffic config --config config/default.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smart_traffic::config::{Backend, Settings, DEFAULT_CONFIG_PATH};
use smart_traffic::hardware::simulated::SimulatedIntersection;
use smart_traffic::hardware::sysfs::SysfsGpio;
use smart_traffic::hardware::{DigitalIo, IntersectionLines};
use smart_traffic::{logging, ControllerConfig, MonotonicClock, PhaseController, TextReport};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "smart_traffic")]
#[command(about = "Two-road intersection controller with vehicle speed statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller until every phase is complete
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Use simulated traffic instead of GPIO hardware
        #[arg(long)]
        simulate: bool,

        /// Override the number of phases
        #[arg(long)]
        phases: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            simulate,
            phases,
        } => run(&config, simulate, phases),
        Commands::Config { config } => {
            let settings = load_settings(&config)?;
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    let settings = Settings::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

fn run(path: &Path, simulate: bool, phases: Option<usize>) -> Result<()> {
    let mut settings = load_settings(path)?;
    if simulate {
        settings.hardware.backend = Backend::Simulated;
    }
    if let Some(phases) = phases {
        settings.timing.phases = phases;
    }

    logging::init_from_settings(&settings)?;
    info!(
        name = %settings.application.name,
        backend = ?settings.hardware.backend,
        phases = settings.timing.phases,
        "Starting controller"
    );

    let clock = MonotonicClock::new();
    let io: Box<dyn DigitalIo> = match settings.hardware.backend {
        Backend::Sysfs => Box::new(SysfsGpio::new(&settings.hardware.sysfs_root)),
        Backend::Simulated => Box::new(SimulatedIntersection::new(
            clock,
            IntersectionLines::from(&settings.pins),
            settings.sensors.distance_m,
            settings.simulation.clone(),
        )),
    };

    let report = TextReport::from_settings(&settings.report).with_context(|| {
        format!(
            "Failed to open run log {}",
            settings.report.log_path.display()
        )
    })?;

    let mut controller = PhaseController::new(ControllerConfig::from(&settings), io, clock, report);
    let summary = controller.run();

    for phase in &summary.phases {
        info!(
            road = %phase.road,
            interval = phase.interval,
            vehicles = phase.vehicles,
            early_switch = phase.early_switch,
            read_faults = phase.read_faults,
            "Phase summary"
        );
    }

    Ok(())
}
