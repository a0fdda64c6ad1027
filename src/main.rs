//! CLI Entry Point for dualview_daq
//!
//! Drives the dual-view time-lapse rig without the operator window:
//! - `run`: live preview, then a time-lapse capture (saved unless `--no-save`)
//! - `preview`: live preview only
//! - `check-config`: load, validate and print the configuration
//!
//! Ctrl+C acts as the interrupt button: the run stops at its next
//! checkpoint, switches the LEDs off and closes the file.
//!
//! # Usage
//!
//! ```bash
//! dualview_daq run --config config/dualview.toml --cycles 24 --frames 5
//! dualview_daq preview --secs 10
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use dualview_daq::acquisition::{CancellationFlag, MeasurementHandle, RunSummary, Sequencer};
use dualview_daq::config::AppConfig;
use dualview_daq::display::{DisplayRefresher, DisplayUpdate};
use dualview_daq::error::{AppResult, DaqError};
use dualview_daq::hardware::mock::{simulated_rig, HardwareLog};
use dualview_daq::logging;
use dualview_daq::settings::MeasurementSettings;
use dualview_daq::storage::{self, memory::MemoryContainerFactory, ContainerFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "dualview_daq")]
#[command(about = "Dual-view time-lapse acquisition controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preview, then run a time-lapse capture
    Run {
        /// Configuration file (default: config/dualview.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the number of cycles
        #[arg(long)]
        cycles: Option<usize>,

        /// Override the frames per camera per cycle
        #[arg(long)]
        frames: Option<usize>,

        /// Capture without writing a file
        #[arg(long)]
        no_save: bool,

        /// Seconds of preview before the capture starts
        #[arg(long, default_value = "1.0")]
        preview_secs: f64,
    },

    /// Live preview only
    Preview {
        /// Configuration file (default: config/dualview.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Preview duration in seconds
        #[arg(long, default_value = "5.0")]
        secs: f64,
    },

    /// Load, validate and print the configuration
    CheckConfig {
        /// Configuration file (default: config/dualview.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            cycles,
            frames,
            no_save,
            preview_secs,
        } => run_measurement(config, cycles, frames, no_save, preview_secs).await,
        Commands::Preview { config, secs } => run_preview(config, secs).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn load_config(path: Option<PathBuf>) -> AppResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.validate().map_err(DaqError::Configuration)?;
    Ok(config)
}

async fn connect_rig(
    config: &AppConfig,
    settings: Arc<MeasurementSettings>,
    storage: Arc<dyn ContainerFactory>,
) -> AppResult<Arc<Sequencer>> {
    let pairs = simulated_rig(&config.hardware, &HardwareLog::new())
        .connect()
        .await?;
    Ok(Arc::new(Sequencer::new(pairs, settings, storage)?))
}

fn interrupt_on_ctrl_c(flag: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, interrupting");
            flag.cancel();
        }
    });
}

fn spawn_display(
    settings: Arc<MeasurementSettings>,
    handle: &MeasurementHandle,
) -> tokio::task::JoinHandle<usize> {
    let refresher = DisplayRefresher::new(settings, handle.preview(), handle.progress());
    tokio::spawn(async move {
        let mut last_percent = None;
        refresher
            .run(move |update: &DisplayUpdate| {
                if last_percent != Some(update.progress_percent) {
                    info!(
                        state = %update.state,
                        progress = update.progress_percent,
                        levels = ?update.levels,
                        "Progress"
                    );
                    last_percent = Some(update.progress_percent);
                }
            })
            .await
    })
}

async fn run_measurement(
    config_path: Option<PathBuf>,
    cycles: Option<usize>,
    frames: Option<usize>,
    no_save: bool,
    preview_secs: f64,
) -> Result<()> {
    let config = load_config(config_path)?;
    logging::init_from_config(&config).map_err(DaqError::Configuration)?;

    let settings = Arc::new(MeasurementSettings::from_config(&config));
    if let Some(cycles) = cycles {
        settings.time_lapse_num.set(cycles)?;
    }
    if let Some(frames) = frames {
        settings.frame_num.set(frames)?;
    }
    // Capture starts when save_h5 is switched on after the preview.
    settings.save_h5.set(false)?;

    let storage: Arc<dyn ContainerFactory> = if no_save {
        Arc::new(MemoryContainerFactory::new())
    } else {
        storage::factory_for(&config.storage.backend)?
    };

    let persistent = storage.persistent();
    let sequencer = connect_rig(&config, settings.clone(), storage).await?;
    interrupt_on_ctrl_c(sequencer.cancellation());

    let handle = MeasurementHandle::spawn(sequencer);
    let display = spawn_display(settings.clone(), &handle);

    tokio::time::sleep(Duration::try_from_secs_f64(preview_secs).unwrap_or_default()).await;
    if !handle.is_finished() {
        if no_save {
            handle.request_capture();
        } else {
            handle.start_saving()?;
        }
    }

    let summary = handle.join().await?;
    display.await?;
    print_summary(&summary, persistent);
    Ok(())
}

async fn run_preview(config_path: Option<PathBuf>, secs: f64) -> Result<()> {
    let config = load_config(config_path)?;
    logging::init_from_config(&config).map_err(DaqError::Configuration)?;

    let settings = Arc::new(MeasurementSettings::from_config(&config));
    settings.save_h5.set(false)?;

    let storage = Arc::new(MemoryContainerFactory::new());
    let sequencer = connect_rig(&config, settings.clone(), storage).await?;
    interrupt_on_ctrl_c(sequencer.cancellation());

    let handle = MeasurementHandle::spawn(sequencer);
    let display = spawn_display(settings, &handle);

    tokio::time::sleep(Duration::try_from_secs_f64(secs).unwrap_or_default()).await;
    let preview = handle.preview().latest();
    handle.interrupt();
    handle.join().await?;
    let refreshes = display.await?;

    match preview {
        Some(frame) => println!(
            "Last preview frame: view {}, #{}, {}x{} ({} display refreshes)",
            frame.view,
            frame.sequence,
            frame.frame.height,
            frame.frame.width,
            refreshes
        ),
        None => println!("No preview frame received"),
    }
    Ok(())
}

fn check_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Configuration is valid");
    println!();
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn print_summary(summary: &RunSummary, persistent: bool) {
    println!();
    println!("Run {} finished: {:?}", summary.run_id, summary.outcome);
    println!("   Cycles completed: {}", summary.cycles_completed);
    println!("   Frames captured:  {}", summary.frames_captured);
    println!("   Elapsed:          {:.2} s", summary.elapsed.as_secs_f64());
    match &summary.file {
        Some(path) if persistent => println!("   Saved to:         {}", path.display()),
        Some(path) => println!("   Kept in memory:   {} (not written to disk)", path.display()),
        None => println!("   Nothing saved"),
    }
}
