//! CLI Entry Point for ctr-daq
//!
//! Runs one acquisition against a simulated counter/timer board:
//! - `count`: free-running counter read after a fixed time
//! - `gated`: single count over a gate produced by the neighbor channel
//! - `buffered`: one sample per gate, streamed through the ring buffer
//! - `pulse`: single pulse or continuous pulse train
//!
//! Ctrl-C interrupts a pending wait; with `quit_on_signal` set, partial
//! results are reported instead of resuming.
//!
//! # Usage
//!
//! ```bash
//! ctr_daq --config config/ctr_daq.toml buffered --samples 50
//! CTR_DAQ_ACQUISITION__GATE_LENGTH=0.1 ctr_daq gated
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ctr_client::{Acquisition, AsyncAcquisition, WaitPolicy};
use ctr_daq::config::{Config, DEFAULT_CONFIG_PATH};
use ctr_daq::logging;
use ctr_driver::{BoardRegistry, EventGenerator, GeneratorConfig, SimulatedBoard};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ctr_daq")]
#[command(about = "Counter/timer acquisition on a simulated 4-channel board", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override [acquisition] channel
    #[arg(long, global = true)]
    channel: Option<u32>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Count input edges for a fixed time
    Count {
        /// Counting time in seconds
        #[arg(long, default_value = "1.0")]
        seconds: f64,
    },

    /// Count over one gate from the neighbor channel
    Gated {
        /// Gate length in seconds
        #[arg(long)]
        gate_length: Option<f64>,
    },

    /// Collect per-gate samples through the ring buffer
    Buffered {
        /// Gate length in seconds
        #[arg(long)]
        gate_length: Option<f64>,
        /// Number of samples to collect
        #[arg(long)]
        samples: Option<usize>,
        /// Wrap the ring instead of ending at capacity
        #[arg(long)]
        continuous: bool,
    },

    /// Emit a pulse, or a pulse train until Ctrl-C
    Pulse {
        /// Pulse length or train period in seconds
        #[arg(long, default_value = "0.5")]
        period: f64,
        /// Repeat until interrupted
        #[arg(long)]
        continuous: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(channel) = cli.channel {
        config.acquisition.channel = channel;
    }
    apply_command(&mut config, cli.command);
    config.validate()?;

    if cli.dump_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    let Some(command) = cli.command else {
        bail!("no command given (try --help)");
    };

    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
    info!(name = %config.application.name, board = config.board.index, "Starting");

    if !config.board.simulated {
        bail!("no hardware backend is available; set [board] simulated = true");
    }

    let registry = BoardRegistry::new();
    let sim = SimulatedBoard::attach(&registry, config.board.index)?;
    let generator = EventGenerator::spawn(
        sim,
        GeneratorConfig {
            seed: config.board.seed,
            ..Default::default()
        },
    )?;
    let acq = AsyncAcquisition::new(Acquisition::open(&registry, config.board.index)?);

    let signal = acq.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            signal.raise();
        }
    });

    let outcome = run(&acq, &config, command).await;

    match acq.try_into_inner() {
        Ok(inner) => tokio::task::spawn_blocking(move || inner.close())
            .await
            .map_err(|e| anyhow!("Task join error: {}", e))??,
        Err(acq) => warn!(?acq, "Acquisition still shared at exit; board released on drop"),
    }
    generator.stop();

    outcome
}

fn apply_command(config: &mut Config, command: Option<Commands>) {
    match command {
        Some(Commands::Gated {
            gate_length: Some(gate),
        }) => config.acquisition.gate_length = gate,
        Some(Commands::Buffered {
            gate_length,
            samples,
            continuous,
        }) => {
            if let Some(gate) = gate_length {
                config.acquisition.gate_length = gate;
            }
            if let Some(samples) = samples {
                config.acquisition.samples = samples;
            }
            config.acquisition.continuous |= continuous;
        }
        _ => {}
    }
}

async fn run(acq: &AsyncAcquisition, config: &Config, command: Commands) -> Result<()> {
    let settings = &config.acquisition;
    let channel = settings.channel;

    match command {
        Commands::Count { seconds } => {
            let wait = Duration::try_from_secs_f64(seconds)
                .map_err(|_| anyhow!("Invalid counting time {}", seconds))?;
            acq.start_counter(channel, settings.source).await?;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            let reading = acq.get_count(channel, false, false).await?;
            acq.stop_counter(channel).await?;
            println!("Channel {}: {} counts", channel, reading.value);
        }

        Commands::Gated { .. } => {
            acq.start_gated_counter(channel, settings.gate_length, settings.source)
                .await?;
            let reading = acq
                .get_count(channel, true, settings.quit_on_signal)
                .await?;
            acq.stop_counter(channel).await?;
            println!(
                "Channel {}: {} counts over {} s{}",
                channel,
                reading.value,
                settings.gate_length,
                if reading.interrupted {
                    " (interrupted)"
                } else {
                    ""
                }
            );
        }

        Commands::Buffered { .. } => {
            let capacity = match settings.capacity {
                0 if !settings.continuous => settings.samples,
                n => n,
            };
            acq.start_buffered_counter(
                channel,
                settings.gate_length,
                settings.source,
                capacity,
                settings.continuous,
            )
            .await?;
            let collected = collect_buffered(acq, config).await;
            acq.stop_counter(channel).await?;
            let samples = collected?;
            for (i, value) in samples.iter().enumerate() {
                println!("{i:6} {value}");
            }
            println!("{} samples from channel {}", samples.len(), channel);
        }

        Commands::Pulse { period, continuous } => {
            acq.start_pulser(channel, period, continuous).await?;
            if continuous {
                println!("Pulse train on channel {} - press Ctrl-C to stop", channel);
                tokio::signal::ctrl_c().await?;
            } else {
                acq.get_count(channel, true, true).await?;
            }
            acq.stop_counter(channel).await?;
            println!("Pulser on channel {} stopped", channel);
        }
    }

    Ok(())
}

async fn collect_buffered(acq: &AsyncAcquisition, config: &Config) -> Result<Vec<u32>> {
    let settings = &config.acquisition;
    let wait = WaitPolicy::from_seconds(settings.wait_seconds)?;
    let mut samples = Vec::with_capacity(settings.samples);

    while samples.len() < settings.samples {
        let wanted = settings.samples - samples.len();
        let (batch, read) = acq
            .get_buffered_counts(wanted, wait, settings.quit_on_signal)
            .await?;
        info!(
            n_read = read.n_read,
            timed_out = read.timed_out,
            end_of_data = read.end_of_data,
            "Buffered read"
        );
        samples.extend(batch);

        if read.end_of_data || read.interrupted {
            break;
        }
        if read.timed_out {
            warn!(collected = samples.len(), "Timed out waiting for samples");
            break;
        }
        if read.n_read == 0 && matches!(wait, WaitPolicy::Poll) {
            tokio::time::sleep(Duration::from_secs_f64(settings.gate_length)).await;
        }
    }

    Ok(samples)
}
