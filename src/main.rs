//! CLI Entry Point for iv_sweep
//!
//! Provides command-line interface for:
//! - Running an I-V sweep on real instruments or a simulated ohmic load
//! - Printing the current waveform a configuration produces
//! - Listing the sweep parameters
//! - Draining the instrument error queues
//!
//! # Usage
//!
//! Simulated sweep with JSON-lines output:
//! ```bash
//! iv_sweep run --simulate --load-ohms 1000 --json
//! ```
//!
//! Real instruments (build with `--features instrument_visa`):
//! ```bash
//! iv_sweep run --max-current 1 --step 50 --delay 20
//! ```
//!
//! Press Ctrl+C during a run to stop after the current point; the source is
//! always ramped to zero and switched off.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use iv_sweep::config::{Settings, DEFAULT_CONFIG_PATH};
use iv_sweep::data::{unique_filename, CsvSink};
use iv_sweep::hardware::mock::{ohmic_load, MockScpiTransport};
use iv_sweep::hardware::{CurrentSource, Nanovoltmeter};
use iv_sweep::logging::{self, OutputFormat, TracingConfig};
use iv_sweep::procedures::{
    run_procedure, CancellationToken, ChannelSink, Emission, FanoutSink, InstrumentBench, IvSweep,
    ProcedureContext, ResultSink, SweepParameters,
};
use iv_sweep::DaqError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "iv_sweep")]
#[command(about = "Current-voltage sweeps with a current source and a nanovoltmeter", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep
    Run(RunArgs),

    /// Print the set-points of the configured sweep
    Waveform {
        #[command(flatten)]
        sweep: SweepOverrides,

        /// Print a JSON array instead of one value per line
        #[arg(long)]
        json: bool,
    },

    /// List the sweep parameters with their units and current values
    Parameters {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Drain and print the instrument error queues
    Errors {
        /// Use in-memory instruments
        #[arg(long)]
        simulate: bool,
    },
}

#[derive(Args)]
struct SweepOverrides {
    /// Maximum current (µA)
    #[arg(long)]
    max_current: Option<f64>,

    /// Current step (nA)
    #[arg(long)]
    step: Option<f64>,

    /// Delay between set-point and reading (ms)
    #[arg(long)]
    delay: Option<f64>,
}

impl SweepOverrides {
    fn apply(&self, sweep: &mut SweepParameters) {
        if let Some(v) = self.max_current {
            sweep.max_current_ua = v;
        }
        if let Some(v) = self.step {
            sweep.current_step_na = v;
        }
        if let Some(v) = self.delay {
            sweep.delay_ms = v;
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    sweep: SweepOverrides,

    /// Use in-memory instruments driving a resistor
    #[arg(long)]
    simulate: bool,

    /// Resistance of the simulated load (Ohm)
    #[arg(long, default_value = "1000", requires = "simulate")]
    load_ohms: f64,

    /// Directory for the result file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)?;

    let json = matches!(
        cli.command,
        Commands::Run(RunArgs { json: true, .. }) | Commands::Waveform { json: true, .. }
    );
    let format = if json {
        OutputFormat::Json
    } else {
        OutputFormat::Compact
    };
    logging::init(TracingConfig::from_settings(&settings)?.with_format(format))?;

    match cli.command {
        Commands::Run(args) => run_sweep(settings, args).await,
        Commands::Waveform { sweep, json } => print_waveform(settings, &sweep, json),
        Commands::Parameters { json } => print_parameters(&settings, json),
        Commands::Errors { simulate } => drain_errors(&settings, simulate).await,
    }
}

async fn run_sweep(mut settings: Settings, args: RunArgs) -> Result<()> {
    args.sweep.apply(&mut settings.sweep);
    if let Some(dir) = args.output {
        settings.storage.output_dir = dir;
    }
    settings.validate()?;
    let config = settings.sweep_config()?;

    let bench = if args.simulate {
        info!(ohms = args.load_ohms, "Using simulated instruments");
        simulated_bench(&settings, args.load_ohms)
    } else {
        hardware_bench(&settings)?
    };

    let (channel, mut rx) = ChannelSink::new();
    let mut sink = FanoutSink::new().with(Arc::new(channel));

    let path = unique_filename(&settings.storage.output_dir, &settings.storage.prefix)?;
    match CsvSink::create(&path, &parameter_header(&settings.sweep)) {
        Ok(csv) => sink = sink.with(Arc::new(csv) as Arc<dyn ResultSink>),
        Err(DaqError::FeatureNotEnabled(feature)) => {
            warn!(%feature, "CSV storage not compiled in, results are not saved")
        }
        Err(e) => return Err(e.into()),
    }

    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(emission) = rx.recv().await {
            print_emission(&emission, json);
        }
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel_with_reason("Ctrl+C");
            }
        });
    }

    let ctx = ProcedureContext::new(Arc::new(sink), cancel);
    let mut sweep = IvSweep::new(config, settings.procedure.to_settings(), bench);
    let outcome = run_procedure(&mut sweep, &ctx).await;

    // Dropping the context closes the channel and ends the printer.
    drop(ctx);
    printer.await?;

    let result = outcome?;
    if json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!(
            "{} of {} points measured in {:.1?}{}",
            result.points_measured,
            result.total_points,
            result.elapsed,
            if result.cancelled { " (stopped)" } else { "" }
        );
    }
    Ok(())
}

fn print_emission(emission: &Emission, json: bool) {
    if json {
        match serde_json::to_string(emission) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "could not serialize record"),
        }
        return;
    }
    match emission {
        Emission::Results(sample) => println!(
            "I = {:>12.4e} A   V = {:>12.4e} V   R = {:>12.4e} Ohm",
            sample.current, sample.voltage, sample.resistance
        ),
        Emission::Progress(percent) => tracing::debug!(percent = *percent, "progress"),
    }
}

/// `# key: value` lines recorded at the top of a result file.
fn parameter_header(sweep: &SweepParameters) -> Vec<(String, String)> {
    SweepParameters::definitions()
        .into_iter()
        .map(|def| {
            let value = match def.key.as_str() {
                "max_current_ua" => sweep.max_current_ua,
                "current_step_na" => sweep.current_step_na,
                _ => sweep.delay_ms,
            };
            let units = def.units.unwrap_or_default();
            (def.name, format!("{value} {units}"))
        })
        .collect()
}

fn simulated_bench(settings: &Settings, ohms: f64) -> InstrumentBench {
    let source = Arc::new(MockScpiTransport::new(
        settings.instruments.source_address.clone(),
    ));
    let meter = Arc::new(
        MockScpiTransport::new(settings.instruments.meter_address.clone())
            .with_responder("READ", ohmic_load(source.clone(), ohms)),
    );
    InstrumentBench { meter, source }
}

#[cfg(feature = "instrument_visa")]
fn hardware_bench(settings: &Settings) -> Result<InstrumentBench> {
    use iv_sweep::hardware::VisaTransport;
    use std::time::Duration;

    let timeout = Duration::from_millis(settings.instruments.timeout_ms);
    let meter = VisaTransport::open(&settings.instruments.meter_address, timeout)?;
    let source = VisaTransport::open(&settings.instruments.source_address, timeout)?;
    Ok(InstrumentBench {
        meter: Arc::new(meter),
        source: Arc::new(source),
    })
}

#[cfg(not(feature = "instrument_visa"))]
fn hardware_bench(_settings: &Settings) -> Result<InstrumentBench> {
    Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()).into())
}

fn print_waveform(mut settings: Settings, overrides: &SweepOverrides, json: bool) -> Result<()> {
    overrides.apply(&mut settings.sweep);
    let waveform = settings.sweep_config()?.waveform()?;
    if json {
        println!("{}", serde_json::to_string(waveform.points())?);
    } else {
        for point in &waveform {
            println!("{point:e}");
        }
    }
    Ok(())
}

fn print_parameters(settings: &Settings, json: bool) -> Result<()> {
    let definitions = SweepParameters::definitions();
    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }
    for (def, (_, value)) in definitions.iter().zip(parameter_header(&settings.sweep)) {
        println!(
            "{:<16} {:<16} = {:<12} (default {}) {}",
            def.name,
            def.key,
            value,
            def.default.as_deref().unwrap_or("-"),
            def.description
        );
    }
    Ok(())
}

async fn drain_errors(settings: &Settings, simulate: bool) -> Result<()> {
    let bench = if simulate {
        simulated_bench(settings, 1.0)
    } else {
        hardware_bench(settings)?
    };

    let source = CurrentSource::new(bench.source);
    let entries = source.check_errors().await?;
    if entries.is_empty() {
        println!("{}: no errors", source.address());
    }
    for entry in &entries {
        println!("{}: {}", source.address(), entry);
    }

    let meter = Nanovoltmeter::new(bench.meter);
    println!("{}: {}", meter.address(), meter.last_error().await?);
    Ok(())
}
