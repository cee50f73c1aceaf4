use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sense_core::analysis::{CategoryMapper, SoundCategory};
use sense_core::audio::fixture::FixtureMicrophone;
use sense_core::audio::platform_microphone;
use sense_core::monitor::{
    AlertSink, DetectionPipeline, FanoutAlertSink, LoggingAlertSink, Monitor, SimulatedMonitor,
    SoundEvent, WorkResult,
};
use sense_core::settings::{MonitorSettings, SensitivityLevel, SettingsStore};
use sense_core::telemetry::TelemetryCollector;
use sense_core::AppConfig;
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(
    name = "sense_cli",
    about = "Ambient sound safety monitor: live capture, WAV replay and demo events"
)]
struct Cli {
    /// Engine configuration JSON (defaults to assets/sense_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the category table and sensitivity thresholds as JSON
    Categories,
    /// Run the detection pipeline over a WAV file and print events as JSON lines
    Classify {
        #[arg(long)]
        wav: PathBuf,
        #[arg(long)]
        model: PathBuf,
        #[command(flatten)]
        audio: AudioArgs,
        /// Print the telemetry snapshot to stderr when done
        #[arg(long)]
        stats: bool,
    },
    /// Monitor the default microphone until Ctrl-C or the time limit
    Monitor {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        seconds: Option<u64>,
        #[command(flatten)]
        audio: AudioArgs,
    },
    /// Emit random demo detections without touching the microphone
    Simulate {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        #[arg(long, default_value_t = 5_000)]
        min_interval_ms: u64,
        #[arg(long, default_value_t = 15_000)]
        max_interval_ms: u64,
    },
}

#[derive(clap::Args, Debug)]
struct AudioArgs {
    /// very_low, low, medium, high or very_high
    #[arg(long, default_value = "medium", value_parser = parse_sensitivity)]
    sensitivity: SensitivityLevel,
    #[arg(long, default_value_t = 1.0)]
    gain: f32,
    #[arg(long, default_value_t = 100)]
    silence_floor: u32,
    #[arg(long)]
    noise_reduction: bool,
}

impl AudioArgs {
    fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            sensitivity: self.sensitivity,
            microphone_gain: self.gain,
            silence_floor: self.silence_floor,
            noise_reduction: self.noise_reduction,
            ..MonitorSettings::default()
        }
    }
}

fn parse_sensitivity(value: &str) -> Result<SensitivityLevel, String> {
    SensitivityLevel::parse(value).ok_or_else(|| format!("unknown sensitivity level '{}'", value))
}

fn main() -> ExitCode {
    sense_core::init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Categories => run_categories(),
        Commands::Classify {
            wav,
            model,
            audio,
            stats,
        } => run_classify(config, wav, model, &audio, stats),
        Commands::Monitor {
            model,
            seconds,
            audio,
        } => run_monitor(config, model, seconds, &audio),
        Commands::Simulate {
            seconds,
            min_interval_ms,
            max_interval_ms,
        } => run_simulate(&config, seconds, min_interval_ms, max_interval_ms),
    }
}

fn run_categories() -> Result<ExitCode> {
    let categories = SoundCategory::ALL
        .iter()
        .map(|&category| CategoryPayload {
            category,
            classes: CategoryMapper::indices_for(category)
                .into_iter()
                .map(|index| ClassPayload {
                    index,
                    label: CategoryMapper::label_for(index),
                })
                .collect(),
        })
        .collect();
    let sensitivity = SensitivityLevel::ALL
        .iter()
        .map(|&level| ThresholdPayload {
            level,
            threshold: level.detection_threshold(),
        })
        .collect();

    let report = CategoriesReport {
        categories,
        sensitivity,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(0))
}

fn run_classify(
    mut config: AppConfig,
    wav: PathBuf,
    model: PathBuf,
    audio: &AudioArgs,
    stats: bool,
) -> Result<ExitCode> {
    let mic = FixtureMicrophone::from_wav(&wav)
        .with_context(|| format!("reading {}", wav.display()))?;
    config.classifier.model_path = model;

    let settings = Arc::new(SettingsStore::new(audio.settings()));
    let printer = Arc::new(JsonLinesSink::stdout());
    let pipeline = DetectionPipeline::from_config(&config, Arc::new(mic), settings, printer);
    if pipeline.classifier().is_closed() {
        bail!(
            "sound model {} could not be loaded",
            config.classifier.model_path.display()
        );
    }

    let mut scanning = pipeline.channels().watch_scanning();
    pipeline
        .set_scanning(true)
        .context("starting the detection pipeline")?;
    runtime()?.block_on(wait_until_idle(&mut scanning));

    if stats {
        let snapshot = pipeline.telemetry().snapshot();
        eprintln!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    report_outcome(pipeline.last_outcome())
}

fn run_monitor(
    mut config: AppConfig,
    model: PathBuf,
    seconds: Option<u64>,
    audio: &AudioArgs,
) -> Result<ExitCode> {
    config.classifier.model_path = model;
    let settings = Arc::new(SettingsStore::new(audio.settings()));
    let sinks: Vec<Arc<dyn AlertSink>> = vec![
        Arc::new(LoggingAlertSink),
        Arc::new(JsonLinesSink::stdout()),
    ];
    let sink = FanoutAlertSink::new(sinks);
    let pipeline =
        DetectionPipeline::from_config(&config, platform_microphone(), settings, Arc::new(sink));
    if pipeline.classifier().is_closed() {
        tracing::warn!("[sense_cli] Sound model unavailable, monitoring without detections");
    }

    let mut scanning = pipeline.channels().watch_scanning();
    pipeline
        .set_scanning(true)
        .context("starting the detection pipeline")?;

    let limit = seconds.map(Duration::from_secs);
    runtime()?.block_on(async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("[sense_cli] Interrupted"),
            _ = sleep_or_forever(limit) => tracing::info!("[sense_cli] Time limit reached"),
            _ = wait_until_idle(&mut scanning) => {}
        }
    });

    pipeline
        .set_scanning(false)
        .context("stopping the detection pipeline")?;
    report_outcome(pipeline.last_outcome())
}

fn run_simulate(
    config: &AppConfig,
    seconds: u64,
    min_interval_ms: u64,
    max_interval_ms: u64,
) -> Result<ExitCode> {
    let monitor = SimulatedMonitor::new(
        &config.pipeline,
        Arc::new(JsonLinesSink::stdout()),
        Arc::new(TelemetryCollector::default()),
    )
    .with_interval(
        Duration::from_millis(min_interval_ms),
        Duration::from_millis(max_interval_ms),
    );

    monitor.set_scanning(true).context("starting the simulation")?;
    std::thread::sleep(Duration::from_secs(seconds));
    monitor.set_scanning(false).context("stopping the simulation")?;
    Ok(ExitCode::from(0))
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")
}

async fn wait_until_idle(scanning: &mut watch::Receiver<bool>) {
    // Err only when the pipeline is gone, which also means idle.
    let _ = scanning.wait_for(|active| !*active).await;
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

fn report_outcome(outcome: Option<WorkResult>) -> Result<ExitCode> {
    match outcome {
        Some(WorkResult::Failure(err)) => bail!("monitoring failed: {}", err),
        _ => Ok(ExitCode::from(0)),
    }
}

/// Prints each detection as one JSON object per line.
struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl JsonLinesSink<std::io::Stdout> {
    fn stdout() -> Self {
        Self {
            out: Mutex::new(std::io::stdout()),
        }
    }
}

impl<W: Write + Send> AlertSink for JsonLinesSink<W> {
    fn on_event(&self, event: &SoundEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }

    fn on_scanning_changed(&self, _scanning: bool) {}
}

#[derive(Serialize)]
struct CategoriesReport {
    categories: Vec<CategoryPayload>,
    sensitivity: Vec<ThresholdPayload>,
}

#[derive(Serialize)]
struct CategoryPayload {
    category: SoundCategory,
    classes: Vec<ClassPayload>,
}

#[derive(Serialize)]
struct ClassPayload {
    index: usize,
    label: String,
}

#[derive(Serialize)]
struct ThresholdPayload {
    level: SensitivityLevel,
    threshold: f32,
}
