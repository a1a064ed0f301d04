use clap::{Parser, Subcommand};
use log::{error, info, warn};
use sna::analysis::{analyze_file, report_dir_name, write_report, DecodedRecord};
use sna::configuration::types::DEFAULT_WINDOWS;
use sna::configuration::Config;
use sna::data_capture::{CapturedRecord, PnetBackend, ProgressCallback};
use sna::error_handling::types::AnalysisError;
use sna::session_management::CaptureController;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sna")]
#[command(version = "0.1.0")]
#[command(about = "Bounded live capture and time-bucketed traffic statistics")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture traffic as described by a configuration file
    Capture {
        #[arg(env = "SNA_CONFIG")]
        config_file: PathBuf,
    },
    /// Compute statistics over an existing capture file
    Analyze {
        capture: PathBuf,
        /// Number of time windows
        #[arg(short, long, default_value_t = DEFAULT_WINDOWS)]
        windows: usize,
        /// Directory receiving the report directory, next to the capture by default
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Capture { config_file } => run_capture(&config_file).await,
        Command::Analyze {
            capture,
            windows,
            output,
        } => {
            let result =
                tokio::task::spawn_blocking(move || run_analysis(&capture, windows, output.as_deref()))
                    .await;
            finish_analysis(result);
        }
    }
}

async fn run_capture(config_file: &Path) {
    info!("Importing configuration");
    let mut config = Config::from_file(config_file).unwrap_or_else(|e| {
        error!("Unable to import configuration from file: {}", e);
        std::process::exit(1);
    });
    config.apply_env_overrides();

    let progress: ProgressCallback = Arc::new(|seq: u64, record: &CapturedRecord| {
        info!("#{} {}", seq, DecodedRecord::decode(&record.data).summary());
    });
    let mut controller =
        CaptureController::new(Arc::new(PnetBackend::default())).with_progress(progress);

    if let Err(e) = controller.configure(&config) {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = controller.start() {
        error!("Unable to start capture: {}", e);
        std::process::exit(1);
    }

    let interrupt = controller.interrupt_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping capture");
                interrupt.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    let summary = match controller.run_to_completion().await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Capture ended with an error: {}", e);
            std::process::exit(1);
        }
    };

    let analysis = controller.config().map(|c| c.analysis.clone());
    match (summary.artifact, analysis) {
        (Some(artifact), Some(analysis)) if analysis.analyze_on_stop => {
            let result =
                tokio::task::spawn_blocking(move || run_analysis(&artifact, analysis.windows, None))
                    .await;
            finish_analysis(result);
        }
        (Some(artifact), _) => info!("Capture saved to {}", artifact.display()),
        (None, _) => {}
    }
}

fn run_analysis(capture: &Path, windows: usize, output: Option<&Path>) -> Result<PathBuf, AnalysisError> {
    let report = analyze_file(capture, windows)?;
    println!("{}", report);

    let parent = output
        .map(Path::to_path_buf)
        .or_else(|| capture.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    write_report(&report, &parent, &report_dir_name(capture))
}

fn finish_analysis(result: Result<Result<PathBuf, AnalysisError>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(dir)) => info!("Statistics saved in {}", dir.display()),
        Ok(Err(e)) => {
            error!("Analysis failed: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Analysis task failed: {}", e);
            std::process::exit(1);
        }
    }
}
