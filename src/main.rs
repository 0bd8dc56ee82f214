use clap::{Parser, Subcommand};
use scanforge::config::AppConfig;
use scanforge::errors::{Result, ScanError};
use scanforge::pipeline::{self, Orchestrator};
use scanforge::types::job::{ScanJobData, TargetScanJobData};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scanforge")]
#[command(about = "Multi-tool security scan pipeline engine")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one repository scan from a job envelope
    Scan {
        /// Path to a JSON scan job envelope
        #[arg(long)]
        job: PathBuf,
    },
    /// Run one dynamic web-target scan from a job envelope
    Target {
        /// Path to a JSON target-scan job envelope
        #[arg(long)]
        job: PathBuf,
    },
    /// Probe availability and version of every registered scanner
    Doctor,
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(p) => Ok(AppConfig::load_from(p)?),
        None => Ok(AppConfig::default()),
    }
}

fn read_job<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ScanError::Io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&content)
        .map_err(|e| ScanError::Other(format!("invalid job envelope {}: {e}", path.display())))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    let orchestrator = Orchestrator::new(config);

    match args.command {
        Command::Scan { job } => {
            let job: ScanJobData = read_job(&job)?;
            let (_cancel_tx, cancel_rx) = pipeline::cancellation();
            let report = orchestrator.run_scan(job, cancel_rx).await?;
            println!(
                "{} {} ({} findings in {:.1}s)",
                report.scan_id,
                report.status,
                report.findings_count.total(),
                report.duration_secs
            );
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
        }
        Command::Target { job } => {
            let job: TargetScanJobData = read_job(&job)?;
            let (_cancel_tx, cancel_rx) = pipeline::cancellation();
            let report = orchestrator.run_target_scan(job, cancel_rx).await?;
            println!(
                "{} {} ({} findings in {:.1}s)",
                report.scan_id,
                report.status,
                report.findings_count.total(),
                report.duration_secs
            );
        }
        Command::Doctor => {
            for (category, name, version) in orchestrator.doctor().await {
                match version {
                    Some(v) => println!("{category:<10} {name:<14} {v}"),
                    None => println!("{category:<10} {name:<14} NOT AVAILABLE"),
                }
            }
        }
    }

    Ok(())
}
