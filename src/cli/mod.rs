/*
* Usage Monitor Command Line Interface
* ------------------------------------
* @project: usage-monitor
*
* usage-monitor
* ├── monitor                  // run the periodic loop until Ctrl-C
* ├── snapshot --metric cpu    // one-off stats + classification
* └── init [--force]           // write config/default.toml
*
* Built on clap derive, colored output for humans, tracing for everything else.
*/

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{generate_default_config, Settings};
use crate::monitoring::monitor::SeriesReport;
use crate::monitoring::{shutdown_channel, Analyzer, AnomalyLabel, JsonFileSource, LogSink, MetricKind, Monitor};

#[derive(Parser)]
#[command(name = "usage-monitor")]
#[command(about = "Server usage anomaly monitor", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory (overrides CONFIG_PATH)
    #[arg(short, long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the monitoring loop until interrupted
    Monitor,
    /// Print current stats and anomaly classification for a metric
    Snapshot {
        #[arg(short, long, value_enum, default_value = "cpu")]
        metric: MetricArg,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum MetricArg {
    Cpu,
    Disk,
    Network,
}

impl From<MetricArg> for MetricKind {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Cpu => MetricKind::Cpu,
            MetricArg::Disk => MetricKind::Disk,
            MetricArg::Network => MetricKind::Network,
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor => {
            let monitor = build_monitor(&load_settings(cli.config.as_deref())?)?;
            handle_monitor_command(monitor).await
        }
        Commands::Snapshot { metric } => {
            let monitor = build_monitor(&load_settings(cli.config.as_deref())?)?;
            handle_snapshot_command(&monitor, metric.into()).await
        }
        Commands::Init { force } => handle_init_command(cli.config, force),
    }
}

fn load_settings(config_dir: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = match config_dir {
        Some(dir) => Settings::new_from_dir(dir)?,
        None => Settings::new()?,
    };
    Ok(settings)
}

pub fn build_monitor(settings: &Settings) -> anyhow::Result<Monitor> {
    let analyzer = Analyzer::new(settings.analyzer)?;
    let source = Arc::new(JsonFileSource::new(&settings.source.path));
    Ok(Monitor::new(
        source,
        Arc::new(LogSink),
        analyzer,
        settings.monitoring.to_monitor_settings(),
    ))
}

async fn handle_monitor_command(monitor: Monitor) -> anyhow::Result<()> {
    let (trigger, token) = shutdown_channel();

    let monitor_task = tokio::spawn(async move { monitor.run(token).await });

    tokio::signal::ctrl_c().await?;
    info!("Exiting program...");
    trigger.trigger();

    monitor_task.await?;
    Ok(())
}

async fn handle_snapshot_command(monitor: &Monitor, kind: MetricKind) -> anyhow::Result<()> {
    let reports = monitor.snapshot(kind, Utc::now()).await?;
    if reports.is_empty() {
        println!("{} No {} samples in the lookback window", "!".yellow(), kind);
        return Ok(());
    }
    for report in &reports {
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &SeriesReport) {
    println!("{}", report.summary.render(report.selector));
    let status = match report.label {
        Some(AnomalyLabel::HighSpike) => "high spike".red().bold(),
        Some(AnomalyLabel::LowDrop) => "low drop".blue().bold(),
        Some(AnomalyLabel::SustainedDeviation) => "sustained deviation".yellow().bold(),
        None if report.latest.and_then(|p| p.z_score).is_none() => "warming up".dimmed(),
        None => "normal".green(),
    };
    let z = report
        .latest
        .and_then(|p| p.z_score)
        .map(|z| format!(" (z = {:.2})", z))
        .unwrap_or_default();
    println!(" _Status_: {}{}\n", status, z);
}

fn handle_init_command(config_dir: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let config_dir = config_dir.unwrap_or_else(|| PathBuf::from("config"));
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("Configuration already exists at {}. Use --force to overwrite.", target.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    let config_str = toml::to_string_pretty(&generate_default_config())?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration generated at {}", "✓".green(), target.display());
    Ok(())
}
