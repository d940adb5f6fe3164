use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

mod api;
mod config;
mod error;
mod join;
mod models;
mod notify;
mod parser;
mod pipeline;
mod report;
mod risk;
mod seed;

use config::{AppConfig, ChannelKind, ConfigOverrides};
use models::RiskTier;
use notify::{DispatchOutcome, Dispatcher};
use pipeline::{Pipeline, SourceSet};

#[derive(Parser)]
#[command(name = "dropout-guard")]
#[command(about = "Dropout early warning: joins attendance, test and fee data into risk tiers", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "DROPOUT_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding attendance.csv, tests.csv and fees.csv
    #[arg(long, global = true, env = "DROPOUT_GUARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true, value_enum, env = "DROPOUT_GUARD_CHANNEL")]
    channel: Option<ChannelKind>,

    /// Recipient of high-risk alerts
    #[arg(long, global = true, env = "DROPOUT_GUARD_NOTIFY_TO")]
    notify_to: Option<String>,

    #[arg(long, global = true, env = "DROPOUT_GUARD_OUTBOX_DIR")]
    outbox_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "DROPOUT_GUARD_WEBHOOK_URL")]
    webhook_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard API
    Serve {
        #[arg(long, env = "DROPOUT_GUARD_BIND")]
        bind: Option<String>,
    },
    /// Write sample source tables into the data directory
    Seed,
    /// Classify a batch and list the students at highest risk
    Score {
        #[command(flatten)]
        sources: SourceArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print the full batch as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify a batch and send the high-risk alert, reporting delivery
    Notify {
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        sources: SourceArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export the weekly digest of MEDIUM and HIGH students
    Digest {
        #[command(flatten)]
        sources: SourceArgs,
        #[arg(long, default_value = "weekly_digest.csv")]
        out: PathBuf,
    },
}

/// Explicit source files; without them the data directory is used.
#[derive(Args)]
struct SourceArgs {
    #[arg(long, requires_all = ["tests", "fees"])]
    attendance: Option<PathBuf>,
    #[arg(long, requires_all = ["attendance", "fees"])]
    tests: Option<PathBuf>,
    #[arg(long, requires_all = ["attendance", "tests"])]
    fees: Option<PathBuf>,
}

impl SourceArgs {
    fn resolve(&self, config: &AppConfig) -> (SourceSet, String) {
        match (&self.attendance, &self.tests, &self.fees) {
            (Some(a), Some(t), Some(f)) => (
                SourceSet::new(
                    parser::SourceInput::file(a),
                    parser::SourceInput::file(t),
                    parser::SourceInput::file(f),
                ),
                source_label(a),
            ),
            _ => (
                SourceSet::well_known(&config.data_dir),
                config.data_dir.display().to_string(),
            ),
        }
    }
}

fn source_label(attendance: &Path) -> String {
    attendance
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "uploaded files".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let bind = match &cli.command {
        Commands::Serve { bind } => bind.clone(),
        _ => None,
    };
    let config = AppConfig::load(cli.config.as_deref())?.apply(ConfigOverrides {
        bind,
        data_dir: cli.data_dir,
        channel: cli.channel,
        notify_to: cli.notify_to,
        outbox_dir: cli.outbox_dir,
        webhook_url: cli.webhook_url,
    });

    let dispatcher = Arc::new(
        Dispatcher::from_config(&config.notification)
            .context("failed to set up notification channel")?,
    );
    let channel = dispatcher.channel_name();
    let pipeline = Pipeline::new(config.rules, dispatcher);

    match cli.command {
        Commands::Serve { .. } => {
            info!(
                "starting dropout-guard v{} (data in {}, alerts via {})",
                env!("CARGO_PKG_VERSION"),
                config.data_dir.display(),
                channel
            );
            let app = api::build_router(api::AppState::new(pipeline, config.data_dir.clone()));
            let listener = tokio::net::TcpListener::bind(&config.bind)
                .await
                .with_context(|| format!("failed to bind {}", config.bind))?;
            info!("listening on http://{}", config.bind);
            axum::serve(listener, app).await?;
        }
        Commands::Seed => {
            seed::write_sample(&config.data_dir)?;
            println!("Sample data written to {}.", config.data_dir.display());
        }
        Commands::Score {
            sources,
            limit,
            json,
        } => {
            let (sources, _) = sources.resolve(&config);
            let run = pipeline.run(&sources).await.context("batch run failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&run.batch)?);
            } else if run.batch.is_empty() {
                println!("No students found in this batch.");
            } else {
                println!(
                    "{} students: {} high, {} medium, {} low risk.",
                    run.batch.len(),
                    run.batch.count_tier(RiskTier::High),
                    run.batch.count_tier(RiskTier::Medium),
                    run.batch.count_tier(RiskTier::Low)
                );
                for student in report::ranked(&run.batch).iter().take(limit) {
                    println!("- {}", report::describe(student));
                }
            }

            // Let the background alert finish before the runtime shuts down.
            if let Err(err) = run.notification.await {
                warn!(error = %err, "high-risk notification task did not complete");
            }
        }
        Commands::Notify { sources } => {
            let (sources, _) = sources.resolve(&config);
            let trigger = pipeline
                .trigger_notification(&sources)
                .await
                .context("failed to send notification")?;

            println!("Classified {} students.", trigger.batch.len());
            match trigger.outcome {
                DispatchOutcome::Delivered { students, receipt } => {
                    println!(
                        "Notification sent for {} high-risk students (message {}).",
                        students.len(),
                        receipt.message_id
                    );
                    if let Some(url) = receipt.preview_url {
                        println!("Preview: {url}");
                    }
                }
                DispatchOutcome::Skipped => println!("No high-risk students found."),
            }
        }
        Commands::Report { sources, out } => {
            let (sources, label) = sources.resolve(&config);
            let batch = pipeline.classify_sources(&sources).await?;
            let report = report::build_report(&label, chrono::Utc::now(), &batch);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Digest { sources, out } => {
            let (sources, _) = sources.resolve(&config);
            let batch = pipeline.classify_sources(&sources).await?;
            let digest = report::weekly_digest(&batch)?;
            std::fs::write(&out, digest)?;
            println!("Weekly digest written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_label_uses_the_source_directory() {
        assert_eq!(source_label(Path::new("/srv/school/attendance.csv")), "/srv/school");
    }

    #[test]
    fn bare_file_name_falls_back_to_generic_label() {
        assert_eq!(source_label(Path::new("a.csv")), "uploaded files");
    }
}
