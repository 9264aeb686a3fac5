use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::error;

use engine_application::commands::{
    build_features, score, train_model, BuildFeaturesRequest, ScoreRequest, TrainModelRequest,
};
use engine_application::JobSummary;
use engine_bootstrap::AppContext;
use engine_domain::entities::BucketRange;

#[derive(Parser, Debug)]
#[command(name = "atmwatch-engine")]
#[command(about = "ATM dispense anomaly detection batch engine", long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild temporal feature rows from the dispense bucket store
    BuildFeatures {
        /// Inclusive lower bucket_start bound, RFC 3339
        #[arg(long)]
        from: Option<String>,
        /// Exclusive upper bucket_start bound, RFC 3339
        #[arg(long)]
        to: Option<String>,
        /// Restrict to specific entity ids (repeatable)
        #[arg(long = "entity")]
        entities: Vec<String>,
        /// Resume past chunks committed by an interrupted run
        #[arg(long)]
        resume: bool,
    },
    /// Train an isolation forest and persist it as a new model version
    TrainModel {
        #[arg(long)]
        model_version: String,
        #[arg(long)]
        sample_size: Option<usize>,
        #[arg(long)]
        contamination: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Score the feature store against a pinned model version
    Score {
        #[arg(long)]
        model_version: String,
        /// Resume past chunks committed by an interrupted run
        #[arg(long)]
        resume: bool,
    },
}

fn parse_bound(label: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|err| anyhow!("invalid --{label} '{raw}': {err}"))
        })
        .transpose()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Some(config) = args.config {
        std::env::set_var("ATMWATCH_CONFIG", config);
    }

    let context = AppContext::new().await?;
    let summary = match args.command {
        Command::BuildFeatures {
            from,
            to,
            entities,
            resume,
        } => {
            let request = BuildFeaturesRequest {
                entities: (!entities.is_empty()).then_some(entities),
                range: BucketRange {
                    from: parse_bound("from", from)?,
                    to: parse_bound("to", to)?,
                },
                resume,
            };
            build_features(&context.state, &request).await?
        }
        Command::TrainModel {
            model_version,
            sample_size,
            contamination,
            seed,
        } => {
            let request = TrainModelRequest {
                model_version,
                sample_size,
                contamination,
                seed,
            };
            train_model(&context.state, &request).await?
        }
        Command::Score {
            model_version,
            resume,
        } => {
            let request = ScoreRequest {
                model_version,
                resume,
            };
            score(&context.state, &request).await?
        }
    };

    report(&summary)
}

/// Prints the summary as one JSON line and maps partial failure to a
/// non-zero exit status for schedulers.
fn report(summary: &JobSummary) -> Result<()> {
    println!("{}", serde_json::to_string(summary)?);
    if !summary.succeeded() {
        error!(
            failed = summary.rows_failed,
            error = summary.first_error.as_deref().unwrap_or("unknown"),
            "job finished with failures"
        );
        std::process::exit(1);
    }
    Ok(())
}
