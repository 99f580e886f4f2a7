use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medeval::{generate_metrics_dict, EvaluationConfig, LossFunction, MetricKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "medeval")]
#[command(about = "Metrics and losses for medical image segmentation, classification, regression and synthesis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a metrics report from a CSV of predictions and targets
    Generate {
        /// CSV with SubjectID, Prediction and Target columns
        #[arg(short, long)]
        input_csv: PathBuf,

        /// Evaluation configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Where to write the report (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the metric names accepted in configurations
    ListMetrics,

    /// List the loss names accepted in configurations
    ListLosses,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            input_csv,
            config,
            output,
        } => {
            let evaluation = EvaluationConfig::load_validated(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let report = generate_metrics_dict(&input_csv, &evaluation, output.as_deref())
                .with_context(|| format!("evaluating {}", input_csv.display()))?;
            println!("{}", report.to_json()?);
            Ok(())
        }

        Commands::ListMetrics => {
            for (name, kind) in MetricKind::TABLE {
                if name == kind.name() {
                    println!("{name}");
                } else {
                    println!("{name} (alias of {kind})");
                }
            }
            Ok(())
        }

        Commands::ListLosses => {
            for loss in LossFunction::ALL {
                println!("{loss}");
            }
            Ok(())
        }
    }
}
