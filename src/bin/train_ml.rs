use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustrade_ml::application::ml::MachineLearningModel;
use rustrade_ml::config::TrainingConfig;
use rustrade_ml::domain::ml::{FeatureTable, ModelDetails, ModelKind};
use rustrade_ml::infrastructure::read_feature_table;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train and query price direction models", long_about = None)]
struct Cli {
    /// TOML training config. ML_* environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on a feature table CSV and save it
    Train {
        /// Feature table CSV (date column first, must include `close`)
        #[arg(long, default_value = "data/ml/features.csv")]
        input: PathBuf,

        /// Model variant: dt or mlp
        #[arg(long, default_value = "dt")]
        model: ModelKind,

        /// Path to output model file
        #[arg(long, default_value = "data/ml/model.json")]
        output: PathBuf,

        /// Rows per window (overrides the config)
        #[arg(long)]
        window_size: Option<usize>,

        /// Worker threads for MLP training. Results do not depend on it.
        #[arg(long)]
        pool_size: Option<usize>,

        /// Log training progress at info level
        #[arg(long)]
        verbose: bool,
    },

    /// Predict the direction following the last window of a feature table
    Predict {
        #[arg(long, default_value = "data/ml/model.json")]
        model_file: PathBuf,

        #[arg(long, default_value = "data/ml/features.csv")]
        input: PathBuf,
    },

    /// Print the details of a saved model
    Details {
        #[arg(long, default_value = "data/ml/model.json")]
        model_file: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<TrainingConfig> {
    match path {
        Some(path) => TrainingConfig::from_toml_file(path),
        None => TrainingConfig::from_env(),
    }
}

fn print_details(details: &ModelDetails) -> Result<()> {
    let json = serde_json::to_string_pretty(details).context("Failed to serialize details")?;
    println!("{}", json);
    Ok(())
}

fn predict_latest(model: &MachineLearningModel, table: &FeatureTable) -> Result<()> {
    let window = model.window_size();
    if table.len() < window {
        anyhow::bail!(
            "Feature table has {} rows, model needs the last {}",
            table.len(),
            window
        );
    }
    let latest = table.tail(window);
    let direction = model.predict(&latest)?;
    let (name, code) = direction.as_pair();

    let as_of = latest.index().last().map(|ts| ts.to_string()).unwrap_or_default();
    println!("Prediction after {}: {} ({})", as_of, name, code);
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            input,
            model,
            output,
            window_size,
            pool_size,
            verbose,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(window_size) = window_size {
                config.window_size = window_size;
            }

            let table = read_feature_table(&input)?;
            info!("Training {} model on {:?}", model, input);

            let mut ml_model = MachineLearningModel::with_config(model, config);
            ml_model.train_model(&table, pool_size, verbose)?;
            ml_model.save_model(&output)?;

            print_details(&ml_model.model_details()?)?;
            predict_latest(&ml_model, &table)?;
        }
        Command::Predict { model_file, input } => {
            let ml_model = MachineLearningModel::from_file(&model_file)?;
            let table = read_feature_table(&input)?;
            predict_latest(&ml_model, &table)?;
        }
        Command::Details { model_file } => {
            let ml_model = MachineLearningModel::from_file(&model_file)?;
            print_details(&ml_model.model_details()?)?;
        }
    }

    Ok(())
}
