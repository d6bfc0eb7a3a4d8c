use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};

use dropout_risk::config::{self, ForestConfig, DEFAULT_MODEL_PATH};
use dropout_risk::dataset::{self, Dataset, DELIMITER};
use dropout_risk::models::{BatchPrediction, FieldValue, StudentRecord};
use dropout_risk::risk::{self, RiskLevel};
use dropout_risk::{db, logging, report, DropoutPredictor};

#[derive(Parser)]
#[command(name = "dropout-risk")]
#[command(about = "Student dropout risk predictor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the model on a labelled semicolon-delimited export
    Train {
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        out: PathBuf,
        #[arg(long, default_value_t = 100)]
        trees: usize,
        #[arg(long, default_value_t = 10)]
        max_depth: usize,
        #[arg(long, default_value_t = 5)]
        min_samples_split: usize,
        #[arg(long, default_value_t = 2)]
        min_samples_leaf: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Predict dropout risk for one student
    Predict {
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        /// JSON object of field values; defaults to the standard form profile
        #[arg(long)]
        input: Option<PathBuf>,
        /// Override a field, e.g. --set Debtor=1
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, FieldValue)>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Score every row of a semicolon-delimited file
    Batch {
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List the most important features of a trained model
    Importance {
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        #[arg(long, default_value_t = 15)]
        top: usize,
    },
    /// Generate a markdown cohort report
    Report {
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = "Gender")]
        by: String,
        #[arg(long)]
        feature: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Create or upgrade the risk ledger schema
    InitDb,
    /// Score a file and store the results in the risk ledger
    Record {
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        cohort: String,
    },
    /// Show stored predictions, most at risk first
    History {
        #[arg(long)]
        cohort: Option<String>,
        #[arg(long, value_parser = parse_risk_level)]
        risk: Option<RiskLevel>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data,
            out,
            trees,
            max_depth,
            min_samples_split,
            min_samples_leaf,
            seed,
        } => {
            let config = ForestConfig {
                n_trees: trees,
                max_depth,
                min_samples_split,
                min_samples_leaf,
                seed,
            };
            let dataset = Dataset::from_path(&data)
                .with_context(|| format!("failed to read dataset {}", data.display()))?;
            let mut predictor = DropoutPredictor::new();
            predictor.train(&dataset, &config)?;
            predictor.save(&out)?;

            println!("Top 10 most important features:");
            for importance in predictor.feature_importances()?.iter().take(10) {
                println!("- {}: {:.4}", importance.feature, importance.importance);
            }
            println!("Model saved to {}.", out.display());
        }
        Commands::Predict {
            model,
            input,
            set,
            json,
        } => {
            let predictor = load_model(&model)?;
            let mut record = match input {
                Some(path) => read_json_record(&path)?,
                None => StudentRecord::form_defaults(),
            };
            for (name, value) in set {
                record.insert(name, value);
            }

            let result = predictor.predict_single(&record)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!("Predicted status: {}", result.predicted_status);
            println!("Dropout probability: {:.3}", result.dropout_probability);
            println!("Risk level: {}", result.risk_level);
            println!("All probabilities:");
            for (status, probability) in result.probabilities.iter() {
                println!("  {status}: {probability:.3}");
            }
            println!("Recommendations:");
            for recommendation in result.risk_level.recommendations() {
                println!("- {recommendation}");
            }
        }
        Commands::Batch {
            model,
            csv,
            out,
            limit,
        } => {
            let predictor = load_model(&model)?;
            let records = dataset::read_records(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let predictions = predictor.predict_batch(&records);

            if let Some(out) = out {
                let classes = predictor
                    .bundle()
                    .map(|bundle| bundle.target_encoder.classes().to_vec())
                    .unwrap_or_default();
                write_predictions(&out, &classes, &predictions)?;
                println!("Wrote {} predictions to {}.", predictions.len(), out.display());
            }

            println!("Risk mix:");
            for tier in risk::risk_distribution(&predictions) {
                println!("- {}: {}", tier.risk_level, tier.count);
            }
            println!("Highest risk students:");
            for prediction in risk::rank_by_dropout(&predictions).iter().take(limit) {
                println!(
                    "- row {}: {} dropout probability {:.3} ({})",
                    prediction.student_id,
                    prediction.result.predicted_status,
                    prediction.result.dropout_probability,
                    prediction.result.risk_level
                );
            }
        }
        Commands::Importance { model, top } => {
            let predictor = load_model(&model)?;
            for importance in predictor.feature_importances()?.iter().take(top) {
                println!("- {}: {:.4}", importance.feature, importance.importance);
            }
        }
        Commands::Report {
            model,
            data,
            by,
            feature,
            out,
        } => {
            let predictor = load_model(&model)?;
            let dataset = Dataset::from_path(&data)
                .with_context(|| format!("failed to read dataset {}", data.display()))?;
            let predictions = predictor.predict_batch(dataset.records());
            let importances = predictor.feature_importances()?;
            let report = report::build_report(&dataset, &predictions, &importances, &by, feature.as_deref());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Record { model, csv, cohort } => {
            let predictor = load_model(&model)?;
            let trained_at = predictor
                .bundle()
                .map(|bundle| bundle.trained_at)
                .context("model bundle is empty")?;
            let records = dataset::read_records(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let predictions = predictor.predict_batch(&records);

            let pool = connect().await?;
            let source = csv.display().to_string();
            let (run_id, inserted) =
                db::record_run(&pool, &cohort, &source, trained_at, &predictions).await?;
            println!("Recorded {inserted} predictions for {cohort} (run {run_id}).");
        }
        Commands::History {
            cohort,
            risk,
            limit,
        } => {
            let pool = connect().await?;
            let history = db::fetch_history(&pool, cohort.as_deref(), risk, limit).await?;

            if history.is_empty() {
                println!("No recorded predictions match.");
                return Ok(());
            }

            for entry in history.iter() {
                println!(
                    "- {} row {}: {} dropout probability {:.3} ({}) scored {}",
                    entry.cohort,
                    entry.student_id,
                    entry.predicted_status,
                    entry.dropout_probability,
                    entry.risk_level,
                    entry.scored_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = config::database_url()?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn load_model(path: &Path) -> anyhow::Result<DropoutPredictor> {
    DropoutPredictor::load(path)
        .with_context(|| format!("failed to load model from {}; run `train` first", path.display()))
}

fn read_json_record(path: &Path) -> anyhow::Result<StudentRecord> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a JSON object of field values", path.display()))
}

fn parse_assignment(raw: &str) -> Result<(String, FieldValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing field name in {raw:?}"));
    }
    Ok((name.to_string(), FieldValue::parse(value)))
}

fn parse_risk_level(raw: &str) -> Result<RiskLevel, String> {
    RiskLevel::parse(raw).ok_or_else(|| format!("unknown risk level {raw:?}; use high, medium, low or unknown"))
}

fn write_predictions(
    path: &Path,
    classes: &[String],
    predictions: &[BatchPrediction],
) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let mut header = vec![
        "student_id".to_string(),
        "predicted_status".to_string(),
        "dropout_probability".to_string(),
        "risk_level".to_string(),
    ];
    header.extend(classes.iter().map(|class| format!("P({class})")));
    writer.write_record(&header)?;

    for prediction in predictions {
        let mut row = vec![
            prediction.student_id.to_string(),
            prediction.result.predicted_status.clone(),
            format!("{:.6}", prediction.result.dropout_probability),
            prediction.result.risk_level.to_string(),
        ];
        row.extend(classes.iter().map(|class| {
            prediction
                .result
                .probabilities
                .get(class)
                .map(|p| format!("{p:.6}"))
                .unwrap_or_default()
        }));
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}
