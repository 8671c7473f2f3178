#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quizscore::config::{ModelRegistry, ScorerConfig};
use quizscore::gateway::{ProviderGateway, TracingUsageSink};
use quizscore::likelihood::{
    evaluate_models, Aggregation, BatchError, BatchOptions, ModelEvaluation, ModelSpec, Question,
    ScorerOptions, SplitStrategy,
};
use quizscore::prompts::{prompt_by_slug, PROMPTS};

#[derive(Parser)]
#[command(name = "quizscore", version, about = "Score multiple-choice answers by log-likelihood")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one question against every selected model
    Score {
        #[arg(long)]
        question: String,
        #[arg(long)]
        correct: String,
        /// Repeat for each distractor
        #[arg(long = "incorrect")]
        incorrect: Vec<String>,
        /// Write JSON here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        scoring: ScoringArgs,
    },
    /// Score every question in a JSONL file
    Batch {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        scoring: ScoringArgs,
    },
    /// List registered models
    Models {
        #[arg(long)]
        models_config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ScoringArgs {
    /// Overrides QUIZSCORE_API_BASE_URL
    #[arg(long)]
    base_url: Option<String>,
    /// Display names or raw model ids, comma separated (default: all registered)
    #[arg(long, value_delimiter = ',')]
    models: Vec<String>,
    /// JSON registry file: [{"name": ..., "model_id": ...}]
    #[arg(long)]
    models_config: Option<PathBuf>,
    #[arg(long, value_enum)]
    aggregation: Option<AggregationArg>,
    #[arg(long, value_enum, default_value_t = SplitArg::ContextEcho)]
    split: SplitArg,
    /// Endpoint prepends a BOS token (only with --split local)
    #[arg(long)]
    adds_bos: bool,
    #[arg(long, default_value = "assistant_v1")]
    template: String,
    /// Overrides QUIZSCORE_MODEL_TIMEOUT_SECONDS
    #[arg(long)]
    model_timeout_secs: Option<u64>,
    /// Max models evaluated at once
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AggregationArg {
    Mean,
    Sum,
}

impl From<AggregationArg> for Aggregation {
    fn from(arg: AggregationArg) -> Self {
        match arg {
            AggregationArg::Mean => Aggregation::Mean,
            AggregationArg::Sum => Aggregation::Sum,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SplitArg {
    ContextEcho,
    Local,
}

#[derive(Serialize)]
struct BatchLine<'a> {
    question: &'a Question,
    results: Vec<ModelEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Everything a scoring subcommand needs, resolved from env + flags.
struct Run {
    config: ScorerConfig,
    models: Vec<ModelSpec>,
    options: BatchOptions,
}

fn resolve_run(args: &ScoringArgs) -> Result<Run, Box<dyn std::error::Error>> {
    let mut config = ScorerConfig::from_env()?;

    if let Some(url) = &args.base_url {
        config.endpoint.base_url = url.clone();
    }
    if let Some(path) = &args.models_config {
        config.registry = ModelRegistry::from_json_file(path)?;
    }
    if let Some(agg) = args.aggregation {
        config.aggregation = agg.into();
    }
    if let Some(secs) = args.model_timeout_secs {
        if secs == 0 {
            return Err("--model-timeout-secs must be >= 1".into());
        }
        config.model_timeout = Duration::from_secs(secs);
    }

    let template = prompt_by_slug(&args.template).ok_or_else(|| {
        let known: Vec<&str> = PROMPTS.iter().map(|t| t.slug).collect();
        format!("unknown template '{}' (known: {})", args.template, known.join(", "))
    })?;

    let split = match args.split {
        SplitArg::ContextEcho => SplitStrategy::ContextEcho,
        SplitArg::Local => SplitStrategy::LocalTokenizer {
            adds_bos: args.adds_bos,
        },
    };

    let names = (!args.models.is_empty()).then_some(args.models.as_slice());
    let models = config.registry.select(names);

    let options = BatchOptions {
        scorer: ScorerOptions {
            template,
            aggregation: config.aggregation,
            split,
            candidate_concurrency: None,
        },
        model_timeout: config.model_timeout,
        model_concurrency: args.concurrency,
    };

    Ok(Run {
        config,
        models,
        options,
    })
}

/// Cancel in-flight evaluations on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            question,
            correct,
            incorrect,
            out,
            scoring,
        } => {
            let run = resolve_run(&scoring)?;
            let question = Question::new(question, correct, incorrect);
            let gateway = ProviderGateway::connect(
                &run.config.endpoint,
                &run.config.credential,
                Arc::new(TracingUsageSink),
            )?;
            let cancel = cancel_on_ctrl_c();

            let results =
                evaluate_models(&gateway, &run.models, &question, &run.options, Some(&cancel))
                    .await?;

            let json = serde_json::to_string_pretty(&results)?;
            match out {
                Some(path) => {
                    let mut file = File::create(&path)?;
                    writeln!(file, "{json}")?;
                }
                None => println!("{json}"),
            }
        }
        Commands::Batch {
            input,
            out,
            scoring,
        } => {
            let run = resolve_run(&scoring)?;
            let raw = std::fs::read_to_string(&input)?;
            let questions = raw
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(idx, line)| {
                    serde_json::from_str::<Question>(line)
                        .map_err(|e| format!("{}:{}: {e}", input.display(), idx + 1))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let gateway = ProviderGateway::connect(
                &run.config.endpoint,
                &run.config.credential,
                Arc::new(TracingUsageSink),
            )?;
            let cancel = cancel_on_ctrl_c();
            let mut file = BufWriter::new(File::create(&out)?);

            for question in &questions {
                let line = match evaluate_models(
                    &gateway,
                    &run.models,
                    question,
                    &run.options,
                    Some(&cancel),
                )
                .await
                {
                    Ok(results) => BatchLine {
                        question,
                        results,
                        error: None,
                    },
                    Err(BatchError::Cancelled) => {
                        file.flush()?;
                        return Err(BatchError::Cancelled.into());
                    }
                    Err(err) => {
                        warn!(question = %question.text, error = %err, "skipping question");
                        BatchLine {
                            question,
                            results: Vec::new(),
                            error: Some(err.to_string()),
                        }
                    }
                };
                writeln!(file, "{}", serde_json::to_string(&line)?)?;
            }
            file.flush()?;
            info!(
                questions = questions.len(),
                models = run.models.len(),
                out = %out.display(),
                "batch complete"
            );
        }
        Commands::Models { models_config } => {
            let registry = match models_config {
                Some(path) => ModelRegistry::from_json_file(&path)?,
                None => ScorerConfig::from_env()?.registry,
            };
            for entry in registry.entries() {
                println!("{}\t{}", entry.name, entry.model_id);
            }
        }
    }

    Ok(())
}
