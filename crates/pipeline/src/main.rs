use clap::Parser;
use pipeline::error::{EXIT_CONFIG, EXIT_OK};
use pipeline::{Pipeline, PipelineConfig, exit_code};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Convert GraphRAG entity/relationship artifacts into an ontology-aligned RDF graph.
#[derive(Parser, Debug)]
#[command(name = "rdf-pipeline", version, about, long_about = None)]
struct Cli {
    /// Directory holding create_final_entities.json and create_final_relationships.json
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Resume from this step (1-4) using the previous step's checkpoint
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
    from_step: Option<u8>,

    /// Run only this step (1-4)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4), conflicts_with = "from_step")]
    step: Option<u8>,

    /// Mapping confidence threshold in [0, 1]
    #[arg(long)]
    threshold: Option<f64>,

    /// Lowest score still mapped (flagged low-confidence); at most the threshold
    #[arg(long)]
    floor: Option<f64>,

    /// Maximum concurrent model requests
    #[arg(long)]
    workers: Option<usize>,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for checkpoints, cache, report and graph
    #[arg(long)]
    output: Option<PathBuf>,

    /// Ontology JSON file (defaults to the DBpedia ontology, fetched once and cached)
    #[arg(long)]
    ontology: Option<PathBuf>,

    /// Never query the SPARQL endpoint; use the cached or bundled ontology
    #[arg(long)]
    offline_ontology: bool,

    /// Embedding model used to score labels
    #[arg(long)]
    embedding_model: Option<String>,

    /// Score labels lexically only
    #[arg(long)]
    no_embeddings: bool,

    /// Model service endpoint, host:port or URL
    #[arg(long)]
    model_endpoint: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Retries after the first failed model call
    #[arg(long)]
    retries: Option<usize>,

    /// Base retry delay in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Disable the refinement cache
    #[arg(long)]
    no_cache: bool,

    /// Fail instead of degrading when the model service is unavailable
    #[arg(long)]
    no_fallback: bool,

    /// Log format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).init(),
    }
}

fn build_config(cli: &Cli) -> Result<PipelineConfig, pipeline::PipelineError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(artifacts) = &cli.artifacts {
        config.artifacts_path = artifacts.clone();
    }
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Some(ontology) = &cli.ontology {
        config.ontology_path = Some(ontology.clone());
    }
    if let Some(step) = cli.step {
        config.resume_from_stage = step;
        config.stop_after_stage = step;
    }
    if let Some(from) = cli.from_step {
        config.resume_from_stage = from;
        config.stop_after_stage = config.stop_after_stage.max(from);
    }
    if let Some(threshold) = cli.threshold {
        config.mapping.confidence_threshold = threshold;
    }
    if let Some(floor) = cli.floor {
        config.mapping.floor = Some(floor);
    }
    if cli.offline_ontology {
        config.ontology.fetch_remote = false;
    }
    if let Some(model) = &cli.embedding_model {
        config.embedding.model = model.clone();
    }
    if cli.no_embeddings {
        config.embedding.enabled = false;
    }
    if let Some(workers) = cli.workers {
        config.concurrency.refine_worker_cap = workers;
    }
    if let Some(endpoint) = &cli.model_endpoint {
        config.model.endpoint = endpoint.clone();
    }
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if let Some(retries) = cli.retries {
        config.retry.retry_count = retries;
    }
    if let Some(delay) = cli.retry_delay_ms {
        config.retry.retry_base_delay_ms = delay;
        config.retry.retry_max_delay_ms = config.retry.retry_max_delay_ms.max(delay);
    }
    if cli.no_cache {
        config.cache.enabled = false;
    }
    if cli.no_fallback {
        config.model.fallback_enabled = false;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight work is aborted");
            on_signal.cancel();
        }
    });

    let result = match Pipeline::new(config) {
        Ok(pipeline) => pipeline.run(&cancel).await,
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(report) => {
            println!("{}", report.summary_table());
            EXIT_OK
        }
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::error!(error = %message, "Pipeline failed");
            exit_code(&e)
        }
    };
    std::process::exit(code);
}
