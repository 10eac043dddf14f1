use async_trait::async_trait;
use clap::{Parser, Subcommand};
use cobolgraph_core::{
    parse_gcs_uri, InlineFetcher, LocalFileFetcher, PipelineConfig, PipelineError, Result,
    SourceBlob, SourceFetcher,
};
use cobolgraph_llm::{AnthropicConfig, AnthropicProvider, LLMProvider};
use cobolgraph_pipeline::{render_sentinel_payload, Orchestrator};
use cobolgraph_store::{GraphWriter, SurrealDbConfig, SurrealDbWriter};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Validates a `gs://bucket/object` reference and reports that fetching it
/// is outside this build's scope — the network fetch against Google Cloud
/// Storage is the documented external-fetcher seam, not something this
/// binary implements.
struct UnimplementedGcsFetcher;

#[async_trait]
impl SourceFetcher for UnimplementedGcsFetcher {
    async fn fetch(&self, location: &str) -> Result<SourceBlob> {
        let (bucket, object) = parse_gcs_uri(location)?;
        Err(PipelineError::InputMalformed(format!(
            "gs://{bucket}/{object} is a well-formed reference but fetching from Google Cloud Storage is not implemented in this build"
        )))
    }
}

#[derive(Parser)]
#[command(name = "cobolgraph")]
#[command(about = "Reverse-engineers COBOL sources into a queryable property graph", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file layered under environment defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single source program and commit its graph
    Analyze {
        /// A local file path or a gs://bucket/object reference
        source: String,

        /// SurrealDB connection string (defaults to an in-process instance)
        #[arg(long, default_value = "mem://")]
        store_connection: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "cobolgraph=debug"
    } else {
        "cobolgraph=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;

    let Commands::Analyze {
        source,
        store_connection,
    } = cli.command;

    let fetcher: Arc<dyn SourceFetcher> = select_fetcher(&source);
    let provider: Arc<dyn LLMProvider> = Arc::new(AnthropicProvider::new(AnthropicConfig::from_env(
        config.model_name.clone(),
    ))?);
    let writer: Arc<dyn GraphWriter> = Arc::new(
        SurrealDbWriter::new(SurrealDbConfig {
            connection: store_connection,
            ..SurrealDbConfig::default()
        })
        .await?,
    );

    let orchestrator = Orchestrator::new(fetcher, provider, writer, config);
    let cancel = CancellationToken::new();

    let (artifact, mut progress) = orchestrator.run(&source, cancel).await?;

    while let Ok(event) = progress.try_recv() {
        eprintln!("{} {}", format!("[{}]", event.stage).cyan(), event.message);
    }

    eprintln!(
        "{} program {} committed: {} lines, {} structures, {} entities, {} control-flow edges, {} references",
        "summary:".green().bold(),
        artifact.program.program_id,
        artifact.source_lines.len(),
        artifact.structures.len(),
        artifact.entities.len(),
        artifact.control_flow.len(),
        artifact.line_references.len(),
    );

    println!("{}", render_sentinel_payload(&artifact)?);

    Ok(())
}

/// Inline blobs are passed as raw text on the command line by tests and
/// scripts; anything else is treated as a local filesystem path. A `gs://`
/// URI is only validated here (per the fetcher's documented scope) — no
/// network fetch is performed.
fn select_fetcher(source: &str) -> Arc<dyn SourceFetcher> {
    if source.starts_with("gs://") {
        return Arc::new(UnimplementedGcsFetcher);
    }
    if PathBuf::from(source).exists() {
        Arc::new(LocalFileFetcher)
    } else {
        Arc::new(InlineFetcher)
    }
}
