use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pseudonymize::artifacts::{read_mapping, ArtifactPaths};
use pseudonymize::{Detector, KnownTermsDetector, OllamaDetector, Orchestrator, RedactConfig, RunOutcome, RunRequest};

/// Exit status for a run stopped by Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "pseudonymize")]
#[command(about = "Consistent, resumable pseudonymization of personal information in long texts")]
#[command(version)]
struct Args {
    /// UTF-8 text document to pseudonymize
    input: PathBuf,

    /// Output directory (default: <input dir>/pseudonymized_output)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Chunk index to resume detection from, overriding the checkpoint
    #[arg(long)]
    resume_from: Option<usize>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mapping file from an earlier run to seed pseudonyms from
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// Only redact terms already in the mapping; no detector service is called
    #[arg(long)]
    offline: bool,

    /// Detector model name
    #[arg(long)]
    model: Option<String>,

    /// Detector base URL, e.g. http://localhost:11434
    #[arg(long)]
    host: Option<String>,

    /// Maximum characters per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Discard any checkpoint and start over
    #[arg(long)]
    fresh: bool,

    /// Use memory-mapped I/O instead of async buffered
    #[arg(long)]
    use_mmap: bool,

    /// Suppress console progress bars
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn load_config(&self) -> Result<RedactConfig> {
        let mut config = match &self.config {
            Some(path) => RedactConfig::load(path)?,
            None => RedactConfig::default(),
        };
        if let Some(model) = &self.model {
            config.ollama.model = model.clone();
        }
        if let Some(host) = &self.host {
            config.ollama.base_url = host.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunking.max_chars = chunk_size;
        }
        config.use_mmap |= self.use_mmap;
        config.show_progress &= !self.no_progress;
        config.validate()?;
        Ok(config)
    }
}

async fn build_detector(args: &Args, config: &RedactConfig) -> Result<Box<dyn Detector>> {
    if !args.offline {
        let detector = OllamaDetector::new(config.ollama.clone(), config.schema.clone())?;
        info!(model = %config.ollama.model, host = %config.ollama.base_url, "Using Ollama detector");
        return Ok(Box::new(detector));
    }

    let mapping_path = match &args.mapping {
        Some(path) => path.clone(),
        None => ArtifactPaths::for_input(&args.input, args.output_dir.as_deref()).mapping(),
    };
    let mapping = read_mapping(&mapping_path)
        .await?
        .with_context(|| format!("offline mode needs a mapping file, none at {}", mapping_path.display()))?;
    let detector = KnownTermsDetector::from_mapping(&mapping).with_schema(config.schema.clone());
    info!(terms = detector.len(), mapping = %mapping_path.display(), "Using offline detector");
    Ok(Box::new(detector))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Cannot listen for Ctrl-C; interruption is disabled");
        futures::future::pending::<()>().await;
    }
    warn!("Ctrl-C received, finishing current chunk");
}

#[tokio::main]
async fn main() -> Result<()> {
    // WHY: structured JSON logging enables observability and debugging in production
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let args = Args::parse();
    info!(?args, "Parsed CLI arguments");

    // WHY: validate input early to fail fast with clear error
    if !args.input.is_file() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    let config = args.load_config()?;
    let detector = build_detector(&args, &config).await?;

    let mut request = RunRequest::new(&args.input).fresh(args.fresh);
    request.output_dir = args.output_dir.clone();
    request.resume_from = args.resume_from;
    request.seed_mapping = args.mapping.clone();

    let orchestrator = Orchestrator::new(config, detector)?;
    let outcome = orchestrator
        .run_until(&request, shutdown_signal())
        .await
        .with_context(|| format!("Failed to pseudonymize {}", args.input.display()))?;

    match outcome {
        RunOutcome::Completed(summary) => {
            println!("pseudonymize v{} - complete", env!("CARGO_PKG_VERSION"));
            println!("  Chunks processed: {}", summary.total_chunks);
            println!("  Terms registered: {}", summary.terms_registered);
            println!("  Replacements made: {}", summary.total_replacements());
            if !summary.failed_chunks.is_empty() {
                println!(
                    "  Failed chunks: {} (see {})",
                    summary.failed_chunks.len(),
                    summary.paths.failed_chunks_summary().display()
                );
            }
            println!("  Redacted text: {}", summary.paths.redacted().display());
            println!("  Mapping: {}", summary.paths.mapping().display());
            println!("  Statistics: {}", summary.paths.stats().display());
        }
        RunOutcome::AlreadyCompleted { paths } => {
            println!("Already completed: {}", paths.redacted().display());
            println!("Use --fresh to process the document again");
        }
        RunOutcome::Interrupted { phase, resume_chunk } => {
            println!("Interrupted during {phase} at chunk {resume_chunk}; progress saved");
            println!("Run the same command again to resume");
            std::process::exit(EXIT_INTERRUPTED);
        }
    }

    Ok(())
}
