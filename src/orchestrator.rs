// WHY: Two strictly ordered passes over one chunking of the input. Detection
// finishes for every chunk before substitution starts, so every chunk is
// redacted against the same final registry.

use futures::future::{self, FutureExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::artifacts::{
    self, promote_partial, render_detailed_report, write_atomic, write_chunk_error_log, write_mapping,
    write_structure_log, ArtifactPaths, FailedChunk, PartialOutput,
};
use crate::chunker::{Chunk, Chunker};
use crate::config::RedactConfig;
use crate::detector::{Detector, RawDetection};
use crate::error::{DetectorError, RedactError, Result};
use crate::progress::{ProcessingState, ProgressStore, SourceFingerprint};
use crate::reader::{DocumentReader, ReaderConfig};
use crate::registry::TermRegistry;
use crate::substitution::{ReplacementStatistics, SubstitutionEngine};

/// Characters of chunk text shown in the failed-chunk summary
const FAILED_PREVIEW_CHARS: usize = 100;

/// What to process and how to treat earlier progress
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub input: PathBuf,
    /// Defaults to `<input dir>/pseudonymized_output`
    pub output_dir: Option<PathBuf>,
    /// Next chunk to detect, overriding the checkpoint
    pub resume_from: Option<usize>,
    /// Discard any checkpoint and start over
    pub fresh: bool,
    /// Mapping to seed the registry from; defaults to the mapping artifact
    /// left by an earlier run in the output directory
    pub seed_mapping: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn resume_from(mut self, chunk: usize) -> Self {
        self.resume_from = Some(chunk);
        self
    }

    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn seed_mapping(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_mapping = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Detection,
    Substitution,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Detection => write!(f, "detection"),
            Phase::Substitution => write!(f, "substitution"),
        }
    }
}

/// Aggregate figures for a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub paths: ArtifactPaths,
    pub total_chunks: usize,
    pub failed_chunks: Vec<FailedChunk>,
    pub terms_registered: usize,
    pub terms_discovered: usize,
    pub statistics: ReplacementStatistics,
}

impl RunSummary {
    pub fn total_replacements(&self) -> u64 {
        self.statistics.total_replacements()
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// A checkpoint marked the document completed; nothing was done
    AlreadyCompleted { paths: ArtifactPaths },
    /// Shutdown was requested; progress up to `resume_chunk` is checkpointed
    Interrupted { phase: Phase, resume_chunk: usize },
}

/// Runs detection and substitution for one document with an injected detector
pub struct Orchestrator<D> {
    config: RedactConfig,
    detector: D,
}

impl<D: Detector> Orchestrator<D> {
    pub fn new(config: RedactConfig, detector: D) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, detector })
    }

    pub fn config(&self) -> &RedactConfig {
        &self.config
    }

    /// Run to completion with no shutdown signal
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        self.run_until(request, future::pending()).await
    }

    /// Run until done or until `shutdown` resolves. Shutdown is checked between
    /// chunks and raced against every detector call.
    pub async fn run_until<S>(&self, request: &RunRequest, shutdown: S) -> Result<RunOutcome>
    where
        S: Future<Output = ()>,
    {
        let shutdown = shutdown.fuse();
        tokio::pin!(shutdown);

        let paths = ArtifactPaths::for_input(&request.input, request.output_dir.as_deref());
        paths.ensure_dirs().await?;
        let store = ProgressStore::new(paths.progress());
        if request.fresh {
            store.clear().await?;
        }

        let document = DocumentReader::new(ReaderConfig {
            use_mmap: self.config.use_mmap,
            ..ReaderConfig::default()
        })
        .read(&request.input)
        .await?;
        let text = document.as_str();

        let chunker = Chunker::new(self.config.chunk_rules())?;
        let chunks: Vec<Chunk<'_>> = chunker.chunks(text).collect();
        let fingerprint = SourceFingerprint {
            input_chars: document.stats().chars_read,
            input_bytes: document.stats().bytes_read,
            content_digest: SourceFingerprint::content_digest(text),
            max_chars: self.config.chunking.max_chars,
            lookback_chars: self.config.chunking.lookback_chars,
            total_chunks: chunks.len(),
        };
        info!(
            input = %request.input.display(),
            chunks = chunks.len(),
            max_chars = fingerprint.max_chars,
            "Chunked input document"
        );

        let mut registry = self.config.new_registry();
        let mut state = match store.load().await? {
            Some(checkpoint) => {
                checkpoint.state.fingerprint.ensure_matches(&fingerprint)?;
                if checkpoint.state.is_completed() {
                    if request.resume_from.is_some() {
                        warn!("Document already completed; ignoring resume index, use a fresh start to reprocess");
                    }
                    info!(output = %paths.redacted().display(), "Document already completed, nothing to do");
                    return Ok(RunOutcome::AlreadyCompleted { paths });
                }
                registry.load(checkpoint.registry);
                checkpoint.state
            }
            None => {
                self.seed_registry(&mut registry, request, &paths).await?;
                ProcessingState::new(fingerprint)
            }
        };

        if let Some(requested) = request.resume_from {
            if requested >= chunks.len() {
                return Err(RedactError::ResumeOutOfRange {
                    requested,
                    chunks: chunks.len(),
                });
            }
            info!(resume_from = requested, "Overriding checkpoint resume position");
            state.skip_detection_to(requested);
            state.restart_substitution();
        }

        if let Some(resume_chunk) = self
            .detection_phase(&chunks, &mut state, &mut registry, &store, &paths, shutdown.as_mut())
            .await?
        {
            return Ok(RunOutcome::Interrupted {
                phase: Phase::Detection,
                resume_chunk,
            });
        }

        if let Some(resume_chunk) = self
            .substitution_phase(&chunks, &mut state, &registry, &store, &paths, shutdown.as_mut())
            .await?
        {
            return Ok(RunOutcome::Interrupted {
                phase: Phase::Substitution,
                resume_chunk,
            });
        }

        let summary = self.finalize(&chunks, &mut state, &registry, &store, paths).await?;
        Ok(RunOutcome::Completed(summary))
    }

    async fn seed_registry(&self, registry: &mut TermRegistry, request: &RunRequest, paths: &ArtifactPaths) -> Result<()> {
        let source = request.seed_mapping.clone().unwrap_or_else(|| paths.mapping());
        match artifacts::read_mapping(&source).await? {
            Some(mapping) => {
                let seeded = registry.seed_from_mapping(&mapping);
                info!(mapping = %source.display(), seeded, "Seeded registry from existing mapping");
            }
            None if request.seed_mapping.is_some() => {
                return Err(RedactError::Input {
                    path: source,
                    message: "mapping file not found".into(),
                });
            }
            None => debug!("No existing mapping, starting with an empty registry"),
        }
        Ok(())
    }

    /// Returns the chunk to resume from when interrupted
    async fn detection_phase<S: Future<Output = ()>>(
        &self,
        chunks: &[Chunk<'_>],
        state: &mut ProcessingState,
        registry: &mut TermRegistry,
        store: &ProgressStore,
        paths: &ArtifactPaths,
        mut shutdown: Pin<&mut future::Fuse<S>>,
    ) -> Result<Option<usize>> {
        let start = state.next_detection_chunk().min(chunks.len());
        if start == chunks.len() {
            return Ok(None);
        }
        info!(start, total = chunks.len(), "Starting detection phase");
        let progress = self.progress_bar(Phase::Detection, chunks.len(), start);
        let timeout = self.config.detector_timeout();
        let mut since_checkpoint = 0;

        for chunk in &chunks[start..] {
            if shutdown.as_mut().now_or_never().is_some() {
                return self.interrupt(Phase::Detection, chunk.index, state, registry, store, &progress).await;
            }

            let detection = tokio::select! {
                biased;
                _ = shutdown.as_mut() => None,
                result = self.detect_with_retry(chunk.text, timeout) => Some(result),
            };
            let Some(detection) = detection else {
                return self.interrupt(Phase::Detection, chunk.index, state, registry, store, &progress).await;
            };

            self.record_detection(chunk, detection, state, registry, paths).await?;
            state.complete_detection(chunk.index);
            progress.inc(1);

            since_checkpoint += 1;
            if since_checkpoint >= self.config.checkpoint_interval || chunk.index + 1 == chunks.len() {
                store.checkpoint(state, registry).await?;
                since_checkpoint = 0;
            }
        }

        progress.finish_and_clear();
        info!(
            registered = registry.len(),
            failed = state.failed_chunks.len(),
            "Detection phase complete"
        );
        Ok(None)
    }

    async fn detect_with_retry(&self, text: &str, timeout: Duration) -> std::result::Result<RawDetection, DetectorError> {
        self.config.retry.run(timeout, || self.detector.detect(text)).await
    }

    async fn record_detection(
        &self,
        chunk: &Chunk<'_>,
        detection: std::result::Result<RawDetection, DetectorError>,
        state: &mut ProcessingState,
        registry: &mut TermRegistry,
        paths: &ArtifactPaths,
    ) -> Result<()> {
        let normalized = detection.and_then(|raw| self.config.schema.normalize(&raw).map(|terms| (raw, terms)));
        let (raw, detected) = match normalized {
            Ok(pair) => pair,
            Err(e) => {
                warn!(chunk = chunk.index, error = %e, "Detection failed, continuing with next chunk");
                let log = write_chunk_error_log(paths, chunk.index, &e.to_string(), e.raw_response(), chunk.text).await?;
                debug!(log = %log.display(), "Wrote chunk error log");
                state.record_failure(chunk.index, e.to_string());
                return Ok(());
            }
        };

        if detected.has_issues() {
            warn!(chunk = chunk.index, issues = detected.issues.len(), "Detector response deviates from schema");
            let raw_text = raw.raw.clone().unwrap_or_else(|| raw.payload.to_string());
            write_structure_log(paths, chunk.index, &detected.issues, &raw_text).await?;
        }

        let before = registry.len();
        for term in detected.terms {
            if !registry.accepts(&term) {
                debug!(chunk = chunk.index, term = %term, "Skipping ignored term");
                continue;
            }
            state.record_discovered(&term);
            registry.assign(term);
        }
        state.clear_failure(chunk.index);
        debug!(chunk = chunk.index, new_terms = registry.len() - before, "Chunk detected");
        Ok(())
    }

    async fn substitution_phase<S: Future<Output = ()>>(
        &self,
        chunks: &[Chunk<'_>],
        state: &mut ProcessingState,
        registry: &TermRegistry,
        store: &ProgressStore,
        paths: &ArtifactPaths,
        mut shutdown: Pin<&mut future::Fuse<S>>,
    ) -> Result<Option<usize>> {
        let start = state.next_substitution_chunk().min(chunks.len());
        if start == chunks.len() && !chunks.is_empty() {
            return Ok(None);
        }

        let mut partial = PartialOutput::open(&paths.partial_redacted(), state.redacted_bytes).await?;
        let engine = SubstitutionEngine::new(registry);
        info!(start, total = chunks.len(), terms = engine.len(), "Starting substitution phase");
        let progress = self.progress_bar(Phase::Substitution, chunks.len(), start);
        let mut since_checkpoint = 0;

        for chunk in &chunks[start..] {
            if shutdown.as_mut().now_or_never().is_some() {
                partial.sync().await?;
                return self.interrupt(Phase::Substitution, chunk.index, state, registry, store, &progress).await;
            }

            let result = engine.substitute(chunk.text)?;
            partial.append(&result.text).await?;
            state.complete_substitution(chunk.index, &result.counts, partial.len());
            progress.inc(1);

            since_checkpoint += 1;
            if since_checkpoint >= self.config.checkpoint_interval || chunk.index + 1 == chunks.len() {
                partial.sync().await?;
                store.checkpoint(state, registry).await?;
                since_checkpoint = 0;
            }
        }

        partial.sync().await?;
        progress.finish_and_clear();
        info!(replacements = state.occurrence_counts.total(), "Substitution phase complete");
        Ok(None)
    }

    async fn interrupt(
        &self,
        phase: Phase,
        resume_chunk: usize,
        state: &ProcessingState,
        registry: &TermRegistry,
        store: &ProgressStore,
        progress: &ProgressBar,
    ) -> Result<Option<usize>> {
        progress.abandon();
        store.checkpoint(state, registry).await?;
        warn!(%phase, resume_chunk, "Interrupted, progress checkpointed");
        Ok(Some(resume_chunk))
    }

    async fn finalize(
        &self,
        chunks: &[Chunk<'_>],
        state: &mut ProcessingState,
        registry: &TermRegistry,
        store: &ProgressStore,
        paths: ArtifactPaths,
    ) -> Result<RunSummary> {
        let statistics = ReplacementStatistics::collect(registry, &state.occurrence_counts);

        write_mapping(&paths.mapping(), &registry.to_mapping()).await?;
        write_atomic(&paths.stats(), statistics.render_report()).await?;
        write_atomic(&paths.detailed_report(), render_detailed_report(registry)).await?;
        if !state.failed_chunks.is_empty() {
            let preview = |index: usize| {
                let text = chunks.get(index).map_or("", |c| c.text);
                let head: String = text.chars().take(FAILED_PREVIEW_CHARS).collect();
                format!("{head}...")
            };
            artifacts::write_failed_chunks_summary(&paths, &state.failed_chunks, preview).await?;
            for failed in &state.failed_chunks {
                warn!(chunk = failed.index, error = %failed.error, "Chunk failed detection");
            }
        }
        promote_partial(&paths).await?;

        state.mark_completed();
        store.checkpoint(state, registry).await?;

        let summary = RunSummary {
            total_chunks: chunks.len(),
            failed_chunks: state.failed_chunks.clone(),
            terms_registered: registry.len(),
            terms_discovered: state.discovered_terms.len(),
            statistics,
            paths,
        };
        info!(
            output = %summary.paths.redacted().display(),
            chunks = summary.total_chunks,
            failed_chunks = summary.failed_chunks.len(),
            terms = summary.terms_registered,
            replacements = summary.total_replacements(),
            not_found = summary.statistics.not_found().count(),
            "Pseudonymization complete"
        );
        Ok(summary)
    }

    fn progress_bar(&self, phase: Phase, total: usize, position: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message(phase.to_string());
        pb.set_position(position as u64);
        pb
    }
}

/// Convenience wrapper: pseudonymize `input` into the default output directory
pub async fn pseudonymize_file<D: Detector>(config: RedactConfig, detector: D, input: &Path) -> Result<RunOutcome> {
    Orchestrator::new(config, detector)?.run(&RunRequest::new(input)).await
}
