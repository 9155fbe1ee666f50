// WHY: Durable record of how far each phase got, so an interrupted run resumes
// without re-querying the detector or re-minting pseudonyms

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::artifacts::{write_atomic, FailedChunk};
use crate::error::{RedactError, Result};
use crate::registry::{RegistrySnapshot, TermRegistry};
use crate::substitution::TermCounts;
use crate::term::Term;

pub const CHECKPOINT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
}

/// Identifies the input and chunking a checkpoint belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub input_chars: u64,
    pub input_bytes: u64,
    /// blake3 hex digest of the input text
    pub content_digest: String,
    pub max_chars: usize,
    pub lookback_chars: usize,
    pub total_chunks: usize,
}

impl SourceFingerprint {
    pub fn content_digest(text: &str) -> String {
        blake3::hash(text.as_bytes()).to_hex().to_string()
    }

    /// Fail when a checkpoint was written for different input or chunking
    pub fn ensure_matches(&self, current: &SourceFingerprint) -> Result<()> {
        if self == current {
            return Ok(());
        }
        if self.content_digest != current.content_digest
            && self.input_chars == current.input_chars
            && self.input_bytes == current.input_bytes
        {
            return Err(RedactError::CheckpointMismatch(format!(
                "input content changed since the checkpoint (digest {} -> {})",
                self.content_digest, current.content_digest
            )));
        }
        Err(RedactError::CheckpointMismatch(format!(
            "checkpoint covers {} chars in {} chunks (max {} chars, lookback {}), \
             input now has {} chars in {} chunks (max {} chars, lookback {})",
            self.input_chars,
            self.total_chunks,
            self.max_chars,
            self.lookback_chars,
            current.input_chars,
            current.total_chunks,
            current.max_chars,
            current.lookback_chars
        )))
    }
}

/// Insertion-ordered set of terms, stored on disk as a plain list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Term>", into = "Vec<Term>")]
pub struct DiscoveredTerms {
    order: Vec<Term>,
    seen: HashSet<Term>,
}

impl DiscoveredTerms {
    /// Returns false when the term was already recorded
    pub fn insert(&mut self, term: &Term) -> bool {
        if self.seen.contains(term) {
            return false;
        }
        self.seen.insert(term.clone());
        self.order.push(term.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Term> {
        self.order.iter()
    }
}

impl PartialEq for DiscoveredTerms {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for DiscoveredTerms {}

impl From<Vec<Term>> for DiscoveredTerms {
    fn from(terms: Vec<Term>) -> Self {
        let mut discovered = Self::default();
        for term in &terms {
            discovered.insert(term);
        }
        discovered
    }
}

impl From<DiscoveredTerms> for Vec<Term> {
    fn from(discovered: DiscoveredTerms) -> Self {
        discovered.order
    }
}

/// Per-document progress through both phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingState {
    pub fingerprint: SourceFingerprint,
    /// Highest chunk index whose detection is done (failed chunks count as done)
    pub last_detection_chunk: Option<usize>,
    pub last_substitution_chunk: Option<usize>,
    /// Distinct accepted terms in the order the detector first reported them
    pub discovered_terms: DiscoveredTerms,
    pub failed_chunks: Vec<FailedChunk>,
    pub occurrence_counts: TermCounts,
    /// Length of the partial redacted output that belongs to this state
    pub redacted_bytes: u64,
    pub status: RunStatus,
    /// Unix seconds of the last update
    pub last_updated: u64,
}

impl ProcessingState {
    pub fn new(fingerprint: SourceFingerprint) -> Self {
        Self {
            fingerprint,
            last_detection_chunk: None,
            last_substitution_chunk: None,
            discovered_terms: DiscoveredTerms::default(),
            failed_chunks: Vec::new(),
            occurrence_counts: TermCounts::default(),
            redacted_bytes: 0,
            status: RunStatus::InProgress,
            last_updated: now_secs(),
        }
    }

    pub fn next_detection_chunk(&self) -> usize {
        self.last_detection_chunk.map_or(0, |i| i + 1)
    }

    pub fn next_substitution_chunk(&self) -> usize {
        self.last_substitution_chunk.map_or(0, |i| i + 1)
    }

    pub fn detection_complete(&self) -> bool {
        self.next_detection_chunk() >= self.fingerprint.total_chunks
    }

    pub fn substitution_complete(&self) -> bool {
        self.next_substitution_chunk() >= self.fingerprint.total_chunks
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn complete_detection(&mut self, index: usize) {
        self.last_detection_chunk = Some(index);
        self.touch();
    }

    pub fn complete_substitution(&mut self, index: usize, counts: &TermCounts, redacted_bytes: u64) {
        self.last_substitution_chunk = Some(index);
        self.occurrence_counts.merge(counts);
        self.redacted_bytes = redacted_bytes;
        self.touch();
    }

    pub fn record_failure(&mut self, index: usize, error: impl Into<String>) {
        self.failed_chunks.retain(|f| f.index != index);
        self.failed_chunks.push(FailedChunk {
            index,
            error: error.into(),
        });
    }

    pub fn clear_failure(&mut self, index: usize) {
        self.failed_chunks.retain(|f| f.index != index);
    }

    pub fn record_discovered(&mut self, term: &Term) {
        self.discovered_terms.insert(term);
    }

    /// Treat every chunk before `index` as detected
    pub fn skip_detection_to(&mut self, index: usize) {
        self.last_detection_chunk = index.checked_sub(1);
        self.touch();
    }

    /// Drop substitution progress; needed whenever the registry may change again
    pub fn restart_substitution(&mut self) {
        self.last_substitution_chunk = None;
        self.occurrence_counts = TermCounts::default();
        self.redacted_bytes = 0;
        self.status = RunStatus::InProgress;
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_updated = now_secs();
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Everything needed to resume: progress plus the registry at that point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub state: ProcessingState,
    pub registry: RegistrySnapshot,
}

/// Checkpoint file for one document
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last good checkpoint, or `None` when there is none yet.
    /// A file that exists but cannot be parsed is an error, never ignored.
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RedactError::CorruptCheckpoint {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        };

        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| RedactError::CorruptCheckpoint {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(RedactError::CorruptCheckpoint {
                path: self.path.clone(),
                message: format!(
                    "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                    checkpoint.version
                ),
            });
        }

        info!(
            path = %self.path.display(),
            last_detection_chunk = ?checkpoint.state.last_detection_chunk,
            last_substitution_chunk = ?checkpoint.state.last_substitution_chunk,
            status = ?checkpoint.state.status,
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    /// Persist state and registry together via atomic replace
    pub async fn checkpoint(&self, state: &ProcessingState, registry: &TermRegistry) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            state: state.clone(),
            registry: registry.snapshot(),
        };
        let json = serde_json::to_string_pretty(&checkpoint)?;
        write_atomic(&self.path, json).await?;
        debug!(
            path = %self.path.display(),
            last_detection_chunk = ?state.last_detection_chunk,
            last_substitution_chunk = ?state.last_substitution_chunk,
            "Checkpoint written"
        );
        Ok(())
    }

    /// Remove the checkpoint for a fresh start
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Cleared checkpoint");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RedactError::persistence(&self.path, e)),
        }
    }
}
