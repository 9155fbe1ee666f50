// WHY: Every file a run produces is named and written here so the orchestrator
// deals only in typed values. Final artifacts go through write_atomic; a crash
// never leaves a half-written mapping or checkpoint behind.

use std::fmt::Write as _;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::detector::StructuralIssue;
use crate::error::{RedactError, Result};
use crate::registry::{AssignmentOrigin, PseudonymMapping, TermRegistry};

/// Directory created next to the input when no output directory is given
pub const DEFAULT_OUTPUT_DIR: &str = "pseudonymized_output";
pub const ERROR_LOG_DIR: &str = "error_logs";
pub const FAILED_CHUNKS_SUMMARY: &str = "failed_chunks_summary.txt";

/// Output file layout for one input document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    output_dir: PathBuf,
    stem: String,
}

impl ArtifactPaths {
    pub fn new(output_dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            stem: stem.into(),
        }
    }

    /// Layout for `input`, defaulting to `<input dir>/pseudonymized_output`
    pub fn for_input(input: &Path, output_dir: Option<&Path>) -> Self {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let output_dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => input
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_OUTPUT_DIR),
        };
        Self::new(output_dir, stem)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    fn named(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}{suffix}", self.stem))
    }

    pub fn redacted(&self) -> PathBuf {
        self.named("_pseudonymized.txt")
    }

    pub fn partial_redacted(&self) -> PathBuf {
        self.named("_pseudonymized.partial.txt")
    }

    pub fn mapping(&self) -> PathBuf {
        self.named("_mapping.json")
    }

    pub fn progress(&self) -> PathBuf {
        self.named("_progress.json")
    }

    pub fn stats(&self) -> PathBuf {
        self.named("_stats.txt")
    }

    pub fn detailed_report(&self) -> PathBuf {
        self.named("_detailed_report.txt")
    }

    pub fn error_log_dir(&self) -> PathBuf {
        self.output_dir.join(ERROR_LOG_DIR)
    }

    pub fn failed_chunks_summary(&self) -> PathBuf {
        self.error_log_dir().join(FAILED_CHUNKS_SUMMARY)
    }

    /// Chunk numbers in log file names are 1-based
    pub fn chunk_error_log(&self, chunk_index: usize) -> PathBuf {
        self.error_log_dir().join(format!("chunk_error_{}.txt", chunk_index + 1))
    }

    pub fn structure_log(&self, chunk_index: usize) -> PathBuf {
        self.error_log_dir().join(format!("json_structure_error_{}.txt", chunk_index + 1))
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.error_log_dir())
            .await
            .map_err(|e| RedactError::persistence(self.error_log_dir(), e))
    }
}

/// Write `contents` to a temp file in the destination directory, fsync it,
/// then rename over `path`. The previous file stays intact on failure.
pub async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RedactError::Config(format!("not a file path: {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(contents.as_ref()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(RedactError::persistence(path, e));
    }
    debug!(path = %path.display(), "Wrote file atomically");
    Ok(())
}

pub async fn write_mapping(path: &Path, mapping: &PseudonymMapping) -> Result<()> {
    let json = serde_json::to_string_pretty(mapping)?;
    write_atomic(path, json).await
}

/// Load a mapping file written by an earlier run. A missing file is `None`.
pub async fn read_mapping(path: &Path) -> Result<Option<PseudonymMapping>> {
    match fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| RedactError::Input {
            path: path.to_path_buf(),
            message: format!("invalid mapping file: {e}"),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RedactError::Input {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// Substitution output of an unfinished run. Never read as a final artifact;
/// only `promote_partial` turns it into one.
pub struct PartialOutput {
    path: PathBuf,
    file: fs::File,
    len: u64,
}

impl PartialOutput {
    /// Open for appending after exactly `committed_len` bytes. Anything past
    /// that point was written after the last checkpoint and is discarded.
    pub async fn open(path: &Path, committed_len: u64) -> Result<Self> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|e| RedactError::persistence(path, e))?;
        let existing = file
            .metadata()
            .await
            .map_err(|e| RedactError::persistence(path, e))?
            .len();
        if existing < committed_len {
            return Err(RedactError::CheckpointMismatch(format!(
                "partial output {} has {existing} bytes but the checkpoint expects {committed_len}",
                path.display()
            )));
        }
        file.set_len(committed_len)
            .await
            .map_err(|e| RedactError::persistence(path, e))?;
        file.seek(SeekFrom::Start(committed_len))
            .await
            .map_err(|e| RedactError::persistence(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len: committed_len,
        })
    }

    pub async fn append(&mut self, text: &str) -> Result<()> {
        self.file
            .write_all(text.as_bytes())
            .await
            .map_err(|e| RedactError::persistence(&self.path, e))?;
        self.len += text.len() as u64;
        Ok(())
    }

    /// Flush to disk and return the durable length
    pub async fn sync(&mut self) -> Result<u64> {
        self.file.flush().await.map_err(|e| RedactError::persistence(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| RedactError::persistence(&self.path, e))?;
        Ok(self.len)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Move the finished partial output to its final name. Already promoted
/// output is left alone so finalization can be repeated after a crash.
pub async fn promote_partial(paths: &ArtifactPaths) -> Result<()> {
    let partial = paths.partial_redacted();
    let redacted = paths.redacted();
    match fs::rename(&partial, &redacted).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && fs::try_exists(&redacted).await.unwrap_or(false) => {
            debug!(path = %redacted.display(), "Redacted output already promoted");
            Ok(())
        }
        Err(e) => Err(RedactError::persistence(&redacted, e)),
    }
}

/// Reused (seeded) versus new (discovered) substitutions with totals
pub fn render_detailed_report(registry: &TermRegistry) -> String {
    let mut reused: Vec<_> = registry
        .assignments()
        .iter()
        .filter(|a| a.origin == AssignmentOrigin::Seeded)
        .collect();
    let mut new: Vec<_> = registry
        .assignments()
        .iter()
        .filter(|a| a.origin == AssignmentOrigin::Discovered)
        .collect();
    reused.sort_by(|a, b| a.term.surface_form.cmp(&b.term.surface_form));
    new.sort_by(|a, b| a.term.surface_form.cmp(&b.term.surface_form));

    let mut report = String::from("Substitution Report\n=================\n\n");
    report.push_str("Reused Substitutions:\n------------------\n");
    for a in &reused {
        let _ = writeln!(report, "{} -> {} ({})", a.term.surface_form, a.pseudonym, a.term.category);
    }
    report.push_str("\nNew Substitutions:\n----------------\n");
    for a in &new {
        let _ = writeln!(report, "{} -> {} ({})", a.term.surface_form, a.pseudonym, a.term.category);
    }
    report.push_str("\nStatistics:\n-----------\n");
    let _ = writeln!(report, "Total terms processed: {}", registry.len());
    let _ = writeln!(report, "Reused substitutions: {}", reused.len());
    let _ = writeln!(report, "New substitutions: {}", new.len());
    report
}

/// A chunk the detector could not handle
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FailedChunk {
    pub index: usize,
    pub error: String,
}

pub async fn write_chunk_error_log(
    paths: &ArtifactPaths,
    chunk_index: usize,
    error: &str,
    raw_response: Option<&str>,
    chunk_text: &str,
) -> Result<PathBuf> {
    let mut log = format!("CHUNK: {}\nERROR: {error}\n\n", chunk_index + 1);
    if let Some(raw) = raw_response {
        let _ = write!(log, "RAW RESPONSE:\n{raw}\n\n");
    }
    let _ = write!(log, "CHUNK CONTENT:\n{chunk_text}");
    write_log(paths.chunk_error_log(chunk_index), log).await
}

pub async fn write_structure_log(
    paths: &ArtifactPaths,
    chunk_index: usize,
    issues: &[StructuralIssue],
    raw_response: &str,
) -> Result<PathBuf> {
    let mut log = format!("CHUNK: {}\n\nSTRUCTURE ISSUES:\n", chunk_index + 1);
    for issue in issues {
        let _ = writeln!(log, "- {issue}");
    }
    let _ = write!(log, "\nRAW RESPONSE:\n{raw_response}");
    write_log(paths.structure_log(chunk_index), log).await
}

/// Summary of every failed chunk with a short preview of its text
pub async fn write_failed_chunks_summary(
    paths: &ArtifactPaths,
    failed: &[FailedChunk],
    preview: impl Fn(usize) -> String,
) -> Result<PathBuf> {
    let mut summary = format!("Total failed chunks: {}\n\n", failed.len());
    for chunk in failed {
        let _ = write!(summary, "Chunk {}: {}\nError: {}\n\n", chunk.index + 1, preview(chunk.index), chunk.error);
    }
    write_log(paths.failed_chunks_summary(), summary).await
}

async fn write_log(path: PathBuf, contents: String) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| RedactError::persistence(parent, e))?;
    }
    fs::write(&path, contents)
        .await
        .map_err(|e| RedactError::persistence(&path, e))?;
    Ok(path)
}
