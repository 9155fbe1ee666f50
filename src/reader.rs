use memmap2::{Mmap, MmapOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::error::{RedactError, Result};

/// Configuration for document loading
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Map the file instead of reading it through a buffer
    pub use_mmap: bool,
    /// Buffer size for async reading (default: 8KB)
    pub buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            use_mmap: false,
            buffer_size: 8192, // WHY: 8KB is optimal for most filesystems and network storage
        }
    }
}

/// Statistics for a document load
#[derive(Debug, Clone)]
pub struct ReadStats {
    pub file_path: PathBuf,
    pub bytes_read: u64,
    pub chars_read: u64,
    pub duration_ms: u64,
}

enum Storage {
    Owned(String),
    Mapped(Mmap),
}

/// A fully loaded, UTF-8 validated input document
pub struct SourceDocument {
    storage: Storage,
    stats: ReadStats,
}

impl SourceDocument {
    pub fn from_string(text: impl Into<String>) -> Self {
        let text = text.into();
        let stats = ReadStats {
            file_path: PathBuf::new(),
            bytes_read: text.len() as u64,
            chars_read: text.chars().count() as u64,
            duration_ms: 0,
        };
        Self {
            storage: Storage::Owned(text),
            stats,
        }
    }

    pub fn as_str(&self) -> &str {
        match &self.storage {
            Storage::Owned(text) => text,
            // SAFETY: the mapping was validated with `std::str::from_utf8` in `read_mapped`
            // and is never written through
            Storage::Mapped(map) => unsafe { std::str::from_utf8_unchecked(map) },
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }
}

pub struct DocumentReader {
    config: ReaderConfig,
}

impl DocumentReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Load the whole document. Unreadable and non-UTF-8 files are input errors.
    pub async fn read<P: AsRef<Path>>(&self, file_path: P) -> Result<SourceDocument> {
        let path = file_path.as_ref();
        let start_time = Instant::now();
        debug!(path = %path.display(), use_mmap = self.config.use_mmap, "Loading input document");

        let storage = if self.config.use_mmap {
            read_mapped(path)?
        } else {
            Storage::Owned(self.read_buffered(path).await?)
        };

        let mut document = SourceDocument {
            storage,
            stats: ReadStats {
                file_path: path.to_path_buf(),
                bytes_read: 0,
                chars_read: 0,
                duration_ms: 0,
            },
        };
        let text = document.as_str();
        let bytes_read = text.len() as u64;
        let chars_read = text.chars().count() as u64;
        document.stats.bytes_read = bytes_read;
        document.stats.chars_read = chars_read;
        document.stats.duration_ms = start_time.elapsed().as_millis() as u64;

        info!(
            path = %path.display(),
            bytes = bytes_read,
            chars = chars_read,
            duration_ms = document.stats.duration_ms,
            "Loaded input document"
        );
        Ok(document)
    }

    async fn read_buffered(&self, path: &Path) -> Result<String> {
        let file = tokio::fs::File::open(path).await.map_err(|e| input_error(path, e))?;
        // WHY: BufReader with custom buffer size reduces syscalls and improves throughput
        let mut reader = tokio::io::BufReader::with_capacity(self.config.buffer_size, file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.map_err(|e| input_error(path, e))?;
        String::from_utf8(bytes).map_err(|e| RedactError::Input {
            path: path.to_path_buf(),
            message: format!("not valid UTF-8: {}", e.utf8_error()),
        })
    }
}

fn read_mapped(path: &Path) -> Result<Storage> {
    let file = std::fs::File::open(path).map_err(|e| input_error(path, e))?;
    if file.metadata().map_err(|e| input_error(path, e))?.len() == 0 {
        // Zero-length files cannot be mapped
        return Ok(Storage::Owned(String::new()));
    }
    // SAFETY: the file is opened read-only and the mapping is never mutated
    let map = unsafe { MmapOptions::new().map(&file) }.map_err(|e| input_error(path, e))?;
    std::str::from_utf8(&map).map_err(|e| RedactError::Input {
        path: path.to_path_buf(),
        message: format!("not valid UTF-8: {e}"),
    })?;
    Ok(Storage::Mapped(map))
}

fn input_error(path: &Path, e: std::io::Error) -> RedactError {
    RedactError::Input {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Convenience function for reading a document with default configuration
pub async fn read_document<P: AsRef<Path>>(file_path: P) -> Result<SourceDocument> {
    DocumentReader::new(ReaderConfig::default()).read(file_path).await
}
