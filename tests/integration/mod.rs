// Integration test utilities and common code
// WHY: Centralized utilities avoid duplication across integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tempfile::TempDir;

use pseudonymize::{
    ArtifactPaths, Category, Detector, DetectorError, KnownTermsDetector, RawDetection, RedactConfig, RetryPolicy,
    Term,
};

/// A short narrative that spreads the same people and places over many chunks
pub const STORY: &str = "Tom met Mary Jane at the Elm Park gate. Tom's bike was old. \
Mary Jane laughed at it. They walked to ACME Corp where Dr. Lee worked. \
Dr. Lee's office faced Elm Park. Tom called 555-0100 but nobody answered! \
Was Mary there? Mary Jane said Mary was her cousin. The Toms' house was empty. \
Tommy and Tomcat were the neighbours' cats. ACME Corp closed at six. \
Tom, Mary Jane and Dr. Lee left together. Elm Park was quiet again.";

/// Terms the story detector reports
pub fn story_terms() -> Vec<Term> {
    vec![
        Term::new("Tom", Category::Name),
        Term::new("Mary Jane", Category::Name),
        Term::new("Mary", Category::Name),
        Term::new("Dr. Lee", Category::Name),
        Term::new("Elm Park", Category::Place),
        Term::new("ACME Corp", Category::Business),
        Term::new("555-0100", Category::Contact),
    ]
}

/// Test fixture helper for creating temporary input documents
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub root_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with temporary directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root_path = temp_dir.path().to_path_buf();
        Self { temp_dir, root_path }
    }

    /// Create an input document with the given content
    pub fn create_input<P: AsRef<Path>>(&self, relative_path: P, content: &str) -> PathBuf {
        let file_path = self.root_path.join(relative_path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&file_path, content).expect("Failed to write input file");
        file_path
    }

    /// A fresh output directory under the fixture root
    pub fn output_dir(&self, name: &str) -> PathBuf {
        self.root_path.join(name)
    }

    pub fn paths(&self, input: &Path, output_dir: &Path) -> ArtifactPaths {
        ArtifactPaths::for_input(input, Some(output_dir))
    }
}

/// Read a file that must exist
pub fn read(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
}

/// Small chunks, quick retries and no progress bars
pub fn test_config(max_chars: usize) -> RedactConfig {
    let mut config = RedactConfig::default();
    config.chunking.max_chars = max_chars;
    config.chunking.lookback_chars = max_chars / 2;
    config.checkpoint_interval = 2;
    config.show_progress = false;
    config.detector_timeout_secs = 5;
    config.retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 1,
        backoff_multiplier: 1.0,
        max_backoff_ms: 1,
    };
    config
}

#[derive(Debug, Clone)]
enum Script {
    Fail(String),
    Malformed(String),
    Hang(String),
}

/// Detector that reports a fixed term list and can be told to fail, return
/// garbage or never answer for chunks containing a marker. Counts calls.
#[derive(Clone)]
pub struct ScriptedDetector {
    known: KnownTermsDetector,
    scripts: Vec<Script>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDetector {
    pub fn new(terms: Vec<Term>) -> Self {
        Self {
            known: KnownTermsDetector::new(terms),
            scripts: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn story() -> Self {
        Self::new(story_terms())
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.scripts.push(Script::Fail(marker.to_string()));
        self
    }

    pub fn malformed_on(mut self, marker: &str) -> Self {
        self.scripts.push(Script::Malformed(marker.to_string()));
        self
    }

    pub fn hanging_on(mut self, marker: &str) -> Self {
        self.scripts.push(Script::Hang(marker.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Chunk texts in the order they were sent
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, text: &str) -> Result<RawDetection, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(text.to_string());
        for script in &self.scripts {
            match script {
                Script::Fail(marker) if text.contains(marker.as_str()) => {
                    return Err(DetectorError::Failure("service unavailable".into()));
                }
                Script::Malformed(marker) if text.contains(marker.as_str()) => {
                    return RawDetection::from_response_text("I cannot help with that.");
                }
                Script::Hang(marker) if text.contains(marker.as_str()) => {
                    return futures::future::pending().await;
                }
                _ => {}
            }
        }
        self.known.detect(text).await
    }
}

/// Shutdown signal that fires on its `n`th poll. The orchestrator polls the
/// signal between chunks and during detector calls, so different `n` stop a
/// run at different points of either phase.
pub struct ShutdownAfterPolls {
    remaining: usize,
}

impl ShutdownAfterPolls {
    pub fn new(n: usize) -> Self {
        Self { remaining: n }
    }
}

impl Future for ShutdownAfterPolls {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            Poll::Ready(())
        } else {
            // Ask to be polled again so a hanging detector call still sees the signal
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
