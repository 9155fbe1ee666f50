pub mod artifacts;
pub mod chunker;
pub mod config;
pub mod detector;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod reader;
pub mod registry;
pub mod substitution;
pub mod term;

// Re-export main types for convenient access
pub use chunker::{chunk, BytePos, Chunk, ChunkRules, Chunker};
pub use config::RedactConfig;
pub use error::{DetectorError, RedactError, Result};
pub use term::{Category, Term};

// Re-export the detector seam and its adapters
pub use detector::{
    DetectedTerms, DetectionSchema, Detector, KnownTermsDetector, OllamaConfig, OllamaDetector, RawDetection,
    RetryPolicy,
};

// Re-export registry, engine and persistence types
pub use progress::{Checkpoint, DiscoveredTerms, ProcessingState, ProgressStore, RunStatus, SourceFingerprint};
pub use registry::{AssignmentOrigin, NamePatterns, PseudonymAssignment, PseudonymMapping, TermRegistry};
pub use substitution::{substitute, ReplacementStatistics, SubstitutionEngine, SubstitutionResult, TermCounts};

// Re-export the orchestrator entry points
pub use artifacts::ArtifactPaths;
pub use orchestrator::{pseudonymize_file, Orchestrator, Phase, RunOutcome, RunRequest, RunSummary};
