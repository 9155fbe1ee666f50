// WHY: Entity detection is an external collaborator; the orchestrator only sees this trait.
// The handle is built once by the caller and passed in, never reached through globals.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::DetectorError;

pub mod known;
pub mod ollama;
pub mod retry;
pub mod schema;

pub use known::KnownTermsDetector;
pub use ollama::{OllamaConfig, OllamaDetector};
pub use retry::RetryPolicy;
pub use schema::{extract_json_object, DetectedTerms, DetectionSchema, RawDetection, StructuralIssue};

/// Finds candidate identifying terms in a chunk of text.
///
/// Implementations return the raw category → subcategory → items structure;
/// normalization against [`DetectionSchema`] happens in the orchestrator.
/// Errors are per chunk and never abort a run.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, text: &str) -> Result<RawDetection, DetectorError>;
}

#[async_trait]
impl<D: Detector + ?Sized> Detector for Arc<D> {
    async fn detect(&self, text: &str) -> Result<RawDetection, DetectorError> {
        (**self).detect(text).await
    }
}

#[async_trait]
impl<D: Detector + ?Sized> Detector for Box<D> {
    async fn detect(&self, text: &str) -> Result<RawDetection, DetectorError> {
        (**self).detect(text).await
    }
}
