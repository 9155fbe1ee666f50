// WHY: Thin HTTP adapter for an Ollama-compatible /api/generate endpoint.
// Timeouts and retries are applied by the caller through RetryPolicy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;
use tracing::debug;

use super::{DetectionSchema, Detector, RawDetection};
use crate::error::DetectorError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.3:latest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaDetector {
    client: reqwest::Client,
    config: OllamaConfig,
    schema: DetectionSchema,
}

impl OllamaDetector {
    pub fn new(config: OllamaConfig, schema: DetectionSchema) -> Result<Self, DetectorError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pseudonymize/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DetectorError::Failure(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config, schema })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.config.base_url.trim_end_matches('/'))
    }

    /// Extraction prompt asking for exactly the schema's JSON layout
    pub fn build_prompt(&self, text: &str) -> String {
        let mut template = String::from("{\n");
        let count = self.schema.categories.len();
        for (i, (category, subcategories)) in self.schema.categories.iter().enumerate() {
            let _ = writeln!(template, "    \"{category}\": {{");
            for (j, subcategory) in subcategories.iter().enumerate() {
                let comma = if j + 1 < subcategories.len() { "," } else { "" };
                let _ = writeln!(
                    template,
                    "        \"{subcategory}\": [\"EXACT {} as written in the text\"]{comma}",
                    subcategory.replace('_', " ")
                );
            }
            let comma = if i + 1 < count { "," } else { "" };
            let _ = writeln!(template, "    }}{comma}");
        }
        template.push('}');

        format!(
            "Analyze this text for personal identifying information. Extract all names, places, \
             contacts and businesses. Include every occurrence.\n\n\
             TEXT:\n{text}\n\n\
             Return ONLY this JSON structure, using this EXACT format:\n{template}\n\n\
             IMPORTANT:\n\
             - Only identify proper nouns as names (like \"John\" or \"Sarah\")\n\
             - Do NOT include pronouns or general terms (friend, person, partner, someone)\n\
             - Return items exactly as they appear in the text\n\
             - Do not include any explanatory text, ONLY the JSON object"
        )
    }

    async fn generate(&self, text: &str) -> Result<RawDetection, DetectorError> {
        let body = json!({
            "model": self.config.model,
            "prompt": self.build_prompt(text),
            "stream": false,
            "options": { "temperature": self.config.temperature },
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectorError::Failure(format!("Request to {} failed: {e}", self.endpoint())))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DetectorError::Failure(format!("HTTP error {}: {detail}", status.as_u16())));
        }

        let payload = response
            .text()
            .await
            .map_err(|e| DetectorError::Failure(format!("Failed to read response: {e}")))?;
        debug!(bytes = payload.len(), model = %self.config.model, "Received detector response");
        parse_generate_response(&payload)
    }
}

/// Unwrap the `response` field of a generate reply and pull the JSON object out of it
fn parse_generate_response(body: &str) -> Result<RawDetection, DetectorError> {
    let reply: GenerateResponse = serde_json::from_str(body).map_err(|e| DetectorError::MalformedResponse {
        message: format!("invalid generate reply: {e}"),
        raw: body.to_string(),
    })?;
    RawDetection::from_response_text(&reply.response)
}

#[async_trait]
impl Detector for OllamaDetector {
    async fn detect(&self, text: &str) -> Result<RawDetection, DetectorError> {
        self.generate(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> OllamaDetector {
        OllamaDetector::new(OllamaConfig::default(), DetectionSchema::default()).unwrap()
    }

    #[test]
    fn test_prompt_embeds_text_and_schema() {
        let prompt = detector().build_prompt("Tom met Mary.");
        assert!(prompt.contains("TEXT:\nTom met Mary.\n"));
        assert!(prompt.contains("\"role_identifiers\""));
        assert!(prompt.contains("\"specific_businesses\": [\"EXACT specific businesses as written in the text\"]"));
    }

    #[test]
    fn test_prompt_template_is_valid_json() {
        let prompt = detector().build_prompt("x");
        let start = prompt.rfind("format:\n").unwrap() + "format:\n".len();
        let end = prompt.find("\n\nIMPORTANT").unwrap();
        let template: serde_json::Value = serde_json::from_str(&prompt[start..end]).unwrap();
        assert_eq!(template["places"].as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = OllamaConfig {
            base_url: "http://gpu-box:11434/".into(),
            ..OllamaConfig::default()
        };
        let detector = OllamaDetector::new(config, DetectionSchema::default()).unwrap();
        assert_eq!(detector.endpoint(), "http://gpu-box:11434/api/generate");
    }

    #[test]
    fn test_parse_generate_response() {
        let body = r#"{"model":"m","response":"Here you go: {\"names\": {\"names\": [\"Tom\"]}}","done":true}"#;
        let raw = parse_generate_response(body).unwrap();
        assert_eq!(raw.payload["names"]["names"][0], "Tom");

        let err = parse_generate_response("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, DetectorError::MalformedResponse { .. }));
        assert!(!err.is_retryable());
    }
}
