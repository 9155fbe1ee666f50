// WHY: The detector's loosely structured JSON is normalized exactly once, here,
// into typed terms; nothing past this boundary handles missing keys

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::DetectorError;
use crate::term::{Category, Term};

/// Detector output before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub payload: Value,
    /// Full response text, kept for error logs
    pub raw: Option<String>,
}

impl RawDetection {
    pub fn from_value(payload: Value) -> Self {
        Self { payload, raw: None }
    }

    /// Parse a free-form response that should contain one JSON object,
    /// possibly surrounded by prose or code fences
    pub fn from_response_text(text: &str) -> Result<Self, DetectorError> {
        let json = extract_json_object(text).ok_or_else(|| DetectorError::MalformedResponse {
            message: "no JSON object found in response".into(),
            raw: text.to_string(),
        })?;
        let payload = serde_json::from_str(json).map_err(|e| DetectorError::MalformedResponse {
            message: format!("invalid JSON: {e}"),
            raw: text.to_string(),
        })?;
        Ok(Self {
            payload,
            raw: Some(text.to_string()),
        })
    }
}

/// Slice from the first `{` to the last `}`
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// A deviation from the expected response structure. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StructuralIssue {
    MissingCategory(String),
    MissingSubcategory { category: String, subcategory: String },
    UnknownCategory(String),
    NotAnObject(String),
    NotAList { category: String, subcategory: String },
    NonStringItem { category: String, subcategory: String },
}

impl fmt::Display for StructuralIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCategory(c) => write!(f, "Missing category: {c}"),
            Self::MissingSubcategory { category, subcategory } => {
                write!(f, "Missing subcategory: {category}.{subcategory}")
            }
            Self::UnknownCategory(c) => write!(f, "Unknown category ignored: {c}"),
            Self::NotAnObject(c) => write!(f, "Category is not an object: {c}"),
            Self::NotAList { category, subcategory } => {
                write!(f, "Subcategory is not a list: {category}.{subcategory}")
            }
            Self::NonStringItem { category, subcategory } => {
                write!(f, "Non-string item skipped in {category}.{subcategory}")
            }
        }
    }
}

/// Normalized detector output for one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedTerms {
    /// Distinct terms in the order the detector listed them
    pub terms: Vec<Term>,
    pub issues: Vec<StructuralIssue>,
}

impl DetectedTerms {
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Expected category → subcategory layout of detector responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionSchema {
    pub categories: BTreeMap<String, Vec<String>>,
}

impl Default for DetectionSchema {
    fn default() -> Self {
        let categories = [
            ("names", vec!["names", "role_identifiers"]),
            ("places", vec!["addresses", "landmarks", "neighborhoods"]),
            ("contacts", vec!["phones", "emails", "social_media"]),
            ("businesses", vec!["specific_businesses", "institutions"]),
        ]
        .into_iter()
        .map(|(c, subs)| (c.to_string(), subs.into_iter().map(String::from).collect()))
        .collect();
        Self { categories }
    }
}

impl DetectionSchema {
    /// Turn a raw response into typed terms. Missing structure becomes empty
    /// and is reported as an issue; only a non-object payload is an error.
    pub fn normalize(&self, raw: &RawDetection) -> Result<DetectedTerms, DetectorError> {
        let Some(root) = raw.payload.as_object() else {
            return Err(DetectorError::MalformedResponse {
                message: "detector payload is not a JSON object".into(),
                raw: raw.raw.clone().unwrap_or_else(|| raw.payload.to_string()),
            });
        };

        let mut out = DetectedTerms::default();
        let mut seen = HashSet::new();

        for (category_key, subcategories) in &self.categories {
            match root.get(category_key) {
                None => out.issues.push(StructuralIssue::MissingCategory(category_key.clone())),
                Some(value) => {
                    for subcategory in subcategories {
                        if value.as_object().is_some_and(|obj| !obj.contains_key(subcategory)) {
                            out.issues.push(StructuralIssue::MissingSubcategory {
                                category: category_key.clone(),
                                subcategory: subcategory.clone(),
                            });
                        }
                    }
                }
            }
        }

        for key in root.keys() {
            if Category::from_key(key).is_none() {
                out.issues.push(StructuralIssue::UnknownCategory(key.clone()));
            }
        }

        // Category order is fixed so minting order never depends on JSON key order
        for category in Category::ALL {
            let Some(value) = root.get(category.key()) else {
                continue;
            };
            let Some(subcategories) = value.as_object() else {
                out.issues.push(StructuralIssue::NotAnObject(category.key().to_string()));
                continue;
            };
            for subcategory in self.subcategory_order(category.key(), subcategories) {
                let Some(items) = subcategories.get(&subcategory) else {
                    continue;
                };
                let Some(items) = items.as_array() else {
                    out.issues.push(StructuralIssue::NotAList {
                        category: category.key().to_string(),
                        subcategory,
                    });
                    continue;
                };
                let mut reported_non_string = false;
                for item in items {
                    match item.as_str() {
                        Some(s) => {
                            let term = Term::new(s, category);
                            if seen.insert(term.clone()) {
                                out.terms.push(term);
                            }
                        }
                        None if !reported_non_string => {
                            reported_non_string = true;
                            out.issues.push(StructuralIssue::NonStringItem {
                                category: category.key().to_string(),
                                subcategory: subcategory.clone(),
                            });
                        }
                        None => {}
                    }
                }
            }
        }

        Ok(out)
    }

    /// Expected subcategories first in schema order, then any extras
    fn subcategory_order(&self, category: &str, present: &serde_json::Map<String, Value>) -> Vec<String> {
        let expected = self.categories.get(category).cloned().unwrap_or_default();
        let extras = present.keys().filter(|k| !expected.contains(k)).cloned();
        expected.iter().cloned().chain(extras).collect()
    }
}
