use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{DetectionSchema, Detector, RawDetection};
use crate::error::DetectorError;
use crate::registry::PseudonymMapping;
use crate::term::{Category, Term};

/// Subcategory used for categories the schema does not list
const KNOWN_SUBCATEGORY: &str = "known_terms";

/// Offline detector over a fixed term list: reports every listed term whose
/// surface form occurs verbatim in the chunk. Lets a document be redacted
/// from an existing mapping without any external service.
///
/// Responses follow the configured schema so a clean run logs no
/// structural deviations.
#[derive(Debug, Clone, Default)]
pub struct KnownTermsDetector {
    terms: Vec<Term>,
    schema: DetectionSchema,
}

impl KnownTermsDetector {
    pub fn new(terms: Vec<Term>) -> Self {
        Self {
            terms,
            schema: DetectionSchema::default(),
        }
    }

    pub fn with_schema(mut self, schema: DetectionSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn from_mapping(mapping: &PseudonymMapping) -> Self {
        let terms = mapping
            .iter()
            .filter_map(|(key, entries)| Category::from_key(key).map(|c| (c, entries)))
            .flat_map(|(category, entries)| entries.keys().map(move |surface| Term::new(surface.clone(), category)))
            .collect();
        Self::new(terms)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    fn scan(&self, text: &str) -> Value {
        let mut root = Map::new();
        for (category, subcategories) in &self.schema.categories {
            let empty: Map<String, Value> = subcategories.iter().map(|s| (s.clone(), json!([]))).collect();
            root.insert(category.clone(), Value::Object(empty));
        }

        for term in &self.terms {
            if term.surface_form.is_empty() || !text.contains(&term.surface_form) {
                continue;
            }
            let key = term.category.key();
            let subcategory = self
                .schema
                .categories
                .get(key)
                .and_then(|subs| subs.first())
                .map_or(KNOWN_SUBCATEGORY, String::as_str)
                .to_string();
            let category = root.entry(key).or_insert_with(|| json!({}));
            if let Some(items) = category
                .as_object_mut()
                .map(|obj| obj.entry(subcategory).or_insert_with(|| json!([])))
                .and_then(Value::as_array_mut)
            {
                items.push(Value::String(term.surface_form.clone()));
            }
        }
        Value::Object(root)
    }
}

#[async_trait]
impl Detector for KnownTermsDetector {
    async fn detect(&self, text: &str) -> Result<RawDetection, DetectorError> {
        Ok(RawDetection::from_value(self.scan(text)))
    }
}
