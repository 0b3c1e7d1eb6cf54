//! Request and interpretation types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Incoming search request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default, rename = "query")]
    pub text: String,
    #[serde(default, deserialize_with = "object_or_empty")]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub max_results: Option<i64>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_max_results(mut self, max_results: i64) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Validate and return the effective result cap
    pub fn validate(&self, default_max: usize, cap: usize) -> Result<usize> {
        if self.text.trim().is_empty() {
            return Err(Error::Validation("Missing required field: query".to_string()));
        }

        match self.max_results {
            None => Ok(default_max.min(cap)),
            Some(n) if n > cap as i64 => Err(Error::Validation(format!(
                "max_results cannot exceed {}",
                cap
            ))),
            Some(n) if n < 1 => Err(Error::Validation(
                "max_results must be at least 1".to_string(),
            )),
            Some(n) => Ok(n as usize),
        }
    }
}

/// Non-object filter payloads are treated as no filters
fn object_or_empty<'de, D>(d: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    })
}

/// Interpretation returned by the language-understanding collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub search_text: String,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub search_terms: Vec<String>,
    /// `original → corrected` strings
    #[serde(default)]
    pub corrections: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Which vocabulary the term-selection policy settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TermSource {
    /// Collaborator fixed spelling of the same drug names
    Corrected,
    /// Collaborator rewrote the query (e.g. condition to drug names)
    Expanded,
    /// Naive tokenization of the raw query
    Original,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_defaults() {
        let query = SearchQuery::new("crestor");
        assert_eq!(query.validate(20, 100).unwrap(), 20);
    }

    #[test]
    fn test_validate_rejects_blank_and_over_cap() {
        assert!(SearchQuery::new("   ").validate(20, 100).is_err());
        assert!(SearchQuery::new("x").with_max_results(101).validate(20, 100).is_err());
        assert!(SearchQuery::new("x").with_max_results(0).validate(20, 100).is_err());
        assert_eq!(
            SearchQuery::new("x").with_max_results(100).validate(20, 100).unwrap(),
            100
        );
    }

    #[test]
    fn test_request_deserialization_tolerates_bad_filters() {
        let query: SearchQuery =
            serde_json::from_value(json!({"query": "lipitor", "filters": "oops"})).unwrap();
        assert_eq!(query.text, "lipitor");
        assert!(query.filters.is_empty());
        assert!(query.max_results.is_none());
    }
}
