//! Query interpretation
//!
//! Sends the raw query to the language model with the medical search prompt
//! and parses the reply into a [`StructuredQuery`]. Parsing never fails the
//! request: a reply that is not a JSON object becomes plain search text and a
//! parse warning.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use drug_search_config::constants::{llm, search};
use drug_search_config::Settings;
use drug_search_core::terms::tokenize;
use drug_search_core::{LanguageModel, Result, StructuredQuery, TermSource};
use drug_search_llm::{build_search_request, estimate_cost, CostEstimate};

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    /// Terms kept by the naive tokenizer
    pub max_terms: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_tokens: llm::MAX_TOKENS,
            temperature: llm::TEMPERATURE,
            max_terms: search::MAX_QUERY_TERMS,
        }
    }
}

impl From<&Settings> for InterpreterConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            max_tokens: settings.llm.max_tokens,
            temperature: settings.llm.temperature,
            max_terms: settings.search.max_query_terms,
        }
    }
}

/// Model usage for one interpretation
#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmUsage {
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub latency_ms: f64,
    pub cost: CostEstimate,
}

/// Interpreted query plus the terms chosen for lexical matching
#[derive(Debug, Clone)]
pub struct Interpretation {
    pub structured: StructuredQuery,
    /// Text embedded for single-concept retrieval
    pub expanded_query: String,
    /// Terms proposed by the model (or tokenized from the search text)
    pub collaborator_terms: Vec<String>,
    /// Raw query tokenized
    pub original_terms: Vec<String>,
    /// Terms picked by [`select_terms`]; they feed the lexical gate and anchors
    pub selected_terms: Vec<String>,
    pub term_source: TermSource,
    pub raw_output: String,
    pub parse_warning: Option<String>,
    pub usage: LlmUsage,
}

impl Interpretation {
    /// Terms that count as a literal match when found in a candidate name.
    ///
    /// A rewritten query (condition to drug names) falls back to what the
    /// user actually typed.
    pub fn literal_terms(&self) -> &[String] {
        match self.term_source {
            TermSource::Expanded => &self.original_terms,
            TermSource::Corrected | TermSource::Original => &self.selected_terms,
        }
    }

    /// Interpretation without a model call, built from the query text alone
    pub fn from_parsed(
        query: &str,
        raw_output: String,
        max_terms: usize,
        usage: LlmUsage,
    ) -> Self {
        let (structured, parse_warning) = parse_interpretation(&raw_output, query, max_terms);
        let original_terms = tokenize(query, max_terms);
        let expanded_query = structured.search_text.clone();
        let collaborator_terms = structured.search_terms.clone();
        let (term_source, selected_terms) = select_terms(
            query,
            &expanded_query,
            &structured.corrections,
            &collaborator_terms,
            &original_terms,
        );

        Self {
            structured,
            expanded_query,
            collaborator_terms,
            original_terms,
            selected_terms,
            term_source,
            raw_output,
            parse_warning,
            usage,
        }
    }
}

pub struct QueryInterpreter {
    config: InterpreterConfig,
    llm: Arc<dyn LanguageModel>,
}

impl QueryInterpreter {
    pub fn new(config: InterpreterConfig, llm: Arc<dyn LanguageModel>) -> Self {
        Self { config, llm }
    }

    pub async fn interpret(&self, query: &str) -> Result<Interpretation> {
        let request = build_search_request(query, self.config.max_tokens, self.config.temperature);
        let completion = self.llm.complete(request).await?;

        let model = if completion.model.is_empty() {
            self.llm.model_name().to_string()
        } else {
            completion.model.clone()
        };
        let usage = LlmUsage {
            cost: estimate_cost(&model, completion.input_tokens, completion.output_tokens),
            model,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            latency_ms: completion.latency_ms,
        };

        let interpretation =
            Interpretation::from_parsed(query, completion.text, self.config.max_terms, usage);

        if let Some(warning) = &interpretation.parse_warning {
            tracing::warn!(warning = %warning, "Model reply was not a JSON object");
        }
        tracing::info!(
            expanded = %interpretation.expanded_query,
            terms = ?interpretation.selected_terms,
            source = ?interpretation.term_source,
            corrections = interpretation.structured.corrections.len(),
            latency_ms = interpretation.usage.latency_ms,
            "Query interpreted"
        );

        Ok(interpretation)
    }
}

/// Parse a model reply into a structured query.
///
/// Markdown fences and prose around the first `{ ... }` span are tolerated.
/// An object without `search_text` searches for the query itself. On failure
/// the trimmed reply (or the query, when the reply is blank) becomes the
/// search text and a warning is returned.
pub fn parse_interpretation(
    raw: &str,
    query: &str,
    max_terms: usize,
) -> (StructuredQuery, Option<String>) {
    let fallback_text = if raw.trim().is_empty() {
        query.trim().to_string()
    } else {
        raw.trim().to_string()
    };

    let (mut structured, warning) = match extract_object(raw) {
        Ok(object) => (from_object(&object, query.trim(), max_terms), None),
        Err(reason) => (
            StructuredQuery {
                search_text: fallback_text,
                ..Default::default()
            },
            Some(format!("Model returned non-JSON output: {}", reason)),
        ),
    };

    if structured.search_terms.is_empty() {
        structured.search_terms = tokenize(&structured.search_text, max_terms);
    }

    (structured, warning)
}

fn extract_object(raw: &str) -> std::result::Result<Map<String, Value>, String> {
    let text = strip_fences(raw.trim());

    let parsed = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(first) => {
            let start = text.find('{');
            let end = text.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if e > s => serde_json::from_str::<Value>(&text[s..=e])
                    .map_err(|_| first.to_string())?,
                _ => return Err(first.to_string()),
            }
        },
    };

    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected an object, got {}", type_name(&other))),
    }
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn from_object(object: &Map<String, Value>, fallback_text: &str, max_terms: usize) -> StructuredQuery {
    let search_text = object
        .get("search_text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_text)
        .to_string();

    let filters = match object.get("filters") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    let terms_value = object
        .get("search_terms")
        .filter(|v| !is_blank(v))
        .or_else(|| object.get("terms"));

    StructuredQuery {
        search_text,
        filters,
        search_terms: terms_value
            .map(|v| collect_terms(v, max_terms))
            .unwrap_or_default(),
        corrections: object.get("corrections").map(collect_corrections).unwrap_or_default(),
        confidence: object.get("confidence").and_then(parse_confidence),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Lowercased, trimmed, unique in first-seen order
fn collect_terms(value: &Value, max_terms: usize) -> Vec<String> {
    match value {
        Value::String(s) => tokenize(s, max_terms),
        Value::Array(items) => {
            let mut terms: Vec<String> = Vec::new();
            for item in items {
                let Some(term) = item.as_str() else { continue };
                let term = term.trim().to_lowercase();
                if !term.is_empty() && !terms.contains(&term) {
                    terms.push(term);
                }
            }
            terms
        },
        _ => Vec::new(),
    }
}

fn collect_corrections(value: &Value) -> Vec<String> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Object(map) => {
                let from = map.get("original").and_then(Value::as_str)?;
                let to = map.get("corrected").and_then(Value::as_str)?;
                Some(format!("{} → {}", from, to))
            },
            _ => None,
        })
        .collect()
}

fn parse_confidence(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}

/// Term-selection policy.
///
/// 1. Corrections present and the model did not add more than two terms:
///    the model's spelling-fixed terms.
/// 2. The model rewrote the query and proposed terms: the model's terms.
/// 3. Otherwise the tokenized raw query.
pub fn select_terms(
    query: &str,
    expanded_query: &str,
    corrections: &[String],
    collaborator_terms: &[String],
    original_terms: &[String],
) -> (TermSource, Vec<String>) {
    if !corrections.is_empty() && collaborator_terms.len() <= original_terms.len() + 2 {
        (TermSource::Corrected, collaborator_terms.to_vec())
    } else if !collaborator_terms.is_empty() && expanded_query != query {
        (TermSource::Expanded, collaborator_terms.to_vec())
    } else {
        (TermSource::Original, original_terms.to_vec())
    }
}
