//! Search response envelope

use serde::Serialize;
use serde_json::{Map, Value};

use drug_search_core::{Candidate, DrugGroup};
use drug_search_rag::ExpansionDebug;

use crate::orchestrator::{SearchOutcome, StageTimings};

pub const NO_RESULTS_MESSAGE: &str = "No results found for the provided criteria.";

#[derive(Debug, Clone, Serialize)]
pub struct FilterEcho {
    pub user: Map<String, Value>,
    pub claude: Map<String, Value>,
    pub merged: Map<String, Value>,
    pub applied: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaudeInfo {
    pub corrections: Vec<String>,
    pub confidence: Option<f64>,
    pub raw_output: String,
    pub parse_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryInfo {
    pub original: String,
    pub expanded: String,
    /// Raw query tokenized
    pub search_terms: Vec<String>,
    pub claude_terms: Vec<String>,
    pub filters: FilterEcho,
    pub claude: ClaudeInfo,
    pub message: Option<String>,
    pub store_query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMetrics {
    pub latency_ms: f64,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub model: String,
    pub cost_estimate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingMetrics {
    pub latency_ms: f64,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreMetrics {
    pub latency_ms: f64,
    pub results_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetrics {
    pub total_latency_ms: f64,
    pub llm: LlmMetrics,
    pub embedding: EmbeddingMetrics,
    pub store: StoreMetrics,
    pub stages: StageTimings,
}

/// Body of a successful `POST /api/search`
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<DrugGroup>,
    pub raw_results: Vec<Candidate>,
    pub total_results: usize,
    pub raw_results_count: usize,
    pub query_info: QueryInfo,
    pub expansion_debug: ExpansionDebug,
    pub message: Option<String>,
    pub metrics: ResponseMetrics,
    pub timestamp: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl From<SearchOutcome> for SearchResponse {
    fn from(outcome: SearchOutcome) -> Self {
        let SearchOutcome {
            query,
            interpretation,
            filters,
            retrieval,
            expansion_debug,
            raw_results,
            groups,
            message,
            timings,
            total_latency_ms,
            ..
        } = outcome;

        let usage = &interpretation.usage;
        let embedding_model = if retrieval.embedding.model.is_empty() {
            "N/A".to_string()
        } else {
            retrieval.embedding.model.clone()
        };

        let metrics = ResponseMetrics {
            total_latency_ms: round2(total_latency_ms),
            llm: LlmMetrics {
                latency_ms: round2(usage.latency_ms),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                model: usage.model.clone(),
                cost_estimate: usage.cost.total,
            },
            embedding: EmbeddingMetrics {
                latency_ms: round2(retrieval.embedding.latency_ms),
                model: embedding_model,
                dimensions: retrieval.embedding.dimensions,
            },
            store: StoreMetrics {
                latency_ms: round2(retrieval.store_latency_ms),
                results_count: retrieval.hit_count,
            },
            stages: timings,
        };

        let query_info = QueryInfo {
            original: query.text,
            expanded: interpretation.expanded_query,
            search_terms: interpretation.original_terms,
            claude_terms: interpretation.collaborator_terms,
            filters: FilterEcho {
                user: query.filters,
                claude: interpretation.structured.filters,
                merged: filters.merged,
                applied: filters.applied,
            },
            claude: ClaudeInfo {
                corrections: interpretation.structured.corrections,
                confidence: interpretation.structured.confidence,
                raw_output: interpretation.raw_output,
                parse_warning: interpretation.parse_warning,
            },
            message: message.clone(),
            store_query: retrieval.store_query,
        };

        Self {
            success: true,
            total_results: groups.len(),
            raw_results_count: raw_results.len(),
            results: groups,
            raw_results,
            query_info,
            expansion_debug,
            message,
            metrics,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
