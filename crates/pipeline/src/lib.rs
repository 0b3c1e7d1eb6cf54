//! Drug search pipeline
//!
//! Turns a free-text query into ranked drug family groups:
//!
//! ```text
//! validate → interpret → filters → retrieve → expand → post-filter → group → truncate
//! ```
//!
//! Collaborators (language model, embedder, candidate store) are injected
//! through the constructor of [`SearchPipeline`]; nothing here reads global
//! state.

pub mod filters;
pub mod grouper;
pub mod interpreter;
pub mod lookup;
pub mod orchestrator;
pub mod post_filter;
pub mod response;

pub use filters::{BuiltFilters, FilterBuilder, COLLABORATOR_FILTER_KEYS};
pub use grouper::{GroupingContext, ResultGrouper};
pub use interpreter::{
    parse_interpretation, select_terms, Interpretation, InterpreterConfig, LlmUsage,
    QueryInterpreter,
};
pub use lookup::{normalize_ndc, Alternatives, DrugDetail, DrugLookup, DrugRecord};
pub use orchestrator::{
    PipelineConfig, RetrievalSummary, SearchOutcome, SearchPipeline, StageTimings,
};
pub use post_filter::{PostFilter, PostFilterStats, StrengthPattern};
pub use response::{
    ClaudeInfo, EmbeddingMetrics, FilterEcho, LlmMetrics, QueryInfo, ResponseMetrics,
    SearchResponse, StoreMetrics, NO_RESULTS_MESSAGE,
};

use serde::Serialize;
use std::fmt;

use drug_search_core::Error;

/// Pipeline stage, used for timings and error attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Interpretation,
    Filters,
    Retrieval,
    Expansion,
    PostFilter,
    Grouping,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::Interpretation => "interpretation",
            Stage::Filters => "filters",
            Stage::Retrieval => "retrieval",
            Stage::Expansion => "expansion",
            Stage::PostFilter => "post_filter",
            Stage::Grouping => "grouping",
        }
    }

    pub(crate) fn from_index(index: u8) -> Self {
        match index {
            0 => Stage::Validation,
            1 => Stage::Interpretation,
            2 => Stage::Filters,
            3 => Stage::Retrieval,
            4 => Stage::Expansion,
            5 => Stage::PostFilter,
            _ => Stage::Grouping,
        }
    }

    pub(crate) fn index(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one search, attributed to the stage that raised it
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("search failed during {stage}: {kind}")]
pub struct SearchError {
    pub stage: Stage,
    #[source]
    pub kind: Error,
}

impl SearchError {
    pub fn new(stage: Stage, kind: Error) -> Self {
        Self { stage, kind }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, Error::Validation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, Error::Timeout(_))
    }

    /// Message safe to return to callers. Validation messages are passed
    /// through; everything else only names the stage.
    pub fn public_message(&self) -> String {
        match &self.kind {
            Error::Validation(msg) => msg.clone(),
            Error::Timeout(_) => format!("search timed out during {}", self.stage),
            _ => format!("search failed during {}", self.stage),
        }
    }
}

impl From<SearchError> for Error {
    fn from(err: SearchError) -> Self {
        err.kind
    }
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Attach a stage to a core result
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> SearchResult<T>;
}

impl<T> AtStage<T> for drug_search_core::Result<T> {
    fn at(self, stage: Stage) -> SearchResult<T> {
        self.map_err(|kind| SearchError::new(stage, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_internals() {
        let err = SearchError::new(
            Stage::Retrieval,
            Error::Store("connection refused at 10.0.0.4:6334".to_string()),
        );
        assert_eq!(err.public_message(), "search failed during retrieval");
        assert!(err.to_string().contains("10.0.0.4"));
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = SearchError::new(
            Stage::Validation,
            Error::Validation("max_results cannot exceed 100".to_string()),
        );
        assert!(err.is_validation());
        assert_eq!(err.public_message(), "max_results cannot exceed 100");
    }

    #[test]
    fn test_stage_index_round_trip() {
        for stage in [
            Stage::Validation,
            Stage::Interpretation,
            Stage::Filters,
            Stage::Retrieval,
            Stage::Expansion,
            Stage::PostFilter,
            Stage::Grouping,
        ] {
            assert_eq!(Stage::from_index(stage.index()), stage);
        }
    }
}
