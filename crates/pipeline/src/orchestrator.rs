//! Search orchestrator
//!
//! Runs one query through every stage under a single deadline:
//!
//! ```text
//! validate → interpret → filters → retrieve → expand → post-filter → group → truncate
//! ```
//!
//! Instances are stateless between requests; all collaborators and settings
//! arrive through [`SearchPipeline::new`], so several pipelines over
//! different stores can run side by side.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Map;

use drug_search_config::constants::{search, timeouts};
use drug_search_config::Settings;
use drug_search_core::{
    Candidate, CandidateStore, DrugGroup, Embedder, Error, LanguageModel, SearchQuery,
};
use drug_search_rag::{
    CandidateRetriever, ClassExpander, EmbeddingStats, ExpanderConfig, ExpansionDebug,
    Retrieval, RetrievalRequest, RetrievalStrategy, RetrieverConfig,
};

use crate::filters::{BuiltFilters, FilterBuilder};
use crate::grouper::{GroupingContext, ResultGrouper};
use crate::interpreter::{Interpretation, InterpreterConfig, QueryInterpreter};
use crate::post_filter::{PostFilter, PostFilterStats};
use crate::response::NO_RESULTS_MESSAGE;
use crate::{AtStage, SearchError, SearchResult, Stage};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_max_results: usize,
    pub max_results_cap: usize,
    /// End-to-end deadline for one search
    pub request_timeout: Duration,
    pub interpreter: InterpreterConfig,
    pub retriever: RetrieverConfig,
    pub expander: ExpanderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_max_results: search::DEFAULT_MAX_RESULTS,
            max_results_cap: search::MAX_RESULTS_CAP,
            request_timeout: Duration::from_millis(timeouts::SEARCH_REQUEST_MS),
            interpreter: InterpreterConfig::default(),
            retriever: RetrieverConfig::default(),
            expander: ExpanderConfig::default(),
        }
    }
}

impl From<&Settings> for PipelineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            default_max_results: settings.search.default_max_results,
            max_results_cap: settings.search.max_results_cap,
            request_timeout: Duration::from_millis(settings.search.request_timeout_ms),
            interpreter: InterpreterConfig::from(settings),
            retriever: RetrieverConfig::from(&settings.search),
            expander: ExpanderConfig::from(&settings.search),
        }
    }
}

/// Wall time per stage in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub validation_ms: f64,
    pub interpretation_ms: f64,
    pub filters_ms: f64,
    pub retrieval_ms: f64,
    pub expansion_ms: f64,
    pub post_filter_ms: f64,
    pub grouping_ms: f64,
}

impl StageTimings {
    pub fn record(&mut self, stage: Stage, elapsed_ms: f64) {
        let slot = match stage {
            Stage::Validation => &mut self.validation_ms,
            Stage::Interpretation => &mut self.interpretation_ms,
            Stage::Filters => &mut self.filters_ms,
            Stage::Retrieval => &mut self.retrieval_ms,
            Stage::Expansion => &mut self.expansion_ms,
            Stage::PostFilter => &mut self.post_filter_ms,
            Stage::Grouping => &mut self.grouping_ms,
        };
        *slot = (elapsed_ms * 100.0).round() / 100.0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, f64)> {
        [
            (Stage::Validation, self.validation_ms),
            (Stage::Interpretation, self.interpretation_ms),
            (Stage::Filters, self.filters_ms),
            (Stage::Retrieval, self.retrieval_ms),
            (Stage::Expansion, self.expansion_ms),
            (Stage::PostFilter, self.post_filter_ms),
            (Stage::Grouping, self.grouping_ms),
        ]
        .into_iter()
    }
}

/// Retrieval accounting kept after the candidates move on
#[derive(Debug, Clone)]
pub struct RetrievalSummary {
    pub strategy: RetrievalStrategy,
    pub knn_limit: usize,
    pub drug_terms: Vec<String>,
    pub skipped_terms: Vec<String>,
    pub embedding: EmbeddingStats,
    /// Retrieval plus expansion store time
    pub store_latency_ms: f64,
    pub store_query: String,
    /// Vector hits before expansion
    pub hit_count: usize,
}

impl RetrievalSummary {
    fn from_retrieval(retrieval: &Retrieval) -> Self {
        Self {
            strategy: retrieval.strategy,
            knn_limit: retrieval.knn_limit,
            drug_terms: retrieval.drug_terms.clone(),
            skipped_terms: retrieval.skipped_terms.clone(),
            embedding: retrieval.embedding.clone(),
            store_latency_ms: retrieval.store_latency_ms,
            store_query: retrieval.store_query.clone(),
            hit_count: retrieval.candidates.len(),
        }
    }
}

/// Everything one search produced
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub query: SearchQuery,
    pub max_results: usize,
    pub interpretation: Interpretation,
    pub filters: BuiltFilters,
    pub retrieval: RetrievalSummary,
    pub expansion_debug: ExpansionDebug,
    pub post_filter: PostFilterStats,
    /// Candidates that survived post-filtering, in retrieval order
    pub raw_results: Vec<Candidate>,
    /// Ranked groups, truncated to `max_results`
    pub groups: Vec<DrugGroup>,
    /// Groups before truncation
    pub total_groups: usize,
    pub message: Option<String>,
    pub timings: StageTimings,
    pub total_latency_ms: f64,
}

/// Shared cursor so a deadline can name the stage it interrupted
struct StageCursor(AtomicU8);

impl StageCursor {
    fn new() -> Self {
        Self(AtomicU8::new(Stage::Validation.index()))
    }

    fn enter(&self, stage: Stage) {
        self.0.store(stage.index(), Ordering::Relaxed);
    }

    fn current(&self) -> Stage {
        Stage::from_index(self.0.load(Ordering::Relaxed))
    }
}

pub struct SearchPipeline {
    config: PipelineConfig,
    interpreter: QueryInterpreter,
    retriever: CandidateRetriever,
    expander: ClassExpander,
}

impl SearchPipeline {
    pub fn new(
        config: PipelineConfig,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn CandidateStore>,
    ) -> Self {
        let interpreter = QueryInterpreter::new(config.interpreter.clone(), llm);
        let retriever = CandidateRetriever::new(config.retriever.clone(), embedder, store.clone());
        let expander = ClassExpander::new(config.expander.clone(), store);
        Self {
            config,
            interpreter,
            retriever,
            expander,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one search. Validation happens before any collaborator call; on
    /// deadline expiry in-flight calls are dropped and no partial result is
    /// returned.
    pub async fn search(&self, query: SearchQuery) -> SearchResult<SearchOutcome> {
        let started = Instant::now();
        let cursor = StageCursor::new();
        let deadline = self.config.request_timeout;

        let result = match tokio::time::timeout(deadline, self.run(query, &cursor, started)).await {
            Ok(result) => result,
            Err(_) => {
                let stage = cursor.current();
                tracing::warn!(
                    stage = %stage,
                    timeout_ms = deadline.as_millis() as u64,
                    "Search deadline exceeded"
                );
                Err(SearchError::new(
                    stage,
                    Error::Timeout(deadline.as_millis() as u64),
                ))
            },
        };

        if let Err(err) = &result {
            if !err.is_validation() {
                tracing::error!(stage = %err.stage, error = %err.kind, "Search failed");
            }
        }
        result
    }

    async fn run(
        &self,
        query: SearchQuery,
        cursor: &StageCursor,
        started: Instant,
    ) -> SearchResult<SearchOutcome> {
        let mut timings = StageTimings::default();

        cursor.enter(Stage::Validation);
        let t = Instant::now();
        let max_results = query
            .validate(self.config.default_max_results, self.config.max_results_cap)
            .at(Stage::Validation)?;
        // Reject malformed user filters before paying for a model call
        FilterBuilder::build(&query.filters, &Map::new()).at(Stage::Validation)?;
        timings.record(Stage::Validation, elapsed_ms(t));

        cursor.enter(Stage::Interpretation);
        let t = Instant::now();
        let interpretation = self
            .interpreter
            .interpret(query.text.trim())
            .await
            .at(Stage::Interpretation)?;
        timings.record(Stage::Interpretation, elapsed_ms(t));

        cursor.enter(Stage::Filters);
        let t = Instant::now();
        let filters = FilterBuilder::build(&query.filters, &interpretation.structured.filters)
            .at(Stage::Filters)?;
        timings.record(Stage::Filters, elapsed_ms(t));

        cursor.enter(Stage::Retrieval);
        let t = Instant::now();
        let retrieval = self
            .retriever
            .retrieve(RetrievalRequest {
                expanded_query: &interpretation.expanded_query,
                collaborator_terms: &interpretation.collaborator_terms,
                selected_terms: &interpretation.selected_terms,
                filters: &filters.set,
                max_results,
            })
            .await
            .at(Stage::Retrieval)?;
        timings.record(Stage::Retrieval, elapsed_ms(t));
        let mut summary = RetrievalSummary::from_retrieval(&retrieval);

        cursor.enter(Stage::Expansion);
        let t = Instant::now();
        let limit = self
            .expander
            .limit_for(retrieval.strategy, retrieval.knn_limit);
        let expansion = self
            .expander
            .expand(
                retrieval.candidates,
                &interpretation.selected_terms,
                &filters.set,
                limit,
            )
            .await
            .at(Stage::Expansion)?;
        let expansion_ms = elapsed_ms(t);
        timings.record(Stage::Expansion, expansion_ms);
        summary.store_latency_ms += expansion_ms;

        cursor.enter(Stage::PostFilter);
        let t = Instant::now();
        let post_filter =
            PostFilter::from_request(filters.strength.as_deref(), &interpretation.selected_terms);
        let (raw_results, post_filter_stats) = post_filter.apply(expansion.candidates);
        timings.record(Stage::PostFilter, elapsed_ms(t));

        cursor.enter(Stage::Grouping);
        let t = Instant::now();
        let grouper = ResultGrouper::new(GroupingContext {
            literal_terms: interpretation.literal_terms().to_vec(),
            collaborator_terms: interpretation.collaborator_terms.clone(),
            term_source: interpretation.term_source,
            requested_ndc: filters.requested_ndc.clone(),
        });
        let mut groups = grouper.group(&raw_results);
        let total_groups = groups.len();
        groups.truncate(max_results);
        timings.record(Stage::Grouping, elapsed_ms(t));

        let message = groups.is_empty().then(|| NO_RESULTS_MESSAGE.to_string());
        let total_latency_ms = elapsed_ms(started);

        tracing::info!(
            query = %query.text,
            strategy = ?summary.strategy,
            hits = summary.hit_count,
            expanded = raw_results.len(),
            groups = groups.len(),
            total_groups,
            elapsed_ms = total_latency_ms,
            "Search finished"
        );

        Ok(SearchOutcome {
            query,
            max_results,
            interpretation,
            filters,
            retrieval: summary,
            expansion_debug: expansion.debug,
            post_filter: post_filter_stats,
            raw_results,
            groups,
            total_groups,
            message,
            timings,
            total_latency_ms,
        })
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
