//! Hybrid candidate retrieval
//!
//! Combines filtered vector search with a lexical name gate.
//!
//! - **Single-concept** (at most two drug-like terms): one embedding of the
//!   expanded query, one KNN whose predicate is the filter set AND an OR of
//!   name-prefix matches over the selected terms.
//! - **Multi-concept** (three or more drug-like terms): one embedding and one
//!   gated KNN per term, run concurrently and merged in term order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;

use drug_search_config::constants::search;
use drug_search_config::SearchConfig;
use drug_search_core::terms::{drug_like_terms, gate_terms, is_gate_term};
use drug_search_core::{
    Candidate, CandidateStore, Embedder, Filter, FilterSet, KnnQuery, Result, TextFilter,
};

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// KNN k = multiplier × max_results (single-concept)
    pub candidate_multiplier: usize,
    /// KNN k per term (multi-concept)
    pub per_term_limit: usize,
    /// Drug-like terms needed for the multi-concept strategy
    pub multi_concept_min_terms: usize,
    pub drug_term_min_exclusive: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: search::CANDIDATE_MULTIPLIER,
            per_term_limit: search::PER_TERM_LIMIT,
            multi_concept_min_terms: search::MULTI_CONCEPT_MIN_TERMS,
            drug_term_min_exclusive: search::DRUG_TERM_MIN_EXCLUSIVE,
        }
    }
}

impl From<&SearchConfig> for RetrieverConfig {
    fn from(config: &SearchConfig) -> Self {
        Self {
            candidate_multiplier: config.candidate_multiplier,
            per_term_limit: config.per_term_limit,
            multi_concept_min_terms: config.multi_concept_min_terms,
            drug_term_min_exclusive: search::DRUG_TERM_MIN_EXCLUSIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    SingleConcept,
    MultiConcept,
}

/// Inputs for one retrieval
#[derive(Debug, Clone, Copy)]
pub struct RetrievalRequest<'a> {
    /// Text embedded in the single-concept strategy
    pub expanded_query: &'a str,
    /// Terms from the interpretation; drug-like ones pick the strategy
    pub collaborator_terms: &'a [String],
    /// Terms chosen by the term-selection policy; they feed the lexical gate
    pub selected_terms: &'a [String],
    pub filters: &'a FilterSet,
    pub max_results: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingStats {
    /// Summed over all embedding calls
    pub latency_ms: f64,
    pub model: String,
    pub dimensions: usize,
    pub calls: usize,
}

/// Retrieved vector hits plus accounting
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Unique by NDC, best-first within each search
    pub candidates: Vec<Candidate>,
    pub strategy: RetrievalStrategy,
    /// k used per KNN call
    pub knn_limit: usize,
    pub drug_terms: Vec<String>,
    /// Multi-concept terms whose embedding failed
    pub skipped_terms: Vec<String>,
    pub embedding: EmbeddingStats,
    /// Summed over all store calls
    pub store_latency_ms: f64,
    /// Readable rendering of the predicate(s) sent to the store
    pub store_query: String,
}

/// Hits from one per-term search
struct TermHits {
    candidates: Vec<Candidate>,
    embed_ms: f64,
    store_ms: f64,
    model: String,
    dimensions: usize,
    predicate: String,
}

/// Hybrid retriever over a candidate store
pub struct CandidateRetriever {
    config: RetrieverConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn CandidateStore>,
}

impl CandidateRetriever {
    pub fn new(
        config: RetrieverConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn CandidateStore>,
    ) -> Self {
        Self {
            config,
            embedder,
            store,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Pick the strategy for the given interpretation terms
    pub fn strategy_for(&self, collaborator_terms: &[String]) -> (RetrievalStrategy, Vec<String>) {
        let drug_terms = drug_like_terms(collaborator_terms, self.config.drug_term_min_exclusive);
        let strategy = if drug_terms.len() >= self.config.multi_concept_min_terms {
            RetrievalStrategy::MultiConcept
        } else {
            RetrievalStrategy::SingleConcept
        };
        (strategy, drug_terms)
    }

    pub async fn retrieve(&self, request: RetrievalRequest<'_>) -> Result<Retrieval> {
        let (strategy, drug_terms) = self.strategy_for(request.collaborator_terms);

        tracing::debug!(
            strategy = ?strategy,
            drug_terms = ?drug_terms,
            "Retrieval strategy selected"
        );

        match strategy {
            RetrievalStrategy::SingleConcept => self.single_concept(request, drug_terms).await,
            RetrievalStrategy::MultiConcept => self.multi_concept(request, drug_terms).await,
        }
    }

    async fn single_concept(
        &self,
        request: RetrievalRequest<'_>,
        drug_terms: Vec<String>,
    ) -> Result<Retrieval> {
        let knn_limit = self.config.candidate_multiplier * request.max_results;

        let embed_start = Instant::now();
        let embedding = self.embedder.embed(request.expanded_query).await?;
        let embed_ms = embed_start.elapsed().as_secs_f64() * 1000.0;

        let predicate = match TextFilter::names(gate_terms(request.selected_terms)) {
            Some(gate) => request.filters.and(Filter::Text(gate)),
            None => request.filters.clone(),
        };
        let store_query = predicate.to_string();

        let store_start = Instant::now();
        let hits = self
            .store
            .knn(&KnnQuery {
                predicate,
                vector: embedding.vector.clone(),
                k: knn_limit,
            })
            .await?;
        let store_ms = store_start.elapsed().as_secs_f64() * 1000.0;

        let mut seen = HashSet::new();
        let candidates: Vec<Candidate> = hits
            .into_iter()
            .filter(|hit| seen.insert(hit.candidate.ndc.clone()))
            .map(|hit| hit.candidate.with_distance(hit.distance))
            .collect();

        tracing::info!(
            hits = candidates.len(),
            k = knn_limit,
            store_query = %store_query,
            elapsed_ms = embed_ms + store_ms,
            "Single-concept retrieval finished"
        );

        Ok(Retrieval {
            candidates,
            strategy: RetrievalStrategy::SingleConcept,
            knn_limit,
            drug_terms,
            skipped_terms: Vec::new(),
            embedding: EmbeddingStats {
                latency_ms: embed_ms,
                dimensions: embedding.dimensions(),
                model: embedding.model,
                calls: 1,
            },
            store_latency_ms: store_ms,
            store_query,
        })
    }

    async fn multi_concept(
        &self,
        request: RetrievalRequest<'_>,
        drug_terms: Vec<String>,
    ) -> Result<Retrieval> {
        let knn_limit = self.config.per_term_limit;

        let searches = drug_terms
            .iter()
            .map(|term| self.search_term(term, request.filters, knn_limit));
        let outcomes = join_all(searches).await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut skipped_terms = Vec::new();
        let mut embedding = EmbeddingStats::default();
        let mut store_latency_ms = 0.0;
        let mut predicates = Vec::new();

        for (term, outcome) in drug_terms.iter().zip(outcomes) {
            let Some(term_hits) = outcome? else {
                skipped_terms.push(term.clone());
                continue;
            };

            embedding.latency_ms += term_hits.embed_ms;
            embedding.calls += 1;
            embedding.model = term_hits.model;
            embedding.dimensions = term_hits.dimensions;
            store_latency_ms += term_hits.store_ms;
            predicates.push(term_hits.predicate);

            for candidate in term_hits.candidates {
                if seen.insert(candidate.ndc.clone()) {
                    candidates.push(candidate);
                }
            }
        }

        tracing::info!(
            terms = drug_terms.len(),
            skipped = skipped_terms.len(),
            hits = candidates.len(),
            k = knn_limit,
            "Multi-concept retrieval finished"
        );

        Ok(Retrieval {
            candidates,
            strategy: RetrievalStrategy::MultiConcept,
            knn_limit,
            drug_terms,
            skipped_terms,
            embedding,
            store_latency_ms,
            store_query: predicates.join(" ; "),
        })
    }

    /// One gated KNN for a single term. `Ok(None)` when the term could not
    /// be embedded; store failures propagate.
    async fn search_term(
        &self,
        term: &str,
        filters: &FilterSet,
        k: usize,
    ) -> Result<Option<TermHits>> {
        let embed_start = Instant::now();
        let embedding = match self.embedder.embed(term).await {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!(term, error = %err, "Embedding failed, skipping term");
                return Ok(None);
            },
        };
        let embed_ms = embed_start.elapsed().as_secs_f64() * 1000.0;

        let gate = if is_gate_term(term) {
            TextFilter::names(vec![term.to_string()])
        } else {
            None
        };
        let predicate = match gate {
            Some(gate) => filters.and(Filter::Text(gate)),
            None => filters.clone(),
        };
        let rendered = predicate.to_string();

        let store_start = Instant::now();
        let hits = self
            .store
            .knn(&KnnQuery {
                predicate,
                vector: embedding.vector.clone(),
                k,
            })
            .await?;
        let store_ms = store_start.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(term, hits = hits.len(), "Per-term search finished");

        Ok(Some(TermHits {
            candidates: hits
                .into_iter()
                .map(|hit| hit.candidate.with_distance(hit.distance))
                .collect(),
            embed_ms,
            store_ms,
            dimensions: embedding.dimensions(),
            model: embedding.model,
            predicate: rendered,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HashEmbedder, InMemoryCandidateStore};
    use async_trait::async_trait;
    use drug_search_core::{Embedding, Error, Provenance, StoreHit};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn store_with(records: &[(&str, &str, &str)]) -> Arc<InMemoryCandidateStore> {
        let embedder = HashEmbedder::with_dim(256);
        let store = InMemoryCandidateStore::new();
        for (ndc, name, class) in records {
            let candidate = Candidate::new(*ndc, *name).drug_class(*class);
            store.insert(candidate, embedder.embed_text(name));
        }
        Arc::new(store)
    }

    fn retriever(store: Arc<dyn CandidateStore>, embedder: Arc<dyn Embedder>) -> CandidateRetriever {
        CandidateRetriever::new(RetrieverConfig::default(), embedder, store)
    }

    /// Embedder that refuses one term
    struct FlakyEmbedder {
        inner: HashEmbedder,
        refuse: &'static str,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding> {
            if text == self.refuse {
                return Err(Error::Embedding("connection reset".to_string()));
            }
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CandidateStore for BrokenStore {
        async fn knn(&self, _query: &KnnQuery) -> Result<Vec<StoreHit>> {
            Err(Error::Store("index offline".to_string()))
        }

        async fn select(&self, _predicate: &FilterSet, _limit: usize) -> Result<Vec<Candidate>> {
            Err(Error::Store("index offline".to_string()))
        }

        async fn get(&self, _ndc: &str) -> Result<Option<Candidate>> {
            Ok(None)
        }

        async fn ping(&self) -> Result<()> {
            Err(Error::Store("index offline".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_strategy_threshold() {
        let r = retriever(store_with(&[]), Arc::new(HashEmbedder::default()));
        let (strategy, drug_terms) = r.strategy_for(&strings(&["crestor", "200mg", "tablet"]));
        assert_eq!(strategy, RetrievalStrategy::SingleConcept);
        assert_eq!(drug_terms, strings(&["crestor", "200mg"]));

        let (strategy, _) =
            r.strategy_for(&strings(&["atorvastatin", "rosuvastatin", "simvastatin"]));
        assert_eq!(strategy, RetrievalStrategy::MultiConcept);
    }

    #[tokio::test]
    async fn test_single_concept_gate_excludes_unrelated_names() {
        let store = store_with(&[
            ("1", "CRESTOR 10 MG TABLET", "ROSUVASTATIN"),
            ("2", "CORTISONE 25 MG TABLET", "CORTISONE"),
        ]);
        let r = retriever(store, Arc::new(HashEmbedder::with_dim(256)));
        let terms = strings(&["crestor"]);
        let retrieval = r
            .retrieve(RetrievalRequest {
                expanded_query: "crestor",
                collaborator_terms: &terms,
                selected_terms: &terms,
                filters: &FilterSet::new(),
                max_results: 20,
            })
            .await
            .unwrap();

        assert_eq!(retrieval.knn_limit, 60);
        assert_eq!(retrieval.candidates.len(), 1);
        assert_eq!(retrieval.candidates[0].ndc, "1");
        assert_eq!(retrieval.candidates[0].provenance, Provenance::Vector);
        assert!(retrieval.candidates[0].similarity.is_some());
        assert!(retrieval.store_query.contains("@brand_name:crestor*"));
    }

    #[tokio::test]
    async fn test_no_gate_terms_matches_all() {
        let store = store_with(&[
            ("1", "CRESTOR 10 MG TABLET", "ROSUVASTATIN"),
            ("2", "CORTISONE 25 MG TABLET", "CORTISONE"),
        ]);
        let r = retriever(store, Arc::new(HashEmbedder::with_dim(256)));
        let terms = strings(&["10", "mg"]);
        let retrieval = r
            .retrieve(RetrievalRequest {
                expanded_query: "10 mg",
                collaborator_terms: &terms,
                selected_terms: &terms,
                filters: &FilterSet::new(),
                max_results: 5,
            })
            .await
            .unwrap();
        assert_eq!(retrieval.candidates.len(), 2);
        assert_eq!(retrieval.store_query, "*");
    }

    #[tokio::test]
    async fn test_multi_concept_merges_in_term_order() {
        let store = store_with(&[
            ("1", "ATORVASTATIN 10 MG TABLET", "ATORVASTATIN"),
            ("2", "ROSUVASTATIN 10 MG TABLET", "ROSUVASTATIN"),
            ("3", "SIMVASTATIN 20 MG TABLET", "SIMVASTATIN"),
            ("4", "LISINOPRIL 10 MG TABLET", "LISINOPRIL"),
        ]);
        let r = retriever(store, Arc::new(HashEmbedder::with_dim(256)));
        let terms = strings(&["simvastatin", "atorvastatin", "rosuvastatin"]);
        let retrieval = r
            .retrieve(RetrievalRequest {
                expanded_query: "simvastatin atorvastatin rosuvastatin",
                collaborator_terms: &terms,
                selected_terms: &terms,
                filters: &FilterSet::new(),
                max_results: 20,
            })
            .await
            .unwrap();

        assert_eq!(retrieval.strategy, RetrievalStrategy::MultiConcept);
        assert_eq!(retrieval.knn_limit, 20);
        let ndcs: Vec<&str> = retrieval.candidates.iter().map(|c| c.ndc.as_str()).collect();
        assert_eq!(ndcs, vec!["3", "1", "2"]);
        assert_eq!(retrieval.embedding.calls, 3);
    }

    #[tokio::test]
    async fn test_multi_concept_skips_failed_embedding() {
        let store = store_with(&[
            ("1", "ATORVASTATIN 10 MG TABLET", "ATORVASTATIN"),
            ("2", "ROSUVASTATIN 10 MG TABLET", "ROSUVASTATIN"),
            ("3", "SIMVASTATIN 20 MG TABLET", "SIMVASTATIN"),
        ]);
        let embedder = FlakyEmbedder {
            inner: HashEmbedder::with_dim(256),
            refuse: "rosuvastatin",
        };
        let r = retriever(store, Arc::new(embedder));
        let terms = strings(&["atorvastatin", "rosuvastatin", "simvastatin"]);
        let retrieval = r
            .retrieve(RetrievalRequest {
                expanded_query: "statins",
                collaborator_terms: &terms,
                selected_terms: &terms,
                filters: &FilterSet::new(),
                max_results: 20,
            })
            .await
            .unwrap();

        assert_eq!(retrieval.skipped_terms, strings(&["rosuvastatin"]));
        let ndcs: Vec<&str> = retrieval.candidates.iter().map(|c| c.ndc.as_str()).collect();
        assert_eq!(ndcs, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let r = retriever(Arc::new(BrokenStore), Arc::new(HashEmbedder::default()));
        let terms = strings(&["atorvastatin", "rosuvastatin", "simvastatin"]);
        let result = r
            .retrieve(RetrievalRequest {
                expanded_query: "statins",
                collaborator_terms: &terms,
                selected_terms: &terms,
                filters: &FilterSet::new(),
                max_results: 20,
            })
            .await;
        assert!(matches!(result, Err(Error::Store(_))));
    }
}
