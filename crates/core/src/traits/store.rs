//! Candidate store capability set

use crate::{Candidate, FilterSet, Result};
use async_trait::async_trait;

/// Filtered nearest-neighbour query
#[derive(Debug, Clone)]
pub struct KnnQuery {
    /// Pre-filter; empty matches everything
    pub predicate: FilterSet,
    pub vector: Vec<f32>,
    pub k: usize,
}

/// KNN hit with the store's distance (lower is closer)
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub candidate: Candidate,
    pub distance: f64,
}

/// Persistent drug index
///
/// Implementations:
/// - `QdrantCandidateStore` - Qdrant collection with payload indexes
/// - `InMemoryCandidateStore` - fixture store for tests and local runs
///
/// Adapters decode their wire payloads with `Candidate::decode` and report
/// distances, not native similarity scores.
#[async_trait]
pub trait CandidateStore: Send + Sync + 'static {
    /// Top-`k` records by ascending distance among those matching the predicate
    async fn knn(&self, query: &KnnQuery) -> Result<Vec<StoreHit>>;

    /// Up to `limit` records matching the predicate, in store order
    async fn select(&self, predicate: &FilterSet, limit: usize) -> Result<Vec<Candidate>>;

    /// Exact NDC lookup
    async fn get(&self, ndc: &str) -> Result<Option<Candidate>>;

    /// Reachability probe for readiness checks
    async fn ping(&self) -> Result<()>;

    fn name(&self) -> &str;
}
