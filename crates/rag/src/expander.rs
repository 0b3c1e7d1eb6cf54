//! Two-phase class expansion
//!
//! Anchors are retrieved candidates whose names contain a selected term. Their
//! pharmacologic classes pull in same-ingredient products, then their
//! therapeutic classes (minus a denylist of catch-all classes) pull in
//! therapeutic alternatives. Expansion never re-adds an NDC already present.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use drug_search_config::constants::search;
use drug_search_config::SearchConfig;
use drug_search_core::{
    Candidate, CandidateStore, Filter, FilterSet, Provenance, Result, TagField, TagFilter,
};

use crate::retriever::RetrievalStrategy;

/// Expander configuration
#[derive(Debug, Clone)]
pub struct ExpanderConfig {
    /// Single-concept limit = factor × KNN limit
    pub expansion_factor: usize,
    /// Multi-concept limit
    pub multi_concept_limit: usize,
    /// Therapeutic classes never expanded on (exact match)
    pub therapeutic_denylist: Vec<String>,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            expansion_factor: search::EXPANSION_FACTOR,
            multi_concept_limit: search::MULTI_CONCEPT_EXPANSION_LIMIT,
            therapeutic_denylist: search::THERAPEUTIC_DENYLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl From<&SearchConfig> for ExpanderConfig {
    fn from(config: &SearchConfig) -> Self {
        Self {
            expansion_factor: config.expansion_factor,
            multi_concept_limit: config.multi_concept_expansion_limit,
            therapeutic_denylist: config.therapeutic_denylist.clone(),
        }
    }
}

/// Expansion diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpansionDebug {
    pub initial_count: usize,
    pub anchor_count: usize,
    pub limit: usize,
    pub pharmacologic_classes: Vec<String>,
    pub pharmacologic_added: usize,
    pub therapeutic_classes_raw: Vec<String>,
    pub therapeutic_classes_filtered: Vec<String>,
    pub therapeutic_added: usize,
    /// True when a therapeutic query was issued
    pub therapeutic_queried: bool,
}

#[derive(Debug, Clone)]
pub struct Expansion {
    pub candidates: Vec<Candidate>,
    pub debug: ExpansionDebug,
}

pub struct ClassExpander {
    config: ExpanderConfig,
    store: Arc<dyn CandidateStore>,
}

impl ClassExpander {
    pub fn new(config: ExpanderConfig, store: Arc<dyn CandidateStore>) -> Self {
        Self { config, store }
    }

    /// Row limit for each expansion query
    pub fn limit_for(&self, strategy: RetrievalStrategy, knn_limit: usize) -> usize {
        match strategy {
            RetrievalStrategy::SingleConcept => self.config.expansion_factor * knn_limit,
            RetrievalStrategy::MultiConcept => self.config.multi_concept_limit,
        }
    }

    pub async fn expand(
        &self,
        candidates: Vec<Candidate>,
        selected_terms: &[String],
        filters: &FilterSet,
        limit: usize,
    ) -> Result<Expansion> {
        let mut stats = ExpansionDebug {
            initial_count: candidates.len(),
            limit,
            ..Default::default()
        };

        let anchors: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.matching_term(selected_terms).is_some())
            .collect();
        stats.anchor_count = anchors.len();

        stats.pharmacologic_classes = unique_trimmed(anchors.iter().map(|c| c.drug_class.as_str()));
        stats.therapeutic_classes_raw =
            unique_trimmed(anchors.iter().map(|c| c.therapeutic_class.as_str()));
        stats.therapeutic_classes_filtered = stats
            .therapeutic_classes_raw
            .iter()
            .filter(|class| !self.config.therapeutic_denylist.contains(class))
            .cloned()
            .collect();

        let mut seen: HashSet<String> = candidates.iter().map(|c| c.ndc.clone()).collect();
        let mut out = candidates;

        if let Some(tag) = TagFilter::new(TagField::DrugClass, stats.pharmacologic_classes.clone()) {
            let found = self
                .store
                .select(&filters.and(Filter::Tag(tag)), limit)
                .await?;
            stats.pharmacologic_added = absorb(
                &mut out,
                &mut seen,
                found,
                Provenance::PharmacologicExpansion,
            );
        }

        if let Some(tag) = TagFilter::new(
            TagField::TherapeuticClass,
            stats.therapeutic_classes_filtered.clone(),
        ) {
            stats.therapeutic_queried = true;
            let found = self
                .store
                .select(&filters.and(Filter::Tag(tag)), limit)
                .await?;
            stats.therapeutic_added =
                absorb(&mut out, &mut seen, found, Provenance::TherapeuticExpansion);
        }

        tracing::info!(
            anchors = stats.anchor_count,
            classes = ?stats.pharmacologic_classes,
            therapeutic = ?stats.therapeutic_classes_filtered,
            pharmacologic_added = stats.pharmacologic_added,
            therapeutic_added = stats.therapeutic_added,
            "Class expansion finished"
        );

        Ok(Expansion {
            candidates: out,
            debug: stats,
        })
    }
}

fn unique_trimmed<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let value = value.trim();
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

/// Append unseen candidates with the given provenance; returns how many were added
fn absorb(
    out: &mut Vec<Candidate>,
    seen: &mut HashSet<String>,
    found: Vec<Candidate>,
    provenance: Provenance,
) -> usize {
    let before = out.len();
    for candidate in found {
        if seen.insert(candidate.ndc.clone()) {
            out.push(candidate.with_provenance(provenance));
        }
    }
    out.len() - before
}
