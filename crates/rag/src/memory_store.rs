//! In-memory candidate store
//!
//! Holds drug records with their vectors and evaluates filter sets directly.
//! Used for local runs from a fixture file and as the store in tests.
//!
//! Matching rules follow the tag-index semantics of the production store:
//! tags compare case-insensitively with spaces folded to `_`, NDCs compare
//! digits-only, text filters match word prefixes.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use drug_search_core::{
    Candidate, CandidateStore, Embedder, Filter, FilterSet, KnnQuery, NumericField, StoreHit,
    TagField, TextField,
};

use crate::{cosine_distance, RagError};

struct Entry {
    candidate: Candidate,
    vector: Vec<f32>,
}

/// Fixture-backed store
#[derive(Default)]
pub struct InMemoryCandidateStore {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; a record with the same NDC is replaced
    pub fn insert(&self, candidate: Candidate, vector: Vec<f32>) {
        let mut entries = self.entries.write();
        let key = digits(&candidate.ndc);
        if let Some(existing) = entries.iter_mut().find(|e| digits(&e.candidate.ndc) == key) {
            *existing = Entry { candidate, vector };
        } else {
            entries.push(Entry { candidate, vector });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Build from raw records. Records carrying an `embedding` array use it;
    /// the rest are embedded from their names.
    pub async fn from_records(records: Vec<Value>, embedder: &dyn Embedder) -> Result<Self, RagError> {
        let store = Self::new();
        for record in records {
            let explicit = record
                .get("embedding")
                .and_then(|v| v.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|x| x.as_f64())
                        .map(|x| x as f32)
                        .collect::<Vec<f32>>()
                });

            let candidate =
                Candidate::decode(record).map_err(|e| RagError::Fixture(e.to_string()))?;

            let vector = match explicit {
                Some(vector) => vector,
                None => {
                    embedder
                        .embed(&record_text(&candidate))
                        .await
                        .map_err(|e| RagError::Embedding(e.to_string()))?
                        .vector
                },
            };

            store.insert(candidate, vector);
        }
        Ok(store)
    }

    /// Load a JSON or YAML list of records (chosen by file extension)
    pub async fn load(path: impl AsRef<Path>, embedder: &dyn Embedder) -> Result<Self, RagError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RagError::Fixture(format!("{}: {}", path.display(), e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let records: Vec<Value> = if is_yaml {
            serde_yaml::from_str(&raw).map_err(|e| RagError::Fixture(e.to_string()))?
        } else {
            serde_json::from_str(&raw).map_err(|e| RagError::Fixture(e.to_string()))?
        };

        let store = Self::from_records(records, embedder).await?;
        tracing::info!(path = %path.display(), records = store.len(), "Loaded fixture store");
        Ok(store)
    }
}

/// Text embedded for records without a stored vector
fn record_text(candidate: &Candidate) -> String {
    [
        candidate.drug_name.as_str(),
        candidate.brand_name.as_str(),
        candidate.generic_name.as_str(),
    ]
    .iter()
    .filter(|s| !s.is_empty())
    .copied()
    .collect::<Vec<&str>>()
    .join(" ")
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn fold_tag(s: &str) -> String {
    s.trim().to_uppercase().replace(' ', "_")
}

fn tag_value(candidate: &Candidate, field: TagField) -> String {
    match field {
        TagField::Ndc => digits(&candidate.ndc),
        TagField::DrugClass => fold_tag(&candidate.drug_class),
        TagField::TherapeuticClass => fold_tag(&candidate.therapeutic_class),
        TagField::DosageForm => fold_tag(&candidate.dosage_form),
        TagField::IsGeneric => candidate.is_generic.to_string(),
        TagField::DeaSchedule => fold_tag(&candidate.dea_schedule),
    }
}

fn text_value(candidate: &Candidate, field: TextField) -> &str {
    match field {
        TextField::DrugName => &candidate.drug_name,
        TextField::BrandName => &candidate.brand_name,
        TextField::GenericName => &candidate.generic_name,
    }
}

fn matches_filter(candidate: &Candidate, filter: &Filter) -> bool {
    match filter {
        Filter::Tag(tag) => {
            let actual = tag_value(candidate, tag.field);
            tag.values.iter().any(|v| {
                let wanted = match tag.field {
                    TagField::Ndc => digits(v),
                    TagField::IsGeneric => v.trim().to_lowercase(),
                    _ => fold_tag(v),
                };
                wanted == actual
            })
        },
        Filter::NumericRange(range) => {
            let value = match range.field {
                NumericField::GcnSeqno => candidate.gcn_seqno,
            };
            value.is_some_and(|v| range.contains(v as f64))
        },
        Filter::Text(text) => text.fields.iter().any(|field| {
            let value = text_value(candidate, *field).to_lowercase();
            let words: Vec<&str> = value
                .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '+'))
                .filter(|w| !w.is_empty())
                .collect();
            text.terms.iter().any(|term| {
                let term = term.to_lowercase();
                words.iter().any(|w| w.starts_with(&term))
            })
        }),
    }
}

fn matches_set(candidate: &Candidate, set: &FilterSet) -> bool {
    set.filters().iter().all(|f| matches_filter(candidate, f))
}

#[async_trait]
impl CandidateStore for InMemoryCandidateStore {
    async fn knn(&self, query: &KnnQuery) -> drug_search_core::Result<Vec<StoreHit>> {
        let entries = self.entries.read();
        let mut hits: Vec<StoreHit> = entries
            .iter()
            .filter(|e| matches_set(&e.candidate, &query.predicate))
            .map(|e| StoreHit {
                candidate: e.candidate.clone(),
                distance: cosine_distance(&query.vector, &e.vector),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(query.k);
        Ok(hits)
    }

    async fn select(
        &self,
        predicate: &FilterSet,
        limit: usize,
    ) -> drug_search_core::Result<Vec<Candidate>> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|e| matches_set(&e.candidate, predicate))
            .take(limit)
            .map(|e| e.candidate.clone())
            .collect())
    }

    async fn get(&self, ndc: &str) -> drug_search_core::Result<Option<Candidate>> {
        let key = digits(ndc);
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .find(|e| digits(&e.candidate.ndc) == key)
            .map(|e| e.candidate.clone()))
    }

    async fn ping(&self) -> drug_search_core::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
