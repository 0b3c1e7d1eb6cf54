//! Candidate store backed by Qdrant
//!
//! Drug records live as points whose payload carries the record fields and
//! whose vector is the record embedding. Typed filters translate to Qdrant
//! field conditions:
//!
//! ```text
//! TagFilter          → keyword match (any of), boolean match for is_generic
//! NumericRangeFilter → range with open bounds left unset
//! TextFilter         → nested `should` of full-text matches, one per field × term
//! ```
//!
//! [`QdrantCandidateStore::ensure_collection`] creates the payload indexes the
//! conditions rely on. The name fields get a full-text index with a prefix
//! tokenizer so text matches behave as prefix matches.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        condition::ConditionOneOf, r#match::MatchValue, value::Kind, Condition,
        CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance, FieldCondition,
        FieldType, Filter as QdrantFilter, Match, Range, RepeatedStrings, ScrollPointsBuilder,
        SearchPointsBuilder, TextIndexParamsBuilder, TokenizerType, Value as QdrantValue,
        VectorParamsBuilder,
    },
    Qdrant,
};
use serde_json::{Map, Number, Value};

use drug_search_config::constants::{endpoints, store};
use drug_search_config::{DistanceMetric, StoreConfig};
use drug_search_core::{
    Candidate, CandidateStore, Filter, FilterSet, KnnQuery, NumericField, StoreHit, TagField,
    TagFilter, TextField,
};

use crate::RagError;

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// Qdrant endpoint
    pub endpoint: String,
    pub collection: String,
    pub vector_dim: usize,
    pub distance: VectorDistance,
    /// API key (optional)
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::QDRANT_DEFAULT.to_string(),
            collection: store::DEFAULT_COLLECTION.to_string(),
            vector_dim: 1024,
            distance: VectorDistance::Cosine,
            api_key: None,
        }
    }
}

impl From<&StoreConfig> for VectorStoreConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            collection: config.collection.clone(),
            vector_dim: config.vector_dim,
            distance: config.distance.into(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        }
    }
}

/// Distance metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorDistance {
    Cosine,
    Euclidean,
    DotProduct,
}

impl VectorDistance {
    /// Qdrant reports similarities for cosine and dot, distances for euclid
    pub fn score_to_distance(&self, score: f32) -> f64 {
        match self {
            VectorDistance::Cosine | VectorDistance::DotProduct => 1.0 - score as f64,
            VectorDistance::Euclidean => score as f64,
        }
    }
}

impl From<VectorDistance> for Distance {
    fn from(d: VectorDistance) -> Self {
        match d {
            VectorDistance::Cosine => Distance::Cosine,
            VectorDistance::Euclidean => Distance::Euclid,
            VectorDistance::DotProduct => Distance::Dot,
        }
    }
}

impl From<DistanceMetric> for VectorDistance {
    fn from(d: DistanceMetric) -> Self {
        match d {
            DistanceMetric::Cosine => VectorDistance::Cosine,
            DistanceMetric::Euclid => VectorDistance::Euclidean,
            DistanceMetric::Dot => VectorDistance::DotProduct,
        }
    }
}

/// Qdrant candidate store
pub struct QdrantCandidateStore {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl QdrantCandidateStore {
    pub fn new(config: VectorStoreConfig) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create collection if not exists
    pub async fn ensure_collection(&self) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        if !exists {
            tracing::warn!(
                collection = %self.config.collection,
                "Collection missing, creating an empty one"
            );
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(
                            self.config.vector_dim as u64,
                            Distance::from(self.config.distance),
                        ),
                    ),
                )
                .await
                .map_err(|e| RagError::VectorStore(e.to_string()))?;
        }

        self.ensure_payload_indexes().await
    }

    /// Create the payload indexes filters run against. Qdrant treats an
    /// existing index with the same schema as a no-op.
    async fn ensure_payload_indexes(&self) -> Result<(), RagError> {
        for (field, field_type) in payload_index_plan() {
            let mut request =
                CreateFieldIndexCollectionBuilder::new(&self.config.collection, field, field_type)
                    .wait(true);
            if field_type == FieldType::Text {
                request = request.field_index_params(
                    TextIndexParamsBuilder::new(TokenizerType::Prefix)
                        .min_token_len(store::TEXT_INDEX_MIN_TOKEN_LEN)
                        .lowercase(true),
                );
            }

            self.client
                .create_field_index(request)
                .await
                .map_err(|e| RagError::VectorStore(format!("index {}: {}", field, e)))?;
            tracing::debug!(field, kind = ?field_type, "Payload index ensured");
        }
        Ok(())
    }

    async fn scroll(&self, predicate: &FilterSet, limit: usize) -> Result<Vec<Candidate>, RagError> {
        let mut builder = ScrollPointsBuilder::new(&self.config.collection)
            .limit(limit.min(u32::MAX as usize) as u32)
            .with_payload(true);

        if let Some(filter) = to_qdrant_filter(predicate) {
            builder = builder.filter(filter);
        }

        let response = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        response
            .result
            .into_iter()
            .map(|point| decode_payload(point.payload))
            .collect()
    }
}

#[async_trait]
impl CandidateStore for QdrantCandidateStore {
    async fn knn(&self, query: &KnnQuery) -> drug_search_core::Result<Vec<StoreHit>> {
        let mut search_builder = SearchPointsBuilder::new(
            &self.config.collection,
            query.vector.clone(),
            query.k as u64,
        )
        .with_payload(true);

        if let Some(filter) = to_qdrant_filter(&query.predicate) {
            search_builder = search_builder.filter(filter);
        }

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut hits = Vec::with_capacity(results.result.len());
        for point in results.result {
            let candidate = decode_payload(point.payload)?;
            hits.push(StoreHit {
                candidate,
                distance: self.config.distance.score_to_distance(point.score),
            });
        }

        Ok(hits)
    }

    async fn select(
        &self,
        predicate: &FilterSet,
        limit: usize,
    ) -> drug_search_core::Result<Vec<Candidate>> {
        Ok(self.scroll(predicate, limit).await?)
    }

    async fn get(&self, ndc: &str) -> drug_search_core::Result<Option<Candidate>> {
        let predicate = match TagFilter::new(TagField::Ndc, [ndc.replace('-', "")]) {
            Some(tag) => FilterSet::new().with(Filter::Tag(tag)),
            None => return Ok(None),
        };
        Ok(self.scroll(&predicate, 1).await?.into_iter().next())
    }

    async fn ping(&self) -> drug_search_core::Result<()> {
        self.client
            .health_check()
            .await
            .map_err(|e| RagError::Connection(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

/// Translate a filter set; `None` means match-all
/// Payload fields that filters touch, with the index type each needs
fn payload_index_plan() -> Vec<(&'static str, FieldType)> {
    let tags = [
        TagField::Ndc,
        TagField::DrugClass,
        TagField::TherapeuticClass,
        TagField::DosageForm,
        TagField::DeaSchedule,
    ];

    let mut plan: Vec<(&'static str, FieldType)> =
        tags.iter().map(|f| (f.as_str(), FieldType::Keyword)).collect();
    plan.push((TagField::IsGeneric.as_str(), FieldType::Bool));
    plan.push((NumericField::GcnSeqno.as_str(), FieldType::Integer));
    plan.extend(TextField::NAME_FIELDS.iter().map(|f| (f.as_str(), FieldType::Text)));
    plan
}

fn to_qdrant_filter(set: &FilterSet) -> Option<QdrantFilter> {
    let must: Vec<Condition> = set.filters().iter().filter_map(to_condition).collect();
    if must.is_empty() {
        None
    } else {
        Some(QdrantFilter {
            must,
            ..Default::default()
        })
    }
}

fn field_condition(key: &str, match_value: MatchValue) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(match_value),
            }),
            ..Default::default()
        })),
    }
}

fn to_condition(filter: &Filter) -> Option<Condition> {
    match filter {
        Filter::Tag(tag) if tag.field == TagField::IsGeneric => {
            let wants_true = tag.values.iter().any(|v| v == "true");
            let wants_false = tag.values.iter().any(|v| v == "false");
            match (wants_true, wants_false) {
                (true, false) => Some(field_condition("is_generic", MatchValue::Boolean(true))),
                (false, true) => Some(field_condition("is_generic", MatchValue::Boolean(false))),
                // both or neither: no restriction
                _ => None,
            }
        },
        Filter::Tag(tag) => Some(field_condition(
            tag.field.as_str(),
            MatchValue::Keywords(RepeatedStrings {
                strings: tag.values.clone(),
            }),
        )),
        Filter::NumericRange(range) => Some(Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: range.field.as_str().to_string(),
                range: Some(Range {
                    gte: range.start.is_finite().then_some(range.start),
                    lte: range.end.is_finite().then_some(range.end),
                    ..Default::default()
                }),
                ..Default::default()
            })),
        }),
        Filter::Text(text) => {
            let should: Vec<Condition> = text
                .terms
                .iter()
                .flat_map(|term| {
                    text.fields
                        .iter()
                        .map(move |field| field_condition(field.as_str(), MatchValue::Text(term.clone())))
                })
                .collect();
            Some(Condition {
                condition_one_of: Some(ConditionOneOf::Filter(QdrantFilter {
                    should,
                    ..Default::default()
                })),
            })
        },
    }
}

fn decode_payload(payload: HashMap<String, QdrantValue>) -> Result<Candidate, RagError> {
    let object: Map<String, Value> = payload
        .into_iter()
        .map(|(k, v)| (k, to_json(v)))
        .collect();
    Candidate::decode(Value::Object(object)).map_err(|e| RagError::VectorStore(e.to_string()))
}

fn to_json(value: QdrantValue) -> Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(list.values.into_iter().map(to_json).collect()),
        Some(Kind::StructValue(st)) => Value::Object(
            st.fields
                .into_iter()
                .map(|(k, v)| (k, to_json(v)))
                .collect(),
        ),
    }
}
