//! End-to-end searches over the fixture catalog with a scripted model

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use drug_search_core::{
    Candidate, CandidateStore, Completion, CompletionRequest, Embedder, Embedding, Error,
    FilterSet, KnnQuery, LanguageModel, MatchType, Result, SearchQuery, StoreHit, TermSource,
};
use drug_search_pipeline::{
    GroupingContext, PipelineConfig, ResultGrouper, SearchPipeline, SearchResponse, Stage,
    NO_RESULTS_MESSAGE,
};
use drug_search_rag::{HashEmbedder, InMemoryCandidateStore, RetrievalStrategy};

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/drugs.json");

/// Replies keyed by the query quoted in the user turn
struct ScriptedLlm {
    script: Vec<(String, String)>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(script: &[(&str, Value)]) -> Self {
        Self {
            script: script
                .iter()
                .map(|(q, reply)| (q.to_string(), reply.to_string()))
                .collect(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn raw(query: &str, reply: &str) -> Self {
        Self {
            script: vec![(query.to_string(), reply.to_string())],
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = self
            .script
            .iter()
            .find(|(query, _)| request.user.contains(&format!("\"{}\"", query)))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| Error::Llm("no scripted reply".to_string()))?;
        Ok(Completion {
            text,
            model: "claude-sonnet-4-20250514".to_string(),
            input_tokens: 850,
            output_tokens: 60,
            latency_ms: 310.0,
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Hash embeddings, except for one term that always fails
struct FlakyEmbedder {
    inner: HashEmbedder,
    failing_term: &'static str,
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text == self.failing_term {
            return Err(Error::Embedding("model overloaded".to_string()));
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

struct UnreachableStore;

#[async_trait]
impl CandidateStore for UnreachableStore {
    async fn knn(&self, _query: &KnnQuery) -> Result<Vec<StoreHit>> {
        Err(Error::Store("connection refused".to_string()))
    }

    async fn select(&self, _predicate: &FilterSet, _limit: usize) -> Result<Vec<Candidate>> {
        Err(Error::Store("connection refused".to_string()))
    }

    async fn get(&self, _ndc: &str) -> Result<Option<Candidate>> {
        Err(Error::Store("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<()> {
        Err(Error::Store("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}

fn embedder() -> HashEmbedder {
    HashEmbedder::with_dim(256)
}

async fn fixture_store() -> InMemoryCandidateStore {
    InMemoryCandidateStore::load(FIXTURE, &embedder())
        .await
        .expect("fixture loads")
}

fn insert(store: &InMemoryCandidateStore, record: Value) {
    let candidate = Candidate::decode(record).expect("valid record");
    let text = format!("{} {}", candidate.drug_name, candidate.generic_name);
    store.insert(candidate, embedder().embed_text(&text));
}

fn pipeline(llm: Arc<ScriptedLlm>, store: InMemoryCandidateStore) -> SearchPipeline {
    SearchPipeline::new(
        PipelineConfig::default(),
        llm,
        Arc::new(embedder()),
        Arc::new(store),
    )
}

const STATINS: &[&str] = &[
    "atorvastatin",
    "rosuvastatin",
    "simvastatin",
    "pravastatin",
    "lovastatin",
];

fn statin_reply() -> Value {
    json!({
        "search_text": STATINS.join(" "),
        "search_terms": STATINS,
        "filters": {},
        "corrections": [],
        "confidence": 0.9
    })
}

#[tokio::test]
async fn test_brand_query_ranks_brand_first_then_same_ingredient() {
    let llm = Arc::new(ScriptedLlm::new(&[(
        "crestor",
        json!({"search_text": "crestor", "filters": {}, "corrections": []}),
    )]));
    let pipeline = pipeline(llm.clone(), fixture_store().await);

    let outcome = pipeline.search(SearchQuery::new("crestor")).await.unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(outcome.interpretation.term_source, TermSource::Original);
    assert_eq!(outcome.retrieval.strategy, RetrievalStrategy::SingleConcept);

    let first = &outcome.groups[0];
    assert_eq!(first.group_id, "brand:CRESTOR");
    assert_eq!(first.match_type, MatchType::Exact);
    assert_eq!(first.variants.len(), 4);

    let generic = outcome
        .groups
        .iter()
        .find(|g| g.group_id == "generic:ROSUVASTATIN_CALCIUM")
        .expect("same-ingredient generics are expanded in");
    assert_eq!(generic.match_type, MatchType::Pharmacologic);
    assert_eq!(generic.manufacturer_groups.len(), 2);

    // Other statins arrive through the therapeutic class and rank last
    let lipitor = outcome
        .groups
        .iter()
        .position(|g| g.group_id == "brand:LIPITOR")
        .expect("therapeutic alternatives are expanded in");
    assert_eq!(
        outcome.groups[lipitor].match_type,
        MatchType::TherapeuticAlternative
    );
    assert!(outcome.expansion_debug.therapeutic_queried);
    assert!(outcome
        .groups
        .iter()
        .all(|g| g.group_id != "generic:LISINOPRIL"));
}

#[tokio::test]
async fn test_misspelled_query_with_strength_keeps_only_matching_strength() {
    let store = fixture_store().await;
    insert(
        &store,
        json!({
            "ndc": "00310075999",
            "drug_name": "CRESTOR 200 MG TABLET",
            "brand_name": "CRESTOR",
            "generic_name": "rosuvastatin calcium",
            "drug_class": "ROSUVASTATIN_CALCIUM",
            "therapeutic_class": "Antihyperlipidemic",
            "gcn_seqno": 51790,
            "dosage_form": "TABLET",
            "strength": "200 MG",
            "manufacturer_name": "ASTRAZENECA",
            "is_generic": "false"
        }),
    );
    let llm = Arc::new(ScriptedLlm::new(&[(
        "crester 200mg",
        json!({
            "search_text": "crestor",
            "filters": {"strength": "200mg"},
            "corrections": ["crester → crestor"],
            "confidence": 0.95
        }),
    )]));
    let pipeline = pipeline(llm, store);

    let outcome = pipeline
        .search(SearchQuery::new("crester 200mg"))
        .await
        .unwrap();

    assert_eq!(
        outcome.interpretation.structured.corrections,
        vec!["crester → crestor".to_string()]
    );
    assert_eq!(outcome.interpretation.term_source, TermSource::Corrected);
    assert_eq!(outcome.filters.strength.as_deref(), Some("200mg"));
    assert!(outcome.post_filter.strength_removed > 0);

    assert!(!outcome.groups.is_empty());
    assert_eq!(outcome.groups[0].group_id, "brand:CRESTOR");
    assert_eq!(outcome.groups[0].match_type, MatchType::Exact);
    for group in &outcome.groups {
        for variant in &group.variants {
            assert_eq!(variant.strength, "200 MG", "{}", variant.label);
        }
    }
}

#[tokio::test]
async fn test_condition_query_uses_multi_concept_retrieval() {
    let llm = Arc::new(ScriptedLlm::new(&[("high cholesterol", statin_reply())]));
    let pipeline = pipeline(llm, fixture_store().await);

    let outcome = pipeline
        .search(SearchQuery::new("high cholesterol"))
        .await
        .unwrap();

    assert_eq!(outcome.interpretation.term_source, TermSource::Expanded);
    assert_eq!(outcome.retrieval.strategy, RetrievalStrategy::MultiConcept);
    assert_eq!(outcome.retrieval.drug_terms.len(), 5);
    assert_eq!(outcome.retrieval.embedding.calls, 5);
    assert!(!outcome.groups.is_empty());
    assert!(outcome
        .groups
        .iter()
        .all(|g| g.match_type != MatchType::Exact));
    assert!(outcome
        .groups
        .iter()
        .any(|g| g.group_id == "brand:CRESTOR"));
}

#[tokio::test]
async fn test_multi_concept_skips_terms_that_fail_to_embed() {
    let llm = Arc::new(ScriptedLlm::new(&[("high cholesterol", statin_reply())]));
    let pipeline = SearchPipeline::new(
        PipelineConfig::default(),
        llm,
        Arc::new(FlakyEmbedder {
            inner: embedder(),
            failing_term: "simvastatin",
        }),
        Arc::new(fixture_store().await),
    );

    let outcome = pipeline
        .search(SearchQuery::new("high cholesterol"))
        .await
        .unwrap();

    assert_eq!(outcome.retrieval.skipped_terms, vec!["simvastatin".to_string()]);
    assert_eq!(outcome.retrieval.embedding.calls, 4);
    assert!(!outcome.groups.is_empty());
}

#[tokio::test]
async fn test_truncation_keeps_top_ranked_groups() {
    let store = InMemoryCandidateStore::new();
    for i in 0..30 {
        insert(
            &store,
            json!({
                "ndc": format!("{:011}", 70000000000u64 + i),
                "drug_name": format!("ZENTRAVIR {} MG TABLET", (i + 1) * 5),
                "generic_name": format!("zentravir form {}", i),
                "drug_class": format!("ZENTRAVIR_{}", i),
                "therapeutic_class": "Antiviral",
                "dosage_form": "TABLET",
                "strength": format!("{} MG", (i + 1) * 5),
                "manufacturer_name": "ACME LABS",
                "is_generic": true
            }),
        );
    }
    let llm = Arc::new(ScriptedLlm::new(&[(
        "zentravir",
        json!({"search_text": "zentravir"}),
    )]));
    let pipeline = pipeline(llm, store);

    let outcome = pipeline
        .search(SearchQuery::new("zentravir").with_max_results(5))
        .await
        .unwrap();

    assert_eq!(outcome.max_results, 5);
    assert_eq!(outcome.retrieval.knn_limit, 15);
    assert_eq!(outcome.raw_results.len(), 30);
    assert_eq!(outcome.total_groups, 30);
    assert_eq!(outcome.groups.len(), 5);

    let grouper = ResultGrouper::new(GroupingContext {
        literal_terms: outcome.interpretation.literal_terms().to_vec(),
        collaborator_terms: outcome.interpretation.collaborator_terms.clone(),
        term_source: outcome.interpretation.term_source,
        requested_ndc: None,
    });
    let full = grouper.group(&outcome.raw_results);
    assert_eq!(full.len(), 30);
    assert_eq!(outcome.groups, full[..5].to_vec());
}

#[tokio::test]
async fn test_denylisted_class_is_never_expanded() {
    let llm = Arc::new(ScriptedLlm::new(&[(
        "menthol",
        json!({"search_text": "menthol"}),
    )]));
    let pipeline = pipeline(llm, fixture_store().await);

    let outcome = pipeline.search(SearchQuery::new("menthol")).await.unwrap();

    assert_eq!(outcome.expansion_debug.anchor_count, 1);
    assert_eq!(
        outcome.expansion_debug.therapeutic_classes_raw,
        vec!["Miscellaneous".to_string()]
    );
    assert!(outcome.expansion_debug.therapeutic_classes_filtered.is_empty());
    assert!(!outcome.expansion_debug.therapeutic_queried);
    assert_eq!(outcome.expansion_debug.therapeutic_added, 0);

    // Menthol itself is a bulk ingredient and is dropped before grouping
    assert_eq!(outcome.post_filter.non_prescribable_removed, 1);
    assert!(outcome.groups.is_empty());
    assert_eq!(outcome.message.as_deref(), Some(NO_RESULTS_MESSAGE));
}

#[tokio::test]
async fn test_validation_happens_before_any_model_call() {
    let llm = Arc::new(ScriptedLlm::new(&[("crestor", json!({}))]));
    let pipeline = pipeline(llm.clone(), fixture_store().await);

    let err = pipeline.search(SearchQuery::new("   ")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Validation);
    assert!(err.is_validation());

    let err = pipeline
        .search(SearchQuery::new("crestor").with_max_results(101))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Validation);

    let err = pipeline
        .search(SearchQuery::new("crestor").with_max_results(0))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Validation);

    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_invalid_user_filter_is_rejected_before_model_call() {
    let llm = Arc::new(ScriptedLlm::new(&[("crestor", json!({"search_text": "crestor"}))]));
    let pipeline = pipeline(llm.clone(), fixture_store().await);

    let query = SearchQuery::new("crestor").with_filter("gcn_seqno", json!([900, 100]));
    let err = pipeline.search(query).await.unwrap_err();
    assert_eq!(err.stage, Stage::Validation);
    assert!(err.is_validation());
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_invalid_model_filter_fails_at_filter_stage() {
    let llm = Arc::new(ScriptedLlm::new(&[(
        "crestor",
        json!({"search_text": "crestor", "filters": {"gcn_seqno": "not a number"}}),
    )]));
    let pipeline = pipeline(llm, fixture_store().await);

    let err = pipeline.search(SearchQuery::new("crestor")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Filters);
}

#[tokio::test]
async fn test_deadline_names_interrupted_stage() {
    let llm = Arc::new(
        ScriptedLlm::new(&[("crestor", json!({"search_text": "crestor"}))])
            .slow(Duration::from_millis(500)),
    );
    let config = PipelineConfig {
        request_timeout: Duration::from_millis(20),
        ..PipelineConfig::default()
    };
    let pipeline = SearchPipeline::new(
        config,
        llm,
        Arc::new(embedder()),
        Arc::new(fixture_store().await),
    );

    let err = pipeline.search(SearchQuery::new("crestor")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Interpretation);
    assert!(err.is_timeout());
    assert_eq!(err.kind, Error::Timeout(20));
    assert_eq!(err.public_message(), "search timed out during interpretation");
}

#[tokio::test]
async fn test_store_failure_is_fatal() {
    let llm = Arc::new(ScriptedLlm::new(&[("crestor", json!({"search_text": "crestor"}))]));
    let pipeline = SearchPipeline::new(
        PipelineConfig::default(),
        llm,
        Arc::new(embedder()),
        Arc::new(UnreachableStore),
    );

    let err = pipeline.search(SearchQuery::new("crestor")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Retrieval);
    assert!(matches!(err.kind, Error::Store(_)));
    assert_eq!(err.public_message(), "search failed during retrieval");
}

#[tokio::test]
async fn test_model_failure_is_fatal() {
    let llm = Arc::new(ScriptedLlm::new(&[]));
    let pipeline = pipeline(llm, fixture_store().await);

    let err = pipeline.search(SearchQuery::new("crestor")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Interpretation);
    assert!(matches!(err.kind, Error::Llm(_)));
}

#[tokio::test]
async fn test_plain_text_reply_still_searches() {
    let llm = Arc::new(ScriptedLlm::raw("lisinopril", "lisinopril"));
    let pipeline = pipeline(llm, fixture_store().await);

    let outcome = pipeline.search(SearchQuery::new("lisinopril")).await.unwrap();

    assert!(outcome.interpretation.parse_warning.is_some());
    assert_eq!(outcome.interpretation.expanded_query, "lisinopril");
    let generic = outcome
        .groups
        .iter()
        .find(|g| g.group_id == "generic:LISINOPRIL")
        .expect("lisinopril generic group");
    assert_eq!(generic.match_type, MatchType::Exact);
    // The brand lists the ingredient as its generic name, so it is a literal hit too
    let zestril = outcome
        .groups
        .iter()
        .find(|g| g.group_id == "brand:ZESTRIL")
        .expect("brand of the same ingredient");
    assert_eq!(zestril.match_type, MatchType::Exact);
    assert!(outcome
        .groups
        .iter()
        .all(|g| g.group_id != "generic:METFORMIN_HCL"));
}

#[tokio::test]
async fn test_response_envelope() {
    let llm = Arc::new(ScriptedLlm::new(&[(
        "crestor",
        json!({"search_text": "crestor", "filters": {"dosage_form": "tablet"}}),
    )]));
    let pipeline = pipeline(llm, fixture_store().await);

    let outcome = pipeline
        .search(SearchQuery::new("crestor").with_filter("is_generic", json!(false)))
        .await
        .unwrap();
    let response = SearchResponse::from(outcome);
    let body = serde_json::to_value(&response).unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["total_results"], body["results"].as_array().unwrap().len());
    assert_eq!(
        body["raw_results_count"],
        body["raw_results"].as_array().unwrap().len()
    );
    assert_eq!(body["query_info"]["original"], "crestor");
    assert_eq!(body["query_info"]["filters"]["user"]["is_generic"], false);
    assert_eq!(body["query_info"]["filters"]["claude"]["dosage_form"], "tablet");
    assert!(body["query_info"]["store_query"].as_str().unwrap().contains("crestor"));
    assert_eq!(body["metrics"]["llm"]["model"], "claude-sonnet-4-20250514");
    assert_eq!(body["metrics"]["llm"]["input_tokens"], 850);
    assert!(body["metrics"]["llm"]["cost_estimate"].as_f64().unwrap() > 0.0);
    assert_eq!(body["metrics"]["embedding"]["dimensions"], 256);
    assert!(body["metrics"]["stages"]["retrieval_ms"].is_number());
    assert!(body["expansion_debug"]["anchor_count"].as_u64().unwrap() >= 1);
    assert!(body["message"].is_null());
    assert!(body["timestamp"].is_string());

    // Only brand records survive the user's is_generic=false filter
    for group in body["results"].as_array().unwrap() {
        assert_eq!(group["is_generic"], false);
    }
}
