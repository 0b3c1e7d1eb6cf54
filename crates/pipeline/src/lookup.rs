//! Single-drug lookups: detail by NDC and same-GCN alternatives

use std::sync::Arc;

use serde::Serialize;

use drug_search_config::constants::search;
use drug_search_core::{
    Candidate, CandidateStore, Error, Filter, FilterSet, NumericField, NumericRangeFilter, Result,
};

const NDC_DIGITS: usize = 11;

/// Strip dashes and require exactly eleven digits
pub fn normalize_ndc(raw: &str) -> Result<String> {
    let ndc = raw.trim().replace('-', "");
    if ndc.len() != NDC_DIGITS || !ndc.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation(
            "Invalid NDC format (must be 11 digits)".to_string(),
        ));
    }
    Ok(ndc)
}

/// Drug fields returned by the lookup endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugRecord {
    pub ndc: String,
    pub drug_name: String,
    pub brand_name: String,
    pub generic_name: String,
    pub drug_class: String,
    pub therapeutic_class: String,
    pub gcn_seqno: Option<i64>,
    pub is_generic: bool,
    pub dosage_form: String,
    pub strength: String,
    pub dea_schedule: String,
    pub manufacturer_name: String,
    pub indication: String,
}

impl From<&Candidate> for DrugRecord {
    fn from(c: &Candidate) -> Self {
        Self {
            ndc: c.ndc.clone(),
            drug_name: c.drug_name.clone(),
            brand_name: c.brand_name.clone(),
            generic_name: c.generic_name.clone(),
            drug_class: c.drug_class.clone(),
            therapeutic_class: c.therapeutic_class.clone(),
            gcn_seqno: c.gcn_seqno,
            is_generic: c.is_generic,
            dosage_form: c.dosage_form.clone(),
            strength: c.strength.clone(),
            dea_schedule: c.dea_schedule.clone(),
            manufacturer_name: c.manufacturer.clone(),
            indication: c.indication.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DrugDetail {
    #[serde(flatten)]
    pub drug: DrugRecord,
    /// Other records sharing the GCN
    pub alternatives_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alternatives {
    pub selected: DrugRecord,
    pub gcn_seqno: Option<i64>,
    pub generic_options: Vec<DrugRecord>,
    pub brand_options: Vec<DrugRecord>,
    pub total_alternatives: usize,
}

pub struct DrugLookup {
    store: Arc<dyn CandidateStore>,
    alternatives_limit: usize,
}

impl DrugLookup {
    pub fn new(store: Arc<dyn CandidateStore>) -> Self {
        Self {
            store,
            alternatives_limit: search::ALTERNATIVES_LIMIT,
        }
    }

    pub fn with_alternatives_limit(mut self, limit: usize) -> Self {
        self.alternatives_limit = limit;
        self
    }

    async fn fetch(&self, raw_ndc: &str) -> Result<Candidate> {
        let ndc = normalize_ndc(raw_ndc)?;
        self.store
            .get(&ndc)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Drug not found: {}", ndc)))
    }

    async fn same_gcn(&self, selected: &Candidate) -> Result<Vec<Candidate>> {
        let Some(gcn) = selected.gcn_seqno else {
            return Ok(Vec::new());
        };
        let predicate = FilterSet::new().with(Filter::NumericRange(NumericRangeFilter::point(
            NumericField::GcnSeqno,
            gcn as f64,
        )));
        let selected_ndc = selected.ndc.replace('-', "");
        let mut found = self
            .store
            .select(&predicate, self.alternatives_limit + 1)
            .await?;
        found.retain(|c| c.ndc.replace('-', "") != selected_ndc);
        found.truncate(self.alternatives_limit);
        Ok(found)
    }

    pub async fn detail(&self, raw_ndc: &str) -> Result<DrugDetail> {
        let drug = self.fetch(raw_ndc).await?;
        let alternatives = self.same_gcn(&drug).await?;
        tracing::debug!(ndc = %drug.ndc, alternatives = alternatives.len(), "Drug detail");
        Ok(DrugDetail {
            drug: DrugRecord::from(&drug),
            alternatives_count: alternatives.len(),
        })
    }

    pub async fn alternatives(&self, raw_ndc: &str) -> Result<Alternatives> {
        let drug = self.fetch(raw_ndc).await?;
        let found = self.same_gcn(&drug).await?;
        let (generic, brand): (Vec<Candidate>, Vec<Candidate>) =
            found.into_iter().partition(|c| c.is_generic);

        Ok(Alternatives {
            selected: DrugRecord::from(&drug),
            gcn_seqno: drug.gcn_seqno,
            total_alternatives: generic.len() + brand.len(),
            generic_options: generic.iter().map(DrugRecord::from).collect(),
            brand_options: brand.iter().map(DrugRecord::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drug_search_rag::InMemoryCandidateStore;

    fn store() -> Arc<InMemoryCandidateStore> {
        let store = InMemoryCandidateStore::new();
        let records = vec![
            Candidate::new("00310075190", "CRESTOR 10 MG TABLET")
                .brand("CRESTOR")
                .gcn(51784),
            Candidate::new("00093756198", "ROSUVASTATIN 10 MG TABLET").gcn(51784),
            Candidate::new("68180035109", "ROSUVASTATIN 10 MG TABLET").gcn(51784),
            Candidate::new("00071015523", "LIPITOR 10 MG TABLET")
                .brand("LIPITOR")
                .gcn(25941),
            Candidate::new("99999999999", "GELFILM"),
        ];
        for record in records {
            store.insert(record, vec![1.0]);
        }
        Arc::new(store)
    }

    #[test]
    fn test_normalize_ndc() {
        assert_eq!(normalize_ndc("00310-0751-90").unwrap(), "00310075190");
        assert!(normalize_ndc("12345").is_err());
        assert!(normalize_ndc("0031007519X").is_err());
    }

    #[tokio::test]
    async fn test_detail_counts_same_gcn() {
        let lookup = DrugLookup::new(store());
        let detail = lookup.detail("00310-0751-90").await.unwrap();
        assert_eq!(detail.drug.brand_name, "CRESTOR");
        assert_eq!(detail.alternatives_count, 2);
    }

    #[tokio::test]
    async fn test_alternatives_split_generic_and_brand() {
        let lookup = DrugLookup::new(store());
        let alternatives = lookup.alternatives("00093756198").await.unwrap();
        assert_eq!(alternatives.gcn_seqno, Some(51784));
        assert_eq!(alternatives.generic_options.len(), 1);
        assert_eq!(alternatives.brand_options.len(), 1);
        assert_eq!(alternatives.brand_options[0].ndc, "00310075190");
        assert_eq!(alternatives.total_alternatives, 2);
    }

    #[tokio::test]
    async fn test_missing_gcn_has_no_alternatives() {
        let lookup = DrugLookup::new(store());
        let alternatives = lookup.alternatives("99999999999").await.unwrap();
        assert!(alternatives.generic_options.is_empty());
        assert_eq!(alternatives.total_alternatives, 0);
    }

    #[tokio::test]
    async fn test_unknown_ndc_is_not_found() {
        let lookup = DrugLookup::new(store());
        let err = lookup.detail("11111111111").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
