//! Retrieved drug records
//!
//! `Candidate` is the only shape the pipeline sees. Store adapters turn their
//! wire payloads into candidates through [`Candidate::decode`], so field
//! coercion (stringly booleans, numeric ids stored as text) happens once at
//! the boundary.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// How a candidate entered the result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Nearest-neighbour hit on the query embedding
    Vector,
    /// Added because it shares an anchor's pharmacologic class
    PharmacologicExpansion,
    /// Added because it shares an anchor's therapeutic class
    TherapeuticExpansion,
    /// Selected by predicate only
    #[default]
    FilterOnly,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Vector => "vector",
            Provenance::PharmacologicExpansion => "pharmacologic_expansion",
            Provenance::TherapeuticExpansion => "therapeutic_expansion",
            Provenance::FilterOnly => "filter_only",
        }
    }
}

/// Similarity derived from a vector distance
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Similarity {
    /// Fraction in [0, 1]
    pub score: f64,
    /// Percentage rounded to two decimals
    pub pct: f64,
}

impl Similarity {
    /// `clamp(1 - distance, 0, 1)`; non-finite distances map to zero.
    pub fn from_distance(distance: f64) -> Self {
        let raw = 1.0 - distance;
        let score = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            score,
            pct: (score * 10_000.0).round() / 100.0,
        }
    }
}

/// One drug record
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Candidate {
    pub ndc: String,
    pub drug_name: String,
    pub brand_name: String,
    pub generic_name: String,
    /// Pharmacologic class (active ingredient family)
    pub drug_class: String,
    pub therapeutic_class: String,
    pub gcn_seqno: Option<i64>,
    pub dosage_form: String,
    pub strength: String,
    pub dea_schedule: String,
    #[serde(rename = "manufacturer_name")]
    pub manufacturer: String,
    pub indication: String,
    pub is_generic: bool,
    pub provenance: Provenance,
    pub similarity: Option<Similarity>,
}

impl Candidate {
    pub fn new(ndc: impl Into<String>, drug_name: impl Into<String>) -> Self {
        Self {
            ndc: ndc.into(),
            drug_name: drug_name.into(),
            is_generic: true,
            ..Default::default()
        }
    }

    pub fn brand(mut self, brand_name: impl Into<String>) -> Self {
        self.brand_name = brand_name.into();
        self.is_generic = false;
        self
    }

    pub fn generic_name(mut self, generic_name: impl Into<String>) -> Self {
        self.generic_name = generic_name.into();
        self
    }

    pub fn drug_class(mut self, class: impl Into<String>) -> Self {
        self.drug_class = class.into();
        self
    }

    pub fn therapeutic_class(mut self, class: impl Into<String>) -> Self {
        self.therapeutic_class = class.into();
        self
    }

    pub fn gcn(mut self, gcn_seqno: i64) -> Self {
        self.gcn_seqno = Some(gcn_seqno);
        self
    }

    pub fn dosage_form(mut self, form: impl Into<String>) -> Self {
        self.dosage_form = form.into();
        self
    }

    pub fn manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    /// Decode a store payload (a JSON object of field name to value).
    ///
    /// The result carries `FilterOnly` provenance and no similarity; the
    /// retriever stamps vector hits via [`Candidate::with_distance`].
    pub fn decode(payload: Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(Error::Decode(format!(
                "expected an object payload, got {}",
                payload
            )));
        }

        let wire: WireRecord =
            serde_json::from_value(payload).map_err(|e| Error::Decode(e.to_string()))?;

        let ndc = wire.ndc.trim().to_string();
        if ndc.is_empty() {
            return Err(Error::Decode("record has no ndc".to_string()));
        }

        Ok(Self {
            ndc,
            drug_name: wire.drug_name,
            brand_name: wire.brand_name,
            generic_name: wire.generic_name,
            drug_class: wire.drug_class,
            therapeutic_class: wire.therapeutic_class,
            gcn_seqno: wire.gcn_seqno,
            dosage_form: wire.dosage_form,
            strength: wire.strength,
            dea_schedule: wire.dea_schedule,
            manufacturer: wire.manufacturer_name,
            indication: wire.indication,
            is_generic: wire.is_generic.unwrap_or(true),
            provenance: Provenance::FilterOnly,
            similarity: None,
        })
    }

    /// Mark as a vector hit with the store-reported distance
    pub fn with_distance(mut self, distance: f64) -> Self {
        self.provenance = Provenance::Vector;
        self.similarity = Some(Similarity::from_distance(distance));
        self
    }

    /// Mark with a non-vector provenance; expansion hits never carry a score
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        if provenance != Provenance::Vector {
            self.similarity = None;
        }
        self
    }

    pub fn similarity_pct(&self) -> Option<f64> {
        self.similarity.map(|s| s.pct)
    }

    /// Lowercased drug, brand and generic names joined by spaces
    pub fn name_corpus(&self) -> String {
        format!(
            "{} {} {}",
            self.drug_name.to_lowercase(),
            self.brand_name.to_lowercase(),
            self.generic_name.to_lowercase()
        )
    }

    /// First term contained (case-insensitively) in any of the name fields
    pub fn matching_term<'a>(&self, terms: &'a [String]) -> Option<&'a str> {
        let corpus = self.name_corpus();
        terms
            .iter()
            .map(|t| t.as_str())
            .find(|t| !t.is_empty() && corpus.contains(&t.to_lowercase()))
    }

    /// Label used for variant display
    pub fn label(&self) -> &str {
        [&self.drug_name, &self.brand_name, &self.generic_name]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// Lenient wire shape; every field tolerates absence and scalar type drift.
#[derive(Deserialize)]
struct WireRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    ndc: String,
    #[serde(default, deserialize_with = "lenient_string")]
    drug_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    brand_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    generic_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    drug_class: String,
    #[serde(default, deserialize_with = "lenient_string")]
    therapeutic_class: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    gcn_seqno: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    dosage_form: String,
    #[serde(default, deserialize_with = "lenient_string")]
    strength: String,
    #[serde(default, deserialize_with = "lenient_string")]
    dea_schedule: String,
    #[serde(default, alias = "manufacturer", deserialize_with = "lenient_string")]
    manufacturer_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    indication: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    is_generic: Option<bool>,
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<bool>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "y" | "yes" => Some(true),
            "false" | "0" | "n" | "no" => Some(false),
            _ => None,
        },
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
        _ => None,
    })
}
