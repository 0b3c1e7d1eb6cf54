//! Drug family groups

use serde::Serialize;

/// How a group relates to the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Pharmacologic,
    TherapeuticAlternative,
    Alternative,
}

impl MatchType {
    /// Ranking tier; lower sorts first
    pub fn priority(&self) -> u8 {
        match self {
            MatchType::Exact => 0,
            MatchType::Pharmacologic => 1,
            MatchType::TherapeuticAlternative => 2,
            MatchType::Alternative => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Pharmacologic => "pharmacologic",
            MatchType::TherapeuticAlternative => "therapeutic_alternative",
            MatchType::Alternative => "alternative",
        }
    }
}

/// One member of a group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    pub ndc: String,
    pub label: String,
    pub dosage_form: String,
    pub strength: String,
    pub manufacturer: String,
    pub is_generic: bool,
    pub similarity_score: Option<f64>,
    pub dea_schedule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManufacturerGroup {
    pub manufacturer: String,
    pub variants: Vec<Variant>,
}

/// A brand family or a generic ingredient family
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugGroup {
    /// `brand:<BRAND>` or `generic:<CLASS>`
    pub group_id: String,
    pub display_name: String,
    pub brand_name: String,
    /// Pharmacologic class of the first member
    pub generic_name: String,
    pub is_generic: bool,
    pub gcn_seqno: Option<i64>,
    pub indication: String,
    pub indication_list: Vec<String>,
    pub indication_count: usize,
    pub dosage_forms: Vec<String>,
    pub match_type: MatchType,
    pub match_reason: String,
    /// Best similarity percentage among scored members
    pub best_similarity: Option<f64>,
    pub primary_ndc: String,
    pub variants: Vec<Variant>,
    pub manufacturer_groups: Vec<ManufacturerGroup>,
}

impl DrugGroup {
    pub fn is_brand_group(&self) -> bool {
        self.group_id.starts_with("brand:")
    }
}
