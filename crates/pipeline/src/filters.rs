//! Request filter merging and normalization
//!
//! Merges the caller's filter map with the model's, then turns the merged
//! map into a typed [`FilterSet`]. Tag values are normalized to the store's
//! conventions, dosage-form umbrella words are widened to concrete forms,
//! and `strength` is carried aside for the post-filter.

use serde_json::{json, Map, Value};

use drug_search_core::{
    Error, Filter, FilterSet, NumericField, NumericRangeFilter, Result, TagField, TagFilter,
};

/// Model-proposed keys that may reach the store
pub const COLLABORATOR_FILTER_KEYS: &[&str] =
    &["dosage_form", "strength", "is_generic", "ndc", "gcn_seqno"];

/// Umbrella dosage forms and the concrete forms they stand for
const DOSAGE_FORM_SYNONYMS: &[(&str, &[&str])] = &[
    ("INJECTION", &["VIAL", "SOL", "AMPULE", "CARTRIDGE", "SYRINGE"]),
    ("ORAL", &["TABLET", "CAPSULE", "SOLUTION", "SUSPENSION", "SYRUP"]),
];

/// Output of [`FilterBuilder::build`]
#[derive(Debug, Clone, Default)]
pub struct BuiltFilters {
    pub set: FilterSet,
    /// Merged request map, echoed back to the caller
    pub merged: Map<String, Value>,
    /// Normalized values actually sent to the store
    pub applied: Map<String, Value>,
    /// Raw strength filter for the post-filter
    pub strength: Option<String>,
    /// Dash-free NDC when the request filters on one
    pub requested_ndc: Option<String>,
}

pub struct FilterBuilder;

impl FilterBuilder {
    /// Model filters restricted to the allow-list, then user filters on top.
    /// Keys are lowercased and `drug_type` is folded into `is_generic` on
    /// both sides first, so a user entry always replaces the model's entry
    /// for the same field. Empty values are skipped on both sides.
    pub fn merge(user: &Map<String, Value>, collaborator: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = Map::new();
        for (key, value) in collaborator {
            if is_empty_value(value) {
                continue;
            }
            let (key, value) = canonical_entry(key, value);
            if COLLABORATOR_FILTER_KEYS.contains(&key.as_str()) {
                merged.insert(key, value);
            }
        }
        for (key, value) in user {
            if !is_empty_value(value) {
                let (key, value) = canonical_entry(key, value);
                merged.insert(key, value);
            }
        }
        merged
    }

    pub fn build(user: &Map<String, Value>, collaborator: &Map<String, Value>) -> Result<BuiltFilters> {
        let merged = Self::merge(user, collaborator);
        let mut built = BuiltFilters::default();

        for (key, value) in &merged {
            let key = key.clone();

            if key == "strength" {
                built.strength = scalar_text(value);
                continue;
            }

            if let Some(field) = TagField::from_request_key(&key) {
                let values = normalize_tag_values(field, value);
                if let Some(tag) = TagFilter::new(field, values) {
                    if field == TagField::Ndc {
                        built.requested_ndc = tag.values.first().cloned();
                    }
                    built.applied.insert(key, json!(tag.values));
                    built.set.push(Filter::Tag(tag));
                }
            } else if let Some(field) = NumericField::from_request_key(&key) {
                if let Some(range) = numeric_range(field, value)? {
                    built.applied.insert(
                        key,
                        json!({"start": range.start_label(), "end": range.end_label()}),
                    );
                    built.set.push(Filter::NumericRange(range));
                }
            } else {
                tracing::debug!(key = %key, "Dropping unknown filter key");
            }
        }

        built.merged = merged;
        Ok(built)
    }
}

/// Lowercased key, with `drug_type: generic|brand` rewritten as `is_generic`
fn canonical_entry(key: &str, value: &Value) -> (String, Value) {
    let key = key.trim().to_lowercase();
    if key == "drug_type" {
        match value.as_str().map(|s| s.trim().to_lowercase()).as_deref() {
            Some("generic") => return ("is_generic".to_string(), json!("true")),
            Some("brand") => return ("is_generic".to_string(), json!("false")),
            _ => {},
        }
    }
    (key, value.clone())
}

/// `null`, `""`, `[]` and `{}`
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Normalize one tag value or list of values for `field`
pub fn normalize_tag_values(field: TagField, value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut normalized = Vec::new();
    for item in items {
        let Some(token) = scalar_text(item) else { continue };
        match field {
            TagField::Ndc => normalized.push(token.replace('-', "")),
            TagField::DosageForm | TagField::DrugClass => {
                let token = token.to_uppercase().replace(' ', "_");
                let synonyms = DOSAGE_FORM_SYNONYMS
                    .iter()
                    .find(|(umbrella, _)| field == TagField::DosageForm && *umbrella == token);
                match synonyms {
                    Some((_, forms)) => normalized.extend(forms.iter().map(|f| f.to_string())),
                    None => normalized.push(token),
                }
            },
            TagField::IsGeneric => normalized.push(token.to_lowercase()),
            TagField::TherapeuticClass | TagField::DeaSchedule => {
                normalized.push(token.to_uppercase())
            },
        }
    }
    normalized
}

/// A two-element list is a range with optional bounds; a scalar is a point
fn numeric_range(field: NumericField, value: &Value) -> Result<Option<NumericRangeFilter>> {
    match value {
        Value::Array(bounds) if bounds.len() == 2 => {
            let start = numeric_bound(field, &bounds[0])?;
            let end = numeric_bound(field, &bounds[1])?;
            if let (Some(s), Some(e)) = (start, end) {
                if s > e {
                    return Err(Error::Validation(format!(
                        "{} range start {} is above end {}",
                        field.as_str(),
                        s,
                        e
                    )));
                }
            }
            Ok(NumericRangeFilter::new(field, start, end))
        },
        Value::Array(_) => Err(Error::Validation(format!(
            "{} must be a number or a [start, end] pair",
            field.as_str()
        ))),
        scalar => Ok(numeric_bound(field, scalar)?.map(|v| NumericRangeFilter::point(field, v))),
    }
}

fn numeric_bound(field: NumericField, value: &Value) -> Result<Option<f64>> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(Error::Validation(format!(
            "{} must be numeric, got {}",
            field.as_str(),
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_merge_allow_list_and_user_precedence() {
        let user = map(json!({"dosage_form": "capsule", "dea_schedule": "2", "strength": ""}));
        let collaborator = map(json!({
            "dosage_form": "tablet",
            "strength": "200mg",
            "drug_class": "STATINS",
            "indication": "hyperlipidemia"
        }));

        let merged = FilterBuilder::merge(&user, &collaborator);
        assert_eq!(merged.get("dosage_form").unwrap(), "capsule");
        assert_eq!(merged.get("strength").unwrap(), "200mg");
        assert_eq!(merged.get("dea_schedule").unwrap(), "2");
        assert!(!merged.contains_key("drug_class"));
        assert!(!merged.contains_key("indication"));
    }

    #[test]
    fn test_user_alias_overrides_model_generic_flag() {
        let built = FilterBuilder::build(
            &map(json!({"drug_type": "brand"})),
            &map(json!({"is_generic": "true"})),
        )
        .unwrap();

        assert_eq!(built.applied["is_generic"], json!(["false"]));
        assert_eq!(built.merged.len(), 1);
        assert_eq!(built.set.filters().len(), 1);
        match &built.set.filters()[0] {
            Filter::Tag(tag) => assert_eq!(tag.values, vec!["false".to_string()]),
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_user_key_case_overrides_model_key() {
        let built = FilterBuilder::build(
            &map(json!({"Dosage_Form": "capsule"})),
            &map(json!({"dosage_form": "tablet"})),
        )
        .unwrap();

        assert_eq!(built.merged["dosage_form"], "capsule");
        assert!(!built.merged.contains_key("Dosage_Form"));
        assert_eq!(built.applied["dosage_form"], json!(["CAPSULE"]));
        assert_eq!(built.set.filters().len(), 1);
    }

    #[test]
    fn test_tag_normalization() {
        let user = map(json!({
            "ndc": "00310-0751-90",
            "drug_class": "rosuvastatin calcium",
            "is_generic": "TRUE",
            "dea_schedule": ["ii", "iii"]
        }));
        let built = FilterBuilder::build(&user, &Map::new()).unwrap();

        assert_eq!(built.applied["ndc"], json!(["00310075190"]));
        assert_eq!(built.applied["drug_class"], json!(["ROSUVASTATIN_CALCIUM"]));
        assert_eq!(built.applied["is_generic"], json!(["true"]));
        assert_eq!(built.applied["dea_schedule"], json!(["II", "III"]));
        assert_eq!(built.requested_ndc.as_deref(), Some("00310075190"));
        assert_eq!(built.set.filters().len(), 4);
    }

    #[test]
    fn test_boolean_generic_flag() {
        let built = FilterBuilder::build(&map(json!({"is_generic": false})), &Map::new()).unwrap();
        assert_eq!(built.applied["is_generic"], json!(["false"]));
    }

    #[test]
    fn test_dosage_form_synonyms() {
        let built = FilterBuilder::build(&map(json!({"dosage_form": "injection"})), &Map::new()).unwrap();
        assert_eq!(
            built.applied["dosage_form"],
            json!(["VIAL", "SOL", "AMPULE", "CARTRIDGE", "SYRINGE"])
        );

        let built =
            FilterBuilder::build(&map(json!({"dosage_form": ["Oral", "cream"]})), &Map::new()).unwrap();
        assert_eq!(
            built.applied["dosage_form"],
            json!(["TABLET", "CAPSULE", "SOLUTION", "SUSPENSION", "SYRUP", "CREAM"])
        );
    }

    #[test]
    fn test_drug_type_alias() {
        let built = FilterBuilder::build(&map(json!({"drug_type": "Brand"})), &Map::new()).unwrap();
        assert_eq!(built.applied["is_generic"], json!(["false"]));

        let built = FilterBuilder::build(&map(json!({"drug_type": "otc"})), &Map::new()).unwrap();
        assert!(built.set.is_empty());
        assert!(built.applied.is_empty());
    }

    #[test]
    fn test_numeric_ranges() {
        let built = FilterBuilder::build(&map(json!({"gcn_seqno": [null, 500]})), &Map::new()).unwrap();
        assert_eq!(built.applied["gcn_seqno"], json!({"start": "-inf", "end": "500"}));

        let built = FilterBuilder::build(&map(json!({"gcn_seqno": "51784"})), &Map::new()).unwrap();
        assert_eq!(built.applied["gcn_seqno"], json!({"start": "51784", "end": "51784"}));

        let built = FilterBuilder::build(&map(json!({"gcn_seqno": [null, null]})), &Map::new()).unwrap();
        assert!(built.set.is_empty());
    }

    #[test]
    fn test_invalid_numeric_is_rejected() {
        let err = FilterBuilder::build(&map(json!({"gcn_seqno": "abc"})), &Map::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = FilterBuilder::build(&map(json!({"gcn_seqno": [10, 5]})), &Map::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_strength_is_carried_not_applied() {
        let built = FilterBuilder::build(&Map::new(), &map(json!({"strength": "200mg"}))).unwrap();
        assert_eq!(built.strength.as_deref(), Some("200mg"));
        assert!(built.set.is_empty());
        assert!(!built.applied.contains_key("strength"));
        assert_eq!(built.merged["strength"], "200mg");
    }

    #[test]
    fn test_unknown_keys_dropped() {
        let built = FilterBuilder::build(&map(json!({"color": "blue"})), &Map::new()).unwrap();
        assert!(built.set.is_empty());
        assert_eq!(built.merged.len(), 1);
    }
}
