//! Typed store predicates
//!
//! A `FilterSet` is the conjunction of a small closed set of filter kinds.
//! Field names are enums, so a misspelled key cannot reach the store.

use serde::Serialize;
use std::fmt;

/// Exact-match categorical fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagField {
    Ndc,
    DrugClass,
    TherapeuticClass,
    DosageForm,
    IsGeneric,
    DeaSchedule,
}

impl TagField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagField::Ndc => "ndc",
            TagField::DrugClass => "drug_class",
            TagField::TherapeuticClass => "therapeutic_class",
            TagField::DosageForm => "dosage_form",
            TagField::IsGeneric => "is_generic",
            TagField::DeaSchedule => "dea_schedule",
        }
    }

    /// Fields a request may filter on directly
    pub fn from_request_key(key: &str) -> Option<Self> {
        match key {
            "ndc" => Some(TagField::Ndc),
            "drug_class" => Some(TagField::DrugClass),
            "dosage_form" => Some(TagField::DosageForm),
            "is_generic" => Some(TagField::IsGeneric),
            "dea_schedule" => Some(TagField::DeaSchedule),
            _ => None,
        }
    }
}

/// Numeric range fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    GcnSeqno,
}

impl NumericField {
    pub fn as_str(&self) -> &'static str {
        match self {
            NumericField::GcnSeqno => "gcn_seqno",
        }
    }

    pub fn from_request_key(key: &str) -> Option<Self> {
        match key {
            "gcn_seqno" => Some(NumericField::GcnSeqno),
            _ => None,
        }
    }
}

/// Free-text name fields used by the lexical gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    DrugName,
    BrandName,
    GenericName,
}

impl TextField {
    pub const NAME_FIELDS: [TextField; 3] =
        [TextField::DrugName, TextField::BrandName, TextField::GenericName];

    pub fn as_str(&self) -> &'static str {
        match self {
            TextField::DrugName => "drug_name",
            TextField::BrandName => "brand_name",
            TextField::GenericName => "generic_name",
        }
    }
}

/// Field value is one of `values`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagFilter {
    pub field: TagField,
    pub values: Vec<String>,
}

impl TagFilter {
    /// Returns `None` when no non-empty value remains
    pub fn new(field: TagField, values: impl IntoIterator<Item = impl Into<String>>) -> Option<Self> {
        let mut unique: Vec<String> = Vec::new();
        for value in values {
            let value: String = value.into();
            if !value.is_empty() && !unique.contains(&value) {
                unique.push(value);
            }
        }
        if unique.is_empty() {
            None
        } else {
            Some(Self { field, values: unique })
        }
    }
}

/// Inclusive numeric range; infinite bounds are open
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericRangeFilter {
    pub field: NumericField,
    pub start: f64,
    pub end: f64,
}

impl NumericRangeFilter {
    pub fn new(field: NumericField, start: Option<f64>, end: Option<f64>) -> Option<Self> {
        if start.is_none() && end.is_none() {
            return None;
        }
        Some(Self {
            field,
            start: start.unwrap_or(f64::NEG_INFINITY),
            end: end.unwrap_or(f64::INFINITY),
        })
    }

    pub fn point(field: NumericField, value: f64) -> Self {
        Self { field, start: value, end: value }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.start && value <= self.end
    }

    pub fn start_label(&self) -> String {
        bound_label(self.start)
    }

    pub fn end_label(&self) -> String {
        bound_label(self.end)
    }
}

fn bound_label(value: f64) -> String {
    if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if value == f64::INFINITY {
        "+inf".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Prefix match of any term against any of the listed fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFilter {
    pub fields: Vec<TextField>,
    pub terms: Vec<String>,
}

impl TextFilter {
    /// OR of every term across the three name fields
    pub fn names(terms: Vec<String>) -> Option<Self> {
        if terms.is_empty() {
            None
        } else {
            Some(Self {
                fields: TextField::NAME_FIELDS.to_vec(),
                terms,
            })
        }
    }
}

/// One store predicate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    Tag(TagFilter),
    NumericRange(NumericRangeFilter),
    Text(TextFilter),
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Tag(tag) => write!(f, "@{}:{{{}}}", tag.field.as_str(), tag.values.join("|")),
            Filter::NumericRange(range) => write!(
                f,
                "@{}:[{} {}]",
                range.field.as_str(),
                range.start_label(),
                range.end_label()
            ),
            Filter::Text(text) => {
                let parts: Vec<String> = text
                    .terms
                    .iter()
                    .flat_map(|term| {
                        text.fields
                            .iter()
                            .map(move |field| format!("@{}:{}*", field.as_str(), term))
                    })
                    .collect();
                write!(f, "({})", parts.join(" | "))
            },
        }
    }
}

/// Conjunction of filters; empty means match-all
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Filter) -> Self {
        self.push(filter);
        self
    }

    /// Add a filter. A later tag or range filter on the same field replaces
    /// the earlier one.
    pub fn push(&mut self, filter: Filter) {
        let replaces = |existing: &Filter| match (existing, &filter) {
            (Filter::Tag(a), Filter::Tag(b)) => a.field == b.field,
            (Filter::NumericRange(a), Filter::NumericRange(b)) => a.field == b.field,
            _ => false,
        };
        if let Some(slot) = self.filters.iter_mut().find(|f| replaces(f)) {
            *slot = filter;
        } else {
            self.filters.push(filter);
        }
    }

    /// Copy of this set with one more conjunct. Unlike [`FilterSet::push`]
    /// this never replaces, so a tag filter on an already-filtered field
    /// narrows the result to the intersection.
    pub fn and(&self, filter: Filter) -> Self {
        let mut set = self.clone();
        set.filters.push(filter);
        set
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn tag(&self, field: TagField) -> Option<&TagFilter> {
        self.filters.iter().find_map(|f| match f {
            Filter::Tag(tag) if tag.field == field => Some(tag),
            _ => None,
        })
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filters.is_empty() {
            return write!(f, "*");
        }
        let parts: Vec<String> = self.filters.iter().map(|x| x.to_string()).collect();
        write!(f, "{}", parts.join(" "))
    }
}
