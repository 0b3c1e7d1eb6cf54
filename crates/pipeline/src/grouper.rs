//! Drug family grouping
//!
//! Branded products group by brand name, generics by pharmacologic class.
//! The first member of a group fixes its display fields and match type;
//! later members only contribute variants and a better similarity.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use drug_search_core::{
    Candidate, DrugGroup, ManufacturerGroup, MatchType, Provenance, TermSource, Variant,
};

const UNKNOWN_MANUFACTURER: &str = "Unknown Manufacturer";
const INDICATION_SEPARATOR: &str = " | ";

static DISPLAY_STRENGTH_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+\d+(\.\d+)?\s*(MG|MCG|G|ML|%|UNIT).*$").unwrap());

static NAME_STRENGTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?\s*(?:MG|MCG|G|ML|%|UNIT))").unwrap());

/// Query-side facts needed to classify vector hits
#[derive(Debug, Clone)]
pub struct GroupingContext {
    /// Terms whose presence in a name makes a hit an exact match
    pub literal_terms: Vec<String>,
    /// Model-proposed terms
    pub collaborator_terms: Vec<String>,
    pub term_source: TermSource,
    /// Dash-free NDC the request filtered on
    pub requested_ndc: Option<String>,
}

impl GroupingContext {
    pub fn literal(terms: Vec<String>) -> Self {
        Self {
            collaborator_terms: terms.clone(),
            literal_terms: terms,
            term_source: TermSource::Original,
            requested_ndc: None,
        }
    }

    fn lowered(terms: &[String]) -> Vec<String> {
        terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Group key for a candidate
pub fn group_key(candidate: &Candidate) -> String {
    if !candidate.is_generic {
        let brand = first_non_empty(&[&candidate.brand_name, &candidate.drug_name, &candidate.ndc]);
        return format!("brand:{}", brand);
    }
    let family = first_non_empty(&[
        &candidate.drug_class,
        &candidate.generic_name,
        &candidate.drug_name,
        &candidate.ndc,
    ]);
    format!("generic:{}", family)
}

fn first_non_empty<'a>(values: &[&'a String]) -> &'a str {
    values
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

/// Family name without trailing strength and form details
pub fn display_name(candidate: &Candidate) -> String {
    let brand = candidate.brand_name.trim();
    if !candidate.is_generic && !brand.is_empty() {
        return brand.to_string();
    }
    let base = first_non_empty(&[
        &candidate.drug_class,
        &candidate.generic_name,
        &candidate.drug_name,
    ]);
    let stripped = DISPLAY_STRENGTH_SUFFIX.replace(base, "");
    let stripped = stripped.trim();
    if stripped.is_empty() {
        base.to_string()
    } else {
        stripped.to_string()
    }
}

fn variant_strength(candidate: &Candidate) -> String {
    NAME_STRENGTH
        .captures(&candidate.drug_name)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| candidate.strength.trim().to_string())
}

fn variant(candidate: &Candidate) -> Variant {
    Variant {
        ndc: candidate.ndc.clone(),
        label: candidate.label().to_string(),
        dosage_form: candidate.dosage_form.clone(),
        strength: variant_strength(candidate),
        manufacturer: candidate.manufacturer.clone(),
        is_generic: candidate.is_generic,
        similarity_score: candidate.similarity_pct(),
        dea_schedule: candidate.dea_schedule.clone(),
    }
}

/// Group under construction
struct Building {
    group: DrugGroup,
    dosage_forms: BTreeSet<String>,
}

pub struct ResultGrouper {
    literal_terms: Vec<String>,
    collaborator_terms: Vec<String>,
    term_source: TermSource,
    requested_ndc: Option<String>,
}

impl ResultGrouper {
    pub fn new(context: GroupingContext) -> Self {
        Self {
            literal_terms: GroupingContext::lowered(&context.literal_terms),
            collaborator_terms: GroupingContext::lowered(&context.collaborator_terms),
            term_source: context.term_source,
            requested_ndc: context.requested_ndc.map(|n| n.replace('-', "")),
        }
    }

    /// Match type and reason for a group's first member
    pub fn classify(&self, candidate: &Candidate) -> (MatchType, String) {
        match candidate.provenance {
            Provenance::PharmacologicExpansion => {
                (MatchType::Pharmacologic, "Drug class match".to_string())
            },
            Provenance::TherapeuticExpansion => (
                MatchType::TherapeuticAlternative,
                "Therapeutic alternative class match".to_string(),
            ),
            Provenance::FilterOnly => (
                MatchType::TherapeuticAlternative,
                "Therapeutic class match".to_string(),
            ),
            Provenance::Vector => self.classify_vector_hit(candidate),
        }
    }

    fn classify_vector_hit(&self, candidate: &Candidate) -> (MatchType, String) {
        if let Some(requested) = &self.requested_ndc {
            if candidate.ndc.replace('-', "") == *requested {
                return (MatchType::Exact, "Matches requested NDC".to_string());
            }
        }

        let corpus = candidate.name_corpus();
        if let Some(term) = self.literal_terms.iter().find(|t| corpus.contains(t.as_str())) {
            return (MatchType::Exact, format!("Name contains \"{}\"", term));
        }
        if self.literal_terms.is_empty() {
            return (MatchType::Exact, "No lexical tokens provided".to_string());
        }
        if self.term_source == TermSource::Expanded
            && self
                .collaborator_terms
                .iter()
                .any(|t| corpus.contains(t.as_str()))
        {
            return (
                MatchType::TherapeuticAlternative,
                "Therapeutic class match".to_string(),
            );
        }
        (MatchType::Alternative, "Semantic similarity match".to_string())
    }

    /// Group and rank. Pure: the same input always yields the same output.
    pub fn group(&self, candidates: &[Candidate]) -> Vec<DrugGroup> {
        let mut order: Vec<Building> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for candidate in candidates {
            let key = group_key(candidate);
            let slot = match index.get(&key) {
                Some(&slot) => {
                    let group = &mut order[slot].group;
                    if let Some(pct) = candidate.similarity_pct() {
                        if group.best_similarity.map_or(true, |best| pct > best) {
                            group.best_similarity = Some(pct);
                            group.primary_ndc = candidate.ndc.clone();
                        }
                    }
                    slot
                },
                None => {
                    order.push(self.open_group(key.clone(), candidate));
                    index.insert(key, order.len() - 1);
                    order.len() - 1
                },
            };

            let building = &mut order[slot];
            let form = candidate.dosage_form.trim();
            if !form.is_empty() {
                building.dosage_forms.insert(form.to_string());
            }
            building.group.variants.push(variant(candidate));
        }

        let mut groups: Vec<DrugGroup> = order.into_iter().map(finish).collect();
        groups.sort_by(rank);
        groups
    }

    fn open_group(&self, group_id: String, first: &Candidate) -> Building {
        let (match_type, match_reason) = self.classify(first);
        let best_similarity = match first.provenance {
            Provenance::Vector => first.similarity_pct(),
            _ => None,
        };
        let indication = first.indication.trim().to_string();
        let indication_list: Vec<String> = indication
            .split(INDICATION_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Building {
            group: DrugGroup {
                group_id,
                display_name: display_name(first),
                brand_name: first.brand_name.clone(),
                generic_name: first.drug_class.clone(),
                is_generic: first.is_generic,
                gcn_seqno: first.gcn_seqno,
                indication_count: indication_list.len(),
                indication,
                indication_list,
                dosage_forms: Vec::new(),
                match_type,
                match_reason,
                best_similarity,
                primary_ndc: first.ndc.clone(),
                variants: Vec::new(),
                manufacturer_groups: Vec::new(),
            },
            dosage_forms: BTreeSet::new(),
        }
    }
}

fn finish(building: Building) -> DrugGroup {
    let Building {
        mut group,
        dosage_forms,
    } = building;
    group.dosage_forms = dosage_forms.into_iter().collect();

    let mut buckets: BTreeMap<String, Vec<Variant>> = BTreeMap::new();
    for variant in &group.variants {
        let name = variant.manufacturer.trim();
        let name = if name.is_empty() { UNKNOWN_MANUFACTURER } else { name };
        buckets
            .entry(name.to_string())
            .or_default()
            .push(variant.clone());
    }
    group.manufacturer_groups = buckets
        .into_iter()
        .map(|(manufacturer, variants)| ManufacturerGroup {
            manufacturer,
            variants,
        })
        .collect();
    group
}

/// `(priority, -best_similarity)`; a missing similarity sorts last in its tier
fn rank(a: &DrugGroup, b: &DrugGroup) -> Ordering {
    let sim = |g: &DrugGroup| g.best_similarity.unwrap_or(f64::NEG_INFINITY);
    a.match_type
        .priority()
        .cmp(&b.match_type.priority())
        .then_with(|| sim(b).partial_cmp(&sim(a)).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn grouper(terms: &[&str]) -> ResultGrouper {
        ResultGrouper::new(GroupingContext::literal(strings(terms)))
    }

    fn crestor(ndc: &str, strength: &str, distance: f64) -> Candidate {
        Candidate::new(ndc, format!("CRESTOR {} TABLET", strength))
            .brand("CRESTOR")
            .drug_class("ROSUVASTATIN CALCIUM")
            .dosage_form("TABLET")
            .manufacturer("ASTRAZENECA")
            .with_distance(distance)
    }

    #[test]
    fn test_group_keys() {
        assert_eq!(group_key(&crestor("1", "10 MG", 0.1)), "brand:CRESTOR");
        let generic = Candidate::new("2", "ROSUVASTATIN 10 MG").drug_class("ROSUVASTATIN CALCIUM");
        assert_eq!(group_key(&generic), "generic:ROSUVASTATIN CALCIUM");
        assert_eq!(
            group_key(&Candidate::new("3", "").generic_name("rosuvastatin")),
            "generic:rosuvastatin"
        );
        assert_eq!(group_key(&Candidate::new("4", "")), "generic:4");
    }

    #[test]
    fn test_display_name_strips_strength() {
        let generic = Candidate::new("1", "LISINOPRIL 10 MG TABLET");
        assert_eq!(display_name(&generic), "LISINOPRIL");
        let numeric_only = Candidate::new("2", "5 MG");
        assert_eq!(display_name(&numeric_only), "5 MG");
        assert_eq!(display_name(&crestor("3", "10 MG", 0.1)), "CRESTOR");
    }

    #[test]
    fn test_brand_family_collects_variants() {
        let groups = grouper(&["crestor"]).group(&[
            crestor("1", "10 MG", 0.3),
            crestor("2", "20 MG", 0.1),
            crestor("3", "5 MG", 0.2).manufacturer(""),
        ]);

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.match_type, MatchType::Exact);
        assert_eq!(group.match_reason, "Name contains \"crestor\"");
        assert_eq!(group.best_similarity, Some(90.0));
        assert_eq!(group.primary_ndc, "2");
        assert_eq!(group.variants.len(), 3);
        assert_eq!(group.variants[1].strength, "20 MG");
        assert_eq!(group.generic_name, "ROSUVASTATIN CALCIUM");
        let buckets: Vec<&str> = group
            .manufacturer_groups
            .iter()
            .map(|m| m.manufacturer.as_str())
            .collect();
        assert_eq!(buckets, vec!["ASTRAZENECA", "Unknown Manufacturer"]);
    }

    #[test]
    fn test_brand_and_generic_never_share_a_group() {
        let generic = Candidate::new("9", "ROSUVASTATIN CALCIUM 10 MG TABLET")
            .drug_class("ROSUVASTATIN CALCIUM")
            .with_distance(0.2);
        let groups = grouper(&["rosuvastatin"]).group(&[crestor("1", "10 MG", 0.1), generic]);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|g| g.is_brand_group()));
        assert!(groups.iter().any(|g| !g.is_brand_group()));
    }

    #[test]
    fn test_expansion_members_keep_first_match_type() {
        let pharmacologic = Candidate::new("5", "ROSUVASTATIN 5 MG")
            .drug_class("ROSUVASTATIN CALCIUM")
            .with_provenance(Provenance::PharmacologicExpansion);
        let vector = Candidate::new("6", "ROSUVASTATIN 40 MG")
            .drug_class("ROSUVASTATIN CALCIUM")
            .with_distance(0.05);

        let groups = grouper(&["crestor"]).group(&[pharmacologic, vector]);
        assert_eq!(groups[0].match_type, MatchType::Pharmacologic);
        assert_eq!(groups[0].best_similarity, Some(95.0));
        assert_eq!(groups[0].primary_ndc, "6");
    }

    #[test]
    fn test_classification_table() {
        let hit = Candidate::new("00310-0751-90", "ATORVASTATIN 10 MG").with_distance(0.1);

        let mut context = GroupingContext::literal(strings(&["lipitor"]));
        context.requested_ndc = Some("00310075190".to_string());
        assert_eq!(
            ResultGrouper::new(context).classify(&hit).1,
            "Matches requested NDC"
        );

        assert_eq!(
            grouper(&[]).classify(&hit),
            (MatchType::Exact, "No lexical tokens provided".to_string())
        );
        assert_eq!(
            grouper(&["lipitor"]).classify(&hit),
            (MatchType::Alternative, "Semantic similarity match".to_string())
        );

        let expanded = ResultGrouper::new(GroupingContext {
            literal_terms: strings(&["high", "cholesterol"]),
            collaborator_terms: strings(&["atorvastatin", "rosuvastatin"]),
            term_source: TermSource::Expanded,
            requested_ndc: None,
        });
        assert_eq!(
            expanded.classify(&hit),
            (MatchType::TherapeuticAlternative, "Therapeutic class match".to_string())
        );

        let therapeutic = Candidate::new("7", "X").with_provenance(Provenance::TherapeuticExpansion);
        assert_eq!(
            grouper(&["x"]).classify(&therapeutic).0,
            MatchType::TherapeuticAlternative
        );
        let filter_only = Candidate::new("8", "X");
        assert_eq!(grouper(&["x"]).classify(&filter_only).1, "Therapeutic class match");
    }

    #[test]
    fn test_rank_order_and_stability() {
        let alt_low = Candidate::new("1", "AAA").drug_class("AAA").with_distance(0.6);
        let exact = Candidate::new("2", "CRESTORX").drug_class("BBB").with_distance(0.5);
        let alt_high = Candidate::new("3", "CCC").drug_class("CCC").with_distance(0.2);
        let therapeutic = Candidate::new("4", "DDD")
            .drug_class("DDD")
            .with_provenance(Provenance::TherapeuticExpansion);
        let pharmacologic = Candidate::new("5", "EEE")
            .drug_class("EEE")
            .with_provenance(Provenance::PharmacologicExpansion);
        let pharmacologic_2 = Candidate::new("6", "FFF")
            .drug_class("FFF")
            .with_provenance(Provenance::PharmacologicExpansion);

        let groups = grouper(&["crestorx"]).group(&[
            alt_low,
            exact,
            alt_high,
            therapeutic,
            pharmacologic,
            pharmacologic_2,
        ]);
        let ids: Vec<&str> = groups.iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "generic:BBB",
                "generic:EEE",
                "generic:FFF",
                "generic:DDD",
                "generic:CCC",
                "generic:AAA"
            ]
        );
    }

    #[test]
    fn test_every_candidate_lands_in_one_group() {
        let candidates = vec![
            crestor("1", "10 MG", 0.1),
            Candidate::new("2", "ROSUVASTATIN 10 MG").drug_class("ROSUVASTATIN CALCIUM"),
            crestor("3", "40 MG", 0.4),
            Candidate::new("4", "LIPITOR 10 MG").brand("LIPITOR"),
        ];
        let grouper = grouper(&["crestor"]);
        let groups = grouper.group(&candidates);

        let mut ndcs: Vec<&str> = groups
            .iter()
            .flat_map(|g| g.variants.iter().map(|v| v.ndc.as_str()))
            .collect();
        ndcs.sort();
        assert_eq!(ndcs, vec!["1", "2", "3", "4"]);
        assert_eq!(groups, grouper.group(&candidates));
    }

    #[test]
    fn test_indication_fields_and_dosage_forms() {
        let first = Candidate {
            indication: "Hyperlipidemia | Hypertriglyceridemia".to_string(),
            ..Candidate::new("1", "ROSUVASTATIN 10 MG")
                .drug_class("ROSUVASTATIN")
                .dosage_form("TABLET")
        };
        let second = Candidate::new("2", "ROSUVASTATIN 20 MG")
            .drug_class("ROSUVASTATIN")
            .dosage_form("CAPSULE");
        let groups = grouper(&["rosuvastatin"]).group(&[first, second]);

        assert_eq!(groups[0].indication_count, 2);
        assert_eq!(
            groups[0].indication_list,
            strings(&["Hyperlipidemia", "Hypertriglyceridemia"])
        );
        assert_eq!(groups[0].dosage_forms, strings(&["CAPSULE", "TABLET"]));
    }
}
