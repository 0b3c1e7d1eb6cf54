//! Post-expansion filtering
//!
//! Runs after class expansion so expanded products are held to the same
//! strength and prescribability rules as vector hits.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use drug_search_core::terms::is_decimal_number;
use drug_search_core::Candidate;

const MIN_STRENGTH: f64 = 0.001;
const MAX_STRENGTH: f64 = 10_000.0;

static STRENGTH_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(mg|mcg|g|ml|%|unit)").unwrap());

/// Compounding bases, vehicles and supplies; matched on uppercased class or name
static NON_PRESCRIBABLE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"BASE[_\s]*NO\.",
        r"^MENTHOL$",
        r"^CAMPHOR$",
        r"^GELFILM$",
        r"^POLYDIMETHYLSILOXANES$",
        r"DIAPER.*DISPOSABLE",
        r"^HYPROMELLOSE$",
        r"VEHICLE[_\s]",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// A number with an optional unit, matched against drug names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrengthPattern {
    pub number: String,
    /// Uppercased; `None` matches any unit
    pub unit: Option<String>,
}

impl StrengthPattern {
    fn regex(&self) -> Option<Regex> {
        let number = regex::escape(&self.number);
        let pattern = match &self.unit {
            Some(unit) => format!(r"(?i){}\s*{}", number, regex::escape(unit)),
            None => format!(r"(?i){}\s*[A-Z%]", number),
        };
        match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Skipping strength pattern");
                None
            },
        }
    }

    /// Patterns from the strength filter, else from unitless numeric terms
    pub fn collect(strength_filter: Option<&str>, selected_terms: &[String]) -> Vec<Self> {
        if let Some(raw) = strength_filter.map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(caps) = STRENGTH_FILTER.captures(raw) {
                return vec![Self {
                    number: caps[1].to_string(),
                    unit: Some(caps[2].to_uppercase()),
                }];
            }
            if let Some(number) = plausible_number(raw) {
                return vec![Self { number, unit: None }];
            }
        }

        selected_terms
            .iter()
            .filter_map(|term| plausible_number(term))
            .map(|number| Self { number, unit: None })
            .collect()
    }
}

fn plausible_number(text: &str) -> Option<String> {
    let text = text.trim();
    if !is_decimal_number(text) {
        return None;
    }
    let value: f64 = text.parse().ok()?;
    (MIN_STRENGTH..=MAX_STRENGTH)
        .contains(&value)
        .then(|| text.to_string())
}

/// First match of `re` in `haystack` whose number is not preceded by a digit
fn matches_at_digit_boundary(re: &Regex, haystack: &str) -> bool {
    let mut start = 0;
    while start <= haystack.len() {
        let Some(m) = re.find_at(haystack, start) else {
            return false;
        };
        let preceded_by_digit = haystack[..m.start()]
            .chars()
            .next_back()
            .map_or(false, |c| c.is_ascii_digit());
        if !preceded_by_digit {
            return true;
        }
        start = m.start()
            + haystack[m.start()..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
    }
    false
}

fn is_non_prescribable(candidate: &Candidate) -> bool {
    let class = candidate.drug_class.to_uppercase();
    let name = candidate.drug_name.to_uppercase();
    NON_PRESCRIBABLE
        .iter()
        .any(|re| re.is_match(&class) || re.is_match(&name))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostFilterStats {
    pub input: usize,
    pub strength_removed: usize,
    pub non_prescribable_removed: usize,
}

pub struct PostFilter {
    patterns: Vec<StrengthPattern>,
    compiled: Vec<Regex>,
}

impl PostFilter {
    pub fn new(patterns: Vec<StrengthPattern>) -> Self {
        let compiled = patterns.iter().filter_map(StrengthPattern::regex).collect();
        Self { patterns, compiled }
    }

    pub fn from_request(strength_filter: Option<&str>, selected_terms: &[String]) -> Self {
        Self::new(StrengthPattern::collect(strength_filter, selected_terms))
    }

    pub fn patterns(&self) -> &[StrengthPattern] {
        &self.patterns
    }

    pub fn keeps_strength(&self, candidate: &Candidate) -> bool {
        if self.compiled.is_empty() {
            return true;
        }
        let name = candidate.drug_name.to_uppercase();
        self.compiled
            .iter()
            .any(|re| matches_at_digit_boundary(re, &name))
    }

    pub fn apply(&self, candidates: Vec<Candidate>) -> (Vec<Candidate>, PostFilterStats) {
        let mut stats = PostFilterStats {
            input: candidates.len(),
            ..Default::default()
        };

        let kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                if !self.keeps_strength(c) {
                    stats.strength_removed += 1;
                    return false;
                }
                if is_non_prescribable(c) {
                    stats.non_prescribable_removed += 1;
                    return false;
                }
                true
            })
            .collect();

        if stats.strength_removed + stats.non_prescribable_removed > 0 {
            tracing::debug!(
                input = stats.input,
                strength_removed = stats.strength_removed,
                non_prescribable_removed = stats.non_prescribable_removed,
                "Post-filter dropped candidates"
            );
        }

        (kept, stats)
    }
}
