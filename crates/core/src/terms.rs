//! Query term vocabulary
//!
//! Tokenization and the word lists that decide which terms may reach the
//! lexical gate or count as drug names.

use once_cell::sync::Lazy;
use regex::Regex;

/// Dosage-form words; these filter through the `dosage_form` tag, never the name gate
pub const DOSAGE_FORM_TERMS: &[&str] = &[
    "cream",
    "gel",
    "tablet",
    "capsule",
    "injection",
    "liquid",
    "solution",
    "powder",
    "patch",
    "spray",
    "inhaler",
    "vial",
    "ampule",
    "suppository",
    "lotion",
    "ointment",
    "drops",
    "syrup",
    "suspension",
    "pellet",
    "syringe",
    "cartridge",
    "injectable",
];

/// Strength units
pub const UNIT_TERMS: &[&str] = &["mg", "mcg", "g", "ml", "unit", "units", "%"];

/// A run of `[a-z0-9+-]`, matched against lowercased text
static TERM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z0-9\-\+]+").unwrap());

/// Lowercase, take `[a-z0-9+-]` runs, keep first occurrences, cap at `max_terms`
pub fn tokenize(text: &str, max_terms: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    for token in TERM_RE.find_iter(&lowered).map(|m| m.as_str()) {
        if terms.len() >= max_terms {
            break;
        }
        if !terms.iter().any(|t| t == token) {
            terms.push(token.to_string());
        }
    }
    terms
}

pub fn is_dosage_form(term: &str) -> bool {
    let term = term.to_lowercase();
    DOSAGE_FORM_TERMS.contains(&term.as_str())
}

pub fn is_unit(term: &str) -> bool {
    let term = term.to_lowercase();
    UNIT_TERMS.contains(&term.as_str())
}

/// Non-empty and ASCII digits only
pub fn is_all_digits(term: &str) -> bool {
    !term.is_empty() && term.chars().all(|c| c.is_ascii_digit())
}

/// `\d+(\.\d+)?`
pub fn is_decimal_number(term: &str) -> bool {
    let mut parts = term.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    match parts.next() {
        None => is_all_digits(whole),
        Some(frac) => is_all_digits(whole) && is_all_digits(frac),
    }
}

/// Terms that look like drug names: longer than `min_exclusive` chars, not a
/// dosage form, not a unit, not a number
pub fn is_drug_like(term: &str, min_exclusive: usize) -> bool {
    term.chars().count() > min_exclusive
        && !is_dosage_form(term)
        && !is_unit(term)
        && !is_decimal_number(term)
}

pub fn drug_like_terms(terms: &[String], min_exclusive: usize) -> Vec<String> {
    terms
        .iter()
        .filter(|t| is_drug_like(t, min_exclusive))
        .cloned()
        .collect()
}

/// Whether a term may enter the name-prefix gate
pub fn is_gate_term(term: &str) -> bool {
    term.chars().count() > 2 && !is_dosage_form(term) && !is_unit(term) && !is_all_digits(term)
}

pub fn gate_terms(terms: &[String]) -> Vec<String> {
    terms.iter().filter(|t| is_gate_term(t)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_dedups_and_caps() {
        assert_eq!(
            tokenize("Crester 200MG, crester tablet", 8),
            strings(&["crester", "200mg", "tablet"])
        );
        assert_eq!(tokenize("a b c d e f g h i j", 8).len(), 8);
        assert_eq!(tokenize("co-q10 + zinc", 8), strings(&["co-q10", "+", "zinc"]));
        assert!(tokenize("  ...  ", 8).is_empty());
        assert_eq!(
            tokenize("Lipitor® 20mg/día (atorvastatin)", 8),
            strings(&["lipitor", "20mg", "d", "a", "atorvastatin"])
        );
    }

    #[test]
    fn test_drug_like() {
        assert!(is_drug_like("rosuvastatin", 3));
        assert!(!is_drug_like("tablet", 3));
        assert!(!is_drug_like("units", 3));
        assert!(!is_drug_like("2000", 3));
        assert!(!is_drug_like("12.5", 3));
        assert!(!is_drug_like("asa", 3));
    }

    #[test]
    fn test_gate_terms() {
        let terms = strings(&["crestor", "10", "mg", "tablet", "xr", "200mg"]);
        assert_eq!(gate_terms(&terms), strings(&["crestor", "200mg"]));
    }

    #[test]
    fn test_decimal_number() {
        assert!(is_decimal_number("12.5"));
        assert!(is_decimal_number("200"));
        assert!(!is_decimal_number("12."));
        assert!(!is_decimal_number(".5"));
        assert!(!is_decimal_number("200mg"));
    }
}
