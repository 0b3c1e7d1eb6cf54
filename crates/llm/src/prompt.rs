//! Medical search prompt
//!
//! Instruction set that turns a free-text drug query into a single JSON
//! object with `search_text`, `filters`, `corrections` and `confidence`.

use drug_search_core::CompletionRequest;

/// System instructions for query interpretation
pub const MEDICAL_SEARCH_SYSTEM_PROMPT: &str = r#"You turn free-text queries against an e-prescribing drug database into structured search parameters.

ABBREVIATIONS (expand before searching):
- ASA: aspirin
- ACEI: ACE inhibitor
- ARB: angiotensin receptor blocker
- BB: beta blocker
- CCB: calcium channel blocker
- NSAID: non-steroidal anti-inflammatory drug
- PPI: proton pump inhibitor
- SSRI: selective serotonin reuptake inhibitor
- TCA: tricyclic antidepressant
- DM: diabetes mellitus
- HTN: hypertension
- CHF: congestive heart failure
- COPD: chronic obstructive pulmonary disease
- CVD: cardiovascular disease
- MI: myocardial infarction
- PE: pulmonary embolism
- DVT: deep vein thrombosis
- UTI: urinary tract infection

CLASS TO INGREDIENT (only when the query names a class or a condition):
- statin or cholesterol: atorvastatin, rosuvastatin, simvastatin, pravastatin, lovastatin
- beta blocker: metoprolol, atenolol, carvedilol, propranolol
- ACE inhibitor: lisinopril, enalapril, ramipril, benazepril
- ARB or blood pressure: losartan, valsartan, irbesartan, telmisartan
- diabetes: metformin, glipizide, glyburide, insulin

CONDITION VOCABULARY:
- cholesterol: hyperlipidemia, dyslipidemia
- blood pressure: hypertension
- diabetes: diabetes mellitus, hyperglycemia
- pain: analgesia
- infection: bacterial infection, antibiotic
- heart failure: congestive heart failure

FREQUENT MISSPELLINGS:
- cholestrl: cholesterol
- metformen: metformin
- diabetis: diabetes
- atorvastain: atorvastatin
- lisinipril: lisinopril
- aspirn: aspirin

SEARCH TEXT:
search_text is embedded for vector search. It holds drug names and active ingredients only.
Never put conditions, symptoms or filler words (therapy, treatment, medication, drugs, for, with) in it.
- A specific drug name stays as it is, spelling fixed if needed.
  "crestor" gives "crestor"
- A treatment description becomes the prescribed ingredients.
  "men trt" gives "testosterone"
  "women hrt" gives "estrogen progesterone"
- A condition or symptom becomes 3 to 5 ingredient names, without the condition itself.
  "high cholesterol" gives "atorvastatin rosuvastatin simvastatin pravastatin lovastatin"
  "blood pressure" gives "lisinopril losartan amlodipine metoprolol"

OUTPUT:
{
  "search_text": "text built with the rules above",
  "filters": {
    "dosage_form": "tablet, capsule, injection, cream, ... only if the query names one",
    "strength": "only if the query names one, e.g. 10mg, 200 mg, 0.5%"
  },
  "corrections": ["original → corrected"],
  "confidence": 0.0
}

Never return drug_class, indication, drug_type, dea_schedule or is_generic. The search system derives those itself."#;

/// Build the user turn for a query
pub fn user_message(query: &str) -> String {
    format!(
        "User query: \"{}\"\n\n\
         Return the structured search parameters for this query as one JSON object matching the schema.\n\
         No markdown fences, no commentary.",
        query
    )
}

/// Full completion request for a query
pub fn build_search_request(query: &str, max_tokens: usize, temperature: f32) -> CompletionRequest {
    CompletionRequest {
        system: MEDICAL_SEARCH_SYSTEM_PROMPT.to_string(),
        user: user_message(query),
        max_tokens,
        temperature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_quotes_query() {
        let msg = user_message("crester 200mg");
        assert!(msg.starts_with("User query: \"crester 200mg\""));
        assert!(msg.contains("No markdown fences"));
    }

    #[test]
    fn test_build_search_request() {
        let request = build_search_request("high cholesterol", 400, 0.0);
        assert_eq!(request.max_tokens, 400);
        assert_eq!(request.temperature, 0.0);
        assert!(request.system.contains("search_text"));
        assert!(request.user.contains("high cholesterol"));
    }

    #[test]
    fn test_prompt_forbids_derived_fields() {
        assert!(MEDICAL_SEARCH_SYSTEM_PROMPT.contains("Never return drug_class"));
        assert!(MEDICAL_SEARCH_SYSTEM_PROMPT.contains("\"corrections\""));
    }
}
