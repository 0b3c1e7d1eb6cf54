//! Per-model token pricing

use serde::Serialize;

use crate::claude::ClaudeModel;

/// USD per one million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Pricing for a model id or alias; unknown models are priced as the default model
    pub fn for_model(model: &str) -> Self {
        match ClaudeModel::parse(model).unwrap_or_default() {
            ClaudeModel::Sonnet4 => Self {
                input_per_million: 3.00,
                output_per_million: 15.00,
            },
            ClaudeModel::Haiku3_5 => Self {
                input_per_million: 0.80,
                output_per_million: 4.00,
            },
        }
    }
}

/// Cost breakdown in USD
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostEstimate {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

pub fn estimate_cost(model: &str, input_tokens: usize, output_tokens: usize) -> CostEstimate {
    let pricing = ModelPricing::for_model(model);
    let input = input_tokens as f64 * pricing.input_per_million / 1_000_000.0;
    let output = output_tokens as f64 * pricing.output_per_million / 1_000_000.0;
    CostEstimate {
        input,
        output,
        total: input + output,
    }
}
