//! Token cost calculator for the chat model.
//!
//! Pure lookup-table arithmetic over the vendor's per-1M-token prices. Used by
//! the `dcache cost` command to estimate what a prompt with attached cached
//! documents will cost.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GeminiModel {
    #[serde(rename = "gemini-1.5-flash")]
    Flash15,
    #[serde(rename = "gemini-1.5-pro")]
    Pro15,
}

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

impl GeminiModel {
    pub fn pricing(&self) -> ModelPricing {
        match self {
            GeminiModel::Flash15 => ModelPricing {
                input: 0.075,
                output: 0.30,
            },
            GeminiModel::Pro15 => ModelPricing {
                input: 1.25,
                output: 5.00,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeminiModel::Flash15 => "gemini-1.5-flash",
            GeminiModel::Pro15 => "gemini-1.5-pro",
        }
    }
}

impl fmt::Display for GeminiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeminiModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gemini-1.5-flash" => Ok(GeminiModel::Flash15),
            "gemini-1.5-pro" => Ok(GeminiModel::Pro15),
            other => bail!("Unknown model: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub model: GeminiModel,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// What the caller optimises for when picking a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Cost,
    Quality,
}

/// Output tokens assumed by estimates when the caller has no better number.
pub const DEFAULT_ESTIMATED_OUTPUT_TOKENS: u64 = 1000;

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn calculate_costs(model: GeminiModel, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
    let pricing = model.pricing();
    let input_cost = input_tokens as f64 / 1_000_000.0 * pricing.input;
    let output_cost = output_tokens as f64 / 1_000_000.0 * pricing.output;

    CostBreakdown {
        model,
        input_cost: round6(input_cost),
        output_cost: round6(output_cost),
        total_cost: round6(input_cost + output_cost),
        input_tokens,
        output_tokens,
        total_tokens: input_tokens + output_tokens,
    }
}

/// Flash unless quality is preferred and Pro costs less than ten times Flash.
pub fn optimal_model(input_tokens: u64, expected_output_tokens: u64, priority: Priority) -> GeminiModel {
    let flash = calculate_costs(GeminiModel::Flash15, input_tokens, expected_output_tokens);
    let pro = calculate_costs(GeminiModel::Pro15, input_tokens, expected_output_tokens);

    if priority == Priority::Quality && pro.total_cost < flash.total_cost * 10.0 {
        GeminiModel::Pro15
    } else {
        GeminiModel::Flash15
    }
}

pub fn cost_per_message(total_cost: f64, message_count: u64) -> f64 {
    if message_count == 0 {
        return 0.0;
    }
    round6(total_cost / message_count as f64)
}

/// Percentage of `daily_budget` already spent.
pub fn budget_usage(current_spending: f64, daily_budget: f64) -> f64 {
    if daily_budget == 0.0 {
        return 0.0;
    }
    round2(current_spending / daily_budget * 100.0)
}

pub fn estimate_monthly_cost(daily_spending: f64, days_in_month: u32) -> f64 {
    round2(daily_spending * days_in_month as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_costs_per_million() {
        let c = calculate_costs(GeminiModel::Flash15, 1_000_000, 1_000_000);
        assert_eq!(c.input_cost, 0.075);
        assert_eq!(c.output_cost, 0.3);
        assert_eq!(c.total_cost, 0.375);
        assert_eq!(c.total_tokens, 2_000_000);
    }

    #[test]
    fn costs_round_to_six_decimals() {
        let c = calculate_costs(GeminiModel::Pro15, 1, 1);
        assert_eq!(c.input_cost, 0.000001);
        assert_eq!(c.output_cost, 0.000005);
        assert_eq!(c.total_cost, 0.000006);
    }

    #[test]
    fn pro_costs_under_ten_times_flash_only_for_quality() {
        // Pro input is 16.7x flash and output 16.7x, so quality still picks flash.
        assert_eq!(optimal_model(1000, 1000, Priority::Quality), GeminiModel::Flash15);
        assert_eq!(optimal_model(0, 0, Priority::Cost), GeminiModel::Flash15);
    }

    #[test]
    fn model_names_parse() {
        assert_eq!("gemini-1.5-pro".parse::<GeminiModel>().unwrap(), GeminiModel::Pro15);
        assert!("gpt-4".parse::<GeminiModel>().is_err());
    }

    #[test]
    fn ratio_helpers_guard_zero() {
        assert_eq!(cost_per_message(1.0, 0), 0.0);
        assert_eq!(cost_per_message(1.0, 3), 0.333333);
        assert_eq!(budget_usage(2.5, 0.0), 0.0);
        assert_eq!(budget_usage(2.5, 10.0), 25.0);
        assert_eq!(estimate_monthly_cost(1.234, 30), 37.02);
    }
}
