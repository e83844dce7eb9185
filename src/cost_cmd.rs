//! `dcache cost`: estimate the token cost of a prompt.
//!
//! Without `--model` the cheaper-or-better model is chosen by
//! [`optimal_model`] for the given priority.

use anyhow::Result;

use doc_cache_core::cost::{calculate_costs, optimal_model, CostBreakdown, GeminiModel, Priority};

pub fn estimate(
    model: Option<GeminiModel>,
    input_tokens: u64,
    output_tokens: u64,
    priority: Priority,
) -> CostBreakdown {
    let model = model.unwrap_or_else(|| optimal_model(input_tokens, output_tokens, priority));
    calculate_costs(model, input_tokens, output_tokens)
}

pub fn run_cost(
    model: Option<GeminiModel>,
    input_tokens: u64,
    output_tokens: u64,
    priority: Priority,
    json: bool,
) -> Result<()> {
    let breakdown = estimate(model, input_tokens, output_tokens, priority);

    if json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
        return Ok(());
    }

    println!("Model:    {}", breakdown.model);
    println!(
        "Tokens:   {} in + {} out = {}",
        breakdown.input_tokens, breakdown.output_tokens, breakdown.total_tokens
    );
    println!("Input:    ${:.6}", breakdown.input_cost);
    println!("Output:   ${:.6}", breakdown.output_cost);
    println!("Total:    ${:.6}", breakdown.total_cost);
    Ok(())
}
