use crate::run::StepKind;

/// USD per 1K tokens. Unknown models fall back to `DEFAULT_COST_PER_1K`.
const MODEL_COSTS: &[(&str, f64)] = &[
    ("gpt-4o", 0.01),
    ("gpt-4o-mini", 0.0006),
    ("o3-mini", 0.0044),
    ("claude-sonnet", 0.009),
    ("claude-haiku", 0.0024),
    ("claude-opus", 0.045),
    ("gemini-pro", 0.0035),
];

const DEFAULT_COST_PER_1K: f64 = 0.008;

pub fn cost_per_1k_tokens(model: &str) -> f64 {
    let lowered = model.to_ascii_lowercase();
    MODEL_COSTS
        .iter()
        .find(|(name, _)| lowered.starts_with(name))
        .map(|(_, cost)| *cost)
        .unwrap_or(DEFAULT_COST_PER_1K)
}

pub fn step_cost_usd(model: &str, tokens: u64) -> f64 {
    tokens as f64 / 1000.0 * cost_per_1k_tokens(model)
}

/// Token estimate when neither the executor nor the step supplies one.
pub fn fallback_tokens(kind: StepKind) -> u64 {
    match kind {
        StepKind::Thought => 250,
        StepKind::Tool => 400,
        StepKind::Message => 150,
        StepKind::Check => 100,
    }
}

pub fn progress_pct(steps_done: usize, steps_total: usize) -> u8 {
    if steps_total == 0 {
        return 100;
    }
    ((steps_done * 100 / steps_total).min(100)) as u8
}

/// Confidence climbs with progress and tops out short of certainty.
pub fn confidence_pct(steps_done: usize, steps_total: usize) -> u8 {
    if steps_total == 0 {
        return 95;
    }
    (40 + (steps_done * 55 / steps_total).min(55)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_use_table_rates() {
        assert!((step_cost_usd("gpt-4o-mini", 1000) - 0.0006).abs() < 1e-9);
        assert!((step_cost_usd("claude-sonnet-4", 2000) - 0.018).abs() < 1e-9);
    }

    #[test]
    fn unknown_models_use_default_rate() {
        assert!((cost_per_1k_tokens("local-llama") - DEFAULT_COST_PER_1K).abs() < 1e-9);
    }

    #[test]
    fn progress_is_bounded_and_complete_at_end() {
        assert_eq!(progress_pct(0, 4), 0);
        assert_eq!(progress_pct(2, 4), 50);
        assert_eq!(progress_pct(4, 4), 100);
        assert_eq!(progress_pct(0, 0), 100);
    }

    #[test]
    fn confidence_grows_monotonically() {
        let mut last = 0;
        for done in 0..=6 {
            let confidence = confidence_pct(done, 6);
            assert!(confidence >= last);
            last = confidence;
        }
        assert_eq!(confidence_pct(6, 6), 95);
    }
}
