use crate::policy::{PolicyViolation, ViolationKind};
use crate::run::{PlannedStep, RunConfig, StepKind};
use crate::scheduler::cost;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// What one step execution produced. Token/cost/latency figures belong to the
/// collaborator; the scheduler only falls back to estimates when they are
/// absent.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    pub latency_ms: u64,
    pub message: Option<String>,
    pub hitl_question: Option<String>,
    pub violation: Option<PolicyViolation>,
}

/// External tool/model collaborator. Implementations must be callable from
/// multiple run worker threads.
pub trait StepExecutor: Send + Sync {
    fn execute(
        &self,
        config: &RunConfig,
        step: &PlannedStep,
        index: usize,
    ) -> Result<StepOutcome, String>;
}

/// Static preset catalog consumed by the scheduler when a run names a preset
/// and supplies no explicit steps.
pub trait PresetCatalog: Send + Sync {
    fn steps(&self, preset_id: &str) -> Option<Vec<PlannedStep>>;
}

#[derive(Debug, Default)]
pub struct NoPresets;

impl PresetCatalog for NoPresets {
    fn steps(&self, _preset_id: &str) -> Option<Vec<PlannedStep>> {
        None
    }
}

/// Stand-in for a live model/tool backend. All randomness derives from the
/// run's seed and the step index, so a seeded run replays identically.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    pub hitl_chance: f64,
    pub violation_chance: f64,
    pub tool_latency_ms: u64,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self {
            hitl_chance: 0.01,
            violation_chance: 0.005,
            tool_latency_ms: 120,
        }
    }
}

impl SimulatedExecutor {
    fn rng_for(config: &RunConfig, index: usize) -> StdRng {
        let base = config.seed.unwrap_or(0);
        let mixed = base ^ (index as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        StdRng::seed_from_u64(mixed)
    }
}

impl StepExecutor for SimulatedExecutor {
    fn execute(
        &self,
        config: &RunConfig,
        step: &PlannedStep,
        index: usize,
    ) -> Result<StepOutcome, String> {
        let mut rng = Self::rng_for(config, index);

        let base_tokens = if step.est_tokens > 0 {
            step.est_tokens
        } else {
            cost::fallback_tokens(step.kind)
        };
        let tokens = base_tokens + rng.random_range(0..32);

        let latency_ms = match step.kind {
            StepKind::Tool => {
                self.tool_latency_ms + rng.random_range(0..self.tool_latency_ms / 4 + 1)
            }
            _ => rng.random_range(1..5),
        };

        let message = match step.kind {
            StepKind::Message => Some(format!("progress update: {}", step.title)),
            StepKind::Check => Some(format!("check passed: {}", step.title)),
            _ => None,
        };

        let hitl_question = if rng.random_bool(self.hitl_chance.clamp(0.0, 1.0)) {
            Some(format!("Approve step `{}` before continuing?", step.title))
        } else {
            None
        };

        let violation = if rng.random_bool(self.violation_chance.clamp(0.0, 1.0)) {
            Some(PolicyViolation {
                kind: ViolationKind::ForbiddenAction,
                action: step.id.clone(),
                details: format!("simulated forbidden action during `{}`", step.title),
                escalation: config.policy.escalation_on_violation,
            })
        } else {
            None
        };

        Ok(StepOutcome {
            tokens: Some(tokens),
            cost_usd: None,
            latency_ms,
            message,
            hitl_question,
            violation,
        })
    }
}

/// Generates a plan for runs without explicit steps or a preset. Step count
/// and estimates derive from the run seed; an unseeded run draws entropy.
pub fn generate_plan(config: &RunConfig) -> Vec<PlannedStep> {
    let seed = config.seed.unwrap_or_else(entropy_seed);
    let mut rng = StdRng::seed_from_u64(seed);
    let count: usize = rng.random_range(4..=9);

    let mut steps = Vec::with_capacity(count);
    for index in 0..count {
        let (kind, tool_id, title) = if index == 0 {
            (StepKind::Thought, None, "Assess the goal".to_string())
        } else if index == count - 1 {
            (StepKind::Check, None, "Verify the result".to_string())
        } else if index == count - 2 {
            (StepKind::Message, None, "Summarize findings".to_string())
        } else if !config.tool_allow_list.is_empty() && index % 2 == 1 {
            let tool = config.tool_allow_list[(index / 2) % config.tool_allow_list.len()].clone();
            let title = format!("Use {tool}");
            (StepKind::Tool, Some(tool), title)
        } else {
            (
                StepKind::Thought,
                None,
                format!("Work through part {index}"),
            )
        };

        let est_tokens = rng.random_range(150..600);
        steps.push(PlannedStep {
            id: format!("step-{}", index + 1),
            title,
            kind,
            tool_id,
            est_tokens,
            est_usd: cost::step_cost_usd(&config.model, est_tokens),
        });
    }
    steps
}

fn entropy_seed() -> u64 {
    let mut bytes = [0_u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return crate::shared::now_millis().max(0) as u64;
    }
    u64::from_le_bytes(bytes)
}
