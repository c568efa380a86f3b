use crate::policy::{pii, Escalation, PiiHandling, Policy, PolicyConfigError};
use crate::run::{RunConfig, RunState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

const RATE_WINDOW_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ForbiddenAction,
    RateLimit,
    ConcurrentTools,
    PiiDetected,
    BudgetExceeded,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::ForbiddenAction => write!(f, "forbidden_action"),
            ViolationKind::RateLimit => write!(f, "rate_limit"),
            ViolationKind::ConcurrentTools => write!(f, "concurrent_tools"),
            ViolationKind::PiiDetected => write!(f, "pii_detected"),
            ViolationKind::BudgetExceeded => write!(f, "budget_exceeded"),
        }
    }
}

/// A guardrail trigger. Deliberately a value, not an error type: the
/// scheduler consumes it to decide pause/stop and records it in the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    pub action: String,
    pub details: String,
    pub escalation: Escalation,
}

/// Per-run guardrail evaluator. Owns the live counters (in-flight tool ids,
/// per-tool rate windows); dropped and recreated across pause boundaries.
#[derive(Debug)]
pub struct PolicyEnforcer {
    policy: Policy,
    in_flight: BTreeSet<String>,
    call_windows: HashMap<String, Vec<i64>>,
}

impl PolicyEnforcer {
    pub fn new(policy: Policy) -> Result<Self, PolicyConfigError> {
        policy.validate()?;
        Ok(Self {
            policy,
            in_flight: BTreeSet::new(),
            call_windows: HashMap::new(),
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn validate_action(
        &self,
        action: &str,
        required_scopes: &[String],
    ) -> Result<(), PolicyViolation> {
        if self.policy.forbidden_actions.contains(action) {
            return Err(PolicyViolation {
                kind: ViolationKind::ForbiddenAction,
                action: action.to_string(),
                details: format!("action `{action}` is forbidden by policy"),
                escalation: self.policy.escalation_on_violation,
            });
        }
        for scope in required_scopes {
            if !self.policy.grants_scope(scope) {
                return Err(PolicyViolation {
                    kind: ViolationKind::ForbiddenAction,
                    action: action.to_string(),
                    details: format!("data access scope `{scope}` is not granted"),
                    escalation: self.policy.escalation_on_violation,
                });
            }
        }
        Ok(())
    }

    /// Admits or rejects a tool call at `now_ms`. On success the call is
    /// recorded; the caller must invoke `complete_tool_call` exactly once or
    /// the concurrency slot stays occupied.
    pub fn validate_tool_call(&mut self, tool_id: &str, now_ms: i64) -> Result<(), PolicyViolation> {
        if self.in_flight.len() >= self.policy.max_concurrent_tools as usize {
            return Err(PolicyViolation {
                kind: ViolationKind::ConcurrentTools,
                action: tool_id.to_string(),
                details: format!(
                    "{} tool calls already in flight (limit {})",
                    self.in_flight.len(),
                    self.policy.max_concurrent_tools
                ),
                escalation: self.policy.escalation_on_violation,
            });
        }

        let window = self.call_windows.entry(tool_id.to_string()).or_default();
        window.retain(|ts| now_ms - *ts < RATE_WINDOW_MS);
        if window.len() >= self.policy.rate_limit_per_min as usize {
            return Err(PolicyViolation {
                kind: ViolationKind::RateLimit,
                action: tool_id.to_string(),
                details: format!(
                    "tool `{tool_id}` exceeded {} calls per minute",
                    self.policy.rate_limit_per_min
                ),
                escalation: self.policy.escalation_on_violation,
            });
        }

        window.push(now_ms);
        self.in_flight.insert(tool_id.to_string());
        Ok(())
    }

    pub fn complete_tool_call(&mut self, tool_id: &str) {
        self.in_flight.remove(tool_id);
    }

    pub fn validate_pii(&self, content: &str) -> Result<(), PolicyViolation> {
        if self.policy.pii_handling == PiiHandling::Allow {
            return Ok(());
        }
        let detected = pii::detect(content);
        if detected.is_empty() {
            return Ok(());
        }
        // Mask mode pauses so the masked copy can be applied before the run
        // continues; deny mode follows the configured escalation.
        let escalation = match self.policy.pii_handling {
            PiiHandling::Mask => Escalation::Pause,
            _ => self.policy.escalation_on_violation,
        };
        Err(PolicyViolation {
            kind: ViolationKind::PiiDetected,
            action: "content".to_string(),
            details: format!("detected pii patterns: {}", detected.join(", ")),
            escalation,
        })
    }

    pub fn mask_pii(&self, content: &str) -> String {
        pii::mask(content)
    }

    /// Budget violations always escalate to stop, regardless of the policy's
    /// configured escalation.
    pub fn validate_budget(
        &self,
        state: &RunState,
        config: &RunConfig,
        now: i64,
    ) -> Result<(), PolicyViolation> {
        if config.budget_usd > 0.0 && state.spent_usd >= config.budget_usd {
            return Err(budget_violation(format!(
                "spent ${:.4} of ${:.4} budget",
                state.spent_usd, config.budget_usd
            )));
        }
        if config.token_budget > 0 && state.spent_tokens >= config.token_budget {
            return Err(budget_violation(format!(
                "spent {} of {} token budget",
                state.spent_tokens, config.token_budget
            )));
        }
        if config.time_limit_sec > 0 {
            let elapsed = (now - state.created_at).max(0) as u64;
            if elapsed >= config.time_limit_sec {
                return Err(budget_violation(format!(
                    "elapsed {elapsed}s of {}s time limit",
                    config.time_limit_sec
                )));
            }
        }
        Ok(())
    }
}

fn budget_violation(details: String) -> PolicyViolation {
    PolicyViolation {
        kind: ViolationKind::BudgetExceeded,
        action: "budget".to_string(),
        details,
        escalation: Escalation::Stop,
    }
}
