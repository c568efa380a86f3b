pub mod report;

pub use report::{build_report, Report, ReportMetrics};

use crate::policy::Policy;
use crate::run::{CredentialRef, RunConfig, RunState};
use crate::shared::now_secs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub os: String,
    pub arch: String,
    pub core_version: String,
}

impl Environment {
    pub fn current(core_version: impl Into<String>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            core_version: core_version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRegistration {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// Run config reduced to what an audit reader may see: credential references
/// keep only `{id, label}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedConfig {
    pub id: String,
    pub goal: String,
    pub model: String,
    #[serde(default)]
    pub model_allow_list: Vec<String>,
    #[serde(default)]
    pub tool_allow_list: Vec<String>,
    #[serde(default)]
    pub credentials: Vec<CredentialRef>,
    pub budget_usd: f64,
    pub token_budget: u64,
    pub time_limit_sec: u64,
    pub policy: Policy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub spent_usd: f64,
    pub spent_tokens: u64,
    #[serde(default)]
    pub tool_calls: BTreeMap<String, u64>,
}

/// Immutable audit snapshot of a run. Built on demand or at completion and
/// never mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub manifest_id: String,
    pub run_id: String,
    pub created_at: i64,
    pub environment: Environment,
    pub config: SanitizedConfig,
    #[serde(default)]
    pub tool_registry: Vec<ToolRegistration>,
    pub model: String,
    pub provider: String,
    pub seed: u64,
    pub state: RunState,
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub cost_summary: CostSummary,
}

/// Top-level fields `validate_manifest` requires to be present and non-null.
const REQUIRED_FIELDS: &[&str] = &[
    "manifestId",
    "runId",
    "createdAt",
    "environment",
    "config",
    "model",
    "provider",
    "seed",
    "state",
    "costSummary",
];

/// Pure snapshot builder. The manifest id is content-derived (sha256 of run
/// id, creation timestamp and goal); the seed is taken from the config when
/// present so simulated runs stay replayable, otherwise drawn fresh.
pub fn build_manifest(
    config: &RunConfig,
    state: &RunState,
    tool_registry: &[ToolRegistration],
    artifacts: &[String],
    environment: Environment,
    _core_version: &str,
) -> Manifest {
    let created_at = now_secs();
    let manifest_id = derive_manifest_id(&config.id, created_at, &config.goal);
    let seed = config.seed.unwrap_or_else(random_seed);

    Manifest {
        manifest_id,
        run_id: config.id.clone(),
        created_at,
        environment,
        config: sanitize_config(config),
        tool_registry: tool_registry.to_vec(),
        model: config.model.clone(),
        provider: provider_for_model(&config.model).to_string(),
        seed,
        state: state.clone(),
        artifacts: artifacts.to_vec(),
        cost_summary: CostSummary {
            spent_usd: state.spent_usd,
            spent_tokens: state.spent_tokens,
            tool_calls: state.tool_calls.clone(),
        },
    }
}

/// Returns the required top-level fields missing from the manifest; an empty
/// list means valid.
pub fn validate_manifest(manifest: &Manifest) -> Vec<String> {
    let value = match serde_json::to_value(manifest) {
        Ok(value) => value,
        Err(_) => {
            return REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect();
        }
    };
    REQUIRED_FIELDS
        .iter()
        .filter(|field| {
            let entry = value.get(**field);
            entry.is_none() || entry == Some(&serde_json::Value::Null)
        })
        .map(|field| field.to_string())
        .collect()
}

fn sanitize_config(config: &RunConfig) -> SanitizedConfig {
    SanitizedConfig {
        id: config.id.clone(),
        goal: config.goal.clone(),
        model: config.model.clone(),
        model_allow_list: config.model_allow_list.clone(),
        tool_allow_list: config.tool_allow_list.clone(),
        credentials: config
            .credentials
            .iter()
            .map(|cred| CredentialRef {
                id: cred.id.clone(),
                label: cred.label.clone(),
            })
            .collect(),
        budget_usd: config.budget_usd,
        token_budget: config.token_budget,
        time_limit_sec: config.time_limit_sec,
        policy: config.policy.clone(),
    }
}

fn derive_manifest_id(run_id: &str, created_at: i64, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(created_at.to_le_bytes());
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("mf-{hex}")
}

fn random_seed() -> u64 {
    let mut bytes = [0_u8; 8];
    // Entropy failure degrades to a time-derived seed; the manifest stays
    // buildable either way.
    if getrandom::getrandom(&mut bytes).is_err() {
        return now_secs().max(0) as u64;
    }
    u64::from_le_bytes(bytes)
}

fn provider_for_model(model: &str) -> &'static str {
    let lowered = model.to_ascii_lowercase();
    if lowered.starts_with("claude") {
        "anthropic"
    } else if lowered.starts_with("gpt") || lowered.starts_with("o1") || lowered.starts_with("o3") {
        "openai"
    } else if lowered.starts_with("gemini") {
        "google"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_id_is_stable_for_same_inputs() {
        let a = derive_manifest_id("run-1", 1000, "goal");
        let b = derive_manifest_id("run-1", 1000, "goal");
        let c = derive_manifest_id("run-1", 1001, "goal");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("mf-"));
    }

    #[test]
    fn provider_is_derived_from_model_prefix() {
        assert_eq!(provider_for_model("claude-sonnet-4"), "anthropic");
        assert_eq!(provider_for_model("gpt-4o-mini"), "openai");
        assert_eq!(provider_for_model("o3-mini"), "openai");
        assert_eq!(provider_for_model("gemini-pro"), "google");
        assert_eq!(provider_for_model("local-llama"), "unknown");
    }
}
