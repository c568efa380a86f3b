use agentwarden::policy::{Escalation, PiiHandling, PolicyViolation, ViolationKind};
use agentwarden::run::{PlannedStep, RunConfig, RunState, RunStatus, StepKind};
use agentwarden::scheduler::{
    NoPresets, RunScheduler, SchedulerSettings, StepExecutor, StepOutcome,
};
use agentwarden::store::RunStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scripted collaborator: per-index messages and one optional violation.
struct Scripted {
    violation_at: Option<usize>,
    violation_escalation: Escalation,
    message_at: Option<(usize, String)>,
}

impl StepExecutor for Scripted {
    fn execute(
        &self,
        _config: &RunConfig,
        step: &PlannedStep,
        index: usize,
    ) -> Result<StepOutcome, String> {
        let mut outcome = StepOutcome {
            tokens: Some(10),
            latency_ms: 0,
            ..StepOutcome::default()
        };
        if self.violation_at == Some(index) {
            outcome.violation = Some(PolicyViolation {
                kind: ViolationKind::ForbiddenAction,
                action: step.id.clone(),
                details: format!("scripted violation at `{}`", step.title),
                escalation: self.violation_escalation,
            });
        }
        if let Some((at, message)) = &self.message_at {
            if *at == index {
                outcome.message = Some(message.clone());
            }
        }
        Ok(outcome)
    }
}

fn plan(count: usize) -> Vec<PlannedStep> {
    (0..count)
        .map(|index| PlannedStep {
            id: format!("step-{}", index + 1),
            title: format!("part {index}"),
            kind: StepKind::Thought,
            tool_id: None,
            est_tokens: 50,
            est_usd: 0.001,
        })
        .collect()
}

fn scheduler(root: &std::path::Path, executor: Scripted) -> RunScheduler {
    RunScheduler::new(
        Arc::new(RunStore::new(root)),
        Arc::new(executor),
        Arc::new(NoPresets),
        SchedulerSettings { tick_interval_ms: 2 },
    )
}

fn wait_until(
    scheduler: &RunScheduler,
    run_id: &str,
    predicate: impl Fn(&RunState) -> bool,
) -> RunState {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let state = scheduler.store().load_run(run_id).expect("load");
        if predicate(&state) {
            return state;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting on {run_id}, status {}",
            state.status
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn pause_escalation_pauses_and_resume_recovers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scheduler = scheduler(
        dir.path(),
        Scripted {
            violation_at: Some(1),
            violation_escalation: Escalation::Pause,
            message_at: None,
        },
    );

    let mut config = RunConfig::new("run-pauseviol", "trip a guardrail", "gpt-4o-mini");
    config.steps = Some(plan(4));
    scheduler.create_run(config).expect("create");
    scheduler.start_agent("run-pauseviol").expect("start");

    let paused = wait_until(&scheduler, "run-pauseviol", |state| {
        state.status == RunStatus::Paused
    });
    assert!(paused
        .last_message
        .as_deref()
        .expect("message")
        .contains("forbidden_action"));

    // The violating step already landed; resume picks up after it.
    scheduler.resume_agent("run-pauseviol").expect("resume");
    let state = wait_until(&scheduler, "run-pauseviol", |state| state.status.is_terminal());
    assert_eq!(state.status, RunStatus::Completed);

    let traces = scheduler
        .store()
        .load_traces("run-pauseviol")
        .expect("traces");
    assert!(traces
        .iter()
        .any(|event| event.name == "agent.policy_violation"));
}

#[test]
fn stop_escalation_fails_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scheduler = scheduler(
        dir.path(),
        Scripted {
            violation_at: Some(1),
            violation_escalation: Escalation::Stop,
            message_at: None,
        },
    );

    let mut config = RunConfig::new("run-stopviol", "trip a guardrail", "gpt-4o-mini");
    config.steps = Some(plan(4));
    scheduler.create_run(config).expect("create");
    scheduler.start_agent("run-stopviol").expect("start");

    let state = wait_until(&scheduler, "run-stopviol", |state| state.status.is_terminal());
    assert_eq!(state.status, RunStatus::Failed);
    assert!(state
        .last_message
        .as_deref()
        .expect("message")
        .contains("forbidden_action"));
}

#[test]
fn masked_pii_is_persisted_and_the_run_pauses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scheduler = scheduler(
        dir.path(),
        Scripted {
            violation_at: None,
            violation_escalation: Escalation::Pause,
            message_at: Some((1, "email the owner at boss@corp.example".to_string())),
        },
    );

    let mut config = RunConfig::new("run-mask", "leaky output", "gpt-4o-mini");
    config.steps = Some(plan(4));
    config.policy.pii_handling = PiiHandling::Mask;
    scheduler.create_run(config).expect("create");
    scheduler.start_agent("run-mask").expect("start");

    let paused = wait_until(&scheduler, "run-mask", |state| {
        state.status == RunStatus::Paused
    });
    let message = paused.last_message.as_deref().expect("message");
    assert!(message.contains("***@***.***"), "got: {message}");
    assert!(!message.contains("boss@corp.example"));

    scheduler.resume_agent("run-mask").expect("resume");
    let state = wait_until(&scheduler, "run-mask", |state| state.status.is_terminal());
    assert_eq!(state.status, RunStatus::Completed);
}

#[test]
fn denied_pii_with_stop_escalation_fails_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scheduler = scheduler(
        dir.path(),
        Scripted {
            violation_at: None,
            violation_escalation: Escalation::Pause,
            message_at: Some((1, "ssn is 123-45-6789".to_string())),
        },
    );

    let mut config = RunConfig::new("run-deny", "leaky output", "gpt-4o-mini");
    config.steps = Some(plan(4));
    config.policy.pii_handling = PiiHandling::Deny;
    config.policy.escalation_on_violation = Escalation::Stop;
    scheduler.create_run(config).expect("create");
    scheduler.start_agent("run-deny").expect("start");

    let state = wait_until(&scheduler, "run-deny", |state| state.status.is_terminal());
    assert_eq!(state.status, RunStatus::Failed);
    assert!(state
        .last_message
        .as_deref()
        .expect("message")
        .contains("pii_detected"));
}

struct PlainTool;

impl StepExecutor for PlainTool {
    fn execute(
        &self,
        _config: &RunConfig,
        _step: &PlannedStep,
        _index: usize,
    ) -> Result<StepOutcome, String> {
        Ok(StepOutcome {
            tokens: Some(10),
            latency_ms: 0,
            ..StepOutcome::default()
        })
    }
}

#[test]
fn forbidden_tool_steps_are_blocked_by_the_enforcer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scheduler = RunScheduler::new(
        Arc::new(RunStore::new(dir.path())),
        Arc::new(PlainTool),
        Arc::new(NoPresets),
        SchedulerSettings { tick_interval_ms: 2 },
    );

    let steps = vec![
        PlannedStep {
            id: "step-1".to_string(),
            title: "think".to_string(),
            kind: StepKind::Thought,
            tool_id: None,
            est_tokens: 50,
            est_usd: 0.001,
        },
        PlannedStep {
            id: "step-2".to_string(),
            title: "wipe".to_string(),
            kind: StepKind::Tool,
            tool_id: Some("delete_files".to_string()),
            est_tokens: 50,
            est_usd: 0.001,
        },
    ];
    let mut config = RunConfig::new("run-forbidden", "try a banned tool", "gpt-4o-mini");
    config.steps = Some(steps);
    config.policy.forbidden_actions = BTreeSet::from(["delete_files".to_string()]);
    config.policy.escalation_on_violation = Escalation::Stop;
    scheduler.create_run(config).expect("create");
    scheduler.start_agent("run-forbidden").expect("start");

    let state = wait_until(&scheduler, "run-forbidden", |state| {
        state.status.is_terminal()
    });
    assert_eq!(state.status, RunStatus::Failed);
    // The forbidden call never executed.
    assert!(state.tool_calls.is_empty());
    assert_eq!(state.current_step_index, 1);
}
