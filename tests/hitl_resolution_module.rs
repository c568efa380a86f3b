use agentwarden::run::{HitlStatus, PlannedStep, RunConfig, RunState, RunStatus, StepKind};
use agentwarden::scheduler::{
    NoPresets, RunScheduler, SchedulerError, SchedulerSettings, StepExecutor, StepOutcome,
};
use agentwarden::store::RunStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Raises exactly one approval question, at the configured step index.
struct AskAt {
    index: usize,
}

impl StepExecutor for AskAt {
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
        if index == self.index {
            outcome.hitl_question = Some(format!("continue past `{}`?", step.title));
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

fn scheduler(root: &std::path::Path, ask_at: usize) -> RunScheduler {
    RunScheduler::new(
        Arc::new(RunStore::new(root)),
        Arc::new(AskAt { index: ask_at }),
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
fn approval_resumes_the_run_to_completion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scheduler = scheduler(dir.path(), 1);

    let mut config = RunConfig::new("run-approve", "needs a human", "gpt-4o-mini");
    config.steps = Some(plan(4));
    scheduler.create_run(config).expect("create");
    scheduler.start_agent("run-approve").expect("start");

    let waiting = wait_until(&scheduler, "run-approve", |state| {
        state.status == RunStatus::WaitingHitl
    });
    let request = waiting.pending_hitl().expect("pending request").clone();
    assert!(request.id.starts_with("hitl-"));
    assert!(request.question.contains("part 1"));
    // The asking worker retires while the run waits.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !scheduler.active_runs().is_empty() {
        assert!(Instant::now() < deadline, "worker did not retire");
        std::thread::sleep(Duration::from_millis(2));
    }

    scheduler
        .approve_hitl("run-approve", &request.id, Some("looks fine"))
        .expect("approve");
    let state = wait_until(&scheduler, "run-approve", |state| state.status.is_terminal());
    assert_eq!(state.status, RunStatus::Completed);

    let resolved = state
        .hitl_requests
        .iter()
        .find(|r| r.id == request.id)
        .expect("request kept");
    assert_eq!(resolved.status, HitlStatus::Approved);
    assert!(resolved.resolved_at.is_some());
    assert_eq!(resolved.resolution_comment.as_deref(), Some("looks fine"));

    let traces = scheduler.store().load_traces("run-approve").expect("traces");
    assert!(traces.iter().any(|event| event.name == "agent.hitl_request"));
}

#[test]
fn rejection_fails_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scheduler = scheduler(dir.path(), 1);

    let mut config = RunConfig::new("run-reject", "needs a human", "gpt-4o-mini");
    config.steps = Some(plan(4));
    scheduler.create_run(config).expect("create");
    scheduler.start_agent("run-reject").expect("start");

    let waiting = wait_until(&scheduler, "run-reject", |state| {
        state.status == RunStatus::WaitingHitl
    });
    let request = waiting.pending_hitl().expect("pending").clone();

    scheduler
        .reject_hitl("run-reject", &request.id, None)
        .expect("reject");
    let state = scheduler.store().load_run("run-reject").expect("load");
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(
        state.hitl_requests[0].status,
        HitlStatus::Rejected
    );
    assert!(state
        .last_message
        .as_deref()
        .expect("message")
        .contains("rejected"));
}

#[test]
fn resolving_twice_or_with_a_bad_id_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scheduler = scheduler(dir.path(), 1);

    let mut config = RunConfig::new("run-twice", "needs a human", "gpt-4o-mini");
    config.steps = Some(plan(4));
    scheduler.create_run(config).expect("create");
    scheduler.start_agent("run-twice").expect("start");

    let waiting = wait_until(&scheduler, "run-twice", |state| {
        state.status == RunStatus::WaitingHitl
    });
    let request = waiting.pending_hitl().expect("pending").clone();

    assert!(matches!(
        scheduler
            .approve_hitl("run-twice", "hitl-missing", None)
            .expect_err("unknown id"),
        SchedulerError::UnknownHitlId { .. }
    ));

    scheduler
        .approve_hitl("run-twice", &request.id, None)
        .expect("approve");
    assert!(matches!(
        scheduler
            .reject_hitl("run-twice", &request.id, None)
            .expect_err("already resolved"),
        SchedulerError::HitlNotPending { .. }
    ));

    wait_until(&scheduler, "run-twice", |state| state.status.is_terminal());
}
