use crate::policy::{Escalation, PiiHandling, PolicyEnforcer, PolicyViolation};
use crate::run::{HitlRequest, HitlStatus, RunConfig, RunStatePatch, RunStatus, StepKind};
use crate::scheduler::{cost, SchedulerSettings, WorkerRegistry, CORE_VERSION};
use crate::shared::ids::generate_hitl_id;
use crate::shared::logging::append_scheduler_log_line;
use crate::shared::{now_millis, now_secs};
use crate::store::RunStore;
use crate::trace::TraceRecorder;
use crate::{manifest, scheduler::StepExecutor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sleeps in short slices so a raised stop flag interrupts the wait. Returns
/// false when the stop flag was observed.
pub(crate) fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::from_millis(0) {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(200));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

enum TickFlow {
    Continue,
    Done,
}

/// Dedicated worker owning one run's tick cadence. Ticks for the same run
/// are serialized by construction: this thread is the only place they occur.
pub(crate) struct TickWorker {
    pub store: Arc<RunStore>,
    pub executor: Arc<dyn StepExecutor>,
    pub settings: SchedulerSettings,
    pub registry: Arc<WorkerRegistry>,
    pub run_id: String,
    pub stop: Arc<AtomicBool>,
}

impl TickWorker {
    pub fn run(self) {
        let recorder = TraceRecorder::new(&self.run_id);
        let config = match self.store.load_config(&self.run_id) {
            Ok(config) => config,
            Err(err) => {
                self.log(&format!("config load failed: {err}"));
                self.finalize_failed(&recorder, &format!("config load failed: {err}"));
                self.deregister();
                return;
            }
        };
        // Counters reset whenever a worker starts, so rate/concurrency state
        // never survives a pause boundary.
        let mut enforcer = match PolicyEnforcer::new(config.policy.clone()) {
            Ok(enforcer) => enforcer,
            Err(err) => {
                self.log(&format!("policy rejected: {err}"));
                self.finalize_failed(&recorder, &format!("policy rejected: {err}"));
                self.deregister();
                return;
            }
        };

        let interval = Duration::from_millis(self.settings.tick_interval_ms.max(1));
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            match self.tick(&config, &mut enforcer, &recorder) {
                TickFlow::Continue => {
                    if !sleep_with_stop(&self.stop, interval) {
                        break;
                    }
                }
                TickFlow::Done => break,
            }
        }
        self.deregister();
    }

    fn tick(
        &self,
        config: &RunConfig,
        enforcer: &mut PolicyEnforcer,
        recorder: &TraceRecorder,
    ) -> TickFlow {
        let now = now_secs();
        let state = match self.store.load_run(&self.run_id) {
            Ok(state) => state,
            Err(_) => return TickFlow::Done,
        };
        if state.status != RunStatus::Running {
            return TickFlow::Done;
        }

        if let Err(violation) = enforcer.validate_budget(&state, config, now) {
            let _ = self
                .store
                .append_trace(&self.run_id, &recorder.violation_event(&violation));
            return self.escalate(recorder, &violation);
        }

        let Some(step) = state.planned_steps.get(state.current_step_index).cloned() else {
            return self.finalize_completed(config, recorder);
        };

        let step_span = recorder.step_event(&step, state.current_step_index);
        let _ = self.store.append_trace(&self.run_id, &step_span);

        // Tool steps must be admitted before the collaborator is invoked, so
        // a forbidden or rate-limited tool never actually runs.
        let tool_id = (step.kind == StepKind::Tool)
            .then(|| step.tool_id.clone().unwrap_or_else(|| step.id.clone()));
        if let Some(tool_id) = &tool_id {
            if let Err(violation) = enforcer.validate_action(tool_id, &[]) {
                let _ = self
                    .store
                    .append_trace(&self.run_id, &recorder.violation_event(&violation));
                return self.escalate(recorder, &violation);
            }
            if let Err(violation) = enforcer.validate_tool_call(tool_id, now_millis()) {
                let _ = self
                    .store
                    .append_trace(&self.run_id, &recorder.violation_event(&violation));
                return self.escalate(recorder, &violation);
            }
        }

        let outcome = match self
            .executor
            .execute(config, &step, state.current_step_index)
        {
            Ok(outcome) => outcome,
            Err(message) => {
                if let Some(tool_id) = &tool_id {
                    enforcer.complete_tool_call(tool_id);
                }
                let _ = self
                    .store
                    .append_trace(&self.run_id, &recorder.error_event(&message));
                return self.finalize_failed(recorder, &format!("step executor error: {message}"));
            }
        };

        let tokens = outcome.tokens.unwrap_or_else(|| {
            if step.est_tokens > 0 {
                step.est_tokens
            } else {
                cost::fallback_tokens(step.kind)
            }
        });
        let cost_usd = outcome
            .cost_usd
            .unwrap_or_else(|| cost::step_cost_usd(&config.model, tokens));

        let mut tool_calls = state.tool_calls.clone();
        if let Some(tool_id) = tool_id {
            // The collaborator wait occupies a concurrency slot but must stay
            // interruptible; a stop raised mid-wait aborts without mutating,
            // and the tool trace event only lands for a call that finished.
            let waited = sleep_with_stop(&self.stop, Duration::from_millis(outcome.latency_ms));
            enforcer.complete_tool_call(&tool_id);
            if !waited {
                return TickFlow::Done;
            }
            let tool_span = recorder.tool_event(&tool_id, &step_span, outcome.latency_ms);
            let _ = self.store.append_trace(&self.run_id, &tool_span);
            *tool_calls.entry(tool_id).or_insert(0) += 1;
        }

        let mut last_message = outcome.message.clone();
        let mut pii_violation: Option<PolicyViolation> = None;
        if let Some(message) = &outcome.message {
            if let Err(violation) = enforcer.validate_pii(message) {
                let _ = self
                    .store
                    .append_trace(&self.run_id, &recorder.violation_event(&violation));
                if config.policy.pii_handling == PiiHandling::Mask {
                    // Persist only the redacted copy, then pause.
                    last_message = Some(enforcer.mask_pii(message));
                    pii_violation = Some(violation);
                } else {
                    return self.escalate(recorder, &violation);
                }
            }
        }

        let next_index = state.current_step_index + 1;
        let total = state.planned_steps.len();
        let mut patch = RunStatePatch {
            current_step_index: Some(next_index),
            progress_pct: Some(cost::progress_pct(next_index, total).min(99)),
            confidence_pct: Some(cost::confidence_pct(next_index, total)),
            spent_tokens: Some(state.spent_tokens + tokens),
            spent_usd: Some(state.spent_usd + cost_usd),
            tool_calls: Some(tool_calls),
            last_message,
            ..RunStatePatch::default()
        };

        if let Some(question) = &outcome.hitl_question {
            let request = HitlRequest {
                id: generate_hitl_id(now, state.hitl_requests.len() + 1),
                created_at: now,
                question: question.clone(),
                payload: None,
                status: HitlStatus::Pending,
                resolved_at: None,
                resolution_comment: None,
            };
            let _ = self
                .store
                .append_trace(&self.run_id, &recorder.hitl_event(&request.id, question));
            let mut requests = state.hitl_requests.clone();
            requests.push(request);
            patch.hitl_requests = Some(requests);
            patch.status = Some(RunStatus::WaitingHitl);
        }

        // Liveness check: a stop raised while this tick executed wins, and
        // none of the tick's mutations land.
        if self.stop.load(Ordering::Relaxed) {
            return TickFlow::Done;
        }
        if let Err(err) = self.store.update_state(&self.run_id, patch) {
            self.log(&format!("state update failed: {err}"));
            return TickFlow::Done;
        }
        let _ = self.store.append_trace(
            &self.run_id,
            &recorder.tick_event(
                next_index,
                cost::progress_pct(next_index, total).min(99),
                state.spent_usd + cost_usd,
                state.spent_tokens + tokens,
            ),
        );

        if outcome.hitl_question.is_some() {
            // Worker retires until the request is resolved; approval spawns a
            // fresh worker.
            return TickFlow::Done;
        }
        if let Some(violation) = &pii_violation {
            // The masked copy was just persisted as the last message; the
            // pause must not replace it with the violation detail.
            return self.escalate_keeping_message(recorder, violation);
        }
        if let Some(violation) = &outcome.violation {
            let _ = self
                .store
                .append_trace(&self.run_id, &recorder.violation_event(violation));
            return self.escalate(recorder, violation);
        }
        if next_index >= total {
            return self.finalize_completed(config, recorder);
        }
        TickFlow::Continue
    }

    fn escalate(&self, recorder: &TraceRecorder, violation: &PolicyViolation) -> TickFlow {
        self.escalate_inner(recorder, violation, false)
    }

    fn escalate_keeping_message(
        &self,
        recorder: &TraceRecorder,
        violation: &PolicyViolation,
    ) -> TickFlow {
        self.escalate_inner(recorder, violation, true)
    }

    fn escalate_inner(
        &self,
        recorder: &TraceRecorder,
        violation: &PolicyViolation,
        keep_message: bool,
    ) -> TickFlow {
        let detail = format!("policy violation ({}): {}", violation.kind, violation.details);
        match violation.escalation {
            Escalation::Stop => self.finalize_failed(recorder, &detail),
            Escalation::Pause => {
                let Ok(state) = self.store.load_run(&self.run_id) else {
                    return TickFlow::Done;
                };
                if state.status != RunStatus::Running {
                    return TickFlow::Done;
                }
                let patch = RunStatePatch {
                    status: Some(RunStatus::Paused),
                    last_message: (!keep_message).then(|| detail.clone()),
                    ..RunStatePatch::default()
                };
                if let Err(err) = self.store.update_state(&self.run_id, patch) {
                    self.log(&format!("pause update failed: {err}"));
                }
                let _ = self
                    .store
                    .append_trace(&self.run_id, &recorder.lifecycle_event("agent.paused", &detail));
                TickFlow::Done
            }
        }
    }

    fn finalize_completed(&self, config: &RunConfig, recorder: &TraceRecorder) -> TickFlow {
        let Ok(state) = self.store.load_run(&self.run_id) else {
            return TickFlow::Done;
        };
        if state.status != RunStatus::Running {
            return TickFlow::Done;
        }
        let total = state.planned_steps.len();
        let patch = RunStatePatch {
            status: Some(RunStatus::Completed),
            progress_pct: Some(100),
            confidence_pct: Some(cost::confidence_pct(total, total)),
            completed_at: Some(now_secs()),
            ..RunStatePatch::default()
        };
        let final_state = match self.store.update_state(&self.run_id, patch) {
            Ok(final_state) => final_state,
            Err(err) => {
                self.log(&format!("completion update failed: {err}"));
                return TickFlow::Done;
            }
        };

        let artifacts = self.store.list_artifacts(&self.run_id).unwrap_or_default();
        let report = manifest::build_report(config, &final_state, &artifacts);
        if let Err(err) = self.store.save_report(&self.run_id, &report) {
            self.log(&format!("report save failed: {err}"));
        }
        let registry: Vec<manifest::ToolRegistration> = config
            .tool_allow_list
            .iter()
            .map(|id| manifest::ToolRegistration {
                id: id.clone(),
                description: String::new(),
            })
            .collect();
        let snapshot = manifest::build_manifest(
            config,
            &final_state,
            &registry,
            &artifacts,
            manifest::Environment::current(CORE_VERSION),
            CORE_VERSION,
        );
        if let Err(err) = self.store.save_manifest(&self.run_id, &snapshot) {
            self.log(&format!("manifest save failed: {err}"));
        }
        let _ = self.store.append_trace(
            &self.run_id,
            &recorder.lifecycle_event("agent.completed", "all planned steps executed"),
        );
        TickFlow::Done
    }

    fn finalize_failed(&self, recorder: &TraceRecorder, message: &str) -> TickFlow {
        let Ok(state) = self.store.load_run(&self.run_id) else {
            return TickFlow::Done;
        };
        if state.status.is_terminal() {
            return TickFlow::Done;
        }
        let patch = RunStatePatch {
            status: Some(RunStatus::Failed),
            completed_at: Some(now_secs()),
            last_message: Some(message.to_string()),
            ..RunStatePatch::default()
        };
        if let Err(err) = self.store.update_state(&self.run_id, patch) {
            self.log(&format!("failure update failed: {err}"));
        }
        let _ = self
            .store
            .append_trace(&self.run_id, &recorder.lifecycle_event("agent.failed", message));
        TickFlow::Done
    }

    /// Removes this worker's registry entry unless a newer worker replaced it.
    fn deregister(&self) {
        let mut registry = self.registry.lock().expect("worker registry lock poisoned");
        let owned = registry
            .get(&self.run_id)
            .map(|handle| Arc::ptr_eq(&handle.stop, &self.stop))
            .unwrap_or(false);
        if owned {
            registry.remove(&self.run_id);
        }
    }

    fn log(&self, message: &str) {
        let _ = append_scheduler_log_line(
            self.store.state_root(),
            &format!(
                "level=warn event=scheduler.worker run_id={} {message}",
                self.run_id
            ),
        );
    }
}
