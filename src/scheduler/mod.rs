pub mod cost;
pub mod error;
pub mod executor;
mod tick;

pub use error::SchedulerError;
pub use executor::{
    generate_plan, NoPresets, PresetCatalog, SimulatedExecutor, StepExecutor, StepOutcome,
};

use crate::run::{HitlStatus, RunConfig, RunState, RunStatePatch, RunStatus};
use crate::shared::ids::{generate_run_id, validate_identifier_value};
use crate::shared::logging::append_scheduler_log_line;
use crate::shared::now_secs;
use crate::store::RunStore;
use crate::trace::TraceRecorder;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tick::TickWorker;

pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

const RUN_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

pub(crate) struct RunHandle {
    pub stop: Arc<AtomicBool>,
    pub join: Option<JoinHandle<()>>,
}

pub(crate) type WorkerRegistry = Mutex<HashMap<String, RunHandle>>;

/// Owns the run lifecycle: creation, worker threads, pause/resume/stop and
/// HITL resolution. One worker thread per active run; all state writes go
/// through the store.
pub struct RunScheduler {
    store: Arc<RunStore>,
    executor: Arc<dyn StepExecutor>,
    presets: Arc<dyn PresetCatalog>,
    settings: SchedulerSettings,
    registry: Arc<WorkerRegistry>,
}

impl RunScheduler {
    pub fn new(
        store: Arc<RunStore>,
        executor: Arc<dyn StepExecutor>,
        presets: Arc<dyn PresetCatalog>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            executor,
            presets,
            settings,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Registers a run in status `starting`. An empty config id gets a fresh
    /// generated one; the planned steps are resolved here (explicit steps,
    /// then preset, then a generated plan) and persisted with the run.
    pub fn create_run(&self, mut config: RunConfig) -> Result<RunState, SchedulerError> {
        config.policy.validate()?;

        if config.id.is_empty() {
            config.id = self.allocate_run_id()?;
        } else {
            validate_identifier_value("run id", &config.id)
                .map_err(SchedulerError::RunIdAllocation)?;
        }

        let plan = self.assign_plan(&config);
        config.steps = Some(plan.clone());

        let state = self.store.create_run(&config)?;
        let patched = self.store.update_state(
            &state.id,
            RunStatePatch {
                planned_steps: Some(plan),
                ..RunStatePatch::default()
            },
        )?;
        Ok(patched)
    }

    fn allocate_run_id(&self) -> Result<String, SchedulerError> {
        for _ in 0..RUN_ID_ATTEMPTS {
            let candidate =
                generate_run_id(now_secs()).map_err(SchedulerError::RunIdAllocation)?;
            if !self.store.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(SchedulerError::RunIdAllocation(format!(
            "no unique run id after {RUN_ID_ATTEMPTS} attempts"
        )))
    }

    fn assign_plan(&self, config: &RunConfig) -> Vec<crate::run::PlannedStep> {
        if let Some(steps) = &config.steps {
            if !steps.is_empty() {
                return steps.clone();
            }
        }
        if let Some(preset_id) = &config.preset_id {
            if let Some(steps) = self.presets.steps(preset_id) {
                return steps;
            }
            let _ = append_scheduler_log_line(
                self.store.state_root(),
                &format!(
                    "level=warn event=scheduler.plan run_id={} unknown preset `{preset_id}`, generating plan",
                    config.id
                ),
            );
        }
        generate_plan(config)
    }

    /// `starting` -> `running`, and spawns the run's worker thread.
    pub fn start_agent(&self, run_id: &str) -> Result<(), SchedulerError> {
        self.activate(run_id, RunStatus::Starting, "agent.started")
    }

    /// `paused` -> `running` with a fresh worker. Rate and concurrency
    /// counters restart with it.
    pub fn resume_agent(&self, run_id: &str) -> Result<(), SchedulerError> {
        self.activate(run_id, RunStatus::Paused, "agent.resumed")
    }

    fn activate(
        &self,
        run_id: &str,
        expected: RunStatus,
        event: &str,
    ) -> Result<(), SchedulerError> {
        let state = self.store.load_run(run_id)?;
        if state.status != expected {
            return Err(SchedulerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: state.status,
                to: RunStatus::Running,
            });
        }
        let patch = RunStatePatch {
            status: Some(RunStatus::Running),
            started_at: state.started_at.or(Some(now_secs())),
            ..RunStatePatch::default()
        };
        self.store.update_state(run_id, patch)?;
        let recorder = TraceRecorder::new(run_id);
        let _ = self
            .store
            .append_trace(run_id, &recorder.lifecycle_event(event, "worker spawned"));
        self.spawn_worker(run_id);
        Ok(())
    }

    /// `running` -> `paused`. The worker is stopped and joined first, so no
    /// tick lands after the pause is recorded.
    pub fn pause_agent(&self, run_id: &str) -> Result<(), SchedulerError> {
        let state = self.store.load_run(run_id)?;
        if state.status != RunStatus::Running {
            return Err(SchedulerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: state.status,
                to: RunStatus::Paused,
            });
        }
        self.cancel_worker(run_id);

        // The worker may have finished the run while the pause raced it.
        let state = self.store.load_run(run_id)?;
        if state.status != RunStatus::Running {
            return Ok(());
        }
        self.store.update_state(
            run_id,
            RunStatePatch {
                status: Some(RunStatus::Paused),
                ..RunStatePatch::default()
            },
        )?;
        let recorder = TraceRecorder::new(run_id);
        let _ = self.store.append_trace(
            run_id,
            &recorder.lifecycle_event("agent.paused", "paused by operator"),
        );
        Ok(())
    }

    /// Terminates a run as `failed`. Idempotent: stopping an already terminal
    /// run is a no-op.
    pub fn stop_agent(&self, run_id: &str) -> Result<(), SchedulerError> {
        let state = self.store.load_run(run_id)?;
        if state.status.is_terminal() {
            return Ok(());
        }
        self.cancel_worker(run_id);

        let state = self.store.load_run(run_id)?;
        if state.status.is_terminal() {
            return Ok(());
        }
        self.store.update_state(
            run_id,
            RunStatePatch {
                status: Some(RunStatus::Failed),
                completed_at: Some(now_secs()),
                last_message: Some("stopped by operator".to_string()),
                ..RunStatePatch::default()
            },
        )?;
        let recorder = TraceRecorder::new(run_id);
        let _ = self.store.append_trace(
            run_id,
            &recorder.lifecycle_event("agent.stopped", "stopped by operator"),
        );
        Ok(())
    }

    /// Resolves a pending HITL request as approved. If the run was waiting on
    /// it, the run returns to `running` under a fresh worker.
    pub fn approve_hitl(
        &self,
        run_id: &str,
        hitl_id: &str,
        comment: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let state = self.resolve_hitl(run_id, hitl_id, HitlStatus::Approved, comment)?;
        if state.status == RunStatus::WaitingHitl {
            self.store.update_state(
                run_id,
                RunStatePatch {
                    status: Some(RunStatus::Running),
                    ..RunStatePatch::default()
                },
            )?;
            let recorder = TraceRecorder::new(run_id);
            let _ = self.store.append_trace(
                run_id,
                &recorder.lifecycle_event("agent.resumed", "hitl approved"),
            );
            self.spawn_worker(run_id);
        }
        Ok(())
    }

    /// Resolves a pending HITL request as rejected and fails the run.
    pub fn reject_hitl(
        &self,
        run_id: &str,
        hitl_id: &str,
        comment: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let state = self.resolve_hitl(run_id, hitl_id, HitlStatus::Rejected, comment)?;
        self.cancel_worker(run_id);
        if !state.status.is_terminal() {
            self.store.update_state(
                run_id,
                RunStatePatch {
                    status: Some(RunStatus::Failed),
                    completed_at: Some(now_secs()),
                    last_message: Some(format!("hitl request `{hitl_id}` rejected")),
                    ..RunStatePatch::default()
                },
            )?;
            let recorder = TraceRecorder::new(run_id);
            let _ = self.store.append_trace(
                run_id,
                &recorder.lifecycle_event("agent.failed", "hitl rejected"),
            );
        }
        Ok(())
    }

    fn resolve_hitl(
        &self,
        run_id: &str,
        hitl_id: &str,
        resolution: HitlStatus,
        comment: Option<&str>,
    ) -> Result<RunState, SchedulerError> {
        let state = self.store.load_run(run_id)?;
        let mut requests = state.hitl_requests.clone();
        let request = requests
            .iter_mut()
            .find(|request| request.id == hitl_id)
            .ok_or_else(|| SchedulerError::UnknownHitlId {
                run_id: run_id.to_string(),
                hitl_id: hitl_id.to_string(),
            })?;
        if request.status != HitlStatus::Pending {
            return Err(SchedulerError::HitlNotPending {
                hitl_id: hitl_id.to_string(),
                status: request.status,
            });
        }
        request.status = resolution;
        request.resolved_at = Some(now_secs());
        request.resolution_comment = comment.map(str::to_string);

        let updated = self.store.update_state(
            run_id,
            RunStatePatch {
                hitl_requests: Some(requests),
                ..RunStatePatch::default()
            },
        )?;
        Ok(updated)
    }

    /// Run ids with a live worker thread, sorted.
    pub fn active_runs(&self) -> Vec<String> {
        let registry = self.registry();
        let mut ids: Vec<String> = registry.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops and joins every worker. Run state stays as the workers left it;
    /// interrupted `running` runs resume on a later `load_existing_runs` +
    /// operator restart.
    pub fn shutdown(&self) {
        let handles: Vec<RunHandle> = {
            let mut registry = self.registry();
            registry.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.stop.store(true, Ordering::Relaxed);
        }
        for handle in handles {
            if let Some(join) = handle.join {
                let _ = join.join();
            }
        }
    }

    fn spawn_worker(&self, run_id: &str) {
        let stop = Arc::new(AtomicBool::new(false));
        {
            let mut registry = self.registry();
            if let Some(existing) = registry.insert(
                run_id.to_string(),
                RunHandle {
                    stop: Arc::clone(&stop),
                    join: None,
                },
            ) {
                existing.stop.store(true, Ordering::Relaxed);
            }
        }

        let worker = TickWorker {
            store: Arc::clone(&self.store),
            executor: Arc::clone(&self.executor),
            settings: self.settings.clone(),
            registry: Arc::clone(&self.registry),
            run_id: run_id.to_string(),
            stop: Arc::clone(&stop),
        };
        let join = thread::spawn(move || worker.run());

        let mut registry = self.registry();
        if let Some(handle) = registry.get_mut(run_id) {
            if Arc::ptr_eq(&handle.stop, &stop) {
                handle.join = Some(join);
            }
        }
    }

    fn cancel_worker(&self, run_id: &str) {
        let handle = {
            let mut registry = self.registry();
            registry.remove(run_id)
        };
        if let Some(handle) = handle {
            handle.stop.store(true, Ordering::Relaxed);
            if let Some(join) = handle.join {
                let _ = join.join();
            }
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunHandle>> {
        self.registry.lock().expect("worker registry lock poisoned")
    }
}

impl Drop for RunScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
