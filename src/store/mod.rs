pub mod error;
pub mod events;
pub mod paths;

pub use error::StoreError;
pub use events::{RunChange, RunChangeBus};
pub use paths::RunPaths;

use crate::manifest::{Manifest, Report};
use crate::run::{RunConfig, RunState, RunStatePatch, RunStatus};
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::logging::append_scheduler_log_line;
use crate::shared::now_secs;
use crate::trace::TraceEvent;
use error::{io_error, json_error};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Mutex;

/// Durable, event-emitting persistence for run configs, run state, trace
/// logs, artifacts, manifests and reports. The in-memory index always
/// mirrors the last successful `update_state`.
#[derive(Debug)]
pub struct RunStore {
    paths: RunPaths,
    index: Mutex<HashMap<String, RunState>>,
    events: RunChangeBus,
}

impl RunStore {
    pub fn new(state_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            paths: RunPaths::new(state_root),
            index: Mutex::new(HashMap::new()),
            events: RunChangeBus::default(),
        }
    }

    pub fn state_root(&self) -> &Path {
        self.paths.state_root()
    }

    pub fn subscribe(&self) -> Receiver<RunChange> {
        self.events.subscribe()
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.index().contains_key(run_id)
    }

    /// All-or-nothing creation: config, initial state (status `starting`) and
    /// an empty trace log land together or not at all.
    pub fn create_run(&self, config: &RunConfig) -> Result<RunState, StoreError> {
        let run_id = config.id.clone();
        {
            let index = self.index();
            if index.contains_key(&run_id) {
                return Err(StoreError::RunAlreadyExists { run_id });
            }
        }

        let run_dir = self.paths.run_dir(&run_id);
        if run_dir.exists() {
            return Err(StoreError::RunAlreadyExists { run_id });
        }

        let state = RunState::initial(&run_id, now_secs());
        if let Err(err) = self.write_initial_files(config, &state) {
            let _ = fs::remove_dir_all(&run_dir);
            return Err(err);
        }

        self.index().insert(run_id.clone(), state.clone());
        self.events.emit(RunChange::Created { run_id });
        Ok(state)
    }

    fn write_initial_files(&self, config: &RunConfig, state: &RunState) -> Result<(), StoreError> {
        let run_dir = self.paths.run_dir(&config.id);
        fs::create_dir_all(&run_dir).map_err(|err| io_error(&run_dir, err))?;

        let config_path = self.paths.config_path(&config.id);
        let encoded =
            serde_json::to_vec_pretty(config).map_err(|err| json_error(&config_path, err))?;
        atomic_write_file(&config_path, &encoded).map_err(|err| io_error(&config_path, err))?;

        self.persist_state(state)?;

        let traces_path = self.paths.traces_path(&config.id);
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&traces_path)
            .map_err(|err| io_error(&traces_path, err))?;
        Ok(())
    }

    fn persist_state(&self, state: &RunState) -> Result<(), StoreError> {
        let path = self.paths.run_state_path(&state.id);
        let encoded = serde_json::to_vec_pretty(state).map_err(|err| json_error(&path, err))?;
        atomic_write_file(&path, &encoded).map_err(|err| io_error(&path, err))
    }

    /// Sole mutation path for run state. The patch is merged and persisted
    /// under the index lock, so concurrent updates never interleave partial
    /// merges; `updated_at` is always refreshed. The merge lands on a copy
    /// that is committed to the index only after the disk write succeeds, so
    /// a failed persist leaves the index mirroring the last persisted state.
    pub fn update_state(&self, run_id: &str, patch: RunStatePatch) -> Result<RunState, StoreError> {
        let (state, completed) = {
            let mut index = self.index();
            let current = index.get(run_id).ok_or_else(|| StoreError::UnknownRunId {
                run_id: run_id.to_string(),
            })?;
            let completed = patch.status == Some(RunStatus::Completed)
                && current.status != RunStatus::Completed;
            let mut next = current.clone();
            patch.apply(&mut next);
            next.updated_at = now_secs();
            self.persist_state(&next)?;
            index.insert(run_id.to_string(), next.clone());
            (next, completed)
        };

        self.events.emit(RunChange::Updated {
            run_id: run_id.to_string(),
        });
        if completed {
            self.events.emit(RunChange::Completed {
                run_id: run_id.to_string(),
            });
        }
        Ok(state)
    }

    pub fn load_run(&self, run_id: &str) -> Result<RunState, StoreError> {
        self.index()
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownRunId {
                run_id: run_id.to_string(),
            })
    }

    pub fn load_config(&self, run_id: &str) -> Result<RunConfig, StoreError> {
        self.require_known(run_id)?;
        let path = self.paths.config_path(run_id);
        let raw = fs::read_to_string(&path).map_err(|err| io_error(&path, err))?;
        serde_json::from_str(&raw).map_err(|err| json_error(&path, err))
    }

    /// Appends one NDJSON line; prior lines are never rewritten.
    pub fn append_trace(&self, run_id: &str, event: &TraceEvent) -> Result<(), StoreError> {
        self.require_known(run_id)?;
        let path = self.paths.traces_path(run_id);
        let line = serde_json::to_string(event).map_err(|err| json_error(&path, err))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| io_error(&path, err))?;
        writeln!(file, "{line}").map_err(|err| io_error(&path, err))
    }

    pub fn load_traces(&self, run_id: &str) -> Result<Vec<TraceEvent>, StoreError> {
        self.require_known(run_id)?;
        let path = self.paths.traces_path(run_id);
        let raw = fs::read_to_string(&path).map_err(|err| io_error(&path, err))?;
        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(line).map_err(|err| json_error(&path, err))?);
        }
        Ok(events)
    }

    pub fn save_manifest(&self, run_id: &str, manifest: &Manifest) -> Result<(), StoreError> {
        self.require_known(run_id)?;
        let path = self.paths.manifest_path(run_id);
        let encoded = serde_json::to_vec_pretty(manifest).map_err(|err| json_error(&path, err))?;
        atomic_write_file(&path, &encoded).map_err(|err| io_error(&path, err))
    }

    pub fn load_manifest(&self, run_id: &str) -> Result<Manifest, StoreError> {
        self.require_known(run_id)?;
        self.read_optional_json(run_id, "manifest", &self.paths.manifest_path(run_id))
    }

    pub fn save_report(&self, run_id: &str, report: &Report) -> Result<(), StoreError> {
        self.require_known(run_id)?;
        let path = self.paths.report_path(run_id);
        let encoded = serde_json::to_vec_pretty(report).map_err(|err| json_error(&path, err))?;
        atomic_write_file(&path, &encoded).map_err(|err| io_error(&path, err))
    }

    pub fn load_report(&self, run_id: &str) -> Result<Report, StoreError> {
        self.require_known(run_id)?;
        self.read_optional_json(run_id, "report", &self.paths.report_path(run_id))
    }

    fn read_optional_json<T: serde::de::DeserializeOwned>(
        &self,
        run_id: &str,
        artifact: &str,
        path: &Path,
    ) -> Result<T, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::MissingRunFile {
                    run_id: run_id.to_string(),
                    artifact: artifact.to_string(),
                })
            }
            Err(err) => return Err(io_error(path, err)),
        };
        serde_json::from_str(&raw).map_err(|err| json_error(path, err))
    }

    /// Writes an artifact file and returns its path relative to the run dir.
    pub fn save_artifact(
        &self,
        run_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        self.require_known(run_id)?;
        let dir = self.paths.artifacts_dir(run_id);
        fs::create_dir_all(&dir).map_err(|err| io_error(&dir, err))?;
        let path = dir.join(name);
        atomic_write_file(&path, bytes).map_err(|err| io_error(&path, err))?;
        Ok(format!("artifacts/{name}"))
    }

    pub fn list_artifacts(&self, run_id: &str) -> Result<Vec<String>, StoreError> {
        self.require_known(run_id)?;
        let dir = self.paths.artifacts_dir(run_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir, err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(&dir, err))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(format!("artifacts/{name}"));
            }
        }
        names.sort();
        Ok(names)
    }

    /// Pure read over the in-memory index, ordered by creation time.
    pub fn list_by_status(&self, status: RunStatus) -> Vec<RunState> {
        let mut runs: Vec<RunState> = self
            .index()
            .values()
            .filter(|state| state.status == status)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        runs
    }

    pub fn list_all(&self) -> Vec<RunState> {
        let mut runs: Vec<RunState> = self.index().values().cloned().collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        runs
    }

    /// The directory goes first: dropping the index entry before a failed
    /// removal would let the run resurrect on the next `load_existing_runs`.
    pub fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
        self.require_known(run_id)?;
        let dir = self.paths.run_dir(run_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|err| io_error(&dir, err))?;
        }
        self.index().remove(run_id);
        self.events.emit(RunChange::Changed);
        Ok(())
    }

    /// Repopulates the index from disk. A run directory with a missing or
    /// corrupt state file is skipped with a logged warning rather than
    /// aborting initialization. Returns the number of runs loaded.
    pub fn load_existing_runs(&self) -> Result<usize, StoreError> {
        let runs_root = self.paths.runs_root();
        let entries = match fs::read_dir(&runs_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(io_error(&runs_root, err)),
        };

        let mut loaded = 0;
        for entry in entries {
            let entry = entry.map_err(|err| io_error(&runs_root, err))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(run_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let state_path = self.paths.run_state_path(&run_id);
            let state: RunState = match fs::read_to_string(&state_path)
                .map_err(|err| io_error(&state_path, err))
                .and_then(|raw| {
                    serde_json::from_str(&raw).map_err(|err| json_error(&state_path, err))
                }) {
                Ok(state) => state,
                Err(err) => {
                    let _ = append_scheduler_log_line(
                        self.paths.state_root(),
                        &format!("level=warn event=store.load run_id={run_id} skipped: {err}"),
                    );
                    continue;
                }
            };
            self.index().insert(run_id, state);
            loaded += 1;
        }
        self.events.emit(RunChange::Changed);
        Ok(loaded)
    }

    fn require_known(&self, run_id: &str) -> Result<(), StoreError> {
        if self.contains(run_id) {
            Ok(())
        } else {
            Err(StoreError::UnknownRunId {
                run_id: run_id.to_string(),
            })
        }
    }

    fn index(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunState>> {
        self.index.lock().expect("run index lock poisoned")
    }
}
