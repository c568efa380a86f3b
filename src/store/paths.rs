use std::path::{Path, PathBuf};

/// Layout of one run's durable directory under the state root.
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            root: state_root.into(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.root
    }

    pub fn runs_root(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_root().join(run_id)
    }

    pub fn config_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("config.json")
    }

    pub fn run_state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("run_state.json")
    }

    pub fn traces_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("traces.ndjson")
    }

    pub fn manifest_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("manifest.json")
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("report.json")
    }

    pub fn artifacts_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("artifacts")
    }
}
