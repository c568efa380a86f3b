#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run `{run_id}` not found")]
    UnknownRunId { run_id: String },
    #[error("run `{run_id}` already exists")]
    RunAlreadyExists { run_id: String },
    #[error("run `{run_id}` has no persisted {artifact}")]
    MissingRunFile { run_id: String, artifact: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &std::path::Path, source: serde_json::Error) -> StoreError {
    StoreError::Json {
        path: path.display().to_string(),
        source,
    }
}
