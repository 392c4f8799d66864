use std::path::PathBuf;
use thiserror::Error;

// Top-level application error type.

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Build Error: {0}")]
    Build(#[from] BuildError),
    #[error("Run Error: {0}")]
    Run(#[from] RunError),
    #[error("Settings Error: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-time chain assembly failures. All of these abort before
/// the first frame runs.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("stage list is empty")]
    Empty,
    #[error("duplicate stage name [{0}]")]
    DuplicateName(String),
    #[error("no entry stage: expected exactly one config with prev == name")]
    NoEntry,
    #[error("multiple entry stages: {0:?}")]
    MultipleEntries(Vec<String>),
    #[error("stage [{from}] links to unknown successor [{to}]")]
    DanglingSuccessor { from: String, to: String },
    #[error("no terminal stage reached within {0} steps (successor cycle)")]
    NoTerminal(usize),
    #[error("{0} stage config(s) not reachable from the entry stage")]
    Stranded(usize),
    #[error("unrecognized stage kind [{0}]")]
    UnknownKind(String),
    #[error("invalid params for stage [{name}]: {source}")]
    InvalidParams {
        name: String,
        source: serde_json::Error,
    },
    #[error("stage [{name}] is missing required parameter: {what}")]
    MissingParam { name: String, what: String },
}

/// Per-frame stage outcomes. `Failed` and `ReinitFailed` truncate the
/// current frame only; `SizeDrift` is a consistency violation that ends
/// the whole run.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),
    #[error("tracker reinitialization failed: {0}")]
    ReinitFailed(String),
    #[error("image size changed from {expected:?} to {actual:?} since last reinit")]
    SizeDrift {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

impl StageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::SizeDrift { .. })
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to list frames under {path}: {source}")]
    List {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no frames found under {0}")]
    NoFrames(PathBuf),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("frame source error: {0}")]
    Source(#[from] SourceError),
    #[error("fatal stage error: {0}")]
    Fatal(StageError),
    #[error("failed to write analysis report: {0}")]
    Report(std::io::Error),
}
