//! Error type shared by every phase of a job.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, MRError>;

#[derive(Error, Debug)]
pub enum MRError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A mapper, reducer or partition function name is not bound in the Program.
    #[error("unknown {kind} `{name}`")]
    UnknownCallable { kind: &'static str, name: String },

    #[error("unknown operation kind `{0}`")]
    UnknownOperation(String),

    #[error("unknown format `{0}`")]
    UnknownFormat(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A split a task depends on can't be reached.
    #[error("input split ({row}, {split}) unavailable: {reason}")]
    InputUnavailable {
        row: usize,
        split: usize,
        reason: String,
    },

    #[error("task {0} has already been run")]
    AlreadyRun(usize),

    #[error("partition function returned {got} for {splits} splits (key `{key}`)")]
    PartitionOutOfRange {
        key: String,
        got: usize,
        splits: usize,
    },

    /// Two tasks tried to write the same row of a shuffle grid.
    #[error("grid {grid}: source {row} written twice")]
    DuplicateSource { grid: String, row: usize },

    #[error("corrupt record stream in {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("task {task} of phase {phase} failed: {source}")]
    TaskFailed {
        phase: usize,
        task: usize,
        #[source]
        source: Box<MRError>,
    },

    #[error("failed to parse job description: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl MRError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn corrupt<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Configuration errors are never worth retrying.
    pub fn is_config(&self) -> bool {
        match self {
            MRError::UnknownCallable { .. }
            | MRError::UnknownOperation(_)
            | MRError::UnknownFormat(_)
            | MRError::Config(_)
            | MRError::ConfigParse(_) => true,
            MRError::TaskFailed { source, .. } => source.is_config(),
            _ => false,
        }
    }
}
