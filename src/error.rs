use std::io;

use thiserror::Error;

/// Failures of the coordination layer and of the workers running on it.
///
/// None of these come from the admission protocol itself; they are OS faults
/// or the result of a run being torn down.
#[derive(Error, Debug)]
pub enum CenterError {
    #[error("unable to create coordination segment {name:?}: {source}")]
    Create { name: String, source: io::Error },

    #[error("unable to attach to coordination segment {name:?}: {source}")]
    Attach { name: String, source: io::Error },

    #[error("coordination segment {0:?} was never initialized")]
    Uninitialized(String),

    #[error("unable to open event log: {0}")]
    Log(#[source] io::Error),

    #[error("futex operation failed: {0}")]
    Sync(#[from] io::Error),

    #[error("unable to spawn {what}: {source}")]
    Spawn { what: String, source: io::Error },

    #[error("{what} exited unsuccessfully ({status})")]
    WorkerFailed { what: String, status: String },

    #[error("run was cancelled")]
    Cancelled,
}

pub type Result<T, E = CenterError> = std::result::Result<T, E>;
