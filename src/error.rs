//! Error taxonomy for the dataflow engine.
//!
//! One enum per failure category named in the design: configuration and
//! topology errors are caught before any worker runs, setup errors abort
//! the run, and runtime/remote errors are raised by a worker and cancel
//! the rest of the pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UfoError>;

#[derive(Debug, Error)]
pub enum UfoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("setup failed for task '{node}': {reason}")]
    Setup { node: String, reason: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed pipeline document: {0}")]
    Malformed(String),

    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("unresolved property reference '{0}'")]
    UnresolvedPropRef(String),

    #[error("node '{0}' is referenced by an edge but never declared")]
    UnknownNode(String),
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("graph contains a cycle through node '{0}'")]
    Cycle(String),

    #[error("input port {port} of node '{node}' is not connected")]
    OrphanInput { node: String, port: u32 },

    #[error("node '{0}' has conflicting send patterns declared")]
    ConflictingSendPattern(String),

    #[error("source '{0}' does not cooperate with partitioning; replicate mode rejected")]
    PartitionUnsupported(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("protocol violation in task '{node}': {reason}")]
    Protocol { node: String, reason: String },

    #[error("allocation failed for task '{node}': {reason}")]
    Alloc { node: String, reason: String },

    #[error("compute failed in task '{node}' (device code {code}): {reason}")]
    Compute {
        node: String,
        code: i32,
        reason: String,
    },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<u32>,
        actual: Vec<u32>,
    },

    #[error("buffer location error: {0}")]
    Location(String),
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error talking to worker '{worker}': {reason}")]
    Transport { worker: String, reason: String },

    #[error("protocol error from worker '{worker}': {reason}")]
    Protocol { worker: String, reason: String },

    #[error("worker '{0}' stopped unexpectedly")]
    UnexpectedStop(String),
}
