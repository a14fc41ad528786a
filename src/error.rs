use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or walking a dialog graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A reply points at a node that is not in the graph.
    #[error("reply on node '{node}' targets missing node '{target}'")]
    BrokenLink { node: String, target: String },

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    #[error("node '{node}' has no reply #{index}")]
    NoSuchReply { node: String, index: usize },

    /// The node has no replies, so the conversation cannot continue.
    #[error("node '{0}' is terminal")]
    TerminalNode(String),

    /// Only terminal nodes may have empty text.
    #[error("node '{0}' has replies but no text")]
    EmptyText(String),

    #[error("invalid dialog graph: {0}")]
    InvalidGraph(String),
}

/// The output file could not be written or replaced.
#[derive(Debug, Error)]
#[error("failed to persist {}: {source}", path.display())]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Reasons a generation cycle did not produce a written record.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The model returned text with no usable JSON object in it.
    #[error("no usable JSON in model output: {reason}")]
    UnresolvedJson { reason: String, raw: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("model call failed: {0:#}")]
    Model(#[from] anyhow::Error),
}
