use std::path::PathBuf;

use crate::types::NodeId;

/// Errors the connection manager distinguishes on the command path.
///
/// Every command-level failure is one of these. Anything that escapes past the
/// command loop (startup failures) is wrapped in `anyhow::Error` instead — see
/// `main`.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("node {0} exists")]
    AlreadyExists(NodeId),

    #[error("node {0} not found")]
    NotFound(NodeId),

    #[error("{src} is not connected to {sink}")]
    NotConnected { src: NodeId, sink: NodeId },

    #[error("unrecognized command: {0}")]
    BadCommand(String),

    #[error("named-channel failure for {path}: {source}")]
    Channel {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("syscall failed: {0}")]
    SyscallFailure(#[from] nix::errno::Errno),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
