use std::os::fd::RawFd;

use crate::config::ConfigError;
use crate::error::Errno;
use crate::fleet::types::Node;
use crate::service::protocol::RpcError;

/// An open file on its owning node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: String,
    pub node: Node,
    pub fd: RawFd,
}

/// Result of classifying a path before routing a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClass {
    /// Regular file, virtual link or missing path, owned by one node.
    File(Node),
    /// Directory replicated on every node.
    Directory,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Io(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed message: {0}")]
    Codec(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Filesystem failure reported by a node.
    #[error(transparent)]
    Fs(#[from] Errno),
    #[error("transport failure talking to {node}: {source}")]
    Transport {
        node: Node,
        #[source]
        source: TransportError,
    },
    #[error("protocol error from {node}: {error}")]
    Remote { node: Node, error: RpcError },
    #[error("no node owns {0}")]
    NoRoute(String),
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    pub fn errno(&self) -> Option<Errno> {
        match self {
            ClientError::Fs(errno) => Some(*errno),
            _ => None,
        }
    }
}
