//! RPC error types.

use thiserror::Error;

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors from the transport layer and response decoding.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no route to node {0}")]
    UnknownNode(u32),

    #[error("failed to connect to node {node} at {addr}: {source}")]
    Connect {
        node: u32,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error talking to node {node}: {source}")]
    Io {
        node: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("unexpected response variant: expected {expected}")]
    UnexpectedResponse { expected: &'static str },
}

impl RpcError {
    pub(crate) fn unexpected(expected: &'static str) -> Self {
        Self::UnexpectedResponse { expected }
    }
}
