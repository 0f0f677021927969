//! Network-layer errors

use thiserror::Error;

/// Errors raised by the path-aware network layer
#[derive(Debug, Error)]
pub enum NetError {
    /// Malformed textual address
    #[error("invalid address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    /// Datagram socket failure
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Destination is not reachable through this network handle
    #[error("unreachable address: {0}")]
    Unreachable(String),

    /// Datagram did not carry a well-formed network header
    #[error("malformed datagram: {0}")]
    MalformedDatagram(String),

    /// No path segment satisfies the query
    #[error("no matching path segment: {0}")]
    NoSegment(String),

    /// Path or segment database could not be loaded
    #[error("path database error: {0}")]
    Database(String),

    /// TUN device failure
    #[error("tun device error: {0}")]
    Tun(String),
}

/// Result alias for network operations
pub type NetResult<T> = Result<T, NetError>;
