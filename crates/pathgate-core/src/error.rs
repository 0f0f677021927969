//! Core errors

use std::net::Ipv4Addr;

use thiserror::Error;

use pathgate_crypto::CryptoError;
use pathgate_net::{IsdAs, NetError};

/// Errors raised by the peer channel and the gateway
#[derive(Debug, Error)]
pub enum CoreError {
    /// Endpoint used before the crypto handshake completed
    #[error("crypto handshake not yet complete")]
    HandshakePending,

    /// Write attempted while the peer migrates to another path. Not a
    /// failure: the caller drops the current send and carries on.
    #[error("peer is migrating")]
    Migrating,

    /// Path lookup produced no candidate paths
    #[error("no paths to remote")]
    NoPaths,

    /// No route entry covers the destination address
    #[error("no remote gateway for {0}")]
    NoRoute(Ipv4Addr),

    /// Egress packet is not IPv4
    #[error("unsupported IP protocol version in egress packet: {0}")]
    UnsupportedIp(u8),

    /// Malformed wire message
    #[error("message decode: {0}")]
    Decode(String),

    /// Message could not be serialized
    #[error("message encode: {0}")]
    Encode(String),

    /// Key-derivation service unreachable or out of deadline
    #[error("drkey unavailable: {0}")]
    DrkeyUnavailable(String),

    /// Source AS has no configured peer
    #[error("unknown peer {0}")]
    UnknownPeer(IsdAs),

    /// Configuration file rejected
    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Net(#[from] NetError),
}

/// Result alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
