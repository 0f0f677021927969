//! pathgate core
//!
//! The peer connection machine and everything it is built from: the
//! message codec, the per-peer key manager and DRKey facade, the
//! encrypted datagram endpoint, the migrating path manager, the peer
//! handshake state machine, and the gateway orchestrator that wires
//! peers to a local adapter.

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod drkey;
pub mod econn;
pub mod gateway;
pub mod keymgr;
pub mod message;
pub mod pathmgr;
pub mod peer;
pub mod pool;
pub mod worker;

mod error;

pub use adapter::{Adapter, PeerDirectory, PeerWriter};
pub use adapters::ip::IpAdapter;
pub use config::{AdapterConf, GatewayConf, PathingConf, RemoteConf};
pub use error::{CoreError, CoreResult};
pub use gateway::Gateway;
pub use message::Message;

use std::time::Duration;

/// Largest datagram the gateway handles on any channel.
pub const MAX_MTU: usize = 1500;

/// Pool buffers carry one cipher block of headroom past [`MAX_MTU`] so
/// in-place padding never reallocates.
pub const BUF_SIZE: usize = MAX_MTU + pathgate_crypto::BLOCK_SIZE;

/// Worker channel capacity and buffer pool population.
pub const CHAN_LENGTH: usize = 1500;

/// Interval between handshake request retries.
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between candidate path refreshes.
pub const PATH_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
