//! Path-aware network model for the pathgate gateway.
//!
//! The gateway core talks to the inter-domain network exclusively through
//! the traits in this crate:
//! - [`Network`] dials and listens for datagram connections,
//! - [`PathService`] enumerates candidate paths to a destination AS,
//! - [`SegmentStore`] provides path segments for hidden-path construction,
//! - [`TunIo`] exchanges IP packets with the local kernel.
//!
//! Two [`Network`] implementations ship with the crate: a UDP overlay for
//! deployments and an in-process hub for integration tests.

pub mod addr;
pub mod mem;
pub mod network;
pub mod overlay;
pub mod path;
pub mod pathdb;
pub mod segment;
pub mod tun;

mod error;

pub use addr::{Ipv4Net, IsdAs, PathAddr};
pub use error::{NetError, NetResult};
pub use mem::{MemHub, MemNetwork};
pub use network::{Network, PathConn, PathService};
pub use overlay::OverlayNetwork;
pub use path::{LeastHopsSorter, Path, PathFingerprint, PathInterface, PathSorter};
pub use pathdb::PathDb;
pub use segment::{combine_segments, PathSegment, SegmentList, SegmentStore};
pub use self::tun::{MemTun, TunConf, TunIo};
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub use self::tun::TunDevice;
