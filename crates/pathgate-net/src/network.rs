//! Network facade traits
//!
//! The gateway core never touches sockets directly; it goes through these
//! traits so deployments can wire the UDP overlay while tests wire the
//! in-process hub.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::addr::{IsdAs, PathAddr};
use crate::error::NetResult;
use crate::path::Path;

/// A datagram connection on the path-aware network. No ordering, no
/// reliability, one datagram per send.
#[async_trait]
pub trait PathConn: Send + Sync {
    /// Send one datagram to the dialed remote along the dialed path.
    async fn send(&self, buf: &[u8]) -> NetResult<usize>;

    /// Send one datagram to an explicit remote, bypassing the dialed
    /// destination.
    async fn send_to(&self, buf: &[u8], remote: &PathAddr) -> NetResult<usize>;

    /// Receive one datagram and the compound address it came from.
    async fn recv_from(&self, buf: &mut [u8]) -> NetResult<(usize, PathAddr)>;

    fn local_addr(&self) -> PathAddr;
}

/// Handle to the path-aware network: listening and path-bound dialing.
#[async_trait]
pub trait Network: Send + Sync {
    /// Listen for datagrams on `host`. Port 0 picks an ephemeral port.
    async fn listen(&self, host: SocketAddr) -> NetResult<Box<dyn PathConn>>;

    /// Dial `remote` along `path`. The returned connection sends to the
    /// path's overlay next hop.
    async fn dial(&self, remote: PathAddr, path: &Path) -> NetResult<Box<dyn PathConn>>;
}

/// Path lookup service: candidate paths from the local AS to `dst`.
#[async_trait]
pub trait PathService: Send + Sync {
    async fn paths(&self, dst: IsdAs) -> NetResult<Vec<Path>>;
}
