//! UDP overlay network
//!
//! Deployment implementation of [`Network`]: datagrams travel over plain
//! UDP sockets. Since the real inter-domain header is out of scope here,
//! each datagram is prefixed with the 8-byte packed source AS identifier
//! so receivers learn which AS a datagram came from; the source host is
//! taken from the UDP header. Dialed connections send to the path's
//! overlay next hop when one is set.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::addr::{IsdAs, PathAddr};
use crate::error::{NetError, NetResult};
use crate::network::{Network, PathConn};
use crate::path::Path;

const IA_HEADER_LEN: usize = 8;

/// UDP-backed [`Network`] handle for one local AS.
pub struct OverlayNetwork {
    local_ia: IsdAs,
}

impl OverlayNetwork {
    /// `dispatcher` and `sciond` identify the endpoints of an external
    /// path-aware stack; the overlay performs its own datagram routing
    /// and path lookups happen through the path database, so they are
    /// recorded for the operator but not dialed.
    pub fn new(local_ia: IsdAs, dispatcher: Option<&str>, sciond: Option<&str>) -> Self {
        if dispatcher.is_some() || sciond.is_some() {
            debug!(?dispatcher, ?sciond, "external stack endpoints configured, overlay handles datagrams itself");
        }
        Self { local_ia }
    }
}

#[async_trait]
impl Network for OverlayNetwork {
    async fn listen(&self, host: SocketAddr) -> NetResult<Box<dyn PathConn>> {
        let sock = UdpSocket::bind(host).await?;
        let local = PathAddr::new(self.local_ia, sock.local_addr()?);
        Ok(Box::new(OverlayConn::new(sock, local, None)))
    }

    async fn dial(&self, remote: PathAddr, path: &Path) -> NetResult<Box<dyn PathConn>> {
        let bind = SocketAddr::new(
            match remote.host {
                SocketAddr::V4(_) => "0.0.0.0".parse().unwrap(),
                SocketAddr::V6(_) => "::".parse().unwrap(),
            },
            0,
        );
        let sock = UdpSocket::bind(bind).await?;
        let next_hop = if path.next_hop.port() != 0 {
            path.next_hop
        } else {
            remote.host
        };
        let local = PathAddr::new(self.local_ia, sock.local_addr()?);
        Ok(Box::new(OverlayConn::new(sock, local, Some((remote, next_hop)))))
    }
}

struct OverlayConn {
    sock: UdpSocket,
    local: PathAddr,
    /// Dialed destination and the underlay address datagrams are sent to.
    remote: Option<(PathAddr, SocketAddr)>,
    /// Frame scratch space, reused across datagrams. Sends and receives
    /// each run single-file per connection, so one buffer per direction
    /// keeps the datagram path allocation-free.
    send_scratch: tokio::sync::Mutex<Vec<u8>>,
    recv_scratch: tokio::sync::Mutex<Vec<u8>>,
}

impl OverlayConn {
    fn new(sock: UdpSocket, local: PathAddr, remote: Option<(PathAddr, SocketAddr)>) -> Self {
        Self {
            sock,
            local,
            remote,
            send_scratch: tokio::sync::Mutex::new(Vec::new()),
            recv_scratch: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    async fn send_framed(&self, buf: &[u8], underlay: SocketAddr) -> NetResult<usize> {
        let mut frame = self.send_scratch.lock().await;
        frame.clear();
        frame.extend_from_slice(&self.local.ia.raw().to_be_bytes());
        frame.extend_from_slice(buf);
        let n = self.sock.send_to(&frame, underlay).await?;
        Ok(n.saturating_sub(IA_HEADER_LEN))
    }
}

#[async_trait]
impl PathConn for OverlayConn {
    async fn send(&self, buf: &[u8]) -> NetResult<usize> {
        let (_, underlay) = self
            .remote
            .as_ref()
            .ok_or_else(|| NetError::Unreachable("connection is not dialed".to_string()))?;
        self.send_framed(buf, *underlay).await
    }

    async fn send_to(&self, buf: &[u8], remote: &PathAddr) -> NetResult<usize> {
        self.send_framed(buf, remote.host).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> NetResult<(usize, PathAddr)> {
        let mut frame = self.recv_scratch.lock().await;
        if frame.len() < IA_HEADER_LEN + buf.len() {
            frame.resize(IA_HEADER_LEN + buf.len(), 0);
        }
        loop {
            let (n, from) = self.sock.recv_from(&mut frame[..]).await?;
            if n < IA_HEADER_LEN {
                debug!(%from, "dropping runt datagram");
                continue;
            }
            let ia = IsdAs::from_raw(u64::from_be_bytes(frame[..IA_HEADER_LEN].try_into().unwrap()));
            let payload = &frame[IA_HEADER_LEN..n];
            if payload.len() > buf.len() {
                return Err(NetError::MalformedDatagram(format!(
                    "datagram of {} bytes exceeds receive buffer",
                    payload.len()
                )));
            }
            buf[..payload.len()].copy_from_slice(payload);
            return Ok((payload.len(), PathAddr::new(ia, from)));
        }
    }

    fn local_addr(&self) -> PathAddr {
        self.local.clone()
    }
}
