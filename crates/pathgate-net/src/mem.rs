//! In-process network for integration tests
//!
//! A [`MemHub`] routes datagrams between every socket registered on it,
//! across any number of [`MemNetwork`] handles (one per simulated
//! gateway). Paths are honored to the extent tests need: the hub can be
//! told to drop every datagram sent along a given path fingerprint,
//! which is how fail-over scenarios kill the active path.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::addr::{IsdAs, PathAddr};
use crate::error::{NetError, NetResult};
use crate::network::{Network, PathConn};
use crate::path::{Path, PathFingerprint};

struct MemDatagram {
    from: PathAddr,
    payload: Vec<u8>,
}

struct HubState {
    sockets: HashMap<PathAddr, mpsc::UnboundedSender<MemDatagram>>,
    dead_paths: HashSet<PathFingerprint>,
    next_port: u16,
}

/// Shared routing fabric between in-process gateways.
pub struct MemHub {
    state: Mutex<HubState>,
}

impl MemHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                sockets: HashMap::new(),
                dead_paths: HashSet::new(),
                next_port: 40000,
            }),
        })
    }

    /// Drop every datagram sent along the path with this fingerprint.
    pub fn fail_path(&self, fingerprint: &str) {
        self.state
            .lock()
            .unwrap()
            .dead_paths
            .insert(fingerprint.to_string());
    }

    /// Undo [`MemHub::fail_path`].
    pub fn restore_path(&self, fingerprint: &str) {
        self.state.lock().unwrap().dead_paths.remove(fingerprint);
    }

    fn register(
        &self,
        ia: IsdAs,
        host: SocketAddr,
    ) -> NetResult<(PathAddr, mpsc::UnboundedReceiver<MemDatagram>)> {
        let mut state = self.state.lock().unwrap();
        let host = if host.port() == 0 {
            let port = state.next_port;
            state.next_port += 1;
            SocketAddr::new(host.ip(), port)
        } else {
            host
        };
        let addr = PathAddr::new(ia, host);
        if state.sockets.contains_key(&addr) {
            return Err(NetError::Socket(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                addr.to_string(),
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.sockets.insert(addr.clone(), tx);
        Ok((addr, rx))
    }

    /// Datagram semantics: unknown destinations and dead paths swallow
    /// the datagram silently.
    fn route(&self, from: &PathAddr, to: &PathAddr, fingerprint: Option<&str>, payload: &[u8]) {
        let state = self.state.lock().unwrap();
        if let Some(fp) = fingerprint {
            if state.dead_paths.contains(fp) {
                return;
            }
        }
        if let Some(tx) = state.sockets.get(to) {
            let _ = tx.send(MemDatagram {
                from: from.clone(),
                payload: payload.to_vec(),
            });
        }
    }

    fn unregister(&self, addr: &PathAddr) {
        self.state.lock().unwrap().sockets.remove(addr);
    }
}

/// Per-gateway [`Network`] handle over a shared [`MemHub`].
pub struct MemNetwork {
    hub: Arc<MemHub>,
    local_ia: IsdAs,
}

impl MemNetwork {
    pub fn new(hub: Arc<MemHub>, local_ia: IsdAs) -> Self {
        Self { hub, local_ia }
    }
}

#[async_trait]
impl Network for MemNetwork {
    async fn listen(&self, host: SocketAddr) -> NetResult<Box<dyn PathConn>> {
        let (local, rx) = self.hub.register(self.local_ia, host)?;
        Ok(Box::new(MemConn {
            hub: self.hub.clone(),
            local,
            rx: tokio::sync::Mutex::new(rx),
            remote: None,
            fingerprint: None,
        }))
    }

    async fn dial(&self, remote: PathAddr, path: &Path) -> NetResult<Box<dyn PathConn>> {
        let bind = SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0);
        let (local, rx) = self.hub.register(self.local_ia, bind)?;
        let fp = path.fingerprint();
        Ok(Box::new(MemConn {
            hub: self.hub.clone(),
            local,
            rx: tokio::sync::Mutex::new(rx),
            remote: Some(remote),
            fingerprint: if fp.is_empty() { None } else { Some(fp) },
        }))
    }
}

struct MemConn {
    hub: Arc<MemHub>,
    local: PathAddr,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemDatagram>>,
    remote: Option<PathAddr>,
    fingerprint: Option<PathFingerprint>,
}

#[async_trait]
impl PathConn for MemConn {
    async fn send(&self, buf: &[u8]) -> NetResult<usize> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| NetError::Unreachable("connection is not dialed".to_string()))?;
        self.hub
            .route(&self.local, remote, self.fingerprint.as_deref(), buf);
        Ok(buf.len())
    }

    async fn send_to(&self, buf: &[u8], remote: &PathAddr) -> NetResult<usize> {
        self.hub.route(&self.local, remote, None, buf);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> NetResult<(usize, PathAddr)> {
        let mut rx = self.rx.lock().await;
        let datagram = rx.recv().await.ok_or_else(|| {
            NetError::Socket(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "hub closed",
            ))
        })?;
        if datagram.payload.len() > buf.len() {
            return Err(NetError::MalformedDatagram(format!(
                "datagram of {} bytes exceeds receive buffer",
                datagram.payload.len()
            )));
        }
        buf[..datagram.payload.len()].copy_from_slice(&datagram.payload);
        Ok((datagram.payload.len(), datagram.from))
    }

    fn local_addr(&self) -> PathAddr {
        self.local.clone()
    }
}

impl Drop for MemConn {
    fn drop(&mut self) {
        self.hub.unregister(&self.local);
    }
}
