//! Gateway orchestrator
//!
//! Owns the peer table, accepts incoming handshake messages on the
//! canonical address, and pumps packets between the local adapter and
//! the per-peer channels through the ingress/egress workers.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::RwLock;
use tracing::{debug, error, trace, warn};

use pathgate_crypto::KeyService;
use pathgate_net::{IsdAs, Network, PathService, SegmentStore};

use crate::adapter::{Adapter, PeerDirectory, PeerWriter};
use crate::config::GatewayConf;
use crate::error::{CoreError, CoreResult};
use crate::message::{read_msg, Message};
use crate::peer::{Peer, PeerDeps};
use crate::worker::{spawn_egress_worker, spawn_ingress_worker, WorkerHandle};
use crate::BUF_SIZE;

/// One site-to-site gateway process.
pub struct Gateway {
    conf: GatewayConf,
    hidden_failover: bool,
    network: Arc<dyn Network>,
    path_service: Arc<dyn PathService>,
    segments: Arc<dyn SegmentStore>,
    key_service: Arc<dyn KeyService>,
    adapter: Arc<dyn Adapter>,
    peers: RwLock<HashMap<IsdAs, Arc<Peer>>>,
    ingress_worker: OnceLock<WorkerHandle>,
    egress_worker: OnceLock<WorkerHandle>,
}

impl Gateway {
    pub fn new(
        conf: GatewayConf,
        hidden_failover: bool,
        network: Arc<dyn Network>,
        path_service: Arc<dyn PathService>,
        segments: Arc<dyn SegmentStore>,
        key_service: Arc<dyn KeyService>,
        adapter: Arc<dyn Adapter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conf,
            hidden_failover,
            network,
            path_service,
            segments,
            key_service,
            adapter,
            peers: RwLock::new(HashMap::new()),
            ingress_worker: OnceLock::new(),
            egress_worker: OnceLock::new(),
        })
    }

    /// Bring the gateway up: workers, accept loop, one peer (plus its
    /// handshake initiator) per configured remote, and the local listen
    /// loop. Failing to bind the accept address is fatal.
    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        let ingress = spawn_ingress_worker(self.adapter.clone());
        let egress = spawn_egress_worker(self.adapter.clone(), self.clone());
        self.ingress_worker.set(ingress.clone()).ok();
        self.egress_worker.set(egress).ok();

        self.spawn_accept().await?;

        for remote in &self.conf.remotes {
            let deps = PeerDeps {
                network: self.network.clone(),
                path_service: self.path_service.clone(),
                segments: self.segments.clone(),
                key_service: self.key_service.clone(),
                adapter: self.adapter.clone(),
                ingress_worker: ingress.clone(),
            };
            let peer = match Peer::connect(
                self.conf.address.clone(),
                remote.clone(),
                self.conf.pathing.clone(),
                self.hidden_failover,
                deps,
            )
            .await
            {
                Ok(peer) => peer,
                Err(e) => {
                    error!(remote = %remote.address, error = %e, "error creating peer");
                    continue;
                }
            };
            self.peers
                .write()
                .await
                .insert(remote.address.ia, peer.clone());
            tokio::spawn(peer.init_handshake());
        }

        self.spawn_listen();
        Ok(())
    }

    /// Accept loop on the canonical address: handshake messages arrive
    /// in the clear and are dispatched to the peer of their source AS.
    async fn spawn_accept(self: &Arc<Self>) -> CoreResult<()> {
        let conn = self.network.listen(self.conf.address.host).await?;
        debug!(addr = %conn.local_addr(), "accepting peer connections");
        let gateway = self.clone();
        tokio::spawn(async move {
            loop {
                let (msg, from) = match read_msg(conn.as_ref()).await {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "error reading control message");
                        continue;
                    }
                };
                trace!(kind = msg.kind(), "received new control message");
                match msg {
                    Message::HandshakeRequest {
                        pub_key,
                        pub_key_tag,
                        ctrl_port,
                        data_port,
                    } => {
                        let Some(peer) = gateway.peer(from.ia).await else {
                            error!(raddr = %from.ia, "error retrieving peer");
                            continue;
                        };
                        tokio::spawn(peer.handle_handshake_request(
                            pub_key,
                            pub_key_tag,
                            ctrl_port,
                            data_port,
                        ));
                    }
                    Message::HandshakeResponse => {
                        let Some(peer) = gateway.peer(from.ia).await else {
                            error!(raddr = %from.ia, "error retrieving peer");
                            continue;
                        };
                        peer.handle_handshake_response();
                    }
                    other => {
                        warn!(kind = other.kind(), "unknown message type received from gateway");
                    }
                }
            }
        });
        Ok(())
    }

    /// Local listen loop: read packets from the adapter into pooled
    /// buffers and enqueue them on the egress worker.
    fn spawn_listen(self: &Arc<Self>) {
        let gateway = self.clone();
        tokio::spawn(async move {
            let egress = gateway
                .egress_worker
                .get()
                .expect("workers started")
                .clone();
            let mut buf = BytesMut::zeroed(BUF_SIZE);
            loop {
                let n = match gateway.adapter.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        error!(error = %e, "error reading from adapter");
                        continue;
                    }
                };
                match egress.pool().get() {
                    Some(free) => {
                        let mut full = std::mem::replace(&mut buf, free);
                        full.truncate(n);
                        egress.enqueue(full);
                    }
                    None => {
                        debug!("couldn't retrieve free buf, skipping egress pkt");
                    }
                }
            }
        });
    }

    /// Peer for a remote AS, if configured.
    pub async fn peer(&self, ia: IsdAs) -> Option<Arc<Peer>> {
        self.peers.read().await.get(&ia).cloned()
    }
}

#[async_trait]
impl PeerDirectory for Gateway {
    async fn writer(&self, ia: IsdAs) -> CoreResult<Arc<dyn PeerWriter>> {
        self.peer(ia)
            .await
            .map(|p| p as Arc<dyn PeerWriter>)
            .ok_or(CoreError::UnknownPeer(ia))
    }
}
