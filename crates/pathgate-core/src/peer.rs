//! Peer connection
//!
//! One `Peer` tracks the bidirectional, path-migrating channel to one
//! remote gateway: two ingress endpoints bound at construction on
//! ephemeral ports, two egress endpoints built (and rebuilt on
//! migration) once the handshake discloses the remote's ports, the key
//! manager, the DRKey facade, and the path manager.
//!
//! Handshake flags: `completed` is set exactly once, when both the
//! crypto setup (`crypto_done`) and the remote's acknowledgement
//! (`ack_received`) are in. It is never cleared.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace, warn};

use pathgate_crypto::KeyService;
use pathgate_net::{Network, PathAddr, PathService, SegmentStore};

use crate::adapter::{Adapter, PeerWriter};
use crate::config::{PathingConf, RemoteConf};
use crate::drkey::DrkeyMgr;
use crate::econn::EConn;
use crate::error::{CoreError, CoreResult};
use crate::keymgr::KeyMgr;
use crate::message::{read_msg_encrypted, write_msg, write_msg_plain, Message};
use crate::pathmgr::PathMgr;
use crate::worker::WorkerHandle;
use crate::{BUF_SIZE, HANDSHAKE_RETRY_INTERVAL};

/// Everything a peer borrows from its gateway.
#[derive(Clone)]
pub(crate) struct PeerDeps {
    pub network: Arc<dyn Network>,
    pub path_service: Arc<dyn PathService>,
    pub segments: Arc<dyn SegmentStore>,
    pub key_service: Arc<dyn KeyService>,
    pub adapter: Arc<dyn Adapter>,
    pub ingress_worker: WorkerHandle,
}

/// Connection state for one remote gateway.
pub struct Peer {
    remote: RemoteConf,
    network: Arc<dyn Network>,
    path_service: Arc<dyn PathService>,
    adapter: Arc<dyn Adapter>,
    ingress_worker: WorkerHandle,

    key_mgr: Arc<KeyMgr>,
    drkey_mgr: DrkeyMgr,
    path_mgr: Arc<PathMgr>,

    ingress_ctrl: Arc<EConn>,
    ingress_data: Arc<EConn>,
    egress_ctrl: RwLock<Option<Arc<EConn>>>,
    egress_data: RwLock<Option<Arc<EConn>>>,
    remote_ports: std::sync::Mutex<Option<(u16, u16)>>,

    migrating: Arc<AtomicBool>,
    handshake_request_mutex: tokio::sync::Mutex<()>,
    handshake_completion_mutex: std::sync::Mutex<()>,
    crypto_done: AtomicBool,
    ack_received: AtomicBool,
    completed: AtomicBool,
}

impl Peer {
    /// Bind the ingress endpoints and assemble the peer. The receiver
    /// tasks start immediately; decryption comes online once the
    /// handshake installs the session key.
    pub(crate) async fn connect(
        local: PathAddr,
        remote: RemoteConf,
        pathing: PathingConf,
        hidden_failover: bool,
        deps: PeerDeps,
    ) -> CoreResult<Arc<Self>> {
        let key_mgr = Arc::new(KeyMgr::new());
        let migrating = Arc::new(AtomicBool::new(false));

        let bind = SocketAddr::new(local.host.ip(), 0);
        let ctrl_conn = deps.network.listen(bind).await?;
        let data_conn = deps.network.listen(bind).await?;
        let ingress_ctrl = Arc::new(EConn::new(ctrl_conn, key_mgr.clone(), migrating.clone()));
        let ingress_data = Arc::new(EConn::new(data_conn, key_mgr.clone(), migrating.clone()));

        let drkey_mgr = DrkeyMgr::new(deps.key_service.clone(), &local, &remote.address);

        let peer = Arc::new_cyclic(|weak| Peer {
            path_mgr: Arc::new(PathMgr::new(
                pathing,
                hidden_failover,
                weak.clone(),
                deps.path_service.clone(),
                deps.segments.clone(),
                remote.clone(),
                migrating.clone(),
            )),
            remote,
            network: deps.network,
            path_service: deps.path_service,
            adapter: deps.adapter,
            ingress_worker: deps.ingress_worker,
            key_mgr,
            drkey_mgr,
            ingress_ctrl,
            ingress_data,
            egress_ctrl: RwLock::new(None),
            egress_data: RwLock::new(None),
            remote_ports: std::sync::Mutex::new(None),
            migrating,
            handshake_request_mutex: tokio::sync::Mutex::new(()),
            handshake_completion_mutex: std::sync::Mutex::new(()),
            crypto_done: AtomicBool::new(false),
            ack_received: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        });

        peer.spawn_ingress_ctrl_handler();
        peer.spawn_ingress_data_handler();
        Ok(peer)
    }

    pub fn remote_ia(&self) -> pathgate_net::IsdAs {
        self.remote.address.ia
    }

    /// Whether the handshake has fully completed.
    pub fn handshake_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    fn spawn_ingress_ctrl_handler(self: &Arc<Self>) {
        let peer = self.clone();
        debug!(addr = %peer.ingress_ctrl.local_addr(), "listening for ctrl messages");
        tokio::spawn(async move {
            loop {
                let (msg, from) = match read_msg_encrypted(&peer.ingress_ctrl).await {
                    Ok(v) => v,
                    Err(CoreError::HandshakePending) => {
                        // datagrams arriving before the handshake cannot
                        // be decrypted yet; the sender retries
                        trace!("dropping ctrl datagram, handshake pending");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "error reading control message");
                        continue;
                    }
                };
                if from.ia != peer.remote.address.ia {
                    warn!(
                        expected = %peer.remote.address.ia,
                        received = %from.ia,
                        "received message from unexpected AS"
                    );
                    continue;
                }
                trace!(kind = msg.kind(), "received new control message");
                match msg {
                    Message::KeepAlive => peer.path_mgr.handle_keepalive(),
                    Message::HiddenPathRequest { segment } => {
                        if peer.remote.rendezvous_addr.is_none() {
                            warn!("ignoring hidden path request, rendezvous not set");
                            continue;
                        }
                        if let Err(e) = peer.path_mgr.handle_hidden_path_request(&segment).await {
                            error!(error = %e, "error handling hidden path request");
                        }
                    }
                    other => peer.adapter.process_ctrl_msg(other, from.ia).await,
                }
            }
        });
    }

    fn spawn_ingress_data_handler(self: &Arc<Self>) {
        let peer = self.clone();
        debug!(addr = %peer.ingress_data.local_addr(), "listening for incoming data");
        tokio::spawn(async move {
            let mut buf = BytesMut::zeroed(BUF_SIZE);
            loop {
                let (n, _from) = match peer.ingress_data.read_from(&mut buf).await {
                    Ok(v) => v,
                    Err(CoreError::HandshakePending) => {
                        trace!("dropping data datagram, handshake pending");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "unable to read from network");
                        continue;
                    }
                };
                let Some(free) = peer.ingress_worker.pool().get() else {
                    debug!("couldn't retrieve free buf");
                    error!("skipped ingress pkt");
                    continue;
                };
                let mut full = std::mem::replace(&mut buf, free);
                full.truncate(n);
                peer.ingress_worker.enqueue(full);
            }
        });
    }

    /// Initiator loop: send handshake requests at a fixed interval until
    /// the handshake completes. Only an unavailable key service stops
    /// the attempt for good.
    pub(crate) async fn init_handshake(self: Arc<Self>) {
        debug!(remote = %self.remote.address, "initiating handshake");
        let host_key = match self.drkey_mgr.client_host_key().await {
            Ok(key) => key,
            Err(e) => {
                error!(error = %e, "error retrieving drkey");
                return;
            }
        };
        let (pub_key, pub_key_tag) = self.key_mgr.authed_public_key(&host_key);
        let request = Message::HandshakeRequest {
            pub_key,
            pub_key_tag,
            ctrl_port: self.ingress_ctrl.local_addr().host.port(),
            data_port: self.ingress_data.local_addr().host.port(),
        };
        while !self.handshake_completed() {
            match self.write_msg_one_off(&request).await {
                Ok(()) => trace!(remote = %self.remote.address, "sent handshake request"),
                Err(e) => error!(error = %e, "error sending handshake request"),
            }
            tokio::time::sleep(HANDSHAKE_RETRY_INTERVAL).await;
        }
    }

    /// Responder path: verify the authenticated public key, set up the
    /// egress endpoints, bring the session crypto online, and confirm.
    pub(crate) async fn handle_handshake_request(
        self: Arc<Self>,
        pub_key: [u8; 32],
        pub_key_tag: [u8; 16],
        ctrl_port: u16,
        data_port: u16,
    ) {
        let _guard = self.handshake_request_mutex.lock().await;
        debug!(remote = %self.remote.address, "handling handshake request");
        if self.crypto_done.load(Ordering::SeqCst) {
            warn!("ignoring handshake request, already completed");
            return;
        }

        let host_key = match self.drkey_mgr.server_host_key().await {
            Ok(key) => key,
            Err(e) => {
                error!(error = %e, "error retrieving server host key");
                return;
            }
        };
        if !self
            .key_mgr
            .verify_remote_public_key(&pub_key_tag, &pub_key, &host_key)
        {
            error!("received public key authentication tag is not as expected");
            return;
        }

        *self.remote_ports.lock().unwrap() = Some((ctrl_port, data_port));
        // paths must exist before the first egress endpoints can be built
        if let Err(e) = self.path_mgr.update_paths_to_remote().await {
            error!(error = %e, "error updating paths to remote");
            return;
        }
        if let Err(e) = self.setup_egress_conns().await {
            error!(error = %e, "error setting up egress connections");
            return;
        }

        self.key_mgr.init_data_crypto(&pub_key);
        self.crypto_done.store(true, Ordering::SeqCst);

        if let Err(e) = self
            .write_msg_one_off(&Message::HandshakeResponse)
            .await
        {
            error!(error = %e, "error sending handshake response");
            return;
        }
        self.complete_handshake();
    }

    /// The remote confirmed it processed our request.
    pub(crate) fn handle_handshake_response(self: &Arc<Self>) {
        debug!(remote = %self.remote.address, "handling handshake response");
        self.ack_received.store(true, Ordering::SeqCst);
        self.complete_handshake();
    }

    /// Latch `completed` once both halves are in, then start the path
    /// manager and notify the adapter. Idempotent: late or duplicate
    /// handshake messages fall through the `completed` check.
    fn complete_handshake(self: &Arc<Self>) {
        let _guard = self.handshake_completion_mutex.lock().unwrap();
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        if !self.crypto_done.load(Ordering::SeqCst) || !self.ack_received.load(Ordering::SeqCst) {
            return;
        }
        self.completed.store(true, Ordering::SeqCst);
        info!(remote = %self.remote.address.ia, "completed handshake");
        self.path_mgr.start();
        let adapter = self.adapter.clone();
        let writer: Arc<dyn PeerWriter> = self.clone();
        tokio::spawn(async move {
            adapter.handshake_complete(writer).await;
        });
    }

    /// Build both egress endpoints towards the remote's announced ports
    /// along the path manager's current path. Replaces any previous
    /// endpoints; migration relies on this.
    pub(crate) async fn setup_egress_conns(&self) -> CoreResult<()> {
        let (ctrl_port, data_port) = self
            .remote_ports
            .lock()
            .unwrap()
            .ok_or(CoreError::HandshakePending)?;
        let path = self.path_mgr.current_path().ok_or(CoreError::NoPaths)?;
        let remote_ip = self.remote.address.host.ip();

        let ctrl_addr = PathAddr::new(self.remote.address.ia, SocketAddr::new(remote_ip, ctrl_port));
        let conn = self.network.dial(ctrl_addr, &path).await?;
        let ctrl = Arc::new(EConn::new(conn, self.key_mgr.clone(), self.migrating.clone()));
        info!(path = %path.format_hops(), "ctrl");
        *self.egress_ctrl.write().await = Some(ctrl);

        let data_addr = PathAddr::new(self.remote.address.ia, SocketAddr::new(remote_ip, data_port));
        let conn = self.network.dial(data_addr, &path).await?;
        let data = Arc::new(EConn::new(conn, self.key_mgr.clone(), self.migrating.clone()));
        info!(path = %path.format_hops(), "data");
        *self.egress_data.write().await = Some(data);

        Ok(())
    }

    /// Send one plaintext message over a fresh ephemeral connection to
    /// the remote's canonical accept address, using the first path the
    /// lookup returns.
    async fn write_msg_one_off(&self, msg: &Message) -> CoreResult<()> {
        let paths = self.path_service.paths(self.remote.address.ia).await?;
        let path = paths.first().ok_or(CoreError::NoPaths)?;
        let conn = self.network.dial(self.remote.address.clone(), path).await?;
        write_msg_plain(msg, conn.as_ref()).await
    }
}

#[async_trait]
impl PeerWriter for Peer {
    async fn write_ctrl(&self, buf: &mut BytesMut) -> CoreResult<usize> {
        let econn = self
            .egress_ctrl
            .read()
            .await
            .clone()
            .ok_or(CoreError::HandshakePending)?;
        econn.write(buf).await
    }

    async fn write_data(&self, buf: &mut BytesMut) -> CoreResult<usize> {
        let econn = self
            .egress_data
            .read()
            .await
            .clone()
            .ok_or(CoreError::HandshakePending)?;
        econn.write(buf).await
    }

    async fn write_msg(&self, msg: &Message) -> CoreResult<()> {
        let econn = self
            .egress_ctrl
            .read()
            .await
            .clone()
            .ok_or(CoreError::HandshakePending)?;
        write_msg(msg, econn.as_ref()).await
    }
}
