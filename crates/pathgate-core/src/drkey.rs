//! DRKey facade
//!
//! Per-peer view of the key-derivation service. The initiator of a
//! handshake authenticates with the host-to-host key for the
//! local-to-remote direction; the responder fetches the matching
//! AS-to-AS delegation secret and derives the same host key locally.
//! Both lookups run under a hard deadline so a dead key service cannot
//! wedge a handshake forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use pathgate_crypto::{
    derive_delegated, DrkeyKey, KeyService, KeyType, Lvl2Meta, PROTOCOL_PISKES,
};
use pathgate_net::PathAddr;

use crate::error::{CoreError, CoreResult};

/// Deadline for every key service lookup.
pub const DRKEY_TIMEOUT: Duration = Duration::from_secs(10);

/// Key lookups for one peer session.
pub struct DrkeyMgr {
    service: Arc<dyn KeyService>,
    meta_client: Lvl2Meta,
    meta_server: Lvl2Meta,
}

impl DrkeyMgr {
    pub fn new(service: Arc<dyn KeyService>, local: &PathAddr, remote: &PathAddr) -> Self {
        Self {
            service,
            meta_client: Lvl2Meta {
                key_type: KeyType::Host2Host,
                protocol: PROTOCOL_PISKES.to_string(),
                src_ia: local.ia,
                dst_ia: remote.ia,
                src_host: Some(local.host.ip()),
                dst_host: Some(remote.host.ip()),
            },
            meta_server: Lvl2Meta {
                key_type: KeyType::Host2Host,
                protocol: PROTOCOL_PISKES.to_string(),
                src_ia: remote.ia,
                dst_ia: local.ia,
                src_host: Some(remote.host.ip()),
                dst_host: Some(local.host.ip()),
            },
        }
    }

    async fn lookup(&self, meta: &Lvl2Meta) -> CoreResult<DrkeyKey> {
        timeout(DRKEY_TIMEOUT, self.service.lvl2_key(meta))
            .await
            .map_err(|_| CoreError::DrkeyUnavailable("deadline exceeded".to_string()))?
            .map_err(|e| CoreError::DrkeyUnavailable(e.to_string()))
    }

    /// Authentication key for sending a handshake request.
    pub async fn client_host_key(&self) -> CoreResult<DrkeyKey> {
        self.lookup(&self.meta_client).await
    }

    /// Authentication key for verifying a received handshake request:
    /// the remote-to-local delegation secret, with the host key derived
    /// locally.
    pub async fn server_host_key(&self) -> CoreResult<DrkeyKey> {
        let ds_meta = Lvl2Meta {
            key_type: KeyType::As2As,
            protocol: self.meta_server.protocol.clone(),
            src_ia: self.meta_server.src_ia,
            dst_ia: self.meta_server.dst_ia,
            src_host: None,
            dst_host: None,
        };
        let ds = self.lookup(&ds_meta).await?;
        let (src, dst) = match (self.meta_server.src_host, self.meta_server.dst_host) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                return Err(CoreError::DrkeyUnavailable(
                    "peer metadata lacks host addresses".to_string(),
                ))
            }
        };
        Ok(derive_delegated(&ds, src, dst))
    }
}
