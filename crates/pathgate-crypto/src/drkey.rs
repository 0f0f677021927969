//! DRKey model
//!
//! The gateway authenticates handshakes with symmetric keys from a
//! delegated key-derivation hierarchy rooted at the AS level. This
//! module carries the pieces the gateway consumes: level-2 key metadata,
//! the well-known delegated host-key derivation, and the [`KeyService`]
//! lookup trait. [`MockKeyService`] is a deterministic in-process
//! hierarchy standing in for the external infrastructure.

use std::net::IpAddr;

use async_trait::async_trait;
use zeroize::{Zeroize, ZeroizeOnDrop};

use pathgate_net::IsdAs;

use crate::error::{CryptoError, CryptoResult};
use crate::mac::cmac_tag;

/// Protocol label of the gateway's key hierarchy.
pub const PROTOCOL_PISKES: &str = "piskes";

/// A 16-byte level-2 DRKey.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DrkeyKey([u8; 16]);

impl DrkeyKey {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Debug for DrkeyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        write!(f, "DrkeyKey(..)")
    }
}

/// Level-2 key flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// AS-to-AS delegation secret
    As2As,
    /// Host-to-host key
    Host2Host,
}

/// Metadata identifying one level-2 key.
#[derive(Debug, Clone)]
pub struct Lvl2Meta {
    pub key_type: KeyType,
    pub protocol: String,
    pub src_ia: IsdAs,
    pub dst_ia: IsdAs,
    /// Host pair; only meaningful for [`KeyType::Host2Host`].
    pub src_host: Option<IpAddr>,
    pub dst_host: Option<IpAddr>,
}

fn encode_host(buf: &mut Vec<u8>, host: IpAddr) {
    match host {
        IpAddr::V4(ip) => {
            buf.push(4);
            buf.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.push(16);
            buf.extend_from_slice(&ip.octets());
        }
    }
}

/// The well-known delegated derivation: the host-to-host key obtained
/// from an AS-to-AS delegation secret. Run identically by the key
/// service and by gateways holding a delegation secret, so both ends of
/// a handshake derive the same key.
pub fn derive_delegated(ds: &DrkeyKey, src_host: IpAddr, dst_host: IpAddr) -> DrkeyKey {
    let mut input = Vec::with_capacity(2 + 32);
    encode_host(&mut input, src_host);
    encode_host(&mut input, dst_host);
    let tag = cmac_tag(&input, ds.as_bytes()).expect("16-byte delegation secret");
    DrkeyKey(tag)
}

/// Lookup interface to the key-derivation service.
#[async_trait]
pub trait KeyService: Send + Sync {
    async fn lvl2_key(&self, meta: &Lvl2Meta) -> CryptoResult<DrkeyKey>;
}

/// Deterministic in-process key hierarchy. All gateways of a deployment
/// share the master secret, exactly as they would share one key
/// infrastructure.
pub struct MockKeyService {
    master: [u8; 16],
}

impl MockKeyService {
    pub fn new(master: [u8; 16]) -> Self {
        Self { master }
    }

    fn as2as(&self, protocol: &str, src_ia: IsdAs, dst_ia: IsdAs) -> DrkeyKey {
        let mut input = Vec::with_capacity(protocol.len() + 17);
        input.extend_from_slice(protocol.as_bytes());
        input.push(0);
        input.extend_from_slice(&src_ia.raw().to_be_bytes());
        input.extend_from_slice(&dst_ia.raw().to_be_bytes());
        let tag = cmac_tag(&input, &self.master).expect("16-byte master secret");
        DrkeyKey(tag)
    }
}

impl Default for MockKeyService {
    /// Well-known development secret; deployments provision their own.
    fn default() -> Self {
        Self::new(*b"pathgate-dev-key")
    }
}

#[async_trait]
impl KeyService for MockKeyService {
    async fn lvl2_key(&self, meta: &Lvl2Meta) -> CryptoResult<DrkeyKey> {
        let ds = self.as2as(&meta.protocol, meta.src_ia, meta.dst_ia);
        match meta.key_type {
            KeyType::As2As => Ok(ds),
            KeyType::Host2Host => {
                let (src, dst) = match (meta.src_host, meta.dst_host) {
                    (Some(s), Some(d)) => (s, d),
                    _ => {
                        return Err(CryptoError::Service(
                            "host-to-host key requires a host pair".to_string(),
                        ))
                    }
                };
                Ok(derive_delegated(&ds, src, dst))
            }
        }
    }
}
