//! Encrypted datagram endpoint
//!
//! Wraps a path-aware datagram connection with the peer's session
//! crypto. Until the handshake installs the session key every read and
//! write fails with [`CoreError::HandshakePending`]; while the peer
//! migrates paths every write fails with [`CoreError::Migrating`]. The
//! same type serves the control and the data channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tracing::warn;

use pathgate_crypto::{cbc_decrypt_in_place, cbc_encrypt_in_place};
use pathgate_net::{PathAddr, PathConn};

use crate::error::{CoreError, CoreResult};
use crate::keymgr::{KeyMgr, ZERO_IV};

/// Encrypted endpoint over one datagram connection.
pub struct EConn {
    conn: Box<dyn PathConn>,
    keys: Arc<KeyMgr>,
    migrating: Arc<AtomicBool>,
}

impl EConn {
    pub fn new(conn: Box<dyn PathConn>, keys: Arc<KeyMgr>, migrating: Arc<AtomicBool>) -> Self {
        Self {
            conn,
            keys,
            migrating,
        }
    }

    pub fn local_addr(&self) -> PathAddr {
        self.conn.local_addr()
    }

    /// Pad and encrypt `buf` in place, leaving the ciphertext in it.
    fn seal(&self, buf: &mut BytesMut) -> CoreResult<usize> {
        let session = self.keys.session().ok_or(CoreError::HandshakePending)?;
        if self.migrating.load(Ordering::Acquire) {
            return Err(CoreError::Migrating);
        }
        let msg_len = buf.len();
        let padded = pathgate_crypto::cbc::padded_len(msg_len);
        buf.resize(padded, 0);
        let n = cbc_encrypt_in_place(&session.key, &ZERO_IV, &mut buf[..], msg_len)?;
        buf.truncate(n);
        Ok(msg_len)
    }

    /// Encrypt and send one datagram to the dialed remote. Returns the
    /// number of plaintext bytes consumed.
    pub async fn write(&self, buf: &mut BytesMut) -> CoreResult<usize> {
        let msg_len = self.seal(buf)?;
        let sent = self.conn.send(&buf[..]).await?;
        if sent < buf.len() {
            warn!(required = buf.len(), sent, "short datagram write");
        }
        Ok(msg_len)
    }

    /// Like [`EConn::write`] but to an explicit remote.
    pub async fn write_to(&self, buf: &mut BytesMut, remote: &PathAddr) -> CoreResult<usize> {
        let msg_len = self.seal(buf)?;
        let sent = self.conn.send_to(&buf[..], remote).await?;
        if sent < buf.len() {
            warn!(required = buf.len(), sent, "short datagram write");
        }
        Ok(msg_len)
    }

    /// Receive one datagram, decrypt it in place, and strip the padding.
    pub async fn read_from(&self, buf: &mut [u8]) -> CoreResult<(usize, PathAddr)> {
        let (n, from) = self.conn.recv_from(buf).await?;
        let session = self.keys.session().ok_or(CoreError::HandshakePending)?;
        let plain = cbc_decrypt_in_place(&session.key, &ZERO_IV, &mut buf[..n])?;
        Ok((plain, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pathgate_net::{IsdAs, MemHub, MemNetwork, Network, Path};

    async fn econn_pair() -> (EConn, EConn, Arc<KeyMgr>, Arc<AtomicBool>) {
        let hub = MemHub::new();
        let ia_a: IsdAs = "1-ff00:0:110".parse().unwrap();
        let ia_b: IsdAs = "1-ff00:0:111".parse().unwrap();
        let net_a = MemNetwork::new(hub.clone(), ia_a);
        let net_b = MemNetwork::new(hub, ia_b);

        let listener = net_b.listen("10.0.0.2:0".parse().unwrap()).await.unwrap();
        let path = Path {
            dst: ia_b,
            interfaces: vec!["1-ff00:0:111#1".parse().unwrap()],
            next_hop: "10.0.0.2:30001".parse().unwrap(),
            mtu: 1280,
            partial: false,
        };
        let dialed = net_a.dial(listener.local_addr(), &path).await.unwrap();

        let keys_a = Arc::new(KeyMgr::new());
        let keys_b = Arc::new(KeyMgr::new());
        let migrating = Arc::new(AtomicBool::new(false));

        let sender = EConn::new(dialed, keys_a.clone(), migrating.clone());
        let receiver = EConn::new(listener, keys_b.clone(), Arc::new(AtomicBool::new(false)));

        let pub_a = keys_a.public_key();
        let pub_b = keys_b.public_key();
        keys_a.init_data_crypto(&pub_b);
        keys_b.init_data_crypto(&pub_a);

        (sender, receiver, keys_a, migrating)
    }

    #[tokio::test]
    async fn pre_handshake_writes_fail() {
        let hub = MemHub::new();
        let ia: IsdAs = "1-ff00:0:110".parse().unwrap();
        let net = MemNetwork::new(hub, ia);
        let conn = net.listen("10.0.0.1:0".parse().unwrap()).await.unwrap();
        let econn = EConn::new(
            conn,
            Arc::new(KeyMgr::new()),
            Arc::new(AtomicBool::new(false)),
        );
        let mut buf = BytesMut::from(&b"data"[..]);
        assert!(matches!(
            econn.write(&mut buf).await,
            Err(CoreError::HandshakePending)
        ));
    }

    #[tokio::test]
    async fn datagrams_roundtrip_encrypted() {
        let (sender, receiver, _, _) = econn_pair().await;

        let mut buf = BytesMut::from(&b"a 64 byte ipv4 datagram stand-in"[..]);
        let consumed = sender.write(&mut buf).await.unwrap();
        assert_eq!(consumed, 32);
        // ciphertext left in the buffer differs from the plaintext
        assert_ne!(&buf[..], b"a 64 byte ipv4 datagram stand-in");

        let mut rbuf = [0u8; 128];
        let (n, from) = receiver.read_from(&mut rbuf).await.unwrap();
        assert_eq!(&rbuf[..n], b"a 64 byte ipv4 datagram stand-in");
        assert_eq!(from.ia, "1-ff00:0:110".parse::<IsdAs>().unwrap());
    }

    #[tokio::test]
    async fn migration_blocks_writes() {
        let (sender, _receiver, _, migrating) = econn_pair().await;
        migrating.store(true, Ordering::Release);
        let mut buf = BytesMut::from(&b"data"[..]);
        assert!(matches!(
            sender.write(&mut buf).await,
            Err(CoreError::Migrating)
        ));
        migrating.store(false, Ordering::Release);
        assert!(sender.write(&mut buf).await.is_ok());
    }

    #[tokio::test]
    async fn unaligned_ciphertext_is_rejected() {
        let hub = MemHub::new();
        let ia_a: IsdAs = "1-ff00:0:110".parse().unwrap();
        let ia_b: IsdAs = "1-ff00:0:111".parse().unwrap();
        let net_a = MemNetwork::new(hub.clone(), ia_a);
        let net_b = MemNetwork::new(hub, ia_b);

        let listener = net_b.listen("10.0.0.2:0".parse().unwrap()).await.unwrap();
        let path = Path {
            dst: ia_b,
            interfaces: vec!["1-ff00:0:111#1".parse().unwrap()],
            next_hop: "10.0.0.2:30001".parse().unwrap(),
            mtu: 1280,
            partial: false,
        };
        let raw = net_a.dial(listener.local_addr(), &path).await.unwrap();

        let keys = Arc::new(KeyMgr::new());
        keys.init_data_crypto(&KeyMgr::new().public_key());
        let receiver = EConn::new(listener, keys, Arc::new(AtomicBool::new(false)));

        raw.send(&[0u8; 15]).await.unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(
            receiver.read_from(&mut buf).await,
            Err(CoreError::Crypto(_))
        ));
    }
}
