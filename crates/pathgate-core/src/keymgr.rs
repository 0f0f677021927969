//! Per-peer key manager
//!
//! Owns the ephemeral X25519 keypair used in the handshake and, once the
//! remote public key arrives, the AES-256 session key derived from the
//! DH shared secret. The session state is written exactly once; the
//! encrypted endpoints gate on it to flip from handshake-pending to
//! operational.

use std::sync::{Mutex, OnceLock};

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use pathgate_crypto::{cmac_tag, cmac_verify, DrkeyKey};

/// All-zero IV used for every datagram on the peer channel.
pub const ZERO_IV: [u8; 16] = [0u8; 16];

/// Session crypto state, written once per peer session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct SessionCrypto {
    /// AES-256 key: the raw X25519 shared secret.
    pub key: [u8; 32],
}

struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

/// Key manager bound to one peer session.
pub struct KeyMgr {
    keypair: Mutex<Option<Keypair>>,
    session: OnceLock<SessionCrypto>,
}

impl KeyMgr {
    pub fn new() -> Self {
        Self {
            keypair: Mutex::new(None),
            session: OnceLock::new(),
        }
    }

    fn with_keypair<T>(&self, f: impl FnOnce(&Keypair) -> T) -> T {
        let mut guard = self.keypair.lock().unwrap();
        let keypair = guard.get_or_insert_with(|| {
            let secret = StaticSecret::random_from_rng(OsRng);
            let public = PublicKey::from(&secret);
            Keypair { secret, public }
        });
        f(keypair)
    }

    /// Own DH public key, generating the keypair on first access.
    pub fn public_key(&self) -> [u8; 32] {
        self.with_keypair(|kp| kp.public.to_bytes())
    }

    /// Own public key plus its CMAC under the DRKey-derived
    /// authentication key, binding the ephemeral key to the peer pair.
    pub fn authed_public_key(&self, auth_key: &DrkeyKey) -> ([u8; 32], [u8; 16]) {
        let pub_key = self.public_key();
        let tag = cmac_tag(&pub_key, auth_key.as_bytes()).expect("16-byte auth key");
        (pub_key, tag)
    }

    /// Constant-time check that `tag` authenticates `remote_pub` under
    /// `auth_key`.
    pub fn verify_remote_public_key(
        &self,
        tag: &[u8],
        remote_pub: &[u8],
        auth_key: &DrkeyKey,
    ) -> bool {
        cmac_verify(tag, remote_pub, auth_key.as_bytes())
    }

    /// Complete the DH exchange and install the session key.
    ///
    /// Panics when called twice: a peer session is bound to exactly one
    /// shared secret, a second initialization is a programming error.
    pub fn init_data_crypto(&self, remote_pub: &[u8; 32]) {
        let shared = self.with_keypair(|kp| {
            kp.secret
                .diffie_hellman(&PublicKey::from(*remote_pub))
                .to_bytes()
        });
        let installed = self.session.set(SessionCrypto { key: shared });
        if installed.is_err() {
            panic!("session key was already initialized");
        }
    }

    /// Whether the session key is in place.
    pub fn is_ready(&self) -> bool {
        self.session.get().is_some()
    }

    pub(crate) fn session(&self) -> Option<&SessionCrypto> {
        self.session.get()
    }
}

impl Default for KeyMgr {
    fn default() -> Self {
        Self::new()
    }
}
