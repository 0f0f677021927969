//! AES-CMAC and CBC-MAC
//!
//! CMAC authenticates handshake public keys under a DRKey-derived key;
//! the key length selects the AES variant (16 bytes for the DRKey
//! hierarchy, 32 for operator-provisioned keys). CBC-MAC is the legacy
//! construction used by the policy adapter family.

use aes::{Aes128, Aes256};
use cmac::{Cmac, Mac};

use crate::cbc::{cbc_encrypt, BLOCK_SIZE};
use crate::error::{CryptoError, CryptoResult};

/// CMAC tags are one AES block long.
pub const CMAC_TAG_SIZE: usize = 16;

/// AES-CMAC of `msg` under `key` (16 or 32 bytes).
pub fn cmac_tag(msg: &[u8], key: &[u8]) -> CryptoResult<[u8; CMAC_TAG_SIZE]> {
    let tag = match key.len() {
        16 => {
            let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).expect("16-byte key");
            mac.update(msg);
            mac.finalize().into_bytes()
        }
        32 => {
            let mut mac = <Cmac<Aes256> as Mac>::new_from_slice(key).expect("32-byte key");
            mac.update(msg);
            mac.finalize().into_bytes()
        }
        n => {
            return Err(CryptoError::InvalidKeyLength {
                expected: "16 or 32",
                actual: n,
            })
        }
    };
    Ok(tag.into())
}

/// Constant-time check that `tag` is the AES-CMAC of `msg` under `key`.
pub fn cmac_verify(tag: &[u8], msg: &[u8], key: &[u8]) -> bool {
    let verified = match key.len() {
        16 => {
            let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).expect("16-byte key");
            mac.update(msg);
            mac.verify_slice(tag).is_ok()
        }
        32 => {
            let mut mac = <Cmac<Aes256> as Mac>::new_from_slice(key).expect("32-byte key");
            mac.update(msg);
            mac.verify_slice(tag).is_ok()
        }
        _ => false,
    };
    verified
}

/// CBC-MAC of `msg` under a 32-byte key: zero-pad to the block boundary,
/// CBC-encrypt with a zero IV, and return the whole cipher stream. Not
/// used on the peer channel.
pub fn cbc_mac(msg: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let mut padded = msg.to_vec();
    let rem = padded.len() % BLOCK_SIZE;
    if rem != 0 {
        padded.resize(padded.len() + BLOCK_SIZE - rem, 0);
    }
    // cbc_encrypt appends PKCS#7 padding; MAC over the zero-padded
    // message only, so cut the trailing padding block off again.
    let ct = cbc_encrypt(&padded, key, &[0u8; 16]);
    ct[..padded.len()].to_vec()
}
