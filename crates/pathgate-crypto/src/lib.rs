//! Crypto primitives for the pathgate gateway
//!
//! - AES-256-CBC with PKCS#7 padding for the data and control planes
//! - AES-CMAC for handshake public-key authentication
//! - CBC-MAC for the policy adapter family
//! - The DRKey model: level-2 key metadata, the delegated host-key
//!   derivation, and the [`KeyService`] lookup trait

pub mod cbc;
pub mod drkey;
pub mod mac;

mod error;

pub use self::cbc::{
    cbc_decrypt, cbc_decrypt_in_place, cbc_encrypt, cbc_encrypt_in_place, BLOCK_SIZE,
};
pub use drkey::{
    derive_delegated, DrkeyKey, KeyService, KeyType, Lvl2Meta, MockKeyService, PROTOCOL_PISKES,
};
pub use error::{CryptoError, CryptoResult};
pub use mac::{cbc_mac, cmac_tag, cmac_verify, CMAC_TAG_SIZE};
