//! AES-256-CBC with PKCS#7 padding
//!
//! The peer channel encrypts every datagram in place: the message is
//! padded up to the next block boundary (a full extra block when it is
//! already aligned), so callers must hand over a buffer with one block
//! of headroom past the message.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;

use crate::error::{CryptoError, CryptoResult};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Length of `msg_len` bytes of plaintext after PKCS#7 padding.
pub fn padded_len(msg_len: usize) -> usize {
    msg_len + (BLOCK_SIZE - msg_len % BLOCK_SIZE)
}

/// Pad and encrypt `buf[..msg_len]` in place, returning the ciphertext
/// length. `buf` must be at least `padded_len(msg_len)` bytes.
pub fn cbc_encrypt_in_place(
    key: &[u8; 32],
    iv: &[u8; 16],
    buf: &mut [u8],
    msg_len: usize,
) -> CryptoResult<usize> {
    let needed = padded_len(msg_len);
    if buf.len() < needed {
        return Err(CryptoError::BufferTooSmall {
            needed,
            have: buf.len(),
        });
    }
    let have = buf.len();
    let ct = Aes256CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buf[..needed], msg_len)
        .map_err(|_| CryptoError::BufferTooSmall { needed, have })?;
    Ok(ct.len())
}

/// Decrypt `buf` in place and strip the padding, returning the plaintext
/// length.
pub fn cbc_decrypt_in_place(
    key: &[u8; 32],
    iv: &[u8; 16],
    buf: &mut [u8],
) -> CryptoResult<usize> {
    if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::BadCiphertext(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            buf.len()
        )));
    }
    let pt = Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(buf)
        .map_err(|_| CryptoError::BadCiphertext("bad padding".to_string()))?;
    Ok(pt.len())
}

/// Allocating encrypt, for callers off the packet hot path.
pub fn cbc_encrypt(msg: &[u8], key: &[u8; 32], iv: &[u8; 16]) -> Vec<u8> {
    let mut buf = vec![0u8; padded_len(msg.len())];
    buf[..msg.len()].copy_from_slice(msg);
    let n = cbc_encrypt_in_place(key, iv, &mut buf, msg.len())
        .expect("buffer sized to padded length");
    buf.truncate(n);
    buf
}

/// Allocating decrypt counterpart of [`cbc_encrypt`].
pub fn cbc_decrypt(ciphertext: &[u8], key: &[u8; 32], iv: &[u8; 16]) -> CryptoResult<Vec<u8>> {
    let mut buf = ciphertext.to_vec();
    let n = cbc_decrypt_in_place(key, iv, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [
        0x60, 0x3d, 0xeb, 0x10, 0x15, 0xca, 0x71, 0xbe, 0x2b, 0x73, 0xae, 0xf0, 0x85, 0x7d,
        0x77, 0x81, 0x1f, 0x35, 0x2c, 0x07, 0x3b, 0x61, 0x08, 0xd7, 0x2d, 0x98, 0x10, 0xa3,
        0x09, 0x14, 0xdf, 0xf4,
    ];
    const ZERO_IV: [u8; 16] = [0u8; 16];

    #[test]
    fn roundtrip_various_lengths() {
        for len in [0usize, 1, 15, 16, 17, 64, 1023, 1484] {
            let msg: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ct = cbc_encrypt(&msg, &KEY, &ZERO_IV);
            assert_eq!(ct.len() % BLOCK_SIZE, 0);
            assert!(ct.len() > msg.len());
            let pt = cbc_decrypt(&ct, &KEY, &ZERO_IV).unwrap();
            assert_eq!(pt, msg, "length {len}");
        }
    }

    #[test]
    fn aligned_plaintext_gains_a_full_padding_block() {
        let msg = [0xabu8; 16];
        let ct = cbc_encrypt(&msg, &KEY, &ZERO_IV);
        assert_eq!(ct.len(), 32);
    }

    #[test]
    fn known_vector_first_block() {
        // NIST SP 800-38A F.2.5 CBC-AES256, first block
        let iv: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
            0x0d, 0x0e, 0x0f,
        ];
        let pt: [u8; 16] = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73,
            0x93, 0x17, 0x2a,
        ];
        let expect: [u8; 16] = [
            0xf5, 0x8c, 0x4c, 0x04, 0xd6, 0xe5, 0xf1, 0xba, 0x77, 0x9e, 0xab, 0xfb, 0x5f,
            0x7b, 0xfb, 0xd6,
        ];
        let ct = cbc_encrypt(&pt, &KEY, &iv);
        assert_eq!(&ct[..16], &expect);
    }

    #[test]
    fn rejects_unaligned_and_empty_ciphertext() {
        assert!(cbc_decrypt(&[], &KEY, &ZERO_IV).is_err());
        assert!(cbc_decrypt(&[0u8; 15], &KEY, &ZERO_IV).is_err());
        assert!(cbc_decrypt(&[0u8; 17], &KEY, &ZERO_IV).is_err());
    }

    #[test]
    fn in_place_needs_headroom() {
        let mut buf = [0u8; 16];
        assert!(matches!(
            cbc_encrypt_in_place(&KEY, &ZERO_IV, &mut buf, 16),
            Err(CryptoError::BufferTooSmall { .. })
        ));
    }
}
