//! Incremental AES-256-CBC with PKCS#7 padding.
//!
//! The encryptor keeps at most one partial block between calls; the
//! decryptor holds back the final full block until [`BlockDecryptor::finish`]
//! so the padding can be stripped.

use crate::keys::EncryptionKey;
use crate::utils::errors::{EngineError, Result};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const BLOCK_LEN: usize = 16;
pub const IV_LEN: usize = 16;

pub struct BlockEncryptor {
    cipher: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl BlockEncryptor {
    pub fn new(key: &EncryptionKey, iv: &[u8; IV_LEN]) -> Self {
        Self {
            cipher: Aes256CbcEnc::new(key.as_bytes().into(), iv.into()),
            pending: Vec::with_capacity(BLOCK_LEN),
        }
    }

    /// Encrypt every complete block available so far
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let ready = self.pending.len() - self.pending.len() % BLOCK_LEN;
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        self.encrypt_in_place(&mut out);
        out
    }

    /// Pad and encrypt the remainder
    pub fn finish(mut self) -> Vec<u8> {
        let pad = BLOCK_LEN - self.pending.len();
        let mut out = std::mem::take(&mut self.pending);
        out.resize(out.len() + pad, pad as u8);
        self.encrypt_in_place(&mut out);
        out
    }

    fn encrypt_in_place(&mut self, buf: &mut [u8]) {
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            self.cipher.encrypt_block_mut(aes::Block::from_mut_slice(block));
        }
    }
}

pub struct BlockDecryptor {
    cipher: Aes256CbcDec,
    pending: Vec<u8>,
}

impl BlockDecryptor {
    pub fn new(key: &EncryptionKey, iv: &[u8; IV_LEN]) -> Self {
        Self {
            cipher: Aes256CbcDec::new(key.as_bytes().into(), iv.into()),
            pending: Vec::with_capacity(2 * BLOCK_LEN),
        }
    }

    /// Decrypt all complete blocks except the last one seen
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let tail = match self.pending.len() % BLOCK_LEN {
            0 => BLOCK_LEN,
            partial => partial,
        };
        let ready = self.pending.len().saturating_sub(tail);
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        self.decrypt_in_place(&mut out);
        out
    }

    /// Decrypt the held-back block and strip its padding
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.pending.len() != BLOCK_LEN {
            return Err(EngineError::TransformFailed(
                "ciphertext is empty or not block aligned".to_string(),
            ));
        }
        let mut out = std::mem::take(&mut self.pending);
        self.decrypt_in_place(&mut out);

        let pad = out[BLOCK_LEN - 1] as usize;
        if pad == 0 || pad > BLOCK_LEN || out[BLOCK_LEN - pad..].iter().any(|&b| b as usize != pad) {
            return Err(EngineError::TransformFailed(
                "invalid padding (wrong key or damaged data)".to_string(),
            ));
        }
        out.truncate(BLOCK_LEN - pad);
        Ok(out)
    }

    fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            self.cipher.decrypt_block_mut(aes::Block::from_mut_slice(block));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal_in_chunks(key: &EncryptionKey, iv: &[u8; IV_LEN], data: &[u8], chunk: usize) -> Vec<u8> {
        let mut enc = BlockEncryptor::new(key, iv);
        let mut out = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            out.extend(enc.update(piece));
        }
        out.extend(enc.finish());
        out
    }

    fn open_in_chunks(key: &EncryptionKey, iv: &[u8; IV_LEN], data: &[u8], chunk: usize) -> Result<Vec<u8>> {
        let mut dec = BlockDecryptor::new(key, iv);
        let mut out = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            out.extend(dec.update(piece));
        }
        out.extend(dec.finish()?);
        Ok(out)
    }

    #[test]
    fn test_ciphertext_is_padded_to_blocks() {
        let key = EncryptionKey::generate();
        let iv = [7u8; IV_LEN];
        assert_eq!(seal_in_chunks(&key, &iv, b"", 4).len(), 16);
        assert_eq!(seal_in_chunks(&key, &iv, &[1u8; 15], 4).len(), 16);
        assert_eq!(seal_in_chunks(&key, &iv, &[1u8; 16], 4).len(), 32);
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let key = EncryptionKey::generate();
        let iv = [3u8; IV_LEN];
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let whole = seal_in_chunks(&key, &iv, &data, data.len());
        for chunk in [1, 7, 16, 33, 512] {
            let sealed = seal_in_chunks(&key, &iv, &data, chunk);
            assert_eq!(sealed, whole);
            assert_eq!(open_in_chunks(&key, &iv, &sealed, chunk).unwrap(), data);
        }
    }

    #[test]
    fn test_wrong_key_fails_or_differs() {
        let key = EncryptionKey::generate();
        let other = EncryptionKey::generate();
        let iv = [9u8; IV_LEN];
        let sealed = seal_in_chunks(&key, &iv, b"hello world", 5);

        match open_in_chunks(&other, &iv, &sealed, 5) {
            Ok(plain) => assert_ne!(plain, b"hello world"),
            Err(e) => assert!(matches!(e, EngineError::TransformFailed(_))),
        }
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let key = EncryptionKey::generate();
        let iv = [1u8; IV_LEN];
        let sealed = seal_in_chunks(&key, &iv, &[5u8; 40], 8);

        assert!(open_in_chunks(&key, &iv, &sealed[..sealed.len() - 3], 8).is_err());
        assert!(open_in_chunks(&key, &iv, &[], 8).is_err());
    }
}
