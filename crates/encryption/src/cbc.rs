//! Cipher Block Chaining over the raw AES primitive.
//!
//! Encryption walks the buffer front to back: each plaintext block is XORed
//! with the previous ciphertext block (the IV for block zero) before the
//! raw encrypt.
//!
//! Decryption walks the buffer **back to front**. Each block's chaining
//! value is the previous ciphertext block, which in-place operation would
//! destroy if blocks were processed forward; going backwards, the previous
//! ciphertext is still intact when it is consumed. The traversal order is a
//! correctness requirement, not a micro-optimization.

use crate::error::{CipherError, Result};
use crate::iv::CipherIv;
use crate::session::{ensure_aligned, xor_block, AesKey, Cipher, CipherSession, AES_BLOCK_SIZE};

/// CBC-encrypt `data` in place. Length must be a block multiple.
pub(crate) fn encrypt_in_place(key: &AesKey, data: &mut [u8], iv: &[u8; AES_BLOCK_SIZE]) {
    let mut chain = *iv;
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        xor_block(block, &chain);
        key.encrypt_block(block);
        chain.copy_from_slice(block);
    }
}

/// CBC-decrypt `data` in place, last block first.
pub(crate) fn decrypt_in_place(key: &AesKey, data: &mut [u8], iv: &[u8; AES_BLOCK_SIZE]) {
    let nblocks = data.len() / AES_BLOCK_SIZE;
    for i in (0..nblocks).rev() {
        let (head, tail) = data.split_at_mut(i * AES_BLOCK_SIZE);
        let block = &mut tail[..AES_BLOCK_SIZE];
        key.decrypt_block(block);
        let chain: &[u8] = if i == 0 {
            iv
        } else {
            &head[head.len() - AES_BLOCK_SIZE..]
        };
        xor_block(block, chain);
    }
}

/// Software AES-CBC registry row.
pub struct AesCbc;

impl Cipher for AesCbc {
    fn algorithm(&self) -> &'static str {
        "aes"
    }

    fn mode(&self) -> &'static str {
        "cbc"
    }

    fn description(&self) -> &'static str {
        "AES-CBC in software"
    }

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn iv_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn probe(&self, keysize_bits: usize) -> bool {
        matches!(keysize_bits, 128 | 192 | 256)
    }

    fn open_session(&self) -> Box<dyn CipherSession> {
        Box::new(AesCbcSession { key: None })
    }
}

pub(crate) struct AesCbcSession {
    key: Option<AesKey>,
}

impl AesCbcSession {
    fn keyed(&self) -> Result<&AesKey> {
        self.key.as_ref().ok_or(CipherError::KeyNotSet)
    }
}

impl CipherSession for AesCbcSession {
    fn set_key(&mut self, key: &[u8]) -> Result<()> {
        self.key = Some(AesKey::expand("aes-cbc", key)?);
        Ok(())
    }

    fn encrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        let key = self.keyed()?;
        ensure_aligned(data.len(), AES_BLOCK_SIZE)?;
        encrypt_in_place(key, data, &iv.cbc_vector()?);
        Ok(())
    }

    fn decrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        let key = self.keyed()?;
        ensure_aligned(data.len(), AES_BLOCK_SIZE)?;
        decrypt_in_place(key, data, &iv.cbc_vector()?);
        Ok(())
    }
}
