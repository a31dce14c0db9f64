//! Cipher descriptor and session traits, plus the adapter over the raw
//! single-block AES primitive.
//!
//! The raw block operation comes from the `aes` crate and is trusted as-is;
//! everything above it (chaining, tweak scheduling, key-size policy) lives
//! in this crate.

use aes::{Aes128, Aes192, Aes256};
use cipher::{BlockDecrypt, BlockEncrypt, Key, KeyInit};

use crate::error::{CipherError, Result};
use crate::iv::CipherIv;

/// AES block size in bytes, shared by every non-null registry entry.
pub const AES_BLOCK_SIZE: usize = 16;

/// One registry row: identity, geometry and the session constructor.
///
/// Rows are immutable for the life of the process; hardware rows bake their
/// availability in at registry construction so `probe` stays a pure
/// function of the requested key size.
pub trait Cipher: Send + Sync {
    /// Algorithm half of the cipher spec, e.g. `aes`.
    fn algorithm(&self) -> &'static str;

    /// Mode half of the cipher spec, e.g. `cbc` or `xts`.
    fn mode(&self) -> &'static str;

    /// Human readable description, shown in target enumeration and logs.
    fn description(&self) -> &'static str;

    fn block_size(&self) -> usize;

    fn iv_size(&self) -> usize;

    /// Whether this implementation can service the requested key size on
    /// this machine under the current administrative policy.
    fn probe(&self, keysize_bits: usize) -> bool;

    /// Open an unkeyed session. `set_key` must succeed before the session
    /// can transform data.
    fn open_session(&self) -> Box<dyn CipherSession>;
}

/// Keyed (or not-yet-keyed) cipher state.
///
/// Sessions move `unkeyed -> keyed` once and then stay stateless between
/// calls: every encrypt/decrypt is atomic over its buffer, with IV mutation
/// confined to the call. Implementations do not allocate on the transform
/// paths and are safe to share across requests for distinct buffers.
pub trait CipherSession: Send + Sync {
    fn set_key(&mut self, key: &[u8]) -> Result<()>;

    fn encrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()>;

    fn decrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()>;
}

/// Expanded AES key schedule for one direction-agnostic key.
///
/// Dispatches over the three accepted key sizes. The underlying schedules
/// are zeroized on drop via the `aes` crate's `zeroize` feature.
pub(crate) enum AesKey {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesKey {
    /// Expand a raw key of 16, 24 or 32 bytes.
    pub(crate) fn expand(cipher_name: &'static str, key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Ok(AesKey::Aes128(Aes128::new(Key::<Aes128>::from_slice(key)))),
            24 => Ok(AesKey::Aes192(Aes192::new(Key::<Aes192>::from_slice(key)))),
            32 => Ok(AesKey::Aes256(Aes256::new(Key::<Aes256>::from_slice(key)))),
            n => Err(CipherError::InvalidKeyLength {
                cipher: cipher_name,
                bits: n * 8,
            }),
        }
    }

    /// Raw-encrypt one 16-byte block in place.
    pub(crate) fn encrypt_block(&self, block: &mut [u8]) {
        let block = aes::Block::from_mut_slice(block);
        match self {
            AesKey::Aes128(c) => c.encrypt_block(block),
            AesKey::Aes192(c) => c.encrypt_block(block),
            AesKey::Aes256(c) => c.encrypt_block(block),
        }
    }

    /// Raw-decrypt one 16-byte block in place.
    pub(crate) fn decrypt_block(&self, block: &mut [u8]) {
        let block = aes::Block::from_mut_slice(block);
        match self {
            AesKey::Aes128(c) => c.decrypt_block(block),
            AesKey::Aes192(c) => c.decrypt_block(block),
            AesKey::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// `dst[i] ^= src[i]` over one block.
pub(crate) fn xor_block(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

/// Reject lengths the block cipher cannot cover exactly.
pub(crate) fn ensure_aligned(len: usize, block_size: usize) -> Result<()> {
    if block_size > 1 && len % block_size != 0 {
        return Err(CipherError::UnalignedLength { len, block_size });
    }
    Ok(())
}
