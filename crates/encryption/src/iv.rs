//! Per-request initialization vectors.
//!
//! CBC consumes a flat 16-byte vector. XTS derives its tweak from a 64-bit
//! sector number, little-endian, zero-padded to the block size; the live
//! tweak itself only exists inside a single encrypt/decrypt call. Both
//! shapes are cleared on release because an IV can leak key-adjacent
//! material (ESSIV vectors are derived from the volume key).

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CipherError, Result};
use crate::session::AES_BLOCK_SIZE;

/// Mode-specific initialization vector handed to a cipher session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub enum CipherIv {
    /// No vector; only the null cipher accepts this.
    Empty,
    /// Flat vector, used as-is by CBC.
    Flat([u8; AES_BLOCK_SIZE]),
    /// Logical sector number, expanded by XTS into its initial tweak.
    Sector(u64),
}

impl CipherIv {
    pub fn flat(bytes: [u8; AES_BLOCK_SIZE]) -> Self {
        CipherIv::Flat(bytes)
    }

    pub fn sector(sector: u64) -> Self {
        CipherIv::Sector(sector)
    }

    /// Flatten into the 16-byte chaining vector CBC starts from.
    ///
    /// A sector number is accepted here too (little-endian in the low
    /// bytes), which is exactly what the plain/plain64 generators produce.
    pub(crate) fn cbc_vector(&self) -> Result<[u8; AES_BLOCK_SIZE]> {
        match self {
            CipherIv::Flat(bytes) => Ok(*bytes),
            CipherIv::Sector(sector) => {
                let mut iv = [0u8; AES_BLOCK_SIZE];
                iv[..8].copy_from_slice(&sector.to_le_bytes());
                Ok(iv)
            }
            CipherIv::Empty => Err(CipherError::IvMismatch),
        }
    }

    /// Build the pre-encryption tweak block for XTS.
    ///
    /// The upper 64 bits are always zero; a flat vector contributes only
    /// its low 8 bytes.
    pub(crate) fn xts_sector_block(&self) -> Result<[u8; AES_BLOCK_SIZE]> {
        let mut block = [0u8; AES_BLOCK_SIZE];
        match self {
            CipherIv::Flat(bytes) => block[..8].copy_from_slice(&bytes[..8]),
            CipherIv::Sector(sector) => block[..8].copy_from_slice(&sector.to_le_bytes()),
            CipherIv::Empty => return Err(CipherError::IvMismatch),
        }
        Ok(block)
    }
}

impl std::fmt::Debug for CipherIv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherIv::Empty => write!(f, "CipherIv::Empty"),
            CipherIv::Flat(_) => write!(f, "CipherIv::Flat([REDACTED])"),
            CipherIv::Sector(s) => write!(f, "CipherIv::Sector({})", s),
        }
    }
}
