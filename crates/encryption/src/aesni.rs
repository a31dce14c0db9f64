//! Hardware-accelerated AES rows.
//!
//! Same external behavior as the software rows, different probe: these only
//! match when the CPU advertises the AES instruction set and the
//! administrative disable flag is clear. Availability is decided once, at
//! registry construction, so selection stays deterministic for a given
//! flag/feature combination.
//!
//! The instruction-set paths want their expanded key schedules on a 16-byte
//! boundary; `AlignedKey` pins that requirement in the type so the software
//! rows never pay for it.

use crate::cbc;
use crate::error::{CipherError, Result};
use crate::iv::CipherIv;
use crate::session::{ensure_aligned, AesKey, Cipher, CipherSession, AES_BLOCK_SIZE};
use crate::xts::XtsKeys;

/// Alignment wrapper for hardware key schedules.
#[repr(align(16))]
pub(crate) struct AlignedKey<T>(pub(crate) T);

/// AES-CBC backed by the CPU AES instruction set.
pub struct AesNiCbc {
    available: bool,
}

impl AesNiCbc {
    pub(crate) fn new(available: bool) -> Self {
        Self { available }
    }
}

impl Cipher for AesNiCbc {
    fn algorithm(&self) -> &'static str {
        "aes"
    }

    fn mode(&self) -> &'static str {
        "cbc"
    }

    fn description(&self) -> &'static str {
        "AES-CBC using the CPU AES instruction set"
    }

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn iv_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn probe(&self, keysize_bits: usize) -> bool {
        self.available && matches!(keysize_bits, 128 | 192 | 256)
    }

    fn open_session(&self) -> Box<dyn CipherSession> {
        Box::new(AesNiCbcSession { key: None })
    }
}

struct AesNiCbcSession {
    key: Option<AlignedKey<AesKey>>,
}

impl CipherSession for AesNiCbcSession {
    fn set_key(&mut self, key: &[u8]) -> Result<()> {
        self.key = Some(AlignedKey(AesKey::expand("aes-cbc", key)?));
        Ok(())
    }

    fn encrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        let key = self.key.as_ref().ok_or(CipherError::KeyNotSet)?;
        ensure_aligned(data.len(), AES_BLOCK_SIZE)?;
        cbc::encrypt_in_place(&key.0, data, &iv.cbc_vector()?);
        Ok(())
    }

    fn decrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        let key = self.key.as_ref().ok_or(CipherError::KeyNotSet)?;
        ensure_aligned(data.len(), AES_BLOCK_SIZE)?;
        cbc::decrypt_in_place(&key.0, data, &iv.cbc_vector()?);
        Ok(())
    }
}

/// AES-XTS backed by the CPU AES instruction set.
pub struct AesNiXts {
    available: bool,
}

impl AesNiXts {
    pub(crate) fn new(available: bool) -> Self {
        Self { available }
    }
}

impl Cipher for AesNiXts {
    fn algorithm(&self) -> &'static str {
        "aes"
    }

    fn mode(&self) -> &'static str {
        "xts"
    }

    fn description(&self) -> &'static str {
        "AES-XTS using the CPU AES instruction set"
    }

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn iv_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn probe(&self, keysize_bits: usize) -> bool {
        self.available && matches!(keysize_bits, 256 | 512)
    }

    fn open_session(&self) -> Box<dyn CipherSession> {
        Box::new(AesNiXtsSession { keys: None })
    }
}

struct AesNiXtsSession {
    keys: Option<AlignedKey<XtsKeys>>,
}

impl CipherSession for AesNiXtsSession {
    fn set_key(&mut self, key: &[u8]) -> Result<()> {
        self.keys = Some(AlignedKey(XtsKeys::expand("aes-xts", key)?));
        Ok(())
    }

    fn encrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        let keys = self.keys.as_ref().ok_or(CipherError::KeyNotSet)?;
        keys.0.encrypt(data, iv)
    }

    fn decrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        let keys = self.keys.as_ref().ok_or(CipherError::KeyNotSet)?;
        keys.0.decrypt(data, iv)
    }
}
