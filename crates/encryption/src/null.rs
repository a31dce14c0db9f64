//! The degenerate no-op cipher.
//!
//! Always first in the registry so a mapping configured without encryption
//! still flows through the same session machinery. Block size 1, no IV, no
//! key material.

use crate::error::Result;
use crate::iv::CipherIv;
use crate::session::{Cipher, CipherSession};

pub struct NullCipher;

impl Cipher for NullCipher {
    fn algorithm(&self) -> &'static str {
        "null"
    }

    fn mode(&self) -> &'static str {
        ""
    }

    fn description(&self) -> &'static str {
        "null - no encryption"
    }

    fn block_size(&self) -> usize {
        1
    }

    fn iv_size(&self) -> usize {
        0
    }

    fn probe(&self, _keysize_bits: usize) -> bool {
        true
    }

    fn open_session(&self) -> Box<dyn CipherSession> {
        Box::new(NullSession)
    }
}

struct NullSession;

impl CipherSession for NullSession {
    fn set_key(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn encrypt(&self, _data: &mut [u8], _iv: &CipherIv) -> Result<()> {
        Ok(())
    }

    fn decrypt(&self, _data: &mut [u8], _iv: &CipherIv) -> Result<()> {
        Ok(())
    }
}
