//! Ordered cipher registry with first-match-wins selection.
//!
//! Registration order is fixed: the null cipher, then hardware rows, then
//! the software fallbacks. A lookup walks the list and returns the first
//! row whose probe accepts the requested key size, which is what makes the
//! hardware path preferred exactly when the CPU supports it and the
//! administrator has not switched it off.

use tracing::{debug, info};

use crate::aesni::{AesNiCbc, AesNiXts};
use crate::cbc::AesCbc;
use crate::error::{CipherError, Result};
use crate::null::NullCipher;
use crate::session::Cipher;
use crate::xts::AesXts;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
cpufeatures::new!(cpuid_aes, "aes");

/// Runtime CPU capabilities relevant to cipher selection.
#[derive(Debug, Clone, Copy)]
pub struct CpuCaps {
    pub aes: bool,
}

impl CpuCaps {
    /// Query the running CPU.
    pub fn detect() -> Self {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            Self {
                aes: cpuid_aes::get(),
            }
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            Self { aes: false }
        }
    }
}

/// Administrative knobs injected at registry construction. Reloading the
/// registry is the only way to change them, which keeps selection
/// deterministic for in-flight sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryConfig {
    /// Force software fallbacks even when the CPU could accelerate.
    pub disable_hardware: bool,
}

pub struct CipherRegistry {
    entries: Vec<Box<dyn Cipher>>,
}

impl CipherRegistry {
    /// Build the registry for this machine.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_caps(config, CpuCaps::detect())
    }

    /// Build with explicit capabilities (tests pin these).
    pub fn with_caps(config: RegistryConfig, caps: CpuCaps) -> Self {
        let hardware = caps.aes && !config.disable_hardware;
        if !hardware {
            debug!(
                cpu_aes = caps.aes,
                disabled = config.disable_hardware,
                "hardware AES rows will not probe"
            );
        }

        let entries: Vec<Box<dyn Cipher>> = vec![
            Box::new(NullCipher),
            // probe the instruction-set rows first, then fall back to software
            Box::new(AesNiCbc::new(hardware)),
            Box::new(AesNiXts::new(hardware)),
            Box::new(AesCbc),
            Box::new(AesXts),
        ];

        Self { entries }
    }

    /// First registry row matching `algorithm`/`mode` whose probe accepts
    /// `keysize_bits`.
    pub fn find(&self, algorithm: &str, mode: &str, keysize_bits: usize) -> Result<&dyn Cipher> {
        for entry in &self.entries {
            if entry.algorithm().eq_ignore_ascii_case(algorithm)
                && entry.mode().eq_ignore_ascii_case(mode)
                && entry.probe(keysize_bits)
            {
                info!(cipher = entry.description(), "selected cipher");
                return Ok(entry.as_ref());
            }
        }
        Err(CipherError::NoMatch {
            algorithm: algorithm.to_string(),
            mode: mode.to_string(),
            keysize_bits,
        })
    }

    /// All rows, in probe order.
    pub fn entries(&self) -> impl Iterator<Item = &dyn Cipher> {
        self.entries.iter().map(|e| e.as_ref())
    }
}
