//! The encrypting target.
//!
//! Table line, in the cryptsetup layout:
//!
//! ```text
//! <alg>-<mode>-<ivmode>[:<ivopt>] <hex_key> <iv_offset> <backing_store> <block_offset>
//! ```
//!
//! e.g. `aes-xts-plain64 7997f8af... 0 disk0 8`. The key size in bits is
//! four times the hex length. Each 512-byte sector is transformed
//! independently under an IV from the configured generator, so any sector
//! can be read or rewritten without touching its neighbours.

use std::sync::Arc;

use common::{BlockStore, SECTOR_SIZE};
use encryption::{Cipher, CipherIv, CipherRegistry, CipherSession};
use sha2::{Digest, Sha256, Sha512};
use storage::StorePool;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{MapError, Result};
use crate::strategy::{BioOp, SubIo};
use crate::target::{Target, TargetType, TargetRegistry};

/// Factory for `crypt` targets, closed over the cipher registry and the
/// backing-store pool.
pub struct CryptTargetType {
    ciphers: Arc<CipherRegistry>,
    stores: Arc<StorePool>,
}

impl CryptTargetType {
    pub fn new(ciphers: Arc<CipherRegistry>, stores: Arc<StorePool>) -> Self {
        Self { ciphers, stores }
    }

    /// Register a `crypt` target type on `registry`.
    pub fn register(
        registry: &TargetRegistry,
        ciphers: Arc<CipherRegistry>,
        stores: Arc<StorePool>,
    ) -> Result<()> {
        registry.register(Arc::new(Self::new(ciphers, stores)))
    }
}

/// Split `alg-mode-ivmode[:ivopt]` into its four pieces.
///
/// The bare spec `null` is accepted as shorthand for the no-op cipher
/// with a plain64 generator.
fn parse_cipher_spec(spec: &str) -> Result<(&str, &str, &str, Option<&str>)> {
    if spec == "null" {
        return Ok(("null", "", "plain64", None));
    }
    let mut parts = spec.splitn(3, '-');
    let alg = parts.next().unwrap_or_default();
    let mode = parts.next().unwrap_or_default();
    let ivspec = parts.next().unwrap_or_default();
    if alg.is_empty() || mode.is_empty() || ivspec.is_empty() {
        return Err(MapError::InvalidArgument(format!(
            "malformed cipher spec: {:?}",
            spec
        )));
    }
    let mut ivparts = ivspec.splitn(2, ':');
    let ivmode = ivparts.next().unwrap_or_default();
    let ivopt = ivparts.next();
    Ok((alg, mode, ivmode, ivopt))
}

/// Per-sector IV generation policy.
enum IvGen {
    /// Low 32 bits of the sector number, little endian.
    Plain,
    /// Full 64-bit sector number, little endian.
    Plain64,
    /// Sector number encrypted under a key derived by hashing the volume
    /// key; hides sector ordering from the ciphertext.
    Essiv { session: Box<dyn CipherSession> },
}

impl IvGen {
    fn new(
        ivmode: &str,
        ivopt: Option<&str>,
        cipher: &dyn Cipher,
        key: &[u8],
    ) -> Result<Self> {
        match ivmode {
            "plain" => Ok(IvGen::Plain),
            "plain64" => Ok(IvGen::Plain64),
            "essiv" => {
                let hash = ivopt.ok_or_else(|| {
                    MapError::InvalidArgument("essiv needs a hash, e.g. essiv:sha256".to_string())
                })?;
                let mut digest = Zeroizing::new(match hash {
                    "sha256" => Sha256::digest(key).to_vec(),
                    "sha512" => Sha512::digest(key).to_vec(),
                    other => {
                        return Err(MapError::InvalidArgument(format!(
                            "unsupported essiv hash: {}",
                            other
                        )))
                    }
                });
                // the digest length has to be an acceptable key size for
                // the same cipher; setkey enforces that
                let mut session = cipher.open_session();
                session.set_key(&digest)?;
                digest.zeroize();
                Ok(IvGen::Essiv { session })
            }
            other => Err(MapError::InvalidArgument(format!(
                "unknown iv generator: {}",
                other
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            IvGen::Plain => "plain",
            IvGen::Plain64 => "plain64",
            IvGen::Essiv { .. } => "essiv",
        }
    }

    fn generate(&self, sector: u64) -> Result<CipherIv> {
        let mut iv = [0u8; 16];
        match self {
            IvGen::Plain => {
                iv[..4].copy_from_slice(&(sector as u32).to_le_bytes());
            }
            IvGen::Plain64 => {
                iv[..8].copy_from_slice(&sector.to_le_bytes());
            }
            IvGen::Essiv { session } => {
                iv[..8].copy_from_slice(&sector.to_le_bytes());
                session.encrypt(&mut iv, &CipherIv::flat([0u8; 16]))?;
            }
        }
        Ok(CipherIv::flat(iv))
    }
}

enum Direction {
    Encrypt,
    Decrypt,
}

pub struct CryptTarget {
    session: Box<dyn CipherSession>,
    ivgen: IvGen,
    /// Sector offset added to local sector numbers for IV generation.
    iv_offset: u64,
    /// Sector offset of this extent's window within the backing store.
    block_offset: u64,
    store: Arc<dyn BlockStore>,
    store_name: String,
    /// Table line with the key masked, rebuilt at construction.
    status: String,
    cipher_description: &'static str,
}

impl CryptTarget {
    fn crypt_sectors(&self, dir: Direction, first_sector: u64, data: &mut [u8]) -> Result<()> {
        for (i, sector) in data.chunks_exact_mut(SECTOR_SIZE as usize).enumerate() {
            let iv = self
                .ivgen
                .generate(first_sector.wrapping_add(i as u64).wrapping_add(self.iv_offset))?;
            match dir {
                Direction::Encrypt => self.session.encrypt(sector, &iv)?,
                Direction::Decrypt => self.session.decrypt(sector, &iv)?,
            }
        }
        Ok(())
    }

    fn check_alignment(&self, io: &SubIo<'_>) -> Result<()> {
        let len = io.data.len() as u64;
        if len == 0 || len % SECTOR_SIZE != 0 || io.offset % SECTOR_SIZE != 0 {
            return Err(MapError::InvalidArgument(format!(
                "crypt target requires whole sectors, got {} bytes at {}",
                len, io.offset
            )));
        }
        Ok(())
    }
}

impl Target for CryptTarget {
    fn type_name(&self) -> &'static str {
        "crypt"
    }

    fn strategy(&self, io: &mut SubIo<'_>) -> Result<()> {
        match io.op {
            BioOp::Flush => self
                .store
                .flush()
                .map_err(|e| MapError::Io(e.to_string())),
            BioOp::Read => {
                self.check_alignment(io)?;
                let store_offset = self.block_offset * SECTOR_SIZE + io.offset;
                self.store
                    .read_at(store_offset, io.data)
                    .map_err(|e| MapError::Io(e.to_string()))?;
                self.crypt_sectors(Direction::Decrypt, io.offset / SECTOR_SIZE, io.data)
            }
            BioOp::Write => {
                self.check_alignment(io)?;
                // encrypt into a private buffer; the caller's plaintext
                // must survive the submission
                let mut bounce = io.data.to_vec();
                self.crypt_sectors(Direction::Encrypt, io.offset / SECTOR_SIZE, &mut bounce)?;
                let store_offset = self.block_offset * SECTOR_SIZE + io.offset;
                self.store
                    .write_at(store_offset, &bounce)
                    .map_err(|e| MapError::Io(e.to_string()))
            }
        }
    }

    fn table_params(&self) -> String {
        self.status.clone()
    }

    fn info_params(&self) -> String {
        self.cipher_description.to_string()
    }

    fn deps(&self) -> Vec<String> {
        vec![self.store_name.clone()]
    }

    fn destroy(&mut self) {
        debug!(store = %self.store_name, "tearing down crypt target");
        // sessions zeroize their schedules on drop
    }
}

impl TargetType for CryptTargetType {
    fn name(&self) -> &'static str {
        "crypt"
    }

    fn version(&self) -> [u32; 3] {
        [1, 0, 0]
    }

    fn construct(&self, args: &[&str]) -> Result<Box<dyn Target>> {
        if args.len() != 5 {
            return Err(MapError::InvalidArgument(
                "crypt target needs exactly 5 parameters".to_string(),
            ));
        }
        let cipher_spec = args[0];
        let hex_key = args[1];
        let iv_offset: u64 = args[2].parse().map_err(|_| {
            MapError::InvalidArgument(format!("bad iv offset: {:?}", args[2]))
        })?;
        let store_name = args[3];
        let block_offset: u64 = args[4].parse().map_err(|_| {
            MapError::InvalidArgument(format!("bad block offset: {:?}", args[4]))
        })?;

        let (alg, mode, ivmode, ivopt) = parse_cipher_spec(cipher_spec)?;

        let key = Zeroizing::new(if hex_key == "-" {
            Vec::new()
        } else {
            hex::decode(hex_key).map_err(|_| {
                MapError::InvalidArgument("key is not valid hex".to_string())
            })?
        });
        let keysize_bits = key.len() * 8;

        let cipher = self.ciphers.find(alg, mode, keysize_bits)?;
        info!(cipher = cipher.description(), "crypt target using cipher");

        let mut session = cipher.open_session();
        session.set_key(&key)?;
        let ivgen = IvGen::new(ivmode, ivopt, cipher, &key)?;

        let store = self
            .stores
            .resolve(store_name)
            .map_err(|e| MapError::NotFound(e.to_string()))?;

        // re-emit the parameter line with the key blanked
        let masked_key = if hex_key == "-" {
            "-".to_string()
        } else {
            "0".repeat(hex_key.len())
        };
        let status = format!(
            "{} {} {} {} {}",
            cipher_spec, masked_key, iv_offset, store_name, block_offset
        );

        Ok(Box::new(CryptTarget {
            session,
            ivgen,
            iv_offset,
            block_offset,
            store,
            store_name: store_name.to_string(),
            status,
            cipher_description: cipher.description(),
        }))
    }
}
