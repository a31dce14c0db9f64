//! XTS tweak-chaining over the raw AES primitive.
//!
//! The nominal key is split in half: K1 encrypts data, K2 encrypts the
//! tweak. Per logical unit the tweak starts as `E_K2(sector)` with the
//! sector number little-endian in the low 8 bytes, then advances once per
//! block by multiplication with the primitive element of GF(2^128). Tweak
//! scheduling is identical for encrypt and decrypt; only the inner raw
//! operation flips.

use zeroize::Zeroize;

use crate::error::{CipherError, Result};
use crate::iv::CipherIv;
use crate::session::{ensure_aligned, xor_block, AesKey, Cipher, CipherSession, AES_BLOCK_SIZE};

/// GF(2^128) generator polynomial, folded into the low byte on carry-out.
const XTS_ALPHA: u8 = 0x87;

/// Multiply the tweak by the primitive element: a left shift over the whole
/// 16-byte value with byte-to-byte carry, reducing modulo the field
/// polynomial when a bit falls off the top.
fn advance_tweak(tweak: &mut [u8; AES_BLOCK_SIZE]) {
    let mut carry = 0u8;
    for byte in tweak.iter_mut() {
        let next = *byte >> 7;
        *byte = (*byte << 1) | carry;
        carry = next;
    }
    if carry != 0 {
        tweak[0] ^= XTS_ALPHA;
    }
}

/// Direction-agnostic XTS pass over a whole unit.
///
/// `raw` is the K1 block operation (encrypt or decrypt). The scratch block
/// transiently holds tweak-masked plaintext and is wiped before return.
fn crypt_in_place(
    raw: impl Fn(&AesKey, &mut [u8]),
    data_key: &AesKey,
    mut tweak: [u8; AES_BLOCK_SIZE],
    data: &mut [u8],
) {
    let mut block = [0u8; AES_BLOCK_SIZE];
    for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        block.copy_from_slice(chunk);
        xor_block(&mut block, &tweak);
        raw(data_key, &mut block);
        xor_block(&mut block, &tweak);
        chunk.copy_from_slice(&block);
        advance_tweak(&mut tweak);
    }
    block.zeroize();
    tweak.zeroize();
}

/// The two half-size key schedules backing one XTS session.
pub(crate) struct XtsKeys {
    data: AesKey,
    tweak: AesKey,
}

impl XtsKeys {
    /// Split a 256- or 512-bit nominal key into its K1/K2 halves.
    pub(crate) fn expand(cipher_name: &'static str, key: &[u8]) -> Result<Self> {
        if !matches!(key.len() * 8, 256 | 512) {
            return Err(CipherError::InvalidKeyLength {
                cipher: cipher_name,
                bits: key.len() * 8,
            });
        }
        let half = key.len() / 2;
        Ok(XtsKeys {
            data: AesKey::expand(cipher_name, &key[..half])?,
            tweak: AesKey::expand(cipher_name, &key[half..])?,
        })
    }

    /// Initial tweak for a unit: raw-encrypt the padded sector under K2.
    fn initial_tweak(&self, iv: &CipherIv) -> Result<[u8; AES_BLOCK_SIZE]> {
        let mut tweak = iv.xts_sector_block()?;
        self.tweak.encrypt_block(&mut tweak);
        Ok(tweak)
    }

    pub(crate) fn encrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        ensure_aligned(data.len(), AES_BLOCK_SIZE)?;
        crypt_in_place(AesKey::encrypt_block, &self.data, self.initial_tweak(iv)?, data);
        Ok(())
    }

    pub(crate) fn decrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        ensure_aligned(data.len(), AES_BLOCK_SIZE)?;
        crypt_in_place(AesKey::decrypt_block, &self.data, self.initial_tweak(iv)?, data);
        Ok(())
    }
}

/// Software AES-XTS registry row.
pub struct AesXts;

impl Cipher for AesXts {
    fn algorithm(&self) -> &'static str {
        "aes"
    }

    fn mode(&self) -> &'static str {
        "xts"
    }

    fn description(&self) -> &'static str {
        "AES-XTS in software"
    }

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn iv_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn probe(&self, keysize_bits: usize) -> bool {
        matches!(keysize_bits, 256 | 512)
    }

    fn open_session(&self) -> Box<dyn CipherSession> {
        Box::new(AesXtsSession { keys: None })
    }
}

pub(crate) struct AesXtsSession {
    keys: Option<XtsKeys>,
}

impl AesXtsSession {
    fn keyed(&self) -> Result<&XtsKeys> {
        self.keys.as_ref().ok_or(CipherError::KeyNotSet)
    }
}

impl CipherSession for AesXtsSession {
    fn set_key(&mut self, key: &[u8]) -> Result<()> {
        self.keys = Some(XtsKeys::expand("aes-xts", key)?);
        Ok(())
    }

    fn encrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        self.keyed()?.encrypt(data, iv)
    }

    fn decrypt(&self, data: &mut [u8], iv: &CipherIv) -> Result<()> {
        self.keyed()?.decrypt(data, iv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::Aes256;
    use cipher::KeyInit;
    use xts_mode::{get_tweak_default, Xts128};

    fn session_with_key(key: &[u8]) -> Box<dyn CipherSession> {
        let mut session = AesXts.open_session();
        session.set_key(key).unwrap();
        session
    }

    #[test]
    fn tweak_advance_shifts_left() {
        let mut tweak = [0u8; 16];
        tweak[0] = 0x01;
        advance_tweak(&mut tweak);
        assert_eq!(tweak[0], 0x02);

        // carry propagates across byte boundaries
        let mut tweak = [0u8; 16];
        tweak[0] = 0x80;
        advance_tweak(&mut tweak);
        assert_eq!(tweak[0], 0x00);
        assert_eq!(tweak[1], 0x01);

        // carry out of the top bit folds the polynomial into byte zero
        let mut tweak = [0u8; 16];
        tweak[15] = 0x80;
        advance_tweak(&mut tweak);
        assert_eq!(tweak[0], XTS_ALPHA);
        assert_eq!(tweak[15], 0x00);
    }

    #[test]
    fn roundtrip() {
        let session = session_with_key(&[0x5A; 64]);
        let original: Vec<u8> = (0..u8::MAX).cycle().take(4096).collect();
        let mut data = original.clone();
        let iv = CipherIv::sector(42);

        session.encrypt(&mut data, &iv).unwrap();
        assert_ne!(data, original);
        session.decrypt(&mut data, &iv).unwrap();
        assert_eq!(data, original);
        println!("✅ XTS roundtrip successful");
    }

    #[test]
    fn roundtrip_256_bit_key() {
        let session = session_with_key(&[0x13; 32]);
        let mut data = vec![0xEE; 512];
        session.encrypt(&mut data, &CipherIv::sector(7)).unwrap();
        session.decrypt(&mut data, &CipherIv::sector(7)).unwrap();
        assert_eq!(data, vec![0xEE; 512]);
    }

    #[test]
    fn adjacent_sectors_diverge() {
        // identical plaintext under sector S and S+1 must differ from the
        // very first block
        let session = session_with_key(&[0x77; 64]);
        let mut a = vec![0u8; 512];
        let mut b = vec![0u8; 512];
        session.encrypt(&mut a, &CipherIv::sector(100)).unwrap();
        session.encrypt(&mut b, &CipherIv::sector(101)).unwrap();
        assert_ne!(&a[..16], &b[..16]);
    }

    #[test]
    fn matches_independent_xts_implementation() {
        let mut key = [0u8; 64];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }

        let session = session_with_key(&key);
        let mut ours: Vec<u8> = (0..u8::MAX).cycle().take(1024).collect();
        let mut theirs = ours.clone();

        let sector = 0x0123_4567u64;
        session.encrypt(&mut ours, &CipherIv::sector(sector)).unwrap();

        let oracle = Xts128::<Aes256>::new(
            Aes256::new_from_slice(&key[..32]).unwrap(),
            Aes256::new_from_slice(&key[32..]).unwrap(),
        );
        oracle.encrypt_sector(&mut theirs, get_tweak_default(sector as u128));

        assert_eq!(ours, theirs);
        println!("✅ XTS output matches the xts-mode oracle");
    }

    #[test]
    fn key_sizes_enforced() {
        let mut session = AesXts.open_session();
        assert!(session.set_key(&[0u8; 48]).is_err()); // 384 bits
        assert!(session.set_key(&[0u8; 32]).is_ok());
        assert!(AesXts.probe(256));
        assert!(AesXts.probe(512));
        assert!(!AesXts.probe(128));
    }

    #[test]
    fn unaligned_length_rejected_without_touching_data() {
        let session = session_with_key(&[0x21; 64]);
        let mut data = vec![9u8; 100];
        let before = data.clone();
        assert!(session.encrypt(&mut data, &CipherIv::sector(0)).is_err());
        assert_eq!(data, before);
    }

    #[test]
    fn random_keys_roundtrip() {
        for _ in 0..8 {
            let key: [u8; 64] = rand::random();
            let sector: u64 = rand::random();
            let session = session_with_key(&key);
            let original: Vec<u8> = (0..512).map(|_| rand::random()).collect();
            let mut data = original.clone();
            session.encrypt(&mut data, &CipherIv::sector(sector)).unwrap();
            session.decrypt(&mut data, &CipherIv::sector(sector)).unwrap();
            assert_eq!(data, original);
        }
    }
}
