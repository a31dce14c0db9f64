use thiserror::Error;

/// Cipher-engine errors.
///
/// These are returned synchronously to the caller; nothing in this crate
/// logs-and-swallows, because the mapping layer needs the exact failure to
/// decide whether a table load or an I/O completes.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("no cipher matches {algorithm}-{mode} with a {keysize_bits}-bit key")]
    NoMatch {
        algorithm: String,
        mode: String,
        keysize_bits: usize,
    },

    #[error("invalid key length for {cipher}: {bits} bits")]
    InvalidKeyLength { cipher: &'static str, bits: usize },

    #[error("data length {len} is not a multiple of the {block_size}-byte cipher block")]
    UnalignedLength { len: usize, block_size: usize },

    #[error("cipher session used before a key was set")]
    KeyNotSet,

    #[error("initialization vector does not fit the selected mode")]
    IvMismatch,
}

/// Result type alias for cipher operations
pub type Result<T> = std::result::Result<T, CipherError>;
