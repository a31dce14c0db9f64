use encryption::CipherError;
use thiserror::Error;

/// Mapping-layer errors.
///
/// Control-plane handlers translate these into status codes one-to-one;
/// the data plane carries them in completion results. Handlers validate
/// before mutating, so an error never leaves a device half-changed.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("busy: {0}")]
    Busy(String),

    /// Coverage gap while splitting: part of the request matched no table
    /// extent. `issued` is the byte count that did map and was submitted.
    #[error("request partially mapped: {issued} bytes issued")]
    IoPartial { issued: u64 },

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Raw transfer failure reported by a backing store.
    #[error("backing store i/o: {0}")]
    Io(String),
}

impl From<CipherError> for MapError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::NoMatch { .. } => MapError::NotFound(err.to_string()),
            CipherError::InvalidKeyLength { .. }
            | CipherError::UnalignedLength { .. }
            | CipherError::KeyNotSet
            | CipherError::IvMismatch => MapError::InvalidArgument(err.to_string()),
        }
    }
}

/// Result type alias for mapping operations
pub type Result<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_errors_map_onto_the_taxonomy() {
        let err: MapError = CipherError::NoMatch {
            algorithm: "aes".into(),
            mode: "gcm".into(),
            keysize_bits: 256,
        }
        .into();
        assert!(matches!(err, MapError::NotFound(_)));

        let err: MapError = CipherError::KeyNotSet.into();
        assert!(matches!(err, MapError::InvalidArgument(_)));
    }

    #[test]
    fn partial_reports_issued_bytes() {
        let err = MapError::IoPartial { issued: 512 };
        assert_eq!(err.to_string(), "request partially mapped: 512 bytes issued");
    }
}
