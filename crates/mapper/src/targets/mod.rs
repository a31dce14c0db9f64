//! Built-in target types.
//!
//! Only the encrypting target ships here; anything else plugs in through
//! [`crate::target::TargetRegistry`].

pub mod crypt;

pub use crypt::CryptTargetType;
