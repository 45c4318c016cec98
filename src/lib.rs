//! Extensible key-management runtime: key managers and wrappers behind
//! process-wide registries, format-tagged key serialization, and keysets
//! that materialize into single multi-key primitives.

pub mod aead;
pub mod error;
pub mod fips;
pub mod hash;
pub mod kem;
pub mod key;
pub mod keyset;
pub mod mac;
pub mod output_prefix;
pub mod primitive_set;
pub mod registry;
pub mod secret;
pub mod serialization;
pub mod signature;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{ErrorKind, LoomError, Result};
pub use key::{Key, KeyStatus, Parameters};
pub use keyset::Keyset;
pub use output_prefix::OutputPrefix;
pub use secret::{SecretAccess, SecretBytes};

/// Registers every shipped family bundle: MAC, AEAD, and signatures.
/// Idempotent; typical applications call it once at startup.
pub fn register_all() -> Result<()> {
    mac::register()?;
    aead::register()?;
    signature::register()?;
    Ok(())
}
