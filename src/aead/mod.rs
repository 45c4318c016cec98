/// Authenticated encryption behind one capability trait.
///
/// [`register`] installs the shipped scheme (XChaCha20-Poly1305), the
/// multi-key wrapper, and the binary codecs.
pub mod xchacha;
mod wrapper;

pub use wrapper::AeadWrapper;

use crate::error::Result;
use crate::fips;
use crate::registry;

/// Authenticated encryption with associated data.
pub trait Aead: Send + Sync {
    /// Encrypts `plaintext`, authenticating `aad` alongside it without
    /// including it in the output.
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Uniform failure: a wrong key, a mismatched aad, and a tampered
    /// ciphertext are indistinguishable to the caller.
    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;
}

/// Installs the AEAD wrapper, key managers, and codecs. Idempotent.
///
/// Under FIPS restriction non-approved schemes are skipped entirely.
pub fn register() -> Result<()> {
    registry::register_wrapper(AeadWrapper)?;
    if !fips::fips_enabled() {
        xchacha::register()?;
    }
    Ok(())
}
