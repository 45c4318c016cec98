/// Message-authentication primitives: the one-shot [`Mac`] capability and
/// the incremental [`ChunkedMac`] capability over the same keys.
///
/// [`register`] installs the shipped schemes (HMAC over SHA-256/SHA-512,
/// AES-CMAC), both multi-key wrappers, and the binary codecs. Everything an
/// application needs for keyset-backed MACs comes through this one call.
pub mod aes_cmac;
mod chunked;
pub mod hmac;
mod wrapper;

pub use chunked::{ChunkedMac, ChunkedMacComputation, ChunkedMacVerification, ChunkedMacWrapper};
pub use wrapper::MacWrapper;

use crate::error::Result;
use crate::fips;
use crate::registry;

/// Computes and verifies message authentication tags.
pub trait Mac: Send + Sync {
    fn compute_mac(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Uniform failure: an invalid tag, a truncated tag, and an unknown
    /// key are indistinguishable to the caller.
    fn verify_mac(&self, tag: &[u8], data: &[u8]) -> Result<()>;
}

/// Installs the MAC wrappers, key managers, and codecs. Idempotent.
///
/// Under FIPS restriction non-approved schemes are skipped entirely, so
/// later lookups for them fail with a not-found error instead of handing
/// out a forbidden algorithm.
pub fn register() -> Result<()> {
    registry::register_wrapper(MacWrapper)?;
    registry::register_wrapper(ChunkedMacWrapper)?;
    hmac::register()?;
    if !fips::fips_enabled() {
        aes_cmac::register()?;
    }
    Ok(())
}
