/// Digital signatures behind split signing and verification capabilities.
///
/// [`register`] installs the shipped scheme (Ed25519), both wrappers, and
/// the binary codecs. Signing and verifying are separate capabilities so a
/// verification-only deployment never holds private key material.
pub mod ed25519;
mod wrapper;

pub use wrapper::{SignerWrapper, VerifierWrapper};

use crate::error::Result;
use crate::registry;

/// Produces signatures over arbitrary messages.
pub trait Signer: Send + Sync {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Checks signatures produced by the matching [`Signer`].
pub trait Verifier: Send + Sync {
    /// Uniform failure: a forged signature, a truncated signature, and an
    /// unknown key are indistinguishable to the caller.
    fn verify(&self, signature: &[u8], data: &[u8]) -> Result<()>;
}

/// Installs both signature wrappers, the Ed25519 managers, and the codecs.
/// Idempotent.
pub fn register() -> Result<()> {
    registry::register_wrapper(SignerWrapper)?;
    registry::register_wrapper(VerifierWrapper)?;
    ed25519::register()?;
    Ok(())
}
