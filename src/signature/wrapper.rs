/// Multi-key signing and verification assembled from primitive sets.
///
/// Signing always goes through the primary entry and prepends its framing
/// bytes. Verification strips the candidate framing and tries every
/// enabled entry that could have produced the signature, falling back to
/// raw entries, and reports one uniform failure when none accepts. Legacy
/// entries sign and verify the message with a trailing zero byte appended.
use std::borrow::Cow;

use crate::error::{LoomError, Result};
use crate::output_prefix::{OutputPrefix, LEGACY_INPUT_SUFFIX, PREFIX_LEN};
use crate::primitive_set::PrimitiveSet;
use crate::registry::PrimitiveWrapper;
use crate::signature::{Signer, Verifier};

/// Combines `PrimitiveSet<dyn Signer>` into a single [`Signer`].
pub struct SignerWrapper;

impl PrimitiveWrapper for SignerWrapper {
    type Primitive = dyn Signer;

    fn wrap(&self, set: PrimitiveSet<dyn Signer>) -> Result<Box<dyn Signer>> {
        if set.primary().is_none() {
            return Err(LoomError::NoPrimary);
        }
        Ok(Box::new(WrappedSigner { set }))
    }
}

/// Combines `PrimitiveSet<dyn Verifier>` into a single [`Verifier`].
pub struct VerifierWrapper;

impl PrimitiveWrapper for VerifierWrapper {
    type Primitive = dyn Verifier;

    fn wrap(&self, set: PrimitiveSet<dyn Verifier>) -> Result<Box<dyn Verifier>> {
        if set.primary().is_none() {
            return Err(LoomError::NoPrimary);
        }
        Ok(Box::new(WrappedVerifier { set }))
    }
}

fn signed_input<'a>(prefix: OutputPrefix, data: &'a [u8]) -> Cow<'a, [u8]> {
    if prefix == OutputPrefix::Legacy {
        let mut owned = Vec::with_capacity(data.len() + 1);
        owned.extend_from_slice(data);
        owned.push(LEGACY_INPUT_SUFFIX);
        Cow::Owned(owned)
    } else {
        Cow::Borrowed(data)
    }
}

struct WrappedSigner {
    set: PrimitiveSet<dyn Signer>,
}

impl Signer for WrappedSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let primary = self.set.primary().ok_or(LoomError::NoPrimary)?;
        let input = signed_input(primary.prefix_type(), data);
        let signature = primary.primitive().sign(&input)?;
        let mut framed = Vec::with_capacity(primary.prefix().len() + signature.len());
        framed.extend_from_slice(primary.prefix());
        framed.extend_from_slice(&signature);
        Ok(framed)
    }
}

struct WrappedVerifier {
    set: PrimitiveSet<dyn Verifier>,
}

impl Verifier for WrappedVerifier {
    fn verify(&self, signature: &[u8], data: &[u8]) -> Result<()> {
        for entry in self.set.entries_for_candidate(signature) {
            let body = if entry.prefix().is_empty() {
                signature
            } else {
                &signature[PREFIX_LEN..]
            };
            let input = signed_input(entry.prefix_type(), data);
            if entry.primitive().verify(body, &input).is_ok() {
                return Ok(());
            }
        }
        Err(LoomError::VerificationFailed)
    }
}
