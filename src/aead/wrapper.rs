/// Multi-key AEAD assembled from a primitive set.
///
/// Encrypt always goes through the primary entry and prepends its framing
/// bytes. Decrypt strips the candidate framing and tries every enabled
/// entry that could have produced the ciphertext, falling back to raw
/// entries. Unlike MACs, legacy framing changes nothing but the leading
/// byte here; the plaintext is passed to the scheme untouched.
use crate::aead::Aead;
use crate::error::{LoomError, Result};
use crate::output_prefix::PREFIX_LEN;
use crate::primitive_set::PrimitiveSet;
use crate::registry::PrimitiveWrapper;

/// Combines `PrimitiveSet<dyn Aead>` into a single [`Aead`].
pub struct AeadWrapper;

impl PrimitiveWrapper for AeadWrapper {
    type Primitive = dyn Aead;

    fn wrap(&self, set: PrimitiveSet<dyn Aead>) -> Result<Box<dyn Aead>> {
        if set.primary().is_none() {
            return Err(LoomError::NoPrimary);
        }
        Ok(Box::new(WrappedAead { set }))
    }
}

struct WrappedAead {
    set: PrimitiveSet<dyn Aead>,
}

impl Aead for WrappedAead {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let primary = self.set.primary().ok_or(LoomError::NoPrimary)?;
        let ciphertext = primary.primitive().encrypt(plaintext, aad)?;
        let mut framed = Vec::with_capacity(primary.prefix().len() + ciphertext.len());
        framed.extend_from_slice(primary.prefix());
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        for entry in self.set.entries_for_candidate(ciphertext) {
            let body = if entry.prefix().is_empty() {
                ciphertext
            } else {
                &ciphertext[PREFIX_LEN..]
            };
            if let Ok(plaintext) = entry.primitive().decrypt(body, aad) {
                return Ok(plaintext);
            }
        }
        Err(LoomError::VerificationFailed)
    }
}
