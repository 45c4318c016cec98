/// Multi-key MAC assembled from a primitive set.
///
/// Compute always goes through the primary entry and prepends its framing
/// bytes. Verify strips the candidate framing and tries every enabled entry
/// that could have produced the tag, falling back to raw entries, and
/// reports one uniform failure when none accepts.
use std::borrow::Cow;

use crate::error::{LoomError, Result};
use crate::mac::Mac;
use crate::output_prefix::{OutputPrefix, LEGACY_INPUT_SUFFIX, PREFIX_LEN};
use crate::primitive_set::PrimitiveSet;
use crate::registry::PrimitiveWrapper;

/// Combines `PrimitiveSet<dyn Mac>` into a single [`Mac`].
pub struct MacWrapper;

impl PrimitiveWrapper for MacWrapper {
    type Primitive = dyn Mac;

    fn wrap(&self, set: PrimitiveSet<dyn Mac>) -> Result<Box<dyn Mac>> {
        if set.primary().is_none() {
            return Err(LoomError::NoPrimary);
        }
        Ok(Box::new(WrappedMac { set }))
    }
}

struct WrappedMac {
    set: PrimitiveSet<dyn Mac>,
}

/// Legacy framing authenticates the message with a trailing zero byte;
/// every other variant authenticates the message as given.
fn mac_input<'a>(prefix: OutputPrefix, data: &'a [u8]) -> Cow<'a, [u8]> {
    if prefix == OutputPrefix::Legacy {
        let mut owned = Vec::with_capacity(data.len() + 1);
        owned.extend_from_slice(data);
        owned.push(LEGACY_INPUT_SUFFIX);
        Cow::Owned(owned)
    } else {
        Cow::Borrowed(data)
    }
}

impl Mac for WrappedMac {
    fn compute_mac(&self, data: &[u8]) -> Result<Vec<u8>> {
        let primary = self.set.primary().ok_or(LoomError::NoPrimary)?;
        let input = mac_input(primary.prefix_type(), data);
        let tag = primary.primitive().compute_mac(&input)?;
        let mut framed = Vec::with_capacity(primary.prefix().len() + tag.len());
        framed.extend_from_slice(primary.prefix());
        framed.extend_from_slice(&tag);
        Ok(framed)
    }

    fn verify_mac(&self, tag: &[u8], data: &[u8]) -> Result<()> {
        for entry in self.set.entries_for_candidate(tag) {
            // Framed candidates matched on their first PREFIX_LEN bytes, so
            // the slice below cannot be out of bounds.
            let body = if entry.prefix().is_empty() {
                tag
            } else {
                &tag[PREFIX_LEN..]
            };
            let input = mac_input(entry.prefix_type(), data);
            if entry.primitive().verify_mac(body, &input).is_ok() {
                return Ok(());
            }
        }
        Err(LoomError::VerificationFailed)
    }
}
