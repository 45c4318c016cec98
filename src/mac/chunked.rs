/// Incremental MAC over message chunks, for callers that cannot hold the
/// whole input in memory.
///
/// Tags are interchangeable with the one-shot [`Mac`](crate::mac::Mac)
/// capability: a chunked computation over the concatenated updates settles
/// into the same tag the one-shot compute produces for the same key.
use crate::error::{LoomError, Result};
use crate::output_prefix::{OutputPrefix, LEGACY_INPUT_SUFFIX, PREFIX_LEN};
use crate::primitive_set::PrimitiveSet;
use crate::registry::PrimitiveWrapper;

/// Hands out single-use incremental computations and verifications.
pub trait ChunkedMac: Send + Sync {
    fn create_computation(&self) -> Result<Box<dyn ChunkedMacComputation>>;

    /// The candidate tag is captured up front; the message follows through
    /// `update`.
    fn create_verification(&self, tag: &[u8]) -> Result<Box<dyn ChunkedMacVerification>>;
}

/// Accumulates message chunks; `compute_mac` consumes the state and
/// settles the tag.
pub trait ChunkedMacComputation: Send {
    fn update(&mut self, data: &[u8]) -> Result<()>;

    fn compute_mac(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Accumulates message chunks; `verify_mac` consumes the state and settles
/// the captured tag against them.
pub trait ChunkedMacVerification: Send {
    fn update(&mut self, data: &[u8]) -> Result<()>;

    fn verify_mac(self: Box<Self>) -> Result<()>;
}

/// Combines `PrimitiveSet<dyn ChunkedMac>` into a single [`ChunkedMac`].
///
/// Computations come from the primary entry and prepend its framing bytes
/// when the tag settles. Verifications fan every update out to all enabled
/// entries that could have produced the captured tag, raw entries included,
/// and report one uniform failure when none accepts.
pub struct ChunkedMacWrapper;

impl PrimitiveWrapper for ChunkedMacWrapper {
    type Primitive = dyn ChunkedMac;

    fn wrap(&self, set: PrimitiveSet<dyn ChunkedMac>) -> Result<Box<dyn ChunkedMac>> {
        if set.primary().is_none() {
            return Err(LoomError::NoPrimary);
        }
        Ok(Box::new(WrappedChunkedMac { set }))
    }
}

struct WrappedChunkedMac {
    set: PrimitiveSet<dyn ChunkedMac>,
}

impl ChunkedMac for WrappedChunkedMac {
    fn create_computation(&self) -> Result<Box<dyn ChunkedMacComputation>> {
        let primary = self.set.primary().ok_or(LoomError::NoPrimary)?;
        Ok(Box::new(FramedComputation {
            inner: primary.primitive().create_computation()?,
            prefix: primary.prefix().to_vec(),
            legacy: primary.prefix_type() == OutputPrefix::Legacy,
        }))
    }

    fn create_verification(&self, tag: &[u8]) -> Result<Box<dyn ChunkedMacVerification>> {
        let mut candidates = Vec::new();
        for entry in self.set.entries_for_candidate(tag) {
            // Framed candidates matched on their first PREFIX_LEN bytes, so
            // the slice below cannot be out of bounds.
            let body = if entry.prefix().is_empty() {
                tag
            } else {
                &tag[PREFIX_LEN..]
            };
            candidates.push(Candidate {
                inner: entry.primitive().create_verification(body)?,
                legacy: entry.prefix_type() == OutputPrefix::Legacy,
            });
        }
        Ok(Box::new(FanOutVerification { candidates }))
    }
}

/// Runs the primary entry's computation; framing is prepended and the
/// Legacy trailing zero byte is fed only when the tag settles.
struct FramedComputation {
    inner: Box<dyn ChunkedMacComputation>,
    prefix: Vec<u8>,
    legacy: bool,
}

impl ChunkedMacComputation for FramedComputation {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.inner.update(data)
    }

    fn compute_mac(self: Box<Self>) -> Result<Vec<u8>> {
        let FramedComputation {
            mut inner,
            mut prefix,
            legacy,
        } = *self;
        if legacy {
            inner.update(&[LEGACY_INPUT_SUFFIX])?;
        }
        let tag = inner.compute_mac()?;
        prefix.extend_from_slice(&tag);
        Ok(prefix)
    }
}

struct Candidate {
    inner: Box<dyn ChunkedMacVerification>,
    legacy: bool,
}

struct FanOutVerification {
    candidates: Vec<Candidate>,
}

impl ChunkedMacVerification for FanOutVerification {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        for candidate in &mut self.candidates {
            candidate.inner.update(data)?;
        }
        Ok(())
    }

    fn verify_mac(self: Box<Self>) -> Result<()> {
        for Candidate { mut inner, legacy } in self.candidates {
            if legacy && inner.update(&[LEGACY_INPUT_SUFFIX]).is_err() {
                continue;
            }
            if inner.verify_mac().is_ok() {
                return Ok(());
            }
        }
        Err(LoomError::VerificationFailed)
    }
}
