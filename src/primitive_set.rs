/// An ordered collection of live primitives, one per keyset key, with the
/// bookkeeping wrappers need: per-entry framing, a designated primary, and
/// candidate lookup by output prefix.
///
/// `P` is the capability trait object type (`dyn Mac`, `dyn Signer`, ...).
/// Wrappers consume the set by value, so a wrapped primitive can never see
/// the set change underneath it.
use std::collections::HashMap;

use crate::error::{LoomError, Result};
use crate::key::KeyStatus;
use crate::output_prefix::{OutputPrefix, PREFIX_LEN};

/// Per-entry metadata carried over from the keyset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    pub id: u32,
    pub status: KeyStatus,
    pub prefix: OutputPrefix,
}

/// Reference to an entry of the set that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle(usize);

/// One primitive plus the framing data of the key backing it.
pub struct Entry<P: ?Sized> {
    primitive: Box<P>,
    id: u32,
    status: KeyStatus,
    prefix_type: OutputPrefix,
    prefix: Vec<u8>,
}

impl<P: ?Sized> Entry<P> {
    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn prefix_type(&self) -> OutputPrefix {
        self.prefix_type
    }

    /// Precomputed framing bytes; empty for raw entries.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }
}

pub struct PrimitiveSet<P: ?Sized> {
    entries: Vec<Entry<P>>,
    by_prefix: HashMap<Vec<u8>, Vec<usize>>,
    primary: Option<usize>,
}

impl<P: ?Sized> Default for PrimitiveSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ?Sized> PrimitiveSet<P> {
    pub fn new() -> Self {
        PrimitiveSet {
            entries: Vec::new(),
            by_prefix: HashMap::new(),
            primary: None,
        }
    }

    /// Appends an entry, precomputing its framing bytes from the key id and
    /// output-prefix variant.
    pub fn add(&mut self, primitive: Box<P>, info: &KeyInfo) -> EntryHandle {
        let index = self.entries.len();
        let prefix = info.prefix.prefix_bytes(info.id);
        self.by_prefix.entry(prefix.clone()).or_default().push(index);
        self.entries.push(Entry {
            primitive,
            id: info.id,
            status: info.status,
            prefix_type: info.prefix,
            prefix,
        });
        EntryHandle(index)
    }

    /// Designates the primary entry; replaces any previous designation.
    /// The entry must exist in this set and be enabled.
    pub fn set_primary(&mut self, handle: EntryHandle) -> Result<()> {
        let entry = self.entries.get(handle.0).ok_or_else(|| {
            LoomError::InvalidParameters("primary handle does not refer to this set".into())
        })?;
        if entry.status != KeyStatus::Enabled {
            return Err(LoomError::InvalidParameters(
                "primary must be an enabled entry".into(),
            ));
        }
        self.primary = Some(handle.0);
        Ok(())
    }

    pub fn primary(&self) -> Option<&Entry<P>> {
        self.primary.map(|index| &self.entries[index])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry<P>> {
        self.entries.iter()
    }

    /// Enabled entries that could have produced an output starting with
    /// `candidate`, in insertion order: framed entries whose 5-byte prefix
    /// matches, plus every raw entry.
    pub fn entries_for_candidate(&self, candidate: &[u8]) -> Vec<&Entry<P>> {
        let mut indices: Vec<usize> = Vec::new();
        if candidate.len() >= PREFIX_LEN {
            if let Some(framed) = self.by_prefix.get(&candidate[..PREFIX_LEN]) {
                indices.extend_from_slice(framed);
            }
        }
        if let Some(raw) = self.by_prefix.get(&[] as &[u8]) {
            indices.extend_from_slice(raw);
        }
        indices.sort_unstable();
        indices
            .into_iter()
            .map(|index| &self.entries[index])
            .filter(|entry| entry.status == KeyStatus::Enabled)
            .collect()
    }
}
