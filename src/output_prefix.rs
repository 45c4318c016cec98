/// Output-prefix framing for multi-key primitives.
///
/// Framed outputs carry a 5-byte prefix: one variant tag byte followed by
/// the 4-byte big-endian key id. `Raw` outputs carry nothing. The prefix is
/// how a verifier narrows a candidate output down to the keys that could
/// have produced it.
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{LoomError, Result};

pub const PREFIX_LEN: usize = 5; // tag byte + 4-byte big-endian key id
pub const STANDARD_TAG: u8 = 0x01;
pub const LEGACY_TAG: u8 = 0x00; // shared by Legacy and Compat
pub const LEGACY_INPUT_SUFFIX: u8 = 0x00; // appended to MAC/signature inputs for Legacy keys

/// Framing variant attached to every key.
///
/// `Legacy` and `Compat` frame identically; `Legacy` additionally makes MAC
/// and signature primitives process `input || 0x00` instead of the input
/// itself. That quirk lives in the per-family wrappers, not here.
///
/// Serde carries the variant as its wire byte, so persisted metadata fails
/// closed on unknown prefixes at the same decode point as the codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPrefix {
    Raw,
    Standard,
    Legacy,
    Compat,
}

impl OutputPrefix {
    /// Framing bytes this variant prepends to outputs of the key `key_id`.
    pub fn prefix_bytes(self, key_id: u32) -> Vec<u8> {
        match self {
            OutputPrefix::Raw => Vec::new(),
            OutputPrefix::Standard => {
                let mut prefix = Vec::with_capacity(PREFIX_LEN);
                prefix.push(STANDARD_TAG);
                prefix.extend_from_slice(&key_id.to_be_bytes());
                prefix
            }
            OutputPrefix::Legacy | OutputPrefix::Compat => {
                let mut prefix = Vec::with_capacity(PREFIX_LEN);
                prefix.push(LEGACY_TAG);
                prefix.extend_from_slice(&key_id.to_be_bytes());
                prefix
            }
        }
    }

    /// True when keys with this variant must carry a fixed key id.
    pub fn requires_id(self) -> bool {
        !matches!(self, OutputPrefix::Raw)
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            OutputPrefix::Raw => 0,
            OutputPrefix::Standard => 1,
            OutputPrefix::Legacy => 2,
            OutputPrefix::Compat => 3,
        }
    }

    /// Fails closed on bytes outside the closed variant set.
    pub(crate) fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(OutputPrefix::Raw),
            1 => Ok(OutputPrefix::Standard),
            2 => Ok(OutputPrefix::Legacy),
            3 => Ok(OutputPrefix::Compat),
            other => Err(LoomError::MalformedEncoding(format!(
                "unknown output-prefix identifier {other}"
            ))),
        }
    }
}

impl Serialize for OutputPrefix {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.to_wire())
    }
}

impl<'de> Deserialize<'de> for OutputPrefix {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let byte = u8::deserialize(deserializer)?;
        OutputPrefix::from_wire(byte).map_err(serde::de::Error::custom)
    }
}
