/// Portable, format-tagged encodings of parameters and keys.
///
/// An encoding never interprets its own payload; codecs registered in
/// [`registry`] do. The shipped codecs all live under the
/// [`FORMAT_BINARY_V1`] tag and use versioned little-endian payloads;
/// alternative formats register under their own tag without touching the
/// shipped ones.
pub mod registry;

use crate::error::{LoomError, Result};
use crate::output_prefix::OutputPrefix;
use crate::secret::SecretBytes;

/// Format tag of the crate's shipped binary codecs.
pub const FORMAT_BINARY_V1: &str = "keyloom.bin.v1";

/// What a key encoding's payload contains. Drives secret-access
/// enforcement: only public material may be handled without a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMaterialKind {
    Symmetric,
    AsymmetricPrivate,
    AsymmetricPublic,
}

impl KeyMaterialKind {
    pub fn is_secret(self) -> bool {
        !matches!(self, KeyMaterialKind::AsymmetricPublic)
    }
}

/// Encoding of a `Parameters` value; doubles as the key template handed to
/// keyset generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedParameters {
    format: &'static str,
    type_tag: String,
    prefix: OutputPrefix,
    payload: Vec<u8>,
}

impl EncodedParameters {
    pub fn new(
        format: &'static str,
        type_tag: impl Into<String>,
        prefix: OutputPrefix,
        payload: Vec<u8>,
    ) -> Self {
        EncodedParameters {
            format,
            type_tag: type_tag.into(),
            prefix,
            payload,
        }
    }

    pub fn format(&self) -> &'static str {
        self.format
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn output_prefix(&self) -> OutputPrefix {
        self.prefix
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Encoding of a `Key`. The payload is held in a zeroizing buffer; whether
/// it is actually secret is carried by the material kind.
///
/// Construction enforces the framing invariant: framed variants require a
/// key id, `Raw` forbids one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedKey {
    format: &'static str,
    type_tag: String,
    material: KeyMaterialKind,
    prefix: OutputPrefix,
    id_requirement: Option<u32>,
    payload: SecretBytes,
}

impl EncodedKey {
    pub fn new(
        format: &'static str,
        type_tag: impl Into<String>,
        material: KeyMaterialKind,
        prefix: OutputPrefix,
        id_requirement: Option<u32>,
        payload: SecretBytes,
    ) -> Result<Self> {
        if prefix.requires_id() && id_requirement.is_none() {
            return Err(LoomError::MalformedEncoding(
                "framed key encoding without an id requirement".into(),
            ));
        }
        if !prefix.requires_id() && id_requirement.is_some() {
            return Err(LoomError::MalformedEncoding(
                "raw key encoding with an id requirement".into(),
            ));
        }
        Ok(EncodedKey {
            format,
            type_tag: type_tag.into(),
            material,
            prefix,
            id_requirement,
            payload,
        })
    }

    pub fn format(&self) -> &'static str {
        self.format
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn material(&self) -> KeyMaterialKind {
        self.material
    }

    pub fn output_prefix(&self) -> OutputPrefix {
        self.prefix
    }

    pub fn id_requirement(&self) -> Option<u32> {
        self.id_requirement
    }

    pub fn payload(&self) -> &SecretBytes {
        &self.payload
    }
}
