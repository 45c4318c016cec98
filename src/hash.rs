/// Hash-function selection shared by the HMAC family and the sender KEM,
/// with dispatch helpers over the RustCrypto digest stack.
use hkdf::Hkdf;
use hmac::{Hmac, Mac as _};
use sha2::{Sha256, Sha512};

use crate::error::{LoomError, Result};

/// Supported hash functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Sha256,
    Sha512,
}

impl HashKind {
    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashKind::Sha256 => 32,
            HashKind::Sha512 => 64,
        }
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            HashKind::Sha256 => 1,
            HashKind::Sha512 => 2,
        }
    }

    /// Fails closed on bytes outside the supported set.
    pub(crate) fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(HashKind::Sha256),
            2 => Ok(HashKind::Sha512),
            other => Err(LoomError::MalformedEncoding(format!(
                "unknown hash identifier {other}"
            ))),
        }
    }
}

/// Streaming HMAC state dispatched on the selected hash. Single-use:
/// `finalize` consumes the stream.
pub(crate) enum HmacStream {
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

impl HmacStream {
    pub(crate) fn new(hash: HashKind, key: &[u8]) -> Result<Self> {
        match hash {
            HashKind::Sha256 => Ok(HmacStream::Sha256(
                Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|e| LoomError::InvalidKey(e.to_string()))?,
            )),
            HashKind::Sha512 => Ok(HmacStream::Sha512(
                Hmac::<Sha512>::new_from_slice(key)
                    .map_err(|e| LoomError::InvalidKey(e.to_string()))?,
            )),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            HmacStream::Sha256(mac) => mac.update(data),
            HmacStream::Sha512(mac) => mac.update(data),
        }
    }

    pub(crate) fn finalize(self) -> Vec<u8> {
        match self {
            HmacStream::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            HmacStream::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }
}

/// Computes a full-length HMAC tag with the selected hash.
pub(crate) fn hmac_tag(hash: HashKind, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut stream = HmacStream::new(hash, key)?;
    stream.update(data);
    Ok(stream.finalize())
}

/// HKDF extract-and-expand with the selected hash.
pub(crate) fn hkdf_derive(
    hash: HashKind,
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
    out_len: usize,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; out_len];
    match hash {
        HashKind::Sha256 => Hkdf::<Sha256>::new(Some(salt), ikm)
            .expand(info, &mut out)
            .map_err(|e| LoomError::InvalidParameters(e.to_string()))?,
        HashKind::Sha512 => Hkdf::<Sha512>::new(Some(salt), ikm)
            .expand(info, &mut out)
            .map_err(|e| LoomError::InvalidParameters(e.to_string()))?,
    }
    Ok(out)
}
