/// AES-CMAC: parameters, keys, the key manager, and the binary codecs.
///
/// Not FIPS-approved; the family bundle skips this scheme while the
/// process is restricted.
///
/// Key payload format:
/// [version(1B) | tag_size(4B LE) | key bytes]
/// Parameters payload format:
/// [version(1B) | key_size(4B LE) | tag_size(4B LE)]
use std::any::{Any, TypeId};

use aes::{Aes128, Aes256};
use cmac::{Cmac, Mac as _};
use subtle::ConstantTimeEq;

use crate::error::{LoomError, Result};
use crate::fips::FipsStatus;
use crate::key::{downcast_key, downcast_params, AnyPrimitive, Key, Parameters};
use crate::mac::{ChunkedMac, ChunkedMacComputation, ChunkedMacVerification, Mac};
use crate::output_prefix::OutputPrefix;
use crate::registry::{self, KeyManager};
use crate::secret::{SecretAccess, SecretBytes};
use crate::serialization::{
    registry as codecs, EncodedKey, EncodedParameters, KeyMaterialKind, FORMAT_BINARY_V1,
};

pub const TYPE_TAG: &str = "keyloom/aes-cmac";
pub const PAYLOAD_VERSION: u8 = 0x01;
pub const MIN_TAG_SIZE: usize = 10;
pub const MAX_TAG_SIZE: usize = 16; // AES block size

const PARAMS_PAYLOAD_LEN: usize = 9;
const KEY_HEADER_LEN: usize = 5;

/// Validated AES-CMAC configuration. Keys are 16 or 32 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesCmacParameters {
    key_size: usize,
    tag_size: usize,
    prefix: OutputPrefix,
}

impl AesCmacParameters {
    pub fn new(key_size: usize, tag_size: usize, prefix: OutputPrefix) -> Result<Self> {
        if key_size != 16 && key_size != 32 {
            return Err(LoomError::InvalidParameters(format!(
                "aes-cmac key must be 16 or 32 bytes, got {key_size}"
            )));
        }
        if !(MIN_TAG_SIZE..=MAX_TAG_SIZE).contains(&tag_size) {
            return Err(LoomError::InvalidParameters(format!(
                "aes-cmac tag size {tag_size} outside {MIN_TAG_SIZE}..={MAX_TAG_SIZE}"
            )));
        }
        Ok(AesCmacParameters {
            key_size,
            tag_size,
            prefix,
        })
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn tag_size(&self) -> usize {
        self.tag_size
    }
}

impl Parameters for AesCmacParameters {
    fn output_prefix(&self) -> OutputPrefix {
        self.prefix
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_dyn(&self, other: &dyn Parameters) -> bool {
        other
            .as_any()
            .downcast_ref::<AesCmacParameters>()
            .is_some_and(|other| self == other)
    }
}

pub struct AesCmacKey {
    params: AesCmacParameters,
    material: SecretBytes,
    id: Option<u32>,
}

impl AesCmacKey {
    pub fn new(params: AesCmacParameters, material: SecretBytes, id: Option<u32>) -> Result<Self> {
        if material.len() != params.key_size() {
            return Err(LoomError::InvalidKey(format!(
                "material is {} bytes, parameters demand {}",
                material.len(),
                params.key_size()
            )));
        }
        if params.has_id_requirement() != id.is_some() {
            return Err(LoomError::InvalidKey(
                "key id requirement does not match the output-prefix variant".into(),
            ));
        }
        Ok(AesCmacKey {
            params,
            material,
            id,
        })
    }

    pub fn generate(params: AesCmacParameters, id: Option<u32>) -> Result<Self> {
        let material = SecretBytes::generate(params.key_size());
        AesCmacKey::new(params, material, id)
    }

    pub fn material(&self) -> &SecretBytes {
        &self.material
    }
}

impl Key for AesCmacKey {
    fn parameters(&self) -> &dyn Parameters {
        &self.params
    }

    fn id_requirement(&self) -> Option<u32> {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_dyn(&self, other: &dyn Key) -> bool {
        other
            .as_any()
            .downcast_ref::<AesCmacKey>()
            .is_some_and(|other| {
                self.params == other.params
                    && self.material == other.material
                    && self.id == other.id
            })
    }
}

/// Streaming CMAC state dispatched on key size. Single-use: `finalize`
/// consumes the stream.
enum CmacStream {
    Aes128(Cmac<Aes128>),
    Aes256(Cmac<Aes256>),
}

impl CmacStream {
    fn new(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Ok(CmacStream::Aes128(
                Cmac::<Aes128>::new_from_slice(key)
                    .map_err(|e| LoomError::InvalidKey(e.to_string()))?,
            )),
            32 => Ok(CmacStream::Aes256(
                Cmac::<Aes256>::new_from_slice(key)
                    .map_err(|e| LoomError::InvalidKey(e.to_string()))?,
            )),
            other => Err(LoomError::InvalidKey(format!(
                "aes-cmac key of {other} bytes"
            ))),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            CmacStream::Aes128(mac) => mac.update(data),
            CmacStream::Aes256(mac) => mac.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            CmacStream::Aes128(mac) => mac.finalize().into_bytes().to_vec(),
            CmacStream::Aes256(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }
}

struct CmacPrimitive {
    tag_size: usize,
    key: SecretBytes,
}

impl CmacPrimitive {
    fn stream(&self) -> Result<CmacStream> {
        CmacStream::new(self.key.expose(SecretAccess::insecure()))
    }

    fn full_tag(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut stream = self.stream()?;
        stream.update(data);
        Ok(stream.finalize())
    }
}

impl Mac for CmacPrimitive {
    fn compute_mac(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut tag = self.full_tag(data)?;
        tag.truncate(self.tag_size);
        Ok(tag)
    }

    fn verify_mac(&self, tag: &[u8], data: &[u8]) -> Result<()> {
        if tag.len() != self.tag_size {
            return Err(LoomError::VerificationFailed);
        }
        let expected = self.compute_mac(data)?;
        if expected.ct_eq(tag).into() {
            Ok(())
        } else {
            Err(LoomError::VerificationFailed)
        }
    }
}

impl ChunkedMac for CmacPrimitive {
    fn create_computation(&self) -> Result<Box<dyn ChunkedMacComputation>> {
        Ok(Box::new(CmacComputation {
            stream: self.stream()?,
            tag_size: self.tag_size,
        }))
    }

    fn create_verification(&self, tag: &[u8]) -> Result<Box<dyn ChunkedMacVerification>> {
        Ok(Box::new(CmacVerification {
            stream: self.stream()?,
            tag_size: self.tag_size,
            expected: tag.to_vec(),
        }))
    }
}

struct CmacComputation {
    stream: CmacStream,
    tag_size: usize,
}

impl ChunkedMacComputation for CmacComputation {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.stream.update(data);
        Ok(())
    }

    fn compute_mac(self: Box<Self>) -> Result<Vec<u8>> {
        let CmacComputation { stream, tag_size } = *self;
        let mut tag = stream.finalize();
        tag.truncate(tag_size);
        Ok(tag)
    }
}

struct CmacVerification {
    stream: CmacStream,
    tag_size: usize,
    expected: Vec<u8>,
}

impl ChunkedMacVerification for CmacVerification {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.stream.update(data);
        Ok(())
    }

    fn verify_mac(self: Box<Self>) -> Result<()> {
        let CmacVerification {
            stream,
            tag_size,
            expected,
        } = *self;
        if expected.len() != tag_size {
            return Err(LoomError::VerificationFailed);
        }
        let mut tag = stream.finalize();
        tag.truncate(tag_size);
        if tag.ct_eq(&expected).into() {
            Ok(())
        } else {
            Err(LoomError::VerificationFailed)
        }
    }
}

pub struct AesCmacKeyManager;

impl KeyManager for AesCmacKeyManager {
    fn key_type(&self) -> &'static str {
        TYPE_TAG
    }

    fn fips_status(&self) -> FipsStatus {
        FipsStatus::NotApproved
    }

    fn supports(&self, capability: TypeId) -> bool {
        capability == TypeId::of::<dyn Mac>() || capability == TypeId::of::<dyn ChunkedMac>()
    }

    fn new_key(
        &self,
        params: &dyn Parameters,
        id_requirement: Option<u32>,
    ) -> Result<Box<dyn Key>> {
        let params = downcast_params::<AesCmacParameters>(params)?;
        Ok(Box::new(AesCmacKey::generate(*params, id_requirement)?))
    }

    fn primitive(&self, key: &dyn Key, capability: TypeId) -> Result<AnyPrimitive> {
        let key = downcast_key::<AesCmacKey>(key)?;
        let primitive = CmacPrimitive {
            tag_size: key.params.tag_size(),
            key: key.material.clone(),
        };
        if capability == TypeId::of::<dyn Mac>() {
            Ok(AnyPrimitive::new::<dyn Mac>(Box::new(primitive)))
        } else if capability == TypeId::of::<dyn ChunkedMac>() {
            Ok(AnyPrimitive::new::<dyn ChunkedMac>(Box::new(primitive)))
        } else {
            Err(LoomError::Internal(
                "aes-cmac manager asked for an unsupported capability".into(),
            ))
        }
    }
}

fn parse_params(encoded: &EncodedParameters) -> Result<Box<dyn Parameters>> {
    let payload = encoded.payload();
    if payload.len() != PARAMS_PAYLOAD_LEN {
        return Err(LoomError::MalformedEncoding(format!(
            "aes-cmac parameters payload is {} bytes (expected {PARAMS_PAYLOAD_LEN})",
            payload.len()
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported aes-cmac parameters version: {}",
            payload[0]
        )));
    }
    let key_size = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]) as usize;
    let tag_size = u32::from_le_bytes([payload[5], payload[6], payload[7], payload[8]]) as usize;
    let params = AesCmacParameters::new(key_size, tag_size, encoded.output_prefix())?;
    Ok(Box::new(params))
}

fn serialize_params(params: &AesCmacParameters) -> Result<EncodedParameters> {
    let mut payload = Vec::with_capacity(PARAMS_PAYLOAD_LEN);
    payload.push(PAYLOAD_VERSION);
    payload.extend_from_slice(&(params.key_size as u32).to_le_bytes());
    payload.extend_from_slice(&(params.tag_size as u32).to_le_bytes());
    Ok(EncodedParameters::new(
        FORMAT_BINARY_V1,
        TYPE_TAG,
        params.prefix,
        payload,
    ))
}

fn parse_key(encoded: &EncodedKey, access: SecretAccess) -> Result<Box<dyn Key>> {
    let payload = encoded.payload().expose(access);
    if payload.len() < KEY_HEADER_LEN + 16 {
        return Err(LoomError::MalformedEncoding(format!(
            "aes-cmac key payload too short: {} bytes",
            payload.len()
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported aes-cmac key version: {}",
            payload[0]
        )));
    }
    let tag_size = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]) as usize;
    let material = &payload[KEY_HEADER_LEN..];
    let params = AesCmacParameters::new(material.len(), tag_size, encoded.output_prefix())?;
    let key = AesCmacKey::new(
        params,
        SecretBytes::new(material.to_vec(), access),
        encoded.id_requirement(),
    )?;
    Ok(Box::new(key))
}

fn serialize_key(key: &AesCmacKey, access: SecretAccess) -> Result<EncodedKey> {
    let mut payload = Vec::with_capacity(KEY_HEADER_LEN + key.material.len());
    payload.push(PAYLOAD_VERSION);
    payload.extend_from_slice(&(key.params.tag_size as u32).to_le_bytes());
    payload.extend_from_slice(key.material.expose(access));
    EncodedKey::new(
        FORMAT_BINARY_V1,
        TYPE_TAG,
        KeyMaterialKind::Symmetric,
        key.params.prefix,
        key.id,
        SecretBytes::new(payload, access),
    )
}

/// Registers the AES-CMAC manager and codecs. Idempotent.
pub fn register() -> Result<()> {
    registry::register_key_manager(AesCmacKeyManager)?;
    codecs::register_parameters_parser(FORMAT_BINARY_V1, TYPE_TAG, parse_params)?;
    codecs::register_parameters_serializer::<AesCmacParameters>(
        FORMAT_BINARY_V1,
        serialize_params,
    )?;
    codecs::register_key_parser(FORMAT_BINARY_V1, TYPE_TAG, parse_key)?;
    codecs::register_key_serializer::<AesCmacKey>(FORMAT_BINARY_V1, serialize_key)?;
    Ok(())
}
