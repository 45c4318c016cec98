/// HMAC: parameters, keys, the key manager, and the binary codecs.
///
/// Key payload format:
/// [version(1B) | hash(1B) | tag_size(4B LE) | key bytes]
/// Parameters payload format:
/// [version(1B) | hash(1B) | key_size(4B LE) | tag_size(4B LE)]
use std::any::{Any, TypeId};

use subtle::ConstantTimeEq;

use crate::error::{LoomError, Result};
use crate::fips::FipsStatus;
use crate::hash::{self, HashKind};
use crate::key::{downcast_key, downcast_params, AnyPrimitive, Key, Parameters};
use crate::mac::{ChunkedMac, ChunkedMacComputation, ChunkedMacVerification, Mac};
use crate::output_prefix::OutputPrefix;
use crate::registry::{self, KeyManager};
use crate::secret::{SecretAccess, SecretBytes};
use crate::serialization::{
    registry as codecs, EncodedKey, EncodedParameters, KeyMaterialKind, FORMAT_BINARY_V1,
};

pub const TYPE_TAG: &str = "keyloom/hmac";
pub const PAYLOAD_VERSION: u8 = 0x01;
pub const MIN_KEY_SIZE: usize = 16;
pub const MIN_TAG_SIZE: usize = 10;

const PARAMS_PAYLOAD_LEN: usize = 10;
const KEY_HEADER_LEN: usize = 6;

/// Validated HMAC configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HmacParameters {
    key_size: usize,
    tag_size: usize,
    hash: HashKind,
    prefix: OutputPrefix,
}

impl HmacParameters {
    pub fn new(
        key_size: usize,
        tag_size: usize,
        hash: HashKind,
        prefix: OutputPrefix,
    ) -> Result<Self> {
        if key_size < MIN_KEY_SIZE {
            return Err(LoomError::InvalidParameters(format!(
                "hmac key must be at least {MIN_KEY_SIZE} bytes, got {key_size}"
            )));
        }
        if tag_size < MIN_TAG_SIZE || tag_size > hash.digest_len() {
            return Err(LoomError::InvalidParameters(format!(
                "hmac tag size {tag_size} outside {MIN_TAG_SIZE}..={}",
                hash.digest_len()
            )));
        }
        Ok(HmacParameters {
            key_size,
            tag_size,
            hash,
            prefix,
        })
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn tag_size(&self) -> usize {
        self.tag_size
    }

    pub fn hash(&self) -> HashKind {
        self.hash
    }
}

impl Parameters for HmacParameters {
    fn output_prefix(&self) -> OutputPrefix {
        self.prefix
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_dyn(&self, other: &dyn Parameters) -> bool {
        other
            .as_any()
            .downcast_ref::<HmacParameters>()
            .is_some_and(|other| self == other)
    }
}

/// An HMAC key: validated parameters plus the raw key material.
pub struct HmacKey {
    params: HmacParameters,
    material: SecretBytes,
    id: Option<u32>,
}

impl HmacKey {
    pub fn new(params: HmacParameters, material: SecretBytes, id: Option<u32>) -> Result<Self> {
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
        Ok(HmacKey {
            params,
            material,
            id,
        })
    }

    /// Draws fresh key material for the given parameters.
    pub fn generate(params: HmacParameters, id: Option<u32>) -> Result<Self> {
        let material = SecretBytes::generate(params.key_size());
        HmacKey::new(params, material, id)
    }

    pub fn material(&self) -> &SecretBytes {
        &self.material
    }
}

impl Key for HmacKey {
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
        other.as_any().downcast_ref::<HmacKey>().is_some_and(|other| {
            self.params == other.params && self.material == other.material && self.id == other.id
        })
    }
}

/// Live HMAC primitive with a truncated tag, serving both the one-shot and
/// the chunked capability.
struct HmacPrimitive {
    hash: HashKind,
    tag_size: usize,
    key: SecretBytes,
}

impl HmacPrimitive {
    fn stream(&self) -> Result<hash::HmacStream> {
        hash::HmacStream::new(self.hash, self.key.expose(SecretAccess::insecure()))
    }
}

impl Mac for HmacPrimitive {
    fn compute_mac(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut tag = hash::hmac_tag(self.hash, self.key.expose(SecretAccess::insecure()), data)?;
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

impl ChunkedMac for HmacPrimitive {
    fn create_computation(&self) -> Result<Box<dyn ChunkedMacComputation>> {
        Ok(Box::new(HmacComputation {
            stream: self.stream()?,
            tag_size: self.tag_size,
        }))
    }

    fn create_verification(&self, tag: &[u8]) -> Result<Box<dyn ChunkedMacVerification>> {
        Ok(Box::new(HmacVerification {
            stream: self.stream()?,
            tag_size: self.tag_size,
            expected: tag.to_vec(),
        }))
    }
}

struct HmacComputation {
    stream: hash::HmacStream,
    tag_size: usize,
}

impl ChunkedMacComputation for HmacComputation {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.stream.update(data);
        Ok(())
    }

    fn compute_mac(self: Box<Self>) -> Result<Vec<u8>> {
        let HmacComputation { stream, tag_size } = *self;
        let mut tag = stream.finalize();
        tag.truncate(tag_size);
        Ok(tag)
    }
}

struct HmacVerification {
    stream: hash::HmacStream,
    tag_size: usize,
    expected: Vec<u8>,
}

impl ChunkedMacVerification for HmacVerification {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.stream.update(data);
        Ok(())
    }

    fn verify_mac(self: Box<Self>) -> Result<()> {
        let HmacVerification {
            stream,
            tag_size,
            expected,
        } = *self;
        // Length settles here, not at creation, so one mismatched candidate
        // cannot abort a whole fan-out.
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

pub struct HmacKeyManager;

impl KeyManager for HmacKeyManager {
    fn key_type(&self) -> &'static str {
        TYPE_TAG
    }

    fn fips_status(&self) -> FipsStatus {
        FipsStatus::Approved
    }

    fn supports(&self, capability: TypeId) -> bool {
        capability == TypeId::of::<dyn Mac>() || capability == TypeId::of::<dyn ChunkedMac>()
    }

    fn new_key(
        &self,
        params: &dyn Parameters,
        id_requirement: Option<u32>,
    ) -> Result<Box<dyn Key>> {
        let params = downcast_params::<HmacParameters>(params)?;
        Ok(Box::new(HmacKey::generate(*params, id_requirement)?))
    }

    fn primitive(&self, key: &dyn Key, capability: TypeId) -> Result<AnyPrimitive> {
        let key = downcast_key::<HmacKey>(key)?;
        let primitive = HmacPrimitive {
            hash: key.params.hash(),
            tag_size: key.params.tag_size(),
            key: key.material.clone(),
        };
        if capability == TypeId::of::<dyn Mac>() {
            Ok(AnyPrimitive::new::<dyn Mac>(Box::new(primitive)))
        } else if capability == TypeId::of::<dyn ChunkedMac>() {
            Ok(AnyPrimitive::new::<dyn ChunkedMac>(Box::new(primitive)))
        } else {
            Err(LoomError::Internal(
                "hmac manager asked for an unsupported capability".into(),
            ))
        }
    }
}

fn parse_params(encoded: &EncodedParameters) -> Result<Box<dyn Parameters>> {
    let payload = encoded.payload();
    if payload.len() != PARAMS_PAYLOAD_LEN {
        return Err(LoomError::MalformedEncoding(format!(
            "hmac parameters payload is {} bytes (expected {PARAMS_PAYLOAD_LEN})",
            payload.len()
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported hmac parameters version: {}",
            payload[0]
        )));
    }
    let hash = HashKind::from_wire(payload[1])?;
    let key_size = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]) as usize;
    let tag_size = u32::from_le_bytes([payload[6], payload[7], payload[8], payload[9]]) as usize;
    let params = HmacParameters::new(key_size, tag_size, hash, encoded.output_prefix())?;
    Ok(Box::new(params))
}

fn serialize_params(params: &HmacParameters) -> Result<EncodedParameters> {
    let mut payload = Vec::with_capacity(PARAMS_PAYLOAD_LEN);
    payload.push(PAYLOAD_VERSION);
    payload.push(params.hash.to_wire());
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
    if payload.len() < KEY_HEADER_LEN + MIN_KEY_SIZE {
        return Err(LoomError::MalformedEncoding(format!(
            "hmac key payload too short: {} bytes",
            payload.len()
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported hmac key version: {}",
            payload[0]
        )));
    }
    let hash = HashKind::from_wire(payload[1])?;
    let tag_size = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]) as usize;
    let material = &payload[KEY_HEADER_LEN..];
    let params = HmacParameters::new(material.len(), tag_size, hash, encoded.output_prefix())?;
    let key = HmacKey::new(
        params,
        SecretBytes::new(material.to_vec(), access),
        encoded.id_requirement(),
    )?;
    Ok(Box::new(key))
}

fn serialize_key(key: &HmacKey, access: SecretAccess) -> Result<EncodedKey> {
    let mut payload = Vec::with_capacity(KEY_HEADER_LEN + key.material.len());
    payload.push(PAYLOAD_VERSION);
    payload.push(key.params.hash.to_wire());
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

/// Registers the HMAC manager and codecs. Idempotent.
pub fn register() -> Result<()> {
    registry::register_key_manager(HmacKeyManager)?;
    codecs::register_parameters_parser(FORMAT_BINARY_V1, TYPE_TAG, parse_params)?;
    codecs::register_parameters_serializer::<HmacParameters>(FORMAT_BINARY_V1, serialize_params)?;
    codecs::register_key_parser(FORMAT_BINARY_V1, TYPE_TAG, parse_key)?;
    codecs::register_key_serializer::<HmacKey>(FORMAT_BINARY_V1, serialize_key)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn key_from(material: &[u8], tag_size: usize, hash: HashKind) -> HmacKey {
        let access = SecretAccess::insecure();
        let params = HmacParameters::new(material.len(), tag_size, hash, OutputPrefix::Raw).unwrap();
        HmacKey::new(params, SecretBytes::new(material.to_vec(), access), None).unwrap()
    }

    fn mac_for(key: &HmacKey) -> Box<dyn Mac> {
        HmacKeyManager
            .primitive(key, TypeId::of::<dyn Mac>())
            .unwrap()
            .downcast::<dyn Mac>()
            .unwrap()
    }

    fn chunked_for(key: &HmacKey) -> Box<dyn ChunkedMac> {
        HmacKeyManager
            .primitive(key, TypeId::of::<dyn ChunkedMac>())
            .unwrap()
            .downcast::<dyn ChunkedMac>()
            .unwrap()
    }

    #[test]
    fn test_parameter_validation() {
        assert!(HmacParameters::new(8, 16, HashKind::Sha256, OutputPrefix::Raw).is_err());
        assert!(HmacParameters::new(32, 8, HashKind::Sha256, OutputPrefix::Raw).is_err());
        assert!(HmacParameters::new(32, 33, HashKind::Sha256, OutputPrefix::Raw).is_err());
        assert!(HmacParameters::new(32, 64, HashKind::Sha512, OutputPrefix::Raw).is_ok());
    }

    #[test]
    fn test_key_material_must_match_parameters() {
        let access = SecretAccess::insecure();
        let params = HmacParameters::new(32, 16, HashKind::Sha256, OutputPrefix::Raw).unwrap();
        let err = HmacKey::new(params, SecretBytes::new(vec![0; 16], access), None)
            .err()
            .expect("expected an error");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);

        // Framed parameters demand an id, raw parameters forbid one.
        let framed =
            HmacParameters::new(32, 16, HashKind::Sha256, OutputPrefix::Standard).unwrap();
        assert!(HmacKey::new(framed, SecretBytes::new(vec![0; 32], access), None).is_err());
        assert!(HmacKey::new(params, SecretBytes::new(vec![0; 32], access), Some(1)).is_err());
    }

    // RFC 4231, test case 1.
    #[test]
    fn test_hmac_sha256_known_answer() {
        let key = key_from(&[0x0b; 20], 32, HashKind::Sha256);
        let mac = mac_for(&key);
        let tag = mac.compute_mac(b"Hi There").unwrap();
        assert_eq!(
            tag,
            hex!("b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7")
        );
        mac.verify_mac(&tag, b"Hi There").unwrap();
    }

    // RFC 4231, test case 1, SHA-512.
    #[test]
    fn test_hmac_sha512_known_answer() {
        let key = key_from(&[0x0b; 20], 64, HashKind::Sha512);
        let mac = mac_for(&key);
        let tag = mac.compute_mac(b"Hi There").unwrap();
        assert_eq!(
            tag,
            hex!(
                "87aa7cdea5ef619d4ff0b4241a1d6cb0"
                "2379f4e2ce4ec2787ad0b30545e17cde"
                "daa833b7d6b8a702038b274eaea3f4e4"
                "be9d914eeb61f1702e696c203a126854"
            )
        );
    }

    #[test]
    fn test_truncated_tags_are_honored_and_checked() {
        let key = key_from(&[0x0b; 20], 16, HashKind::Sha256);
        let mac = mac_for(&key);
        let tag = mac.compute_mac(b"Hi There").unwrap();
        assert_eq!(tag.len(), 16);
        mac.verify_mac(&tag, b"Hi There").unwrap();

        // A full-length tag no longer verifies against a truncating key.
        let full = hex!("b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7");
        let err = mac.verify_mac(&full, b"Hi There").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_verification_failures_are_uniform() {
        let key = key_from(&[0x0b; 20], 32, HashKind::Sha256);
        let mac = mac_for(&key);
        let tag = mac.compute_mac(b"Hi There").unwrap();

        let wrong_data = mac.verify_mac(&tag, b"Hi Where").unwrap_err();
        let mut flipped = tag.clone();
        flipped[0] ^= 1;
        let wrong_tag = mac.verify_mac(&flipped, b"Hi There").unwrap_err();
        assert_eq!(wrong_data.to_string(), wrong_tag.to_string());
    }

    // RFC 4231, test case 1, fed in pieces.
    #[test]
    fn test_chunked_computation_matches_the_one_shot_tag() {
        let key = key_from(&[0x0b; 20], 32, HashKind::Sha256);
        let chunked = chunked_for(&key);

        let mut computation = chunked.create_computation().unwrap();
        computation.update(b"Hi ").unwrap();
        computation.update(b"").unwrap();
        computation.update(b"There").unwrap();
        let tag = computation.compute_mac().unwrap();
        assert_eq!(
            tag,
            hex!("b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7")
        );

        let mut verification = chunked.create_verification(&tag).unwrap();
        verification.update(b"Hi There").unwrap();
        verification.verify_mac().unwrap();
    }

    #[test]
    fn test_chunked_verification_checks_data_and_length() {
        let key = key_from(&[0x0b; 20], 16, HashKind::Sha256);
        let chunked = chunked_for(&key);

        let mut computation = chunked.create_computation().unwrap();
        computation.update(b"Hi There").unwrap();
        let tag = computation.compute_mac().unwrap();
        assert_eq!(tag.len(), 16);

        let mut verification = chunked.create_verification(&tag).unwrap();
        verification.update(b"Hi Where").unwrap();
        assert!(verification.verify_mac().is_err());

        // A full-length tag no longer settles against a truncating key.
        let full = hex!("b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7");
        let mut verification = chunked.create_verification(&full).unwrap();
        verification.update(b"Hi There").unwrap();
        let err = verification.verify_mac().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_one_key_serves_both_capabilities() {
        let key = key_from(&[0x0b; 20], 32, HashKind::Sha256);
        let tag = mac_for(&key).compute_mac(b"interop").unwrap();

        let mut verification = chunked_for(&key).create_verification(&tag).unwrap();
        verification.update(b"interop").unwrap();
        verification.verify_mac().unwrap();
    }

    #[test]
    fn test_manager_rejects_foreign_keys() {
        let err = HmacKeyManager
            .primitive(
                &super::super::aes_cmac::tests_support::sample_key(),
                TypeId::of::<dyn Mac>(),
            )
            .err()
            .expect("expected an error");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_key_codec_round_trip() {
        let access = SecretAccess::insecure();
        let params =
            HmacParameters::new(32, 16, HashKind::Sha256, OutputPrefix::Standard).unwrap();
        let key = HmacKey::generate(params, Some(123)).unwrap();

        let encoded = serialize_key(&key, access).unwrap();
        assert_eq!(encoded.type_tag(), TYPE_TAG);
        assert_eq!(encoded.id_requirement(), Some(123));
        assert_eq!(encoded.output_prefix(), OutputPrefix::Standard);

        let parsed = parse_key(&encoded, access).unwrap();
        assert!(parsed.eq_dyn(&key));
    }

    #[test]
    fn test_params_codec_round_trip_and_version_gate() {
        let params = HmacParameters::new(32, 16, HashKind::Sha256, OutputPrefix::Legacy).unwrap();
        let encoded = serialize_params(&params).unwrap();
        let parsed = parse_params(&encoded).unwrap();
        assert!(parsed.eq_dyn(&params));

        let mut bad = encoded.payload().to_vec();
        bad[0] = 0x7F;
        let bad_encoded =
            EncodedParameters::new(FORMAT_BINARY_V1, TYPE_TAG, OutputPrefix::Legacy, bad);
        assert!(parse_params(&bad_encoded).is_err());
    }
}
