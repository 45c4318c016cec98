/// Ed25519: parameters, private and public keys, the two key managers,
/// and the binary codecs.
///
/// The private key stores the 32-byte seed; the verification key is
/// derived from it on demand. Signing is deterministic per RFC 8032.
///
/// Private key payload format:
/// [version(1B) | seed(32B)]
/// Public key payload format:
/// [version(1B) | public key(32B)]
use std::any::{Any, TypeId};

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use zeroize::Zeroize;

use crate::error::{LoomError, Result};
use crate::fips::FipsStatus;
use crate::key::{downcast_key, downcast_params, AnyPrimitive, Key, Parameters};
use crate::output_prefix::OutputPrefix;
use crate::registry::{self, KeyManager};
use crate::secret::{SecretAccess, SecretBytes};
use crate::serialization::{
    registry as codecs, EncodedKey, EncodedParameters, KeyMaterialKind, FORMAT_BINARY_V1,
};
use crate::signature::{Signer, Verifier};

pub const PRIVATE_TYPE_TAG: &str = "keyloom/ed25519";
pub const PUBLIC_TYPE_TAG: &str = "keyloom/ed25519-pub";
pub const PAYLOAD_VERSION: u8 = 0x01;
pub const SEED_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Ed25519 has no tunable sizes; the parameters carry only the framing
/// variant. Private keys and their derived public keys share one
/// parameters value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Parameters {
    prefix: OutputPrefix,
}

impl Ed25519Parameters {
    pub fn new(prefix: OutputPrefix) -> Self {
        Ed25519Parameters { prefix }
    }
}

impl Parameters for Ed25519Parameters {
    fn output_prefix(&self) -> OutputPrefix {
        self.prefix
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_dyn(&self, other: &dyn Parameters) -> bool {
        other
            .as_any()
            .downcast_ref::<Ed25519Parameters>()
            .is_some_and(|other| self == other)
    }
}

pub struct Ed25519PrivateKey {
    params: Ed25519Parameters,
    seed: SecretBytes,
    id: Option<u32>,
}

impl Ed25519PrivateKey {
    pub fn new(params: Ed25519Parameters, seed: SecretBytes, id: Option<u32>) -> Result<Self> {
        if seed.len() != SEED_LEN {
            return Err(LoomError::InvalidKey(format!(
                "seed is {} bytes, ed25519 demands {SEED_LEN}",
                seed.len()
            )));
        }
        if params.has_id_requirement() != id.is_some() {
            return Err(LoomError::InvalidKey(
                "key id requirement does not match the output-prefix variant".into(),
            ));
        }
        Ok(Ed25519PrivateKey { params, seed, id })
    }

    pub fn generate(params: Ed25519Parameters, id: Option<u32>) -> Result<Self> {
        Ed25519PrivateKey::new(params, SecretBytes::generate(SEED_LEN), id)
    }

    /// Derives the verification key. It carries the same parameters and id
    /// requirement, so both halves frame their outputs identically.
    pub fn public_key(&self) -> Result<Ed25519PublicKey> {
        let signing = self.signing_key()?;
        Ed25519PublicKey::new(self.params, signing.verifying_key().to_bytes(), self.id)
    }

    fn signing_key(&self) -> Result<SigningKey> {
        let mut seed = <[u8; SEED_LEN]>::try_from(self.seed.expose(SecretAccess::insecure()))
            .map_err(|_| LoomError::InvalidKey("ed25519 seed is not 32 bytes".into()))?;
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(key)
    }
}

impl Key for Ed25519PrivateKey {
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
            .downcast_ref::<Ed25519PrivateKey>()
            .is_some_and(|other| {
                self.params == other.params && self.seed == other.seed && self.id == other.id
            })
    }
}

pub struct Ed25519PublicKey {
    params: Ed25519Parameters,
    material: [u8; PUBLIC_KEY_LEN],
    id: Option<u32>,
}

impl Ed25519PublicKey {
    /// Rejects encodings that do not decode to a curve point.
    pub fn new(
        params: Ed25519Parameters,
        material: [u8; PUBLIC_KEY_LEN],
        id: Option<u32>,
    ) -> Result<Self> {
        VerifyingKey::from_bytes(&material)
            .map_err(|e| LoomError::InvalidKey(format!("ed25519 public key: {e}")))?;
        if params.has_id_requirement() != id.is_some() {
            return Err(LoomError::InvalidKey(
                "key id requirement does not match the output-prefix variant".into(),
            ));
        }
        Ok(Ed25519PublicKey {
            params,
            material,
            id,
        })
    }

    pub fn material(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.material
    }
}

impl Key for Ed25519PublicKey {
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
            .downcast_ref::<Ed25519PublicKey>()
            .is_some_and(|other| {
                self.params == other.params
                    && self.material == other.material
                    && self.id == other.id
            })
    }
}

struct Ed25519SignerPrimitive {
    key: SigningKey,
}

impl Signer for Ed25519SignerPrimitive {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(data).to_bytes().to_vec())
    }
}

struct Ed25519VerifierPrimitive {
    key: VerifyingKey,
}

impl Verifier for Ed25519VerifierPrimitive {
    fn verify(&self, signature: &[u8], data: &[u8]) -> Result<()> {
        let signature =
            Signature::try_from(signature).map_err(|_| LoomError::VerificationFailed)?;
        self.key
            .verify(data, &signature)
            .map_err(|_| LoomError::VerificationFailed)
    }
}

pub struct Ed25519PrivateKeyManager;

impl KeyManager for Ed25519PrivateKeyManager {
    fn key_type(&self) -> &'static str {
        PRIVATE_TYPE_TAG
    }

    fn fips_status(&self) -> FipsStatus {
        FipsStatus::Approved
    }

    fn supports(&self, capability: TypeId) -> bool {
        capability == TypeId::of::<dyn Signer>()
    }

    fn new_key(
        &self,
        params: &dyn Parameters,
        id_requirement: Option<u32>,
    ) -> Result<Box<dyn Key>> {
        let params = downcast_params::<Ed25519Parameters>(params)?;
        Ok(Box::new(Ed25519PrivateKey::generate(
            *params,
            id_requirement,
        )?))
    }

    fn primitive(&self, key: &dyn Key, capability: TypeId) -> Result<AnyPrimitive> {
        let key = downcast_key::<Ed25519PrivateKey>(key)?;
        if capability != TypeId::of::<dyn Signer>() {
            return Err(LoomError::Internal(
                "ed25519 private manager asked for an unsupported capability".into(),
            ));
        }
        Ok(AnyPrimitive::new::<dyn Signer>(Box::new(
            Ed25519SignerPrimitive {
                key: key.signing_key()?,
            },
        )))
    }
}

pub struct Ed25519PublicKeyManager;

impl KeyManager for Ed25519PublicKeyManager {
    fn key_type(&self) -> &'static str {
        PUBLIC_TYPE_TAG
    }

    fn fips_status(&self) -> FipsStatus {
        FipsStatus::Approved
    }

    fn supports(&self, capability: TypeId) -> bool {
        capability == TypeId::of::<dyn Verifier>()
    }

    fn new_key(
        &self,
        _params: &dyn Parameters,
        _id_requirement: Option<u32>,
    ) -> Result<Box<dyn Key>> {
        Err(LoomError::InvalidParameters(
            "ed25519 public keys are derived from a private key, not generated".into(),
        ))
    }

    fn primitive(&self, key: &dyn Key, capability: TypeId) -> Result<AnyPrimitive> {
        let key = downcast_key::<Ed25519PublicKey>(key)?;
        if capability != TypeId::of::<dyn Verifier>() {
            return Err(LoomError::Internal(
                "ed25519 public manager asked for an unsupported capability".into(),
            ));
        }
        let verifying = VerifyingKey::from_bytes(&key.material)
            .map_err(|e| LoomError::InvalidKey(format!("ed25519 public key: {e}")))?;
        Ok(AnyPrimitive::new::<dyn Verifier>(Box::new(
            Ed25519VerifierPrimitive { key: verifying },
        )))
    }
}

fn parse_params(encoded: &EncodedParameters) -> Result<Box<dyn Parameters>> {
    let payload = encoded.payload();
    if payload.len() != 1 {
        return Err(LoomError::MalformedEncoding(format!(
            "ed25519 parameters payload is {} bytes (expected 1)",
            payload.len()
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported ed25519 parameters version: {}",
            payload[0]
        )));
    }
    Ok(Box::new(Ed25519Parameters::new(encoded.output_prefix())))
}

fn serialize_params(params: &Ed25519Parameters) -> Result<EncodedParameters> {
    Ok(EncodedParameters::new(
        FORMAT_BINARY_V1,
        PRIVATE_TYPE_TAG,
        params.prefix,
        vec![PAYLOAD_VERSION],
    ))
}

fn parse_private_key(encoded: &EncodedKey, access: SecretAccess) -> Result<Box<dyn Key>> {
    let payload = encoded.payload().expose(access);
    if payload.len() != 1 + SEED_LEN {
        return Err(LoomError::MalformedEncoding(format!(
            "ed25519 private key payload is {} bytes (expected {})",
            payload.len(),
            1 + SEED_LEN
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported ed25519 private key version: {}",
            payload[0]
        )));
    }
    let key = Ed25519PrivateKey::new(
        Ed25519Parameters::new(encoded.output_prefix()),
        SecretBytes::new(payload[1..].to_vec(), access),
        encoded.id_requirement(),
    )?;
    Ok(Box::new(key))
}

fn serialize_private_key(key: &Ed25519PrivateKey, access: SecretAccess) -> Result<EncodedKey> {
    let mut payload = Vec::with_capacity(1 + SEED_LEN);
    payload.push(PAYLOAD_VERSION);
    payload.extend_from_slice(key.seed.expose(access));
    EncodedKey::new(
        FORMAT_BINARY_V1,
        PRIVATE_TYPE_TAG,
        KeyMaterialKind::AsymmetricPrivate,
        key.params.prefix,
        key.id,
        SecretBytes::new(payload, access),
    )
}

fn parse_public_key(encoded: &EncodedKey, access: SecretAccess) -> Result<Box<dyn Key>> {
    let payload = encoded.payload().expose(access);
    if payload.len() != 1 + PUBLIC_KEY_LEN {
        return Err(LoomError::MalformedEncoding(format!(
            "ed25519 public key payload is {} bytes (expected {})",
            payload.len(),
            1 + PUBLIC_KEY_LEN
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported ed25519 public key version: {}",
            payload[0]
        )));
    }
    let material = <[u8; PUBLIC_KEY_LEN]>::try_from(&payload[1..])
        .map_err(|_| LoomError::MalformedEncoding("ed25519 public key length".into()))?;
    let key = Ed25519PublicKey::new(
        Ed25519Parameters::new(encoded.output_prefix()),
        material,
        encoded.id_requirement(),
    )?;
    Ok(Box::new(key))
}

fn serialize_public_key(key: &Ed25519PublicKey, access: SecretAccess) -> Result<EncodedKey> {
    let mut payload = Vec::with_capacity(1 + PUBLIC_KEY_LEN);
    payload.push(PAYLOAD_VERSION);
    payload.extend_from_slice(&key.material);
    EncodedKey::new(
        FORMAT_BINARY_V1,
        PUBLIC_TYPE_TAG,
        KeyMaterialKind::AsymmetricPublic,
        key.params.prefix,
        key.id,
        SecretBytes::new(payload, access),
    )
}

/// Registers both Ed25519 managers and all codecs. Idempotent.
pub fn register() -> Result<()> {
    registry::register_key_manager(Ed25519PrivateKeyManager)?;
    registry::register_key_manager(Ed25519PublicKeyManager)?;
    codecs::register_parameters_parser(FORMAT_BINARY_V1, PRIVATE_TYPE_TAG, parse_params)?;
    codecs::register_parameters_serializer::<Ed25519Parameters>(
        FORMAT_BINARY_V1,
        serialize_params,
    )?;
    codecs::register_key_parser(FORMAT_BINARY_V1, PRIVATE_TYPE_TAG, parse_private_key)?;
    codecs::register_key_serializer::<Ed25519PrivateKey>(FORMAT_BINARY_V1, serialize_private_key)?;
    codecs::register_key_parser(FORMAT_BINARY_V1, PUBLIC_TYPE_TAG, parse_public_key)?;
    codecs::register_key_serializer::<Ed25519PublicKey>(FORMAT_BINARY_V1, serialize_public_key)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testutil;
    use hex_literal::hex;

    fn signer_for(key: &Ed25519PrivateKey) -> Box<dyn Signer> {
        Ed25519PrivateKeyManager
            .primitive(key, TypeId::of::<dyn Signer>())
            .unwrap()
            .downcast::<dyn Signer>()
            .unwrap()
    }

    fn verifier_for(key: &Ed25519PublicKey) -> Box<dyn Verifier> {
        Ed25519PublicKeyManager
            .primitive(key, TypeId::of::<dyn Verifier>())
            .unwrap()
            .downcast::<dyn Verifier>()
            .unwrap()
    }

    fn private_from_seed(seed: [u8; SEED_LEN]) -> Ed25519PrivateKey {
        Ed25519PrivateKey::new(
            Ed25519Parameters::new(OutputPrefix::Raw),
            SecretBytes::new(seed.to_vec(), SecretAccess::insecure()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let private =
            Ed25519PrivateKey::generate(Ed25519Parameters::new(OutputPrefix::Raw), None).unwrap();
        let signer = signer_for(&private);
        let verifier = verifier_for(&private.public_key().unwrap());

        let signature = signer.sign(b"message").unwrap();
        assert_eq!(signature.len(), SIGNATURE_LEN);
        verifier.verify(&signature, b"message").unwrap();
        assert!(verifier.verify(&signature, b"other").is_err());
    }

    // RFC 8032, section 7.1, tests 1 and 2.
    #[test]
    fn test_rfc8032_known_answers() {
        let private = private_from_seed(hex!(
            "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60"
        ));
        let public = private.public_key().unwrap();
        assert_eq!(
            public.material(),
            &hex!("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
        );
        let signature = signer_for(&private).sign(b"").unwrap();
        assert_eq!(
            signature,
            hex!(
                "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e06522490155
                 5fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b"
            )
        );
        verifier_for(&public).verify(&signature, b"").unwrap();

        let private = private_from_seed(hex!(
            "4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb"
        ));
        let signature = signer_for(&private).sign(&[0x72]).unwrap();
        assert_eq!(
            signature,
            hex!(
                "92a009a9f0d4cab8720e820b5f642540a2b27b5416503f8fb3762223ebdb69da
                 085ac1e43e15996e458f3613d0f11d8c387b2eaeb4302aeeb00d291612bb0c00"
            )
        );
    }

    #[test]
    fn test_tampered_and_truncated_signatures_fail_uniformly() {
        let private =
            Ed25519PrivateKey::generate(Ed25519Parameters::new(OutputPrefix::Raw), None).unwrap();
        let verifier = verifier_for(&private.public_key().unwrap());
        let mut signature = signer_for(&private).sign(b"data").unwrap();

        signature[10] ^= 0x01;
        let tampered = verifier.verify(&signature, b"data").unwrap_err();
        let truncated = verifier.verify(&signature[..40], b"data").unwrap_err();
        assert_eq!(tampered.to_string(), "verification failed");
        assert_eq!(truncated.to_string(), tampered.to_string());
    }

    #[test]
    fn test_seed_length_is_enforced() {
        let err = Ed25519PrivateKey::new(
            Ed25519Parameters::new(OutputPrefix::Raw),
            SecretBytes::generate(16),
            None,
        )
        .err()
        .expect("expected an error");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_public_key_manager_never_generates() {
        let err = Ed25519PublicKeyManager
            .new_key(&Ed25519Parameters::new(OutputPrefix::Raw), None)
            .err()
            .expect("expected an error");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_cross_capability_lookups_are_refused() {
        let _guard = testutil::registry_lock();
        registry::reset();
        crate::serialization::registry::reset();
        crate::fips::clear_fips_restriction();
        register().unwrap();

        let err = registry::key_manager::<dyn Verifier>(PRIVATE_TYPE_TAG)
            .err()
            .expect("expected an error");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = registry::key_manager::<dyn Signer>(PUBLIC_TYPE_TAG)
            .err()
            .expect("expected an error");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_public_encodings_need_no_token() {
        let _guard = testutil::registry_lock();
        registry::reset();
        crate::serialization::registry::reset();
        crate::fips::clear_fips_restriction();
        register().unwrap();

        let private =
            Ed25519PrivateKey::generate(Ed25519Parameters::new(OutputPrefix::Standard), Some(7))
                .unwrap();
        let public = private.public_key().unwrap();

        // Public half: serializes and parses without a token.
        let encoded = codecs::serialize_key(&public, FORMAT_BINARY_V1, None).unwrap();
        let parsed = codecs::parse_key(&encoded, None).unwrap();
        assert!(parsed.eq_dyn(&public));

        // Private half: both directions demand the token.
        let err = codecs::serialize_key(&private, FORMAT_BINARY_V1, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let encoded = codecs::serialize_key(
            &private,
            FORMAT_BINARY_V1,
            Some(SecretAccess::insecure()),
        )
        .unwrap();
        let err = codecs::parse_key(&encoded, None)
            .err()
            .expect("expected an error");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_private_key_codec_round_trip() {
        let access = SecretAccess::insecure();
        let key =
            Ed25519PrivateKey::generate(Ed25519Parameters::new(OutputPrefix::Legacy), Some(40))
                .unwrap();
        let encoded = serialize_private_key(&key, access).unwrap();
        assert_eq!(encoded.material(), KeyMaterialKind::AsymmetricPrivate);
        let parsed = parse_private_key(&encoded, access).unwrap();
        assert!(parsed.eq_dyn(&key));
    }

    #[test]
    fn test_params_codec_round_trip() {
        let params = Ed25519Parameters::new(OutputPrefix::Standard);
        let encoded = serialize_params(&params).unwrap();
        let parsed = parse_params(&encoded).unwrap();
        assert!(parsed.eq_dyn(&params));
    }
}
