/// XChaCha20-Poly1305: parameters, keys, the key manager, and the binary
/// codecs.
///
/// Each encryption draws a fresh random nonce and prepends it to the
/// ciphertext. The 24-byte nonce of XChaCha20 is large enough for random
/// generation without practical collision risk.
///
/// Key payload format:
/// [version(1B) | key bytes(32B)]
/// Parameters payload format:
/// [version(1B)]
use std::any::{Any, TypeId};

use chacha20poly1305::{
    aead::{Aead as _, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::aead::Aead;
use crate::error::{LoomError, Result};
use crate::fips::FipsStatus;
use crate::key::{downcast_key, downcast_params, AnyPrimitive, Key, Parameters};
use crate::output_prefix::OutputPrefix;
use crate::registry::{self, KeyManager};
use crate::secret::{SecretAccess, SecretBytes};
use crate::serialization::{
    registry as codecs, EncodedKey, EncodedParameters, KeyMaterialKind, FORMAT_BINARY_V1,
};

pub const TYPE_TAG: &str = "keyloom/xchacha20-poly1305";
pub const PAYLOAD_VERSION: u8 = 0x01;
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// XChaCha20-Poly1305 has no tunable sizes; the parameters carry only the
/// framing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XChaCha20Poly1305Parameters {
    prefix: OutputPrefix,
}

impl XChaCha20Poly1305Parameters {
    pub fn new(prefix: OutputPrefix) -> Self {
        XChaCha20Poly1305Parameters { prefix }
    }
}

impl Parameters for XChaCha20Poly1305Parameters {
    fn output_prefix(&self) -> OutputPrefix {
        self.prefix
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_dyn(&self, other: &dyn Parameters) -> bool {
        other
            .as_any()
            .downcast_ref::<XChaCha20Poly1305Parameters>()
            .is_some_and(|other| self == other)
    }
}

pub struct XChaCha20Poly1305Key {
    params: XChaCha20Poly1305Parameters,
    material: SecretBytes,
    id: Option<u32>,
}

impl XChaCha20Poly1305Key {
    pub fn new(
        params: XChaCha20Poly1305Parameters,
        material: SecretBytes,
        id: Option<u32>,
    ) -> Result<Self> {
        if material.len() != KEY_LEN {
            return Err(LoomError::InvalidKey(format!(
                "material is {} bytes, xchacha20-poly1305 demands {KEY_LEN}",
                material.len()
            )));
        }
        if params.has_id_requirement() != id.is_some() {
            return Err(LoomError::InvalidKey(
                "key id requirement does not match the output-prefix variant".into(),
            ));
        }
        Ok(XChaCha20Poly1305Key {
            params,
            material,
            id,
        })
    }

    pub fn generate(params: XChaCha20Poly1305Parameters, id: Option<u32>) -> Result<Self> {
        XChaCha20Poly1305Key::new(params, SecretBytes::generate(KEY_LEN), id)
    }

    pub fn material(&self) -> &SecretBytes {
        &self.material
    }
}

impl Key for XChaCha20Poly1305Key {
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
            .downcast_ref::<XChaCha20Poly1305Key>()
            .is_some_and(|other| {
                self.params == other.params
                    && self.material == other.material
                    && self.id == other.id
            })
    }
}

struct XChaChaPrimitive {
    key: SecretBytes,
}

impl XChaChaPrimitive {
    fn cipher(&self) -> Result<XChaCha20Poly1305> {
        XChaCha20Poly1305::new_from_slice(self.key.expose(SecretAccess::insecure()))
            .map_err(|e| LoomError::InvalidKey(e.to_string()))
    }
}

impl Aead for XChaChaPrimitive {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| LoomError::Internal(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(LoomError::VerificationFailed);
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let cipher = self.cipher()?;
        cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|_| LoomError::VerificationFailed)
    }
}

pub struct XChaCha20Poly1305KeyManager;

impl KeyManager for XChaCha20Poly1305KeyManager {
    fn key_type(&self) -> &'static str {
        TYPE_TAG
    }

    fn fips_status(&self) -> FipsStatus {
        FipsStatus::NotApproved
    }

    fn supports(&self, capability: TypeId) -> bool {
        capability == TypeId::of::<dyn Aead>()
    }

    fn new_key(
        &self,
        params: &dyn Parameters,
        id_requirement: Option<u32>,
    ) -> Result<Box<dyn Key>> {
        let params = downcast_params::<XChaCha20Poly1305Parameters>(params)?;
        Ok(Box::new(XChaCha20Poly1305Key::generate(
            *params,
            id_requirement,
        )?))
    }

    fn primitive(&self, key: &dyn Key, capability: TypeId) -> Result<AnyPrimitive> {
        let key = downcast_key::<XChaCha20Poly1305Key>(key)?;
        if capability != TypeId::of::<dyn Aead>() {
            return Err(LoomError::Internal(
                "xchacha20-poly1305 manager asked for an unsupported capability".into(),
            ));
        }
        Ok(AnyPrimitive::new::<dyn Aead>(Box::new(XChaChaPrimitive {
            key: key.material.clone(),
        })))
    }
}

fn parse_params(encoded: &EncodedParameters) -> Result<Box<dyn Parameters>> {
    let payload = encoded.payload();
    if payload.len() != 1 {
        return Err(LoomError::MalformedEncoding(format!(
            "xchacha20-poly1305 parameters payload is {} bytes (expected 1)",
            payload.len()
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported xchacha20-poly1305 parameters version: {}",
            payload[0]
        )));
    }
    Ok(Box::new(XChaCha20Poly1305Parameters::new(
        encoded.output_prefix(),
    )))
}

fn serialize_params(params: &XChaCha20Poly1305Parameters) -> Result<EncodedParameters> {
    Ok(EncodedParameters::new(
        FORMAT_BINARY_V1,
        TYPE_TAG,
        params.prefix,
        vec![PAYLOAD_VERSION],
    ))
}

fn parse_key(encoded: &EncodedKey, access: SecretAccess) -> Result<Box<dyn Key>> {
    let payload = encoded.payload().expose(access);
    if payload.len() != 1 + KEY_LEN {
        return Err(LoomError::MalformedEncoding(format!(
            "xchacha20-poly1305 key payload is {} bytes (expected {})",
            payload.len(),
            1 + KEY_LEN
        )));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(LoomError::MalformedEncoding(format!(
            "unsupported xchacha20-poly1305 key version: {}",
            payload[0]
        )));
    }
    let key = XChaCha20Poly1305Key::new(
        XChaCha20Poly1305Parameters::new(encoded.output_prefix()),
        SecretBytes::new(payload[1..].to_vec(), access),
        encoded.id_requirement(),
    )?;
    Ok(Box::new(key))
}

fn serialize_key(key: &XChaCha20Poly1305Key, access: SecretAccess) -> Result<EncodedKey> {
    let mut payload = Vec::with_capacity(1 + KEY_LEN);
    payload.push(PAYLOAD_VERSION);
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

/// Registers the XChaCha20-Poly1305 manager and codecs. Idempotent.
pub fn register() -> Result<()> {
    registry::register_key_manager(XChaCha20Poly1305KeyManager)?;
    codecs::register_parameters_parser(FORMAT_BINARY_V1, TYPE_TAG, parse_params)?;
    codecs::register_parameters_serializer::<XChaCha20Poly1305Parameters>(
        FORMAT_BINARY_V1,
        serialize_params,
    )?;
    codecs::register_key_parser(FORMAT_BINARY_V1, TYPE_TAG, parse_key)?;
    codecs::register_key_serializer::<XChaCha20Poly1305Key>(FORMAT_BINARY_V1, serialize_key)?;
    Ok(())
}
