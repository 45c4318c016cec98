/// Sender-side ECDH key encapsulation: ephemeral key agreement against a
/// recipient public key, then HKDF to the requested symmetric key length.
///
/// The curve is chosen once at construction; every encapsulation draws a
/// fresh ephemeral key, so a sender instance carries no mutable state and
/// can be shared freely. Construction is refused while the process is
/// FIPS-restricted; neither curve setup here is an approved mode.
use p256::elliptic_curve::sec1::ToEncodedPoint;
use x25519_dalek::{EphemeralSecret as X25519Ephemeral, PublicKey as X25519Public};

use crate::error::{LoomError, Result};
use crate::fips;
use crate::hash::{self, HashKind};
use crate::secret::{SecretAccess, SecretBytes};

/// Curves available for the sender KEM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EllipticCurve {
    NistP256,
    X25519,
}

/// The two outputs of one encapsulation: the ephemeral public value to
/// send alongside the ciphertext, and the derived symmetric key.
pub struct KemKey {
    /// NIST curves: SEC1 uncompressed point. X25519: 32-byte u-coordinate.
    pub kem_bytes: Vec<u8>,
    pub symmetric_key: SecretBytes,
}

/// Generates an encapsulated symmetric key for one fixed recipient.
pub trait SenderKem: Send + Sync {
    fn encapsulate(
        &self,
        hash: HashKind,
        salt: &[u8],
        info: &[u8],
        key_len: usize,
    ) -> Result<KemKey>;
}

/// Builds the sender KEM for `curve` against `recipient_public_bytes`.
///
/// NIST P-256 accepts any valid SEC1 point encoding; X25519 expects
/// exactly 32 bytes.
pub fn sender_kem(curve: EllipticCurve, recipient_public_bytes: &[u8]) -> Result<Box<dyn SenderKem>> {
    if fips::fips_enabled() {
        return Err(LoomError::FipsRestricted("ecdh sender kem".into()));
    }
    match curve {
        EllipticCurve::NistP256 => {
            let recipient = p256::PublicKey::from_sec1_bytes(recipient_public_bytes)
                .map_err(|e| LoomError::InvalidKey(format!("nist-p256 recipient key: {e}")))?;
            Ok(Box::new(NistP256SenderKem { recipient }))
        }
        EllipticCurve::X25519 => {
            let bytes = <[u8; 32]>::try_from(recipient_public_bytes).map_err(|_| {
                LoomError::InvalidKey(format!(
                    "x25519 recipient key is {} bytes, expected 32",
                    recipient_public_bytes.len()
                ))
            })?;
            Ok(Box::new(X25519SenderKem {
                recipient: X25519Public::from(bytes),
            }))
        }
    }
}

struct NistP256SenderKem {
    recipient: p256::PublicKey,
}

impl SenderKem for NistP256SenderKem {
    fn encapsulate(
        &self,
        hash: HashKind,
        salt: &[u8],
        info: &[u8],
        key_len: usize,
    ) -> Result<KemKey> {
        let ephemeral = p256::ecdh::EphemeralSecret::random(&mut rand::rngs::OsRng);
        let kem_bytes = ephemeral
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let shared = ephemeral.diffie_hellman(&self.recipient);
        let symmetric = hash::hkdf_derive(
            hash,
            salt,
            shared.raw_secret_bytes().as_slice(),
            info,
            key_len,
        )?;
        Ok(KemKey {
            kem_bytes,
            symmetric_key: SecretBytes::new(symmetric, SecretAccess::insecure()),
        })
    }
}

struct X25519SenderKem {
    recipient: X25519Public,
}

impl SenderKem for X25519SenderKem {
    fn encapsulate(
        &self,
        hash: HashKind,
        salt: &[u8],
        info: &[u8],
        key_len: usize,
    ) -> Result<KemKey> {
        let ephemeral = X25519Ephemeral::random_from_rng(rand::rngs::OsRng);
        let kem_bytes = X25519Public::from(&ephemeral).as_bytes().to_vec();
        let shared = ephemeral.diffie_hellman(&self.recipient);
        // All-zero agreement means a low-order recipient point.
        if !shared.was_contributory() {
            return Err(LoomError::InvalidKey(
                "x25519 recipient key is a low-order point".into(),
            ));
        }
        let symmetric = hash::hkdf_derive(hash, salt, shared.as_bytes(), info, key_len)?;
        Ok(KemKey {
            kem_bytes,
            symmetric_key: SecretBytes::new(symmetric, SecretAccess::insecure()),
        })
    }
}
