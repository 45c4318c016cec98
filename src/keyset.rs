/// Multi-key keysets: generation from a template, rotation, and
/// materialization into a wrapped primitive.
///
/// A keyset never interprets key payloads itself; it carries encodings and
/// delegates to the codec and manager catalogs. Materialization is where
/// every registry meets: parse each enabled key, build its primitive
/// through the manager, assemble a primitive set, and hand it to the
/// family wrapper.
use std::any::Any;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LoomError, Result};
use crate::key::KeyStatus;
use crate::output_prefix::OutputPrefix;
use crate::primitive_set::{KeyInfo, PrimitiveSet};
use crate::registry;
use crate::secret::SecretAccess;
use crate::serialization::{registry as codecs, EncodedKey, EncodedParameters};

/// One keyset entry: an encoded key plus its lifecycle bookkeeping.
#[derive(Debug, Clone)]
pub struct KeysetKey {
    pub encoded: EncodedKey,
    pub status: KeyStatus,
    pub id: u32,
}

/// An ordered collection of keys for one scheme family, with a designated
/// primary producing all new outputs.
#[derive(Debug, Clone)]
pub struct Keyset {
    pub primary_id: u32,
    pub keys: Vec<KeysetKey>,
}

/// Redacted keyset metadata, safe to log or export. Never carries key
/// material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysetInfo {
    pub primary_id: u32,
    pub keys: Vec<KeyEntryInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntryInfo {
    pub id: u32,
    pub status: KeyStatus,
    pub prefix: OutputPrefix,
    pub type_tag: String,
}

fn random_id(existing: &[KeysetKey]) -> u32 {
    // Zero is reserved as an absent id in info output and external
    // formats.
    loop {
        let mut bytes = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let id = u32::from_be_bytes(bytes);
        if id != 0 && !existing.iter().any(|key| key.id == id) {
            return id;
        }
    }
}

/// Generates one key from `template` and serializes it back into the
/// template's format. The keyset layer mints the secret-access token: it
/// holds material by construction.
fn generate_key(template: &EncodedParameters, existing: &[KeysetKey]) -> Result<KeysetKey> {
    let params = codecs::parse_parameters(template)?;
    let id = random_id(existing);
    let id_requirement = params.output_prefix().requires_id().then_some(id);
    let key = registry::new_key(template.type_tag(), params.as_ref(), id_requirement)?;
    let encoded = codecs::serialize_key(
        key.as_ref(),
        template.format(),
        Some(SecretAccess::insecure()),
    )?;
    debug!(key_type = template.type_tag(), id, "Generated keyset key");
    Ok(KeysetKey {
        encoded,
        status: KeyStatus::Enabled,
        id,
    })
}

impl Keyset {
    /// Creates a keyset holding one fresh key generated from `template`;
    /// that key is the primary.
    pub fn generate(template: &EncodedParameters) -> Result<Self> {
        let key = generate_key(template, &[])?;
        Ok(Keyset {
            primary_id: key.id,
            keys: vec![key],
        })
    }

    /// Generates an additional key from `template` under a fresh unique id
    /// and makes it the primary. Existing keys stay enabled, so outputs
    /// they produced remain verifiable.
    pub fn rotate(&mut self, template: &EncodedParameters) -> Result<()> {
        let key = generate_key(template, &self.keys)?;
        debug!(
            old_primary = self.primary_id,
            new_primary = key.id,
            "Rotated keyset"
        );
        self.primary_id = key.id;
        self.keys.push(key);
        Ok(())
    }

    /// Materializes every enabled key into the capability `P` and wraps
    /// the result into a single primitive.
    ///
    /// The primary id must reference an enabled key. Disabled and
    /// destroyed keys are skipped entirely; their primitives are never
    /// constructed.
    pub fn primitives<P>(&self) -> Result<Box<P>>
    where
        P: ?Sized + Send + Sync + 'static,
        Box<P>: Any,
    {
        let mut set: PrimitiveSet<P> = PrimitiveSet::new();
        let mut primary = None;
        for key in &self.keys {
            if key.status != KeyStatus::Enabled {
                continue;
            }
            let parsed = codecs::parse_key(&key.encoded, Some(SecretAccess::insecure()))?;
            let primitive = registry::primitive::<P>(key.encoded.type_tag(), parsed.as_ref())?;
            let handle = set.add(
                primitive,
                &KeyInfo {
                    id: key.id,
                    status: key.status,
                    prefix: key.encoded.output_prefix(),
                },
            );
            if key.id == self.primary_id {
                primary = Some(handle);
            }
        }
        let primary = primary.ok_or_else(|| {
            LoomError::InvalidKeyset(format!(
                "primary id {} does not reference an enabled key",
                self.primary_id
            ))
        })?;
        set.set_primary(primary)?;
        registry::wrap::<P>(set)
    }

    /// Redacted metadata view.
    pub fn info(&self) -> KeysetInfo {
        KeysetInfo {
            primary_id: self.primary_id,
            keys: self
                .keys
                .iter()
                .map(|key| KeyEntryInfo {
                    id: key.id,
                    status: key.status,
                    prefix: key.encoded.output_prefix(),
                    type_tag: key.encoded.type_tag().to_string(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mac::{self, hmac, Mac};
    use crate::output_prefix::PREFIX_LEN;
    use crate::serialization::FORMAT_BINARY_V1;
    use crate::testutil;

    fn hmac_template(prefix: OutputPrefix) -> EncodedParameters {
        let params =
            hmac::HmacParameters::new(32, 16, crate::hash::HashKind::Sha256, prefix).unwrap();
        codecs::serialize_parameters(&params, FORMAT_BINARY_V1).unwrap()
    }

    fn with_mac_family<T>(test: impl FnOnce() -> T) -> T {
        let _guard = testutil::registry_lock();
        registry::reset();
        codecs::reset();
        crate::fips::clear_fips_restriction();
        mac::register().unwrap();
        test()
    }

    #[test]
    fn test_generate_creates_an_enabled_primary() {
        with_mac_family(|| {
            let keyset = Keyset::generate(&hmac_template(OutputPrefix::Standard)).unwrap();
            assert_eq!(keyset.len(), 1);
            assert_eq!(keyset.keys[0].status, KeyStatus::Enabled);
            assert_eq!(keyset.keys[0].id, keyset.primary_id);
            assert_ne!(keyset.primary_id, 0);
            assert_eq!(keyset.keys[0].encoded.id_requirement(), Some(keyset.primary_id));
        });
    }

    #[test]
    fn test_generate_without_registration_is_not_found() {
        let _guard = testutil::registry_lock();
        registry::reset();
        codecs::reset();
        crate::fips::clear_fips_restriction();

        let template = EncodedParameters::new(
            FORMAT_BINARY_V1,
            "keyloom/hmac",
            OutputPrefix::Standard,
            vec![0x01],
        );
        let err = Keyset::generate(&template).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_primitives_materializes_a_framed_mac() {
        with_mac_family(|| {
            let keyset = Keyset::generate(&hmac_template(OutputPrefix::Standard)).unwrap();
            let mac = keyset.primitives::<dyn Mac>().unwrap();

            let tag = mac.compute_mac(b"data").unwrap();
            assert_eq!(tag[0], 0x01);
            assert_eq!(&tag[1..PREFIX_LEN], keyset.primary_id.to_be_bytes());
            mac.verify_mac(&tag, b"data").unwrap();
            assert!(mac.verify_mac(&tag, b"tampered").is_err());
        });
    }

    #[test]
    fn test_raw_template_generates_unframed_keys() {
        with_mac_family(|| {
            let keyset = Keyset::generate(&hmac_template(OutputPrefix::Raw)).unwrap();
            assert_eq!(keyset.keys[0].encoded.id_requirement(), None);
            assert_ne!(keyset.keys[0].id, 0);

            let mac = keyset.primitives::<dyn Mac>().unwrap();
            let tag = mac.compute_mac(b"data").unwrap();
            // 16-byte truncated HMAC tag, no framing in front.
            assert_eq!(tag.len(), 16);
            mac.verify_mac(&tag, b"data").unwrap();
        });
    }

    #[test]
    fn test_rotate_keeps_old_outputs_verifiable() {
        with_mac_family(|| {
            let template = hmac_template(OutputPrefix::Standard);
            let mut keyset = Keyset::generate(&template).unwrap();
            let old_primary = keyset.primary_id;
            let old_tag = keyset
                .primitives::<dyn Mac>()
                .unwrap()
                .compute_mac(b"archived")
                .unwrap();

            keyset.rotate(&template).unwrap();
            assert_eq!(keyset.len(), 2);
            assert_ne!(keyset.primary_id, old_primary);

            let mac = keyset.primitives::<dyn Mac>().unwrap();
            mac.verify_mac(&old_tag, b"archived").unwrap();

            let new_tag = mac.compute_mac(b"fresh").unwrap();
            assert_eq!(&new_tag[1..PREFIX_LEN], keyset.primary_id.to_be_bytes());
        });
    }

    #[test]
    fn test_primary_must_reference_an_enabled_key() {
        with_mac_family(|| {
            let mut keyset = Keyset::generate(&hmac_template(OutputPrefix::Standard)).unwrap();
            keyset.keys[0].status = KeyStatus::Disabled;

            let err = keyset
                .primitives::<dyn Mac>()
                .err()
                .expect("expected an error");
            assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        });
    }

    #[test]
    fn test_destroyed_keys_are_skipped() {
        with_mac_family(|| {
            let template = hmac_template(OutputPrefix::Standard);
            let mut keyset = Keyset::generate(&template).unwrap();
            let old_id = keyset.primary_id;
            let old_tag = keyset
                .primitives::<dyn Mac>()
                .unwrap()
                .compute_mac(b"gone")
                .unwrap();

            keyset.rotate(&template).unwrap();
            for key in &mut keyset.keys {
                if key.id == old_id {
                    key.status = KeyStatus::Destroyed;
                }
            }

            let mac = keyset.primitives::<dyn Mac>().unwrap();
            assert!(mac.verify_mac(&old_tag, b"gone").is_err());
            let tag = mac.compute_mac(b"current").unwrap();
            mac.verify_mac(&tag, b"current").unwrap();
        });
    }

    #[test]
    fn test_info_is_redacted_metadata() {
        with_mac_family(|| {
            let template = hmac_template(OutputPrefix::Standard);
            let mut keyset = Keyset::generate(&template).unwrap();
            keyset.rotate(&template).unwrap();

            let info = keyset.info();
            assert_eq!(info.primary_id, keyset.primary_id);
            assert_eq!(info.keys.len(), 2);
            assert!(info.keys.iter().all(|key| key.type_tag == hmac::TYPE_TAG));

            let json = serde_json::to_string(&info).unwrap();
            assert!(json.contains("\"primary_id\""));
            assert!(json.contains(hmac::TYPE_TAG));
            // No key material travels with the info view.
            assert!(!json.contains("payload"));
        });
    }
}
