/// Process-wide codec catalog: parsers keyed by (format, type tag),
/// serializers keyed by (format, concrete Rust type).
///
/// Registration is additive and idempotent: re-registering the identical
/// function is a silent no-op, a different function under an occupied slot
/// is a conflict. Lookups take the read lock only; codec functions never
/// touch the catalog, so running them under the read lock cannot deadlock.
use std::any::TypeId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::error::{LoomError, Result};
use crate::key::{Key, Parameters};
use crate::secret::SecretAccess;
use crate::serialization::{EncodedKey, EncodedParameters};

/// Parses an encoded parameters value into its concrete type.
pub type ParametersParserFn = fn(&EncodedParameters) -> Result<Box<dyn Parameters>>;

/// Parses an encoded key into its concrete type. The token is always
/// present; the caller-facing access rule is enforced before dispatch.
pub type KeyParserFn = fn(&EncodedKey, SecretAccess) -> Result<Box<dyn Key>>;

struct ParserSlot<F> {
    parse: F,
    addr: usize,
}

struct ParamsSerializerSlot {
    serialize: Box<dyn Fn(&dyn Parameters) -> Result<EncodedParameters> + Send + Sync>,
    addr: usize,
}

struct KeySerializerSlot {
    serialize: Box<dyn Fn(&dyn Key, SecretAccess) -> Result<EncodedKey> + Send + Sync>,
    addr: usize,
}

#[derive(Default)]
struct Codecs {
    params_parsers: HashMap<(String, String), ParserSlot<ParametersParserFn>>,
    key_parsers: HashMap<(String, String), ParserSlot<KeyParserFn>>,
    params_serializers: HashMap<(String, TypeId), ParamsSerializerSlot>,
    key_serializers: HashMap<(String, TypeId), KeySerializerSlot>,
}

static CODECS: Lazy<RwLock<Codecs>> = Lazy::new(|| RwLock::new(Codecs::default()));

fn read_catalog() -> RwLockReadGuard<'static, Codecs> {
    CODECS.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_catalog() -> RwLockWriteGuard<'static, Codecs> {
    CODECS.write().unwrap_or_else(PoisonError::into_inner)
}

/// Registers a parser for parameters encodings tagged (`format`, `type_tag`).
pub fn register_parameters_parser(
    format: &'static str,
    type_tag: &'static str,
    parse: ParametersParserFn,
) -> Result<()> {
    let mut codecs = write_catalog();
    match codecs
        .params_parsers
        .entry((format.to_string(), type_tag.to_string()))
    {
        Entry::Occupied(slot) => {
            if slot.get().addr == parse as usize {
                Ok(())
            } else {
                Err(LoomError::CodecConflict {
                    kind: "parameters parser",
                    format,
                    tag: type_tag.to_string(),
                })
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(ParserSlot {
                parse,
                addr: parse as usize,
            });
            debug!(format, type_tag, "Registered parameters parser");
            Ok(())
        }
    }
}

/// Registers a serializer producing `format` encodings of the concrete
/// parameters type `T`.
pub fn register_parameters_serializer<T: Parameters>(
    format: &'static str,
    serialize: fn(&T) -> Result<EncodedParameters>,
) -> Result<()> {
    let addr = serialize as usize;
    let mut codecs = write_catalog();
    match codecs
        .params_serializers
        .entry((format.to_string(), TypeId::of::<T>()))
    {
        Entry::Occupied(slot) => {
            if slot.get().addr == addr {
                Ok(())
            } else {
                Err(LoomError::CodecConflict {
                    kind: "parameters serializer",
                    format,
                    tag: std::any::type_name::<T>().to_string(),
                })
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(ParamsSerializerSlot {
                serialize: Box::new(move |params| {
                    let concrete = params.as_any().downcast_ref::<T>().ok_or_else(|| {
                        LoomError::Internal(format!(
                            "serializer slot reached with a foreign parameters type, \
                             expected {}",
                            std::any::type_name::<T>()
                        ))
                    })?;
                    serialize(concrete)
                }),
                addr,
            });
            debug!(
                format,
                parameters = std::any::type_name::<T>(),
                "Registered parameters serializer"
            );
            Ok(())
        }
    }
}

/// Registers a parser for key encodings tagged (`format`, `type_tag`).
pub fn register_key_parser(
    format: &'static str,
    type_tag: &'static str,
    parse: KeyParserFn,
) -> Result<()> {
    let mut codecs = write_catalog();
    match codecs
        .key_parsers
        .entry((format.to_string(), type_tag.to_string()))
    {
        Entry::Occupied(slot) => {
            if slot.get().addr == parse as usize {
                Ok(())
            } else {
                Err(LoomError::CodecConflict {
                    kind: "key parser",
                    format,
                    tag: type_tag.to_string(),
                })
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(ParserSlot {
                parse,
                addr: parse as usize,
            });
            debug!(format, type_tag, "Registered key parser");
            Ok(())
        }
    }
}

/// Registers a serializer producing `format` encodings of the concrete key
/// type `K`.
pub fn register_key_serializer<K: Key>(
    format: &'static str,
    serialize: fn(&K, SecretAccess) -> Result<EncodedKey>,
) -> Result<()> {
    let addr = serialize as usize;
    let mut codecs = write_catalog();
    match codecs
        .key_serializers
        .entry((format.to_string(), TypeId::of::<K>()))
    {
        Entry::Occupied(slot) => {
            if slot.get().addr == addr {
                Ok(())
            } else {
                Err(LoomError::CodecConflict {
                    kind: "key serializer",
                    format,
                    tag: std::any::type_name::<K>().to_string(),
                })
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(KeySerializerSlot {
                serialize: Box::new(move |key, access| {
                    let concrete = key.as_any().downcast_ref::<K>().ok_or_else(|| {
                        LoomError::Internal(format!(
                            "serializer slot reached with a foreign key type, expected {}",
                            std::any::type_name::<K>()
                        ))
                    })?;
                    serialize(concrete, access)
                }),
                addr,
            });
            debug!(
                format,
                key = std::any::type_name::<K>(),
                "Registered key serializer"
            );
            Ok(())
        }
    }
}

/// Parses an encoded parameters value with the matching registered parser.
pub fn parse_parameters(encoded: &EncodedParameters) -> Result<Box<dyn Parameters>> {
    let parse = {
        let codecs = read_catalog();
        codecs
            .params_parsers
            .get(&(encoded.format().to_string(), encoded.type_tag().to_string()))
            .map(|slot| slot.parse)
            .ok_or_else(|| LoomError::UnknownCodec {
                kind: "parameters parser",
                format: encoded.format(),
                tag: encoded.type_tag().to_string(),
            })?
    };
    parse(encoded)
}

/// Serializes a parameters value into the requested format.
pub fn serialize_parameters(
    params: &dyn Parameters,
    format: &'static str,
) -> Result<EncodedParameters> {
    let codecs = read_catalog();
    let slot = codecs
        .params_serializers
        .get(&(format.to_string(), params.as_any().type_id()))
        .ok_or_else(|| LoomError::UnknownCodec {
            kind: "parameters serializer",
            format,
            tag: format!("{params:?}"),
        })?;
    (slot.serialize)(params)
}

/// Parses an encoded key with the matching registered parser.
///
/// Encodings whose material is secret require the caller's token; public
/// material parses without one.
pub fn parse_key(encoded: &EncodedKey, access: Option<SecretAccess>) -> Result<Box<dyn Key>> {
    let token = match access {
        Some(token) => token,
        None if encoded.material().is_secret() => return Err(LoomError::SecretAccessRequired),
        None => SecretAccess::insecure(),
    };
    let parse = {
        let codecs = read_catalog();
        codecs
            .key_parsers
            .get(&(encoded.format().to_string(), encoded.type_tag().to_string()))
            .map(|slot| slot.parse)
            .ok_or_else(|| LoomError::UnknownCodec {
                kind: "key parser",
                format: encoded.format(),
                tag: encoded.type_tag().to_string(),
            })?
    };
    parse(encoded, token)
}

/// Serializes a key into the requested format.
///
/// The token rule mirrors [`parse_key`]: if the produced encoding carries
/// secret material and the caller presented no token, the encoding is
/// dropped and the call fails.
pub fn serialize_key(
    key: &dyn Key,
    format: &'static str,
    access: Option<SecretAccess>,
) -> Result<EncodedKey> {
    let token = access.unwrap_or_else(SecretAccess::insecure);
    let encoded = {
        let codecs = read_catalog();
        let slot = codecs
            .key_serializers
            .get(&(format.to_string(), key.as_any().type_id()))
            .ok_or_else(|| LoomError::UnknownCodec {
                kind: "key serializer",
                format,
                tag: format!("key with {:?}", key.parameters()),
            })?;
        (slot.serialize)(key, token)?
    };
    if encoded.material().is_secret() && access.is_none() {
        return Err(LoomError::SecretAccessRequired);
    }
    Ok(encoded)
}

/// Clears every registered codec. Test isolation only; never call while
/// other threads use the catalog.
pub fn reset() {
    let mut codecs = write_catalog();
    *codecs = Codecs::default();
    warn!("Serialization registry reset");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::output_prefix::OutputPrefix;
    use crate::secret::SecretBytes;
    use crate::serialization::{KeyMaterialKind, FORMAT_BINARY_V1};
    use crate::testutil;
    use std::any::Any;

    const TAG: &str = "codec-test/widget";

    #[derive(Debug, Clone, PartialEq)]
    struct WidgetParams {
        width: u8,
        prefix: OutputPrefix,
    }

    impl Parameters for WidgetParams {
        fn output_prefix(&self) -> OutputPrefix {
            self.prefix
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn eq_dyn(&self, other: &dyn Parameters) -> bool {
            other
                .as_any()
                .downcast_ref::<WidgetParams>()
                .is_some_and(|other| self == other)
        }
    }

    struct WidgetKey {
        params: WidgetParams,
        material: SecretBytes,
        id: Option<u32>,
    }

    impl Key for WidgetKey {
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
            other.as_any().downcast_ref::<WidgetKey>().is_some_and(|other| {
                self.params == other.params
                    && self.material == other.material
                    && self.id == other.id
            })
        }
    }

    fn parse_widget_params(encoded: &EncodedParameters) -> Result<Box<dyn Parameters>> {
        let payload = encoded.payload();
        if payload.len() != 1 {
            return Err(LoomError::MalformedEncoding("widget payload".into()));
        }
        Ok(Box::new(WidgetParams {
            width: payload[0],
            prefix: encoded.output_prefix(),
        }))
    }

    fn parse_widget_params_conflicting(
        _encoded: &EncodedParameters,
    ) -> Result<Box<dyn Parameters>> {
        Err(LoomError::MalformedEncoding("never parses".into()))
    }

    fn serialize_widget_params(params: &WidgetParams) -> Result<EncodedParameters> {
        Ok(EncodedParameters::new(
            FORMAT_BINARY_V1,
            TAG,
            params.prefix,
            vec![params.width],
        ))
    }

    fn parse_widget_key(encoded: &EncodedKey, access: SecretAccess) -> Result<Box<dyn Key>> {
        let payload = encoded.payload().expose(access);
        if payload.is_empty() {
            return Err(LoomError::MalformedEncoding("widget key payload".into()));
        }
        Ok(Box::new(WidgetKey {
            params: WidgetParams {
                width: payload[0],
                prefix: encoded.output_prefix(),
            },
            material: SecretBytes::new(payload[1..].to_vec(), access),
            id: encoded.id_requirement(),
        }))
    }

    fn serialize_widget_key(key: &WidgetKey, access: SecretAccess) -> Result<EncodedKey> {
        let mut payload = vec![key.params.width];
        payload.extend_from_slice(key.material.expose(access));
        EncodedKey::new(
            FORMAT_BINARY_V1,
            TAG,
            KeyMaterialKind::Symmetric,
            key.params.prefix,
            key.id,
            SecretBytes::new(payload, access),
        )
    }

    fn sample_encoded_params() -> EncodedParameters {
        EncodedParameters::new(FORMAT_BINARY_V1, TAG, OutputPrefix::Raw, vec![9])
    }

    #[test]
    fn test_parse_parameters_not_found_then_registered() {
        let _guard = testutil::registry_lock();
        reset();

        let err = parse_parameters(&sample_encoded_params()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        register_parameters_parser(FORMAT_BINARY_V1, TAG, parse_widget_params).unwrap();
        let parsed = parse_parameters(&sample_encoded_params()).unwrap();
        let widget = parsed.as_any().downcast_ref::<WidgetParams>().unwrap();
        assert_eq!(widget.width, 9);
    }

    #[test]
    fn test_parser_registration_idempotence_and_conflict() {
        let _guard = testutil::registry_lock();
        reset();

        register_parameters_parser(FORMAT_BINARY_V1, TAG, parse_widget_params).unwrap();
        register_parameters_parser(FORMAT_BINARY_V1, TAG, parse_widget_params).unwrap();

        let err =
            register_parameters_parser(FORMAT_BINARY_V1, TAG, parse_widget_params_conflicting)
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        // Original registration survives the rejected one.
        assert!(parse_parameters(&sample_encoded_params()).is_ok());
    }

    #[test]
    fn test_parameters_round_trip() {
        let _guard = testutil::registry_lock();
        reset();
        register_parameters_parser(FORMAT_BINARY_V1, TAG, parse_widget_params).unwrap();
        register_parameters_serializer::<WidgetParams>(FORMAT_BINARY_V1, serialize_widget_params)
            .unwrap();

        let params = WidgetParams {
            width: 17,
            prefix: OutputPrefix::Standard,
        };
        let encoded = serialize_parameters(&params, FORMAT_BINARY_V1).unwrap();
        let parsed = parse_parameters(&encoded).unwrap();
        assert!(parsed.eq_dyn(&params));
    }

    #[test]
    fn test_serialize_parameters_unregistered_is_not_found() {
        let _guard = testutil::registry_lock();
        reset();
        let params = WidgetParams {
            width: 1,
            prefix: OutputPrefix::Raw,
        };
        let err = serialize_parameters(&params, FORMAT_BINARY_V1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_key_round_trip_requires_token() {
        let _guard = testutil::registry_lock();
        reset();
        register_key_parser(FORMAT_BINARY_V1, TAG, parse_widget_key).unwrap();
        register_key_serializer::<WidgetKey>(FORMAT_BINARY_V1, serialize_widget_key).unwrap();

        let access = SecretAccess::insecure();
        let key = WidgetKey {
            params: WidgetParams {
                width: 3,
                prefix: OutputPrefix::Standard,
            },
            material: SecretBytes::new(vec![0xAB; 16], access),
            id: Some(123),
        };

        let err = serialize_key(&key, FORMAT_BINARY_V1, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let encoded = serialize_key(&key, FORMAT_BINARY_V1, Some(access)).unwrap();
        assert_eq!(encoded.id_requirement(), Some(123));

        let err = parse_key(&encoded, None).err().expect("expected an error");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let parsed = parse_key(&encoded, Some(access)).unwrap();
        assert!(parsed.eq_dyn(&key));
    }

    #[test]
    fn test_reset_clears_codecs() {
        let _guard = testutil::registry_lock();
        reset();
        register_parameters_parser(FORMAT_BINARY_V1, TAG, parse_widget_params).unwrap();
        assert!(parse_parameters(&sample_encoded_params()).is_ok());
        reset();
        assert!(parse_parameters(&sample_encoded_params()).is_err());
    }
}
