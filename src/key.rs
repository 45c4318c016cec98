/// Key-object abstractions: algorithm parameters, keys, lifecycle status,
/// and the type-erased primitive carrier used at the registry boundary.
use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::{LoomError, Result};
use crate::output_prefix::OutputPrefix;

/// Immutable algorithmic configuration of a key: algorithm choice, sizes,
/// output-prefix variant. Never contains secret material.
pub trait Parameters: Any + Send + Sync + std::fmt::Debug {
    /// Framing variant keys with these parameters use.
    fn output_prefix(&self) -> OutputPrefix;

    /// True when keys with these parameters must carry a fixed key id.
    fn has_id_requirement(&self) -> bool {
        self.output_prefix().requires_id()
    }

    fn as_any(&self) -> &dyn Any;

    /// Structural equality across the trait-object boundary.
    fn eq_dyn(&self, other: &dyn Parameters) -> bool;
}

impl PartialEq for dyn Parameters {
    fn eq(&self, other: &Self) -> bool {
        self.eq_dyn(other)
    }
}

impl Eq for dyn Parameters {}

/// A key: parameters plus key material, immutable once constructed.
pub trait Key: Any + Send + Sync {
    fn parameters(&self) -> &dyn Parameters;

    /// The id this key must be installed under, when framing demands one.
    fn id_requirement(&self) -> Option<u32>;

    fn as_any(&self) -> &dyn Any;

    /// Structural equality; secret material compares in constant time.
    fn eq_dyn(&self, other: &dyn Key) -> bool;
}

impl PartialEq for dyn Key {
    fn eq(&self, other: &Self) -> bool {
        self.eq_dyn(other)
    }
}

impl Eq for dyn Key {}

/// Lifecycle status of a keyset entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    Enabled,
    Disabled,
    Destroyed,
}

/// Type-erased carrier for a boxed capability object (`Box<dyn Mac>`,
/// `Box<dyn Signer>`, ...). Key managers hand primitives across the
/// object-safe registry boundary in this form; the generic surface
/// recovers the concrete capability with [`AnyPrimitive::downcast`].
pub struct AnyPrimitive {
    boxed: Box<dyn Any + Send + Sync>,
    name: &'static str,
}

impl AnyPrimitive {
    pub fn new<P>(primitive: Box<P>) -> Self
    where
        P: ?Sized + 'static,
        Box<P>: Any + Send + Sync,
    {
        AnyPrimitive {
            boxed: Box::new(primitive),
            name: std::any::type_name::<P>(),
        }
    }

    /// Recovers the boxed capability object. A mismatch means a manager
    /// produced a different capability than it claims to support.
    pub fn downcast<P>(self) -> Result<Box<P>>
    where
        P: ?Sized + 'static,
        Box<P>: Any,
    {
        let name = self.name;
        self.boxed
            .downcast::<Box<P>>()
            .map(|boxed| *boxed)
            .map_err(|_| {
                LoomError::Internal(format!(
                    "primitive is {name}, not {}",
                    std::any::type_name::<P>()
                ))
            })
    }
}

/// Downcast helper for managers accepting a single concrete parameters type.
pub(crate) fn downcast_params<T: Parameters>(params: &dyn Parameters) -> Result<&T> {
    params.as_any().downcast_ref::<T>().ok_or_else(|| {
        LoomError::InvalidParameters(format!("expected {}", std::any::type_name::<T>()))
    })
}

/// Downcast helper for managers accepting a single concrete key type.
pub(crate) fn downcast_key<T: Key>(key: &dyn Key) -> Result<&T> {
    key.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| LoomError::InvalidKey(format!("expected {}", std::any::type_name::<T>())))
}
