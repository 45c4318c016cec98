/// Process-wide catalog binding key type tags to key managers and
/// capability types to wrappers.
///
/// The catalog is populated at startup through the idempotent family
/// `register()` bundles and is effectively read-only afterwards; lookups
/// only take the read lock, so readers never block readers. `reset` exists
/// for test isolation and must not race production use.
use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::error::{LoomError, Result};
use crate::fips::{self, FipsStatus};
use crate::key::{AnyPrimitive, Key, Parameters};
use crate::primitive_set::PrimitiveSet;

/// Factory for one key scheme: creates keys and builds the scheme's
/// primitive from a key.
pub trait KeyManager: Send + Sync {
    /// Globally unique tag of the key scheme this manager owns.
    fn key_type(&self) -> &'static str;

    /// Whether the scheme is acceptable under FIPS restriction.
    fn fips_status(&self) -> FipsStatus;

    /// True when the manager produces the capability `TypeId::of::<P>()`.
    /// One manager may serve several capabilities; the MAC managers answer
    /// for both the one-shot and the chunked interface.
    fn supports(&self, capability: TypeId) -> bool;

    /// Creates a fresh key for the given parameters, fixed to
    /// `id_requirement` when the framing variant demands an id.
    fn new_key(&self, params: &dyn Parameters, id_requirement: Option<u32>)
        -> Result<Box<dyn Key>>;

    /// Builds the requested capability backed by `key`, type-erased for
    /// transport across the object-safe boundary. Only called with a
    /// `capability` that `supports` accepted.
    fn primitive(&self, key: &dyn Key, capability: TypeId) -> Result<AnyPrimitive>;
}

/// Combines a whole primitive set into one primitive of the same
/// capability, encoding the primary/framing semantics of its family.
pub trait PrimitiveWrapper: Send + Sync + 'static {
    /// Capability the wrapper consumes and produces, e.g. `dyn Mac`.
    type Primitive: ?Sized + Send + Sync + 'static;

    fn wrap(&self, set: PrimitiveSet<Self::Primitive>) -> Result<Box<Self::Primitive>>;
}

/// Object-safe face of [`PrimitiveWrapper`] for catalog storage.
trait ErasedWrapper: Send + Sync {
    fn wrap_erased(&self, set: Box<dyn Any + Send + Sync>)
        -> Result<Box<dyn Any + Send + Sync>>;
}

struct WrapperAdapter<W: PrimitiveWrapper>(W);

impl<W: PrimitiveWrapper> ErasedWrapper for WrapperAdapter<W> {
    fn wrap_erased(
        &self,
        set: Box<dyn Any + Send + Sync>,
    ) -> Result<Box<dyn Any + Send + Sync>> {
        let set = set
            .downcast::<PrimitiveSet<W::Primitive>>()
            .map_err(|_| {
                LoomError::Internal("wrapper invoked with a foreign primitive set".into())
            })?;
        let wrapped = self.0.wrap(*set)?;
        Ok(Box::new(wrapped))
    }
}

struct ManagerSlot {
    manager: Arc<dyn KeyManager>,
    identity: TypeId,
}

struct WrapperSlot {
    wrapper: Arc<dyn ErasedWrapper>,
    identity: TypeId,
}

#[derive(Default)]
struct Catalog {
    managers: HashMap<&'static str, ManagerSlot>,
    wrappers: HashMap<TypeId, WrapperSlot>,
}

static CATALOG: Lazy<RwLock<Catalog>> = Lazy::new(|| RwLock::new(Catalog::default()));

fn read_catalog() -> RwLockReadGuard<'static, Catalog> {
    CATALOG.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_catalog() -> RwLockWriteGuard<'static, Catalog> {
    CATALOG.write().unwrap_or_else(PoisonError::into_inner)
}

/// Registers a key manager under its key type tag.
///
/// Identity is the concrete manager type: re-registering the same type is
/// a silent no-op, a different type under an occupied tag is a conflict.
/// Non-approved managers are refused while the process is FIPS-restricted.
pub fn register_key_manager<M: KeyManager + 'static>(manager: M) -> Result<()> {
    if fips::fips_enabled() && manager.fips_status() == FipsStatus::NotApproved {
        return Err(LoomError::FipsRestricted(manager.key_type().to_string()));
    }
    let key_type = manager.key_type();
    let identity = TypeId::of::<M>();
    let mut catalog = write_catalog();
    match catalog.managers.entry(key_type) {
        Entry::Occupied(slot) => {
            if slot.get().identity == identity {
                Ok(())
            } else {
                Err(LoomError::ManagerConflict(key_type.to_string()))
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(ManagerSlot {
                manager: Arc::new(manager),
                identity,
            });
            debug!(key_type, "Registered key manager");
            Ok(())
        }
    }
}

/// Looks up the manager for `key_type`, checking it can produce the
/// capability `P`.
pub fn key_manager<P: ?Sized + 'static>(key_type: &str) -> Result<Arc<dyn KeyManager>> {
    let catalog = read_catalog();
    let slot = catalog
        .managers
        .get(key_type)
        .ok_or_else(|| LoomError::UnknownKeyType(key_type.to_string()))?;
    if !slot.manager.supports(TypeId::of::<P>()) {
        return Err(LoomError::CapabilityMismatch {
            key_type: key_type.to_string(),
            primitive: std::any::type_name::<P>(),
        });
    }
    Ok(Arc::clone(&slot.manager))
}

/// Builds the capability `P` from `key` via the manager registered for
/// `key_type`.
pub fn primitive<P>(key_type: &str, key: &dyn Key) -> Result<Box<P>>
where
    P: ?Sized + 'static,
    Box<P>: Any,
{
    let manager = key_manager::<P>(key_type)?;
    manager.primitive(key, TypeId::of::<P>())?.downcast::<P>()
}

/// Creates a fresh key via the manager registered for `key_type`.
pub fn new_key(
    key_type: &str,
    params: &dyn Parameters,
    id_requirement: Option<u32>,
) -> Result<Box<dyn Key>> {
    let manager = {
        let catalog = read_catalog();
        let slot = catalog
            .managers
            .get(key_type)
            .ok_or_else(|| LoomError::UnknownKeyType(key_type.to_string()))?;
        Arc::clone(&slot.manager)
    };
    manager.new_key(params, id_requirement)
}

/// Registers the wrapper for its capability type. Same idempotence and
/// conflict rules as manager registration.
pub fn register_wrapper<W: PrimitiveWrapper>(wrapper: W) -> Result<()> {
    let capability = TypeId::of::<W::Primitive>();
    let identity = TypeId::of::<W>();
    let primitive_name = std::any::type_name::<W::Primitive>();
    let mut catalog = write_catalog();
    match catalog.wrappers.entry(capability) {
        Entry::Occupied(slot) => {
            if slot.get().identity == identity {
                Ok(())
            } else {
                Err(LoomError::WrapperConflict(primitive_name))
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(WrapperSlot {
                wrapper: Arc::new(WrapperAdapter(wrapper)),
                identity,
            });
            debug!(primitive = primitive_name, "Registered primitive wrapper");
            Ok(())
        }
    }
}

/// Combines `set` into a single primitive with the wrapper registered for
/// the capability `P`.
pub fn wrap<P>(set: PrimitiveSet<P>) -> Result<Box<P>>
where
    P: ?Sized + Send + Sync + 'static,
{
    let wrapper = {
        let catalog = read_catalog();
        let slot = catalog
            .wrappers
            .get(&TypeId::of::<P>())
            .ok_or_else(|| LoomError::UnknownWrapper(std::any::type_name::<P>()))?;
        Arc::clone(&slot.wrapper)
    };
    let wrapped = wrapper.wrap_erased(Box::new(set))?;
    wrapped
        .downcast::<Box<P>>()
        .map(|boxed| *boxed)
        .map_err(|_| LoomError::Internal("wrapper produced a foreign primitive type".into()))
}

/// Clears all registered managers and wrappers. Test isolation only; never
/// call while other threads use the catalog.
pub fn reset() {
    let mut catalog = write_catalog();
    *catalog = Catalog::default();
    warn!("Key manager registry reset");
}
