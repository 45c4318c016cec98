/// Containers for secret key material, zeroized on drop and gated behind an
/// explicit access token.
///
/// Raw bytes never leave a [`SecretBytes`] without a [`SecretAccess`] token.
/// The token is trivially mintable; its value is that every place raw key
/// material escapes the type system is a greppable `SecretAccess::insecure()`
/// call site.
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Capability token for reading or wrapping raw secret bytes.
#[derive(Clone, Copy, Debug)]
pub struct SecretAccess {
    _private: (),
}

impl SecretAccess {
    /// Mints a token. The name is deliberately loud: call sites are the
    /// audit surface for raw key-material access.
    pub fn insecure() -> Self {
        SecretAccess { _private: () }
    }
}

/// A variable-length secret buffer, zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>, _access: SecretAccess) -> Self {
        Self(bytes)
    }

    /// Fills a fresh buffer of `len` bytes from the OS RNG.
    pub fn generate(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn expose(&self, _access: SecretAccess) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Constant-time comparison; buffers of different length compare unequal.
impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SecretBytes {}

/// Redacted on purpose; only the length is shown.
impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({} bytes)", self.0.len())
    }
}
