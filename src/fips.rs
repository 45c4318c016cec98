/// Process-wide FIPS restriction flag.
///
/// Detection of an actual validated build is out of scope; the rest of the
/// crate consumes the restriction as a boolean query. Key managers declare a
/// [`FipsStatus`] and the registry refuses non-approved managers while the
/// process is restricted.
use std::sync::atomic::{AtomicBool, Ordering};

static FIPS_RESTRICTED: AtomicBool = AtomicBool::new(false);

/// Whether a key manager's algorithms are acceptable under FIPS restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FipsStatus {
    Approved,
    NotApproved,
}

/// True when the process has been restricted to FIPS-approved algorithms.
pub fn fips_enabled() -> bool {
    FIPS_RESTRICTED.load(Ordering::Relaxed)
}

/// Restricts the process to FIPS-approved algorithms. Affects registration
/// only; already-registered managers are not revisited.
pub fn restrict_to_fips() {
    FIPS_RESTRICTED.store(true, Ordering::Relaxed);
}

/// Lifts the restriction. Test isolation only; production processes never
/// downgrade.
pub fn clear_fips_restriction() {
    FIPS_RESTRICTED.store(false, Ordering::Relaxed);
}
