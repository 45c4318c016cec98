use thiserror::Error;

/// Coarse failure category, stable across error variants.
///
/// Callers branch on the kind; the variant carries the human-readable
/// detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested registration, codec, or key type does not exist.
    NotFound,
    /// A conflicting registration already exists.
    AlreadyExists,
    /// The input is malformed, mismatched, or rejected.
    InvalidArgument,
    /// The operation needs state that has not been established.
    FailedPrecondition,
    /// An internal consistency bug; never expected in normal operation.
    Internal,
}

#[derive(Error, Debug)]
pub enum LoomError {
    #[error("no key manager registered for key type {0}")]
    UnknownKeyType(String),

    #[error("no wrapper registered for primitive {0}")]
    UnknownWrapper(&'static str),

    #[error("no {kind} codec registered for format {format:?}, tag {tag}")]
    UnknownCodec {
        kind: &'static str,
        format: &'static str,
        tag: String,
    },

    #[error("key type {0} is already registered to a different manager")]
    ManagerConflict(String),

    #[error("wrapper for primitive {0} is already registered")]
    WrapperConflict(&'static str),

    #[error("{kind} codec for format {format:?}, tag {tag} is already registered")]
    CodecConflict {
        kind: &'static str,
        format: &'static str,
        tag: String,
    },

    #[error("key manager for {key_type} does not support primitive {primitive}")]
    CapabilityMismatch {
        key_type: String,
        primitive: &'static str,
    },

    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("secret key access required")]
    SecretAccessRequired,

    #[error("verification failed")]
    VerificationFailed,

    #[error("primitive set has no primary entry")]
    NoPrimary,

    #[error("keyset is invalid: {0}")]
    InvalidKeyset(String),

    #[error("{0} is not available when the process is restricted to FIPS")]
    FipsRestricted(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl LoomError {
    /// Maps the variant onto its failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoomError::UnknownKeyType(_)
            | LoomError::UnknownWrapper(_)
            | LoomError::UnknownCodec { .. } => ErrorKind::NotFound,
            LoomError::ManagerConflict(_)
            | LoomError::WrapperConflict(_)
            | LoomError::CodecConflict { .. } => ErrorKind::AlreadyExists,
            LoomError::CapabilityMismatch { .. }
            | LoomError::MalformedEncoding(_)
            | LoomError::InvalidParameters(_)
            | LoomError::InvalidKey(_)
            | LoomError::SecretAccessRequired
            | LoomError::VerificationFailed => ErrorKind::InvalidArgument,
            LoomError::NoPrimary
            | LoomError::InvalidKeyset(_)
            | LoomError::FipsRestricted(_) => ErrorKind::FailedPrecondition,
            LoomError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, LoomError>;
