use thiserror::Error;

pub type Result<A, E = Error> = std::result::Result<A, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoFailed(#[from] std::io::Error),
    #[error("truncated input: needed {needed} more bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },
    #[error("malformed data: {0}")]
    Malformed(&'static str),
    #[error("unregistered type: {0}")]
    UnregisteredType(String),
    #[error("no serializer registered for extension type: {0}")]
    UnregisteredSerializer(String),
    #[error("no serializer available for {0}")]
    SerializerMissing(String),
    #[error("type id {0} is outside the user id range")]
    IdOverflow(u32),
    #[error("type id {0} is already assigned to another type")]
    IdReused(u32),
    #[error("type {0} is already registered")]
    AlreadyRegistered(String),
    #[error("another type is already registered under {0}")]
    NameConflict(String),
    #[error("type name must not contain '.': {0}")]
    NameContainsDot(String),
    #[error("circular reference encountered while reference tracking is disabled")]
    CircularWithoutTracking,
    #[error("type rejected by security policy: {0}")]
    PolicyViolation(String),
    #[error("serializer got an unexpected value shape: {0}")]
    TypeMismatch(&'static str),
}
