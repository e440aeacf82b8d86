use std::borrow::Cow;

use casa::command::CommandError;
use casa::device::{DeviceId, DeviceState};
use casa::properties::PropertyError;

use serde::Serialize;

/// A specialized result for registry operations.
pub type Result<T> = core::result::Result<T, Error>;

/// All failure classes a registry operation can report.
///
/// Each kind carries the HTTP status code the (external) transport layer
/// maps it to, so the adapter stays a plain translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Malformed or out-of-range input. Maps to `400 Bad Request`.
    InvalidProperties,
    /// The target identifier is not registered. Maps to `404 Not Found`.
    NotFound,
    /// A pool-membership constraint was violated. Maps to
    /// `422 Unprocessable Entity`.
    TypeMismatch,
    /// A lifecycle action required the `Connected` state. Maps to
    /// `503 Service Unavailable`.
    Unavailable,
}

impl ErrorKind {
    /// The HTTP status code the transport layer reports for this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::InvalidProperties => 400,
            Self::NotFound => 404,
            Self::TypeMismatch => 422,
            Self::Unavailable => 503,
        }
    }
}

/// The error type for registry operations.
///
/// Validation failures never leave partial writes behind: an operation that
/// returns an [`Error`] has not changed any entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Error {
    #[serde(rename = "error")]
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from its kind and description.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// The error reported when an identifier is not registered.
    #[must_use]
    pub fn not_found(id: &DeviceId) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("device with id `{id}` does not exist"),
        )
    }

    /// The error reported when a lifecycle action is issued outside the
    /// `Connected` state.
    #[must_use]
    pub fn unavailable(action: &str, id: &DeviceId, state: DeviceState) -> Self {
        Self::new(
            ErrorKind::Unavailable,
            format!("`{action}` requires a connected device, but `{id}` is {state}"),
        )
    }

    /// Returns the failure class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.description)
    }
}

impl std::error::Error for Error {}

impl From<PropertyError> for Error {
    fn from(error: PropertyError) -> Self {
        Self::new(ErrorKind::InvalidProperties, error.to_string())
    }
}

impl From<CommandError> for Error {
    fn from(error: CommandError) -> Self {
        Self::new(ErrorKind::InvalidProperties, error.to_string())
    }
}
