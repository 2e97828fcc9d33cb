//! Centralized error handling for ZANJ.
//!
//! Every failure in the serializer, the loader and the archive layer is a
//! [`ZanjError`]. Recoverable failures are routed through an [`ErrorMode`],
//! which decides whether the error propagates, is logged and replaced by a
//! best-effort substitute, or is silently replaced.
//!
//! ## Error Categories
//!
//! - **Schema** ([`ZanjError::Schema`]): a reference stub is missing, a shape or
//!   dtype disagrees with its metadata, a format tag names an unregistered type.
//! - **Type** ([`ZanjError::Type`]): a field payload fails its declared type, or
//!   a record cannot be constructed from the reconstructed fields.
//! - **Handler** ([`ZanjError::Handler`]): a serialize handler failed. Carries the
//!   object path, the handler description and the offending type name, and
//!   chains the original cause.
//! - **I/O** ([`ZanjError::Io`], [`ZanjError::Archive`], [`ZanjError::Json`]):
//!   filesystem, zip or JSON text failures. Always fatal.
//! - **Policy** ([`ZanjError::Policy`], [`ZanjError::UnknownArrayMode`]):
//!   invalid configuration. Always fatal.
//!
//! ## Usage Patterns
//!
//! ```rust
//! use zanj::{ErrorMode, ZanjError};
//!
//! let err = ZanjError::schema("arr", "shape mismatch");
//! // Warn mode logs the error and hands back the substitute.
//! let value = ErrorMode::Warn.handle(err, || "fallback".to_string())?;
//! assert_eq!(value, "fallback");
//! # Ok::<(), ZanjError>(())
//! ```

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A specialized `Result` type for ZANJ operations.
pub type Result<T> = std::result::Result<T, ZanjError>;

/// The master error enum covering all failure domains in ZANJ.
///
/// The type is `Clone` so that errors can be stored in a substitute record or
/// re-raised after logging. I/O and JSON errors are wrapped in `Arc` to make
/// cloning cheap.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ZanjError {
    /// The payload does not agree with its own metadata or with the archive layout.
    #[error("Schema Error at `{path}`: {message}")]
    Schema {
        /// Object path (slash joined) where the problem was found.
        path: String,
        /// Description of the inconsistency.
        message: String,
    },

    /// A field payload does not conform to the declared type of the field.
    #[error("Type Error for field `{field}`: {message}")]
    Type {
        /// Qualified field name (`Record.field`).
        field: String,
        /// Description of the mismatch.
        message: String,
    },

    /// A serialize handler failed while processing a value.
    #[error("Handler Error at `{path}` (handler `{handler}`, type `{type_name}`): {source}")]
    Handler {
        /// Object path (slash joined) of the offending value.
        path: String,
        /// Description of the handler that owned the value.
        handler: String,
        /// Rust type name of the offending value.
        type_name: String,
        /// The original failure.
        #[source]
        source: Box<ZanjError>,
    },

    /// An array payload names a storage mode this codec does not know.
    #[error("Unknown array mode: `{0}`")]
    UnknownArrayMode(String),

    /// A type expression cannot be checked at runtime.
    #[error("Type hint not supported for runtime validation: `{0}`")]
    UnsupportedTypeHint(String),

    /// Invalid configuration.
    #[error("Policy Error: {0}")]
    Policy(String),

    /// Low-level filesystem failure.
    #[error("I/O Error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The zip container could not be read or written.
    #[error("Archive Error: {0}")]
    Archive(String),

    /// A JSON document inside the archive could not be parsed or written.
    #[error("JSON Error: {0}")]
    Json(#[source] Arc<serde_json::Error>),
}

/// Coarse classification of a [`ZanjError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Payload / layout inconsistency.
    Schema,
    /// Field type failure.
    Type,
    /// Serialize handler failure.
    Handler,
    /// Filesystem, zip or JSON text failure.
    Io,
    /// Invalid configuration.
    Policy,
}

impl ZanjError {
    /// Builds a schema error at `path`.
    pub fn schema(path: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Builds a type error for `field`.
    pub fn type_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Type {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema { .. } => ErrorKind::Schema,
            Self::Type { .. } | Self::UnsupportedTypeHint(_) => ErrorKind::Type,
            Self::Handler { .. } => ErrorKind::Handler,
            Self::Io(_) | Self::Archive(_) | Self::Json(_) => ErrorKind::Io,
            Self::Policy(_) | Self::UnknownArrayMode(_) => ErrorKind::Policy,
        }
    }

    /// Fatal errors bypass every [`ErrorMode`] and always propagate.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Handler { source, .. } => source.is_fatal(),
            _ => matches!(self.kind(), ErrorKind::Io | ErrorKind::Policy),
        }
    }
}

impl From<io::Error> for ZanjError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for ZanjError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<zip::result::ZipError> for ZanjError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Self::Io(Arc::new(e)),
            other => Self::Archive(other.to_string()),
        }
    }
}

/// How recoverable errors are handled.
///
/// The substitute handed back in the non-raising modes is chosen by the caller:
/// the serializer substitutes the value's repr string, the loader substitutes
/// the raw JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Propagate the error.
    #[default]
    Raise,
    /// Emit a `tracing` warning and continue with the substitute.
    Warn,
    /// Continue with the substitute.
    Ignore,
}

impl ErrorMode {
    /// Applies the policy to `err`.
    ///
    /// Fatal errors (see [`ZanjError::is_fatal`]) are returned unchanged in every mode.
    pub fn handle<T>(self, err: ZanjError, substitute: impl FnOnce() -> T) -> Result<T> {
        if err.is_fatal() {
            return Err(err);
        }
        match self {
            Self::Raise => Err(err),
            Self::Warn => {
                if let ZanjError::Handler {
                    path,
                    handler,
                    type_name,
                    ..
                } = &err
                {
                    tracing::warn!(%path, %handler, %type_name, error = %err, "substituting after handler failure");
                } else {
                    tracing::warn!(error = %err, "substituting after recoverable error");
                }
                Ok(substitute())
            }
            Self::Ignore => Ok(substitute()),
        }
    }

    /// Returns the lowercase name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raise => "raise",
            Self::Warn => "warn",
            Self::Ignore => "ignore",
        }
    }
}

impl FromStr for ErrorMode {
    type Err = ZanjError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raise" | "except" => Ok(Self::Raise),
            "warn" => Ok(Self::Warn),
            "ignore" => Ok(Self::Ignore),
            other => Err(ZanjError::Policy(format!("unknown error mode `{other}`"))),
        }
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_ignore_policy() {
        let err = ZanjError::Policy("bad".into());
        assert!(ErrorMode::Ignore.handle(err, || 0).is_err());
    }

    #[test]
    fn schema_errors_follow_policy() {
        let err = ZanjError::schema("a/b", "broken");
        assert_eq!(ErrorMode::Ignore.handle(err.clone(), || 7).ok(), Some(7));
        assert!(ErrorMode::Raise.handle(err, || 7).is_err());
    }

    #[test]
    fn handler_errors_inherit_fatality() {
        let inner = ZanjError::from(io::Error::other("disk"));
        let err = ZanjError::Handler {
            path: "x".into(),
            handler: "h".into(),
            type_name: "T".into(),
            source: Box::new(inner),
        };
        assert!(err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::Handler);
    }

    #[test]
    fn parse_modes() {
        assert_eq!("except".parse::<ErrorMode>().ok(), Some(ErrorMode::Raise));
        assert_eq!("WARN".parse::<ErrorMode>().ok(), Some(ErrorMode::Warn));
        assert!("loud".parse::<ErrorMode>().is_err());
    }
}
