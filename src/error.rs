//! Lookup results and error types.
//!
//! Absence is not an error here. Anything that can legitimately come back
//! empty returns `Result<Lookup<T>, E>`: `Ok(Lookup::NotFound)` drives
//! fallback to the next location, `Err(_)` aborts the whole resolution.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::ChecksumAlgorithm;

/// Outcome of a lookup that may legitimately find nothing.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn as_ref(&self) -> Lookup<&T> {
        match self {
            Lookup::Found(value) => Lookup::Found(value),
            Lookup::NotFound => Lookup::NotFound,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotFound,
        }
    }
}

/// Configuration problems, reported when a resolver is built rather than
/// when it is used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown placeholder [{token}] in pattern '{pattern}'")]
    UnknownToken { pattern: String, token: String },

    #[error("malformed pattern '{pattern}': {reason}")]
    MalformedPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("unknown checksum algorithm '{0}'")]
    UnknownChecksum(String),

    #[error("invalid coordinates '{0}': expected group:module:version[:classifier][@ext]")]
    InvalidCoordinates(String),

    #[error("unsupported repository url '{url}': {reason}")]
    UnsupportedUrl { url: String, reason: String },
}

/// Broad category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Local or socket I/O failed.
    Io,
    /// The remote answered with something the backend couldn't interpret.
    Protocol,
    Timeout,
    /// Unexpected response status (anything but success or "absent").
    Status(u16),
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => f.write_str("I/O error"),
            Self::Protocol => f.write_str("protocol error"),
            Self::Timeout => f.write_str("timed out"),
            Self::Status(code) => write!(f, "status {}", code),
        }
    }
}

/// A repository could not be talked to. Always fatal to the resolution in
/// progress; never mapped to "not found".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("could not {action} resource '{location}' ({kind}): {message}")]
pub struct TransportError {
    pub action: &'static str,
    pub location: String,
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(
        action: &'static str,
        location: impl Into<String>,
        kind: TransportErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action,
            location: location.into(),
            kind,
            message: message.into(),
        }
    }

    /// Classify an I/O error, treating timeouts separately.
    pub fn io(action: &'static str, location: impl Into<String>, err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            _ => TransportErrorKind::Io,
        };
        Self::new(action, location, kind, err.to_string())
    }

    pub fn protocol(
        action: &'static str,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(action, location, TransportErrorKind::Protocol, message)
    }
}

/// Cache stage/promote/lock failure.
#[derive(Debug, Error)]
#[error("cache {operation} failed for {}: {source}", path.display())]
pub struct CacheError {
    pub operation: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl CacheError {
    pub fn new(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Hard failure of a resolution. Distinct from [`Lookup::NotFound`]: a
/// location matched but the artifact couldn't be retrieved or trusted.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(
        "{algorithm} checksum mismatch for '{location}'\n  expected: {expected}\n  got:      {actual}"
    )]
    ChecksumMismatch {
        location: String,
        algorithm: ChecksumAlgorithm,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The resolver's abort handle fired. Nothing was promoted.
    #[error("transfer of '{location}' was cancelled")]
    Cancelled { location: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_from_option() {
        assert_eq!(Lookup::from(Some(3)), Lookup::Found(3));
        assert_eq!(Lookup::<i32>::from(None), Lookup::NotFound);
    }

    #[test]
    fn test_lookup_map_and_found() {
        let found = Lookup::Found("a").map(str::len);
        assert!(found.is_found());
        assert_eq!(found.found(), Some(1));
        assert_eq!(Lookup::<&str>::NotFound.map(str::len).found(), None);
    }

    #[test]
    fn test_io_timeout_classified() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let transport = TransportError::io("get", "http://repo/a.jar", &err);
        assert_eq!(transport.kind, TransportErrorKind::Timeout);

        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            TransportError::io("get", "http://repo/a.jar", &err).kind,
            TransportErrorKind::Io
        );
    }

    #[test]
    fn test_transport_error_message() {
        let err = TransportError::new(
            "list children for",
            "sftp://host/repo",
            TransportErrorKind::Status(4),
            "failure",
        );
        assert_eq!(
            err.to_string(),
            "could not list children for resource 'sftp://host/repo' (status 4): failure"
        );
    }
}
