// Copyright 2025 Adobe. All rights reserved.
// This file is licensed to you under the Apache License,
// Version 2.0 (http://www.apache.org/licenses/LICENSE-2.0)
// or the MIT license (http://opensource.org/licenses/MIT),
// at your option.
//
// Unless required by applicable law or agreed to in writing,
// this software is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR REPRESENTATIONS OF ANY KIND, either express or
// implied. See the LICENSE-MIT and LICENSE-APACHE files for the
// specific language governing permissions and limitations under
// each license.

use std::time::Duration;
use thiserror::Error;

use crate::util::retry::Retryable;

/// Coarse classification of a [`StorageError`].
///
/// Callers branch on this rather than on the variant fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    PreconditionFailed,
    InvalidInput,
    Unauthorized,
    Transport,
    Config,
    Cancelled,
    TimedOut,
}

/// Errors that can occur during storage operations.
///
/// Every error produced by a backend transport is mapped into one of these
/// variants at the provider boundary; no backend-native error value is ever
/// handed to a caller.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Precondition failed for {key}: {reason}")]
    PreconditionFailed { key: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Transport error: {message}")]
    TransportError { message: String, transient: bool },

    #[error("Configuration error for {backend}: {}", problems.join("; "))]
    ConfigError {
        backend: String,
        problems: Vec<String>,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Operation timed out: {operation} after {after:?}")]
    TimedOut { operation: String, after: Duration },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Build a configuration error with a single problem.
    pub fn config(backend: impl Into<String>, problem: impl Into<String>) -> Self {
        StorageError::ConfigError {
            backend: backend.into(),
            problems: vec![problem.into()],
        }
    }

    /// Build a transport error, classifying it as transient from its message.
    pub fn transport(message: impl Into<String>) -> Self {
        let message = message.into();
        let transient = is_transient_message(&message);
        StorageError::TransportError { message, transient }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        StorageError::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            StorageError::InvalidInput(_) => ErrorKind::InvalidInput,
            StorageError::Unauthorized(_) => ErrorKind::Unauthorized,
            StorageError::TransportError { .. } => ErrorKind::Transport,
            StorageError::ConfigError { .. } => ErrorKind::Config,
            StorageError::Cancelled { .. } => ErrorKind::Cancelled,
            StorageError::TimedOut { .. } => ErrorKind::TimedOut,
        }
    }

    /// Map an `object_store` error into the storage taxonomy.
    ///
    /// This is the only place backend errors are inspected.
    pub(crate) fn from_backend(err: object_store::Error) -> Self {
        use object_store::Error as Backend;

        match err {
            Backend::NotFound { path, .. } => StorageError::NotFound { key: path },
            Backend::AlreadyExists { path, .. } => StorageError::PreconditionFailed {
                key: path,
                reason: "object already exists".to_string(),
            },
            Backend::Precondition { path, source } => StorageError::PreconditionFailed {
                key: path,
                reason: source.to_string(),
            },
            Backend::NotModified { path, source } => StorageError::PreconditionFailed {
                key: path,
                reason: source.to_string(),
            },
            Backend::PermissionDenied { path, source } => {
                StorageError::Unauthorized(format!("permission denied for {}: {}", path, source))
            }
            Backend::Unauthenticated { path, source } => {
                StorageError::Unauthorized(format!("unauthenticated access to {}: {}", path, source))
            }
            e @ Backend::InvalidPath { .. } => StorageError::InvalidInput(e.to_string()),
            e @ Backend::NotSupported { .. } => StorageError::InvalidInput(e.to_string()),
            e @ Backend::NotImplemented { .. } => StorageError::InvalidInput(e.to_string()),
            Backend::UnknownConfigurationKey { store, key } => {
                StorageError::config(store, format!("unknown configuration key '{}'", key))
            }
            other => StorageError::transport(other.to_string()),
        }
    }
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::TransportError {
                transient: true,
                ..
            }
        )
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        // Failures reading a caller-supplied source are never replayed.
        StorageError::TransportError {
            message: format!("I/O error: {}", err),
            transient: false,
        }
    }
}

impl From<StorageError> for std::io::Error {
    fn from(err: StorageError) -> Self {
        let kind = match err.kind() {
            ErrorKind::NotFound => std::io::ErrorKind::NotFound,
            ErrorKind::Unauthorized => std::io::ErrorKind::PermissionDenied,
            ErrorKind::InvalidInput => std::io::ErrorKind::InvalidInput,
            ErrorKind::TimedOut => std::io::ErrorKind::TimedOut,
            ErrorKind::Cancelled => std::io::ErrorKind::Interrupted,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "connectionreset",
        "connection reset",
        "brokenpipe",
        "broken pipe",
        "interrupted",
        "timedout",
        "timed out",
        "connection closed",
        "error sending request",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_lists_every_problem() {
        let error = StorageError::ConfigError {
            backend: "azure".to_string(),
            problems: vec![
                "account_key is required".to_string(),
                "service_url is required".to_string(),
            ],
        };
        assert_eq!(
            error.to_string(),
            "Configuration error for azure: account_key is required; service_url is required"
        );
        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_not_found_display() {
        let error = StorageError::NotFound {
            key: "a/b.txt".to_string(),
        };
        assert_eq!(error.to_string(), "Object not found: a/b.txt");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_transport_classification() {
        assert!(StorageError::transport("ConnectionReset by peer").is_retryable());
        assert!(StorageError::transport("operation timed out").is_retryable());
        assert!(StorageError::transport("Broken pipe (os error 32)").is_retryable());
        assert!(!StorageError::transport("HTTP 400 bad request").is_retryable());
    }

    #[test]
    fn test_only_transport_errors_retry() {
        let errors = vec![
            StorageError::NotFound {
                key: "k".to_string(),
            },
            StorageError::InvalidInput("bad".to_string()),
            StorageError::Unauthorized("no".to_string()),
            StorageError::cancelled("download"),
            StorageError::config("s3", "missing"),
        ];
        for error in errors {
            assert!(!error.is_retryable(), "{:?} should not retry", error);
        }
    }

    #[test]
    fn test_from_backend_not_found() {
        let backend = object_store::Error::NotFound {
            path: "missing.txt".to_string(),
            source: "no such key".into(),
        };
        match StorageError::from_backend(backend) {
            StorageError::NotFound { key } => assert_eq!(key, "missing.txt"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_from_backend_already_exists_is_precondition() {
        let backend = object_store::Error::AlreadyExists {
            path: "exists.txt".to_string(),
            source: "conflict".into(),
        };
        let error = StorageError::from_backend(backend);
        assert_eq!(error.kind(), ErrorKind::PreconditionFailed);
        assert!(error.to_string().contains("exists.txt"));
    }

    #[test]
    fn test_from_backend_precondition() {
        let backend = object_store::Error::Precondition {
            path: "v.txt".to_string(),
            source: "etag mismatch".into(),
        };
        match StorageError::from_backend(backend) {
            StorageError::PreconditionFailed { key, reason } => {
                assert_eq!(key, "v.txt");
                assert!(reason.contains("etag mismatch"));
            }
            other => panic!("Expected PreconditionFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_from_backend_permission_denied() {
        let backend = object_store::Error::PermissionDenied {
            path: "secret.txt".to_string(),
            source: "403".into(),
        };
        assert_eq!(
            StorageError::from_backend(backend).kind(),
            ErrorKind::Unauthorized
        );
    }

    #[test]
    fn test_from_backend_generic_is_transport() {
        let backend = object_store::Error::Generic {
            store: "S3",
            source: "Connection reset by peer".into(),
        };
        let error = StorageError::from_backend(backend);
        assert_eq!(error.kind(), ErrorKind::Transport);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_io_error_conversion_is_not_transient() {
        let io_error = io::Error::new(io::ErrorKind::ConnectionReset, "source went away");
        let storage_error: StorageError = io_error.into();

        match storage_error {
            StorageError::TransportError { transient, .. } => assert!(!transient),
            _ => panic!("Expected TransportError variant"),
        }
    }

    #[test]
    fn test_into_io_error_keeps_kind() {
        let io_error: io::Error = StorageError::NotFound {
            key: "x".to_string(),
        }
        .into();
        assert_eq!(io_error.kind(), io::ErrorKind::NotFound);

        let io_error: io::Error = StorageError::cancelled("download").into();
        assert_eq!(io_error.kind(), io::ErrorKind::Interrupted);
    }
}
