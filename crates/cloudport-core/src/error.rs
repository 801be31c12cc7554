//! Error types for Cloudport.

use crate::credentials::CloudProvider;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Setup errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing {provider} credentials: {}", missing.join(", "))]
    MissingCredentials {
        provider: CloudProvider,
        missing: Vec<String>,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    // Auth errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    // Resource errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unexpected value type: {0}")]
    Type(String),

    // Infrastructure errors
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Distribution
    #[error("Distribution to {registry} failed: {inner}")]
    Distribution {
        registry: String,
        /// Registries pushed before the failure. Those pushes are not rolled back.
        completed: Vec<String>,
        inner: Box<Error>,
    },

    #[error("{context}: {inner}")]
    Context { context: String, inner: Box<Error> },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap this error with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            inner: Box::new(self),
        }
    }

    /// The innermost error, looking through context and distribution wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { inner, .. } | Error::Distribution { inner, .. } => inner.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Error::AlreadyExists(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), Error::Configuration(_))
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self.root(), Error::Authentication(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), Error::Unsupported(_))
    }

    pub fn is_missing_credentials(&self) -> bool {
        matches!(self.root(), Error::MissingCredentials { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Adds operation context to fallible results.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind() {
        let err = Error::NotFound("secret/data/app/db".to_string())
            .context("reading key url")
            .context("resolving aws credentials");

        assert!(err.is_not_found());
        assert!(!err.is_configuration());
        assert_eq!(
            err.to_string(),
            "resolving aws credentials: reading key url: Not found: secret/data/app/db"
        );
    }

    #[test]
    fn test_missing_credentials_message() {
        let err = Error::MissingCredentials {
            provider: CloudProvider::Aws,
            missing: vec![
                "AWS_ACCESS_KEY_ID".to_string(),
                "AWS_SECRET_ACCESS_KEY".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Missing aws credentials: AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY"
        );
    }

    #[test]
    fn test_distribution_root() {
        let err = Error::Distribution {
            registry: "us-central1-docker.pkg.dev/p/r".to_string(),
            completed: vec![],
            inner: Box::new(Error::Authentication("bad token".to_string())),
        };
        assert!(err.is_authentication());
    }
}
