//! Registry capability set shared by every cloud variant.

use crate::auth::Authenticator;
use async_trait::async_trait;
use cloudport_core::{CancellationToken, Error, Result};
use tracing::warn;

/// A container registry that can be provisioned and pushed to.
///
/// `image_reference` and `image_uri` are only meaningful after a successful
/// [`Registry::authenticate`]; before that they fail with a configuration error.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Registry host and path prefix, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`.
    fn registry_url(&self) -> String;

    /// Label used in logs and errors. Must tell apart targets that share a
    /// registry URL before `authenticate`.
    fn name(&self) -> String {
        self.registry_url()
    }

    /// Ensure the remote repository exists and obtain push credentials.
    async fn authenticate(&mut self, cancel: &CancellationToken) -> Result<Authenticator>;

    /// Full image reference using the configured tag.
    fn image_reference(&self) -> Result<String>;

    /// Full image reference using `tag`.
    fn image_uri(&self, tag: &str) -> Result<String>;
}

/// Treat an "already exists" creation failure as success.
///
/// Covers the race between the existence check and the create call.
pub fn accept_existing(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e)
            if e.is_already_exists() || e.to_string().to_lowercase().contains("already exists") =>
        {
            warn!(resource = %what, "Resource created concurrently, using existing one");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Error returned when a reference is requested before `authenticate`.
pub(crate) fn not_authenticated(kind: &str) -> Error {
    Error::Configuration(format!("{kind} registry URL is unknown until authenticate succeeds"))
}
