//! Cloudport Core
//!
//! Credential model, credential-resolution configuration, cancellation and
//! error handling shared by the secrets and registry crates.

pub mod cancel;
pub mod config;
pub mod credentials;
pub mod error;

pub use cancel::cancellable;
pub use config::{
    CredentialManagerConfig, CredentialSource, SecretsStoreConfig, VaultAuth, VaultConfig,
};
pub use credentials::{
    AwsCredentials, AzureCredentials, CloudProvider, CloudflareCredentials, GcpCredentials,
    ProviderCredentials, validate_credentials,
};
pub use error::{Error, Result, ResultExt};
pub use tokio_util::sync::CancellationToken;
