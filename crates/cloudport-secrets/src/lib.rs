//! Cloudport Secrets
//!
//! Resolves cloud-provider credentials from the environment, a managed
//! secrets store, or a Vault KV version 2 engine.

pub mod env;
pub mod manager;
pub mod store;
pub mod vault;

pub use env::{EnvLookup, MapEnv, ProcessEnv, credentials_from_env, required_vars};
pub use manager::CredentialManager;
pub use store::{AwsSecretsManager, SecretsStoreClient, credentials_from_store};
pub use vault::{SecretReference, VaultSession};
