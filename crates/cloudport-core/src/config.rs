//! Credential resolution configuration.

use crate::credentials::CloudProvider;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Backend a credential manager resolves provider credentials from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    #[default]
    Environment,
    SecretsStore,
    Vault,
    EncryptedFile,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Environment => "environment",
            CredentialSource::SecretsStore => "secrets-store",
            CredentialSource::Vault => "vault",
            CredentialSource::EncryptedFile => "encrypted-file",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "environment" | "env" => Ok(CredentialSource::Environment),
            "secrets-store" | "secrets_store" => Ok(CredentialSource::SecretsStore),
            "vault" => Ok(CredentialSource::Vault),
            "encrypted-file" | "encrypted_file" => Ok(CredentialSource::EncryptedFile),
            other => Err(Error::Configuration(format!("unknown credential source: {other}"))),
        }
    }
}

/// Credential manager configuration. Exactly one source is active.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialManagerConfig {
    #[serde(default)]
    pub source: CredentialSource,
    /// Required when `source` is `vault`.
    #[serde(default)]
    pub vault: Option<VaultConfig>,
    /// Required when `source` is `secrets-store`.
    #[serde(default)]
    pub secrets_store: Option<SecretsStoreConfig>,
}

impl CredentialManagerConfig {
    pub fn new(source: CredentialSource) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    pub fn with_vault(mut self, vault: VaultConfig) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_secrets_store(mut self, store: SecretsStoreConfig) -> Self {
        self.secrets_store = Some(store);
        self
    }
}

/// Managed secrets store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsStoreConfig {
    /// Region of the store. Falls back to the ambient AWS configuration.
    #[serde(default)]
    pub region: Option<String>,
    /// Store identifier holding each provider's credential blob.
    #[serde(default)]
    pub secret_ids: BTreeMap<CloudProvider, String>,
}

impl SecretsStoreConfig {
    pub fn secret_id(&self, provider: CloudProvider) -> Option<&str> {
        self.secret_ids
            .get(&provider)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// Connection settings for a Vault-compatible secret store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Server address, e.g. `https://vault.example.com:8200`.
    pub address: String,
    /// KV version 2 mount.
    #[serde(default = "default_mount")]
    pub mount: String,
    /// Application segment of credential paths.
    #[serde(default = "default_app")]
    pub app: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Limit on each request to the server.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    pub auth: VaultAuth,
}

fn default_mount() -> String {
    "secret".to_string()
}

fn default_app() -> String {
    "cloudport".to_string()
}

fn default_timeout() -> u32 {
    30
}

impl VaultConfig {
    pub fn new(address: impl Into<String>, auth: VaultAuth) -> Self {
        Self {
            address: address.into(),
            mount: default_mount(),
            app: default_app(),
            namespace: None,
            timeout_seconds: default_timeout(),
            auth,
        }
    }

    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Vault authentication method and its parameters.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum VaultAuth {
    Token { token: String },
    #[serde(rename = "approle")]
    AppRole {
        role_id: String,
        secret_id: String,
        /// Auth mount, `approle` when unset.
        #[serde(default)]
        mount: Option<String>,
    },
    AwsIam { role: String },
    GcpIam { role: String },
}

impl VaultAuth {
    pub fn method(&self) -> &'static str {
        match self {
            VaultAuth::Token { .. } => "token",
            VaultAuth::AppRole { .. } => "approle",
            VaultAuth::AwsIam { .. } => "aws-iam",
            VaultAuth::GcpIam { .. } => "gcp-iam",
        }
    }
}

impl fmt::Debug for VaultAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultAuth::Token { .. } => f.debug_struct("Token").field("token", &"***").finish(),
            VaultAuth::AppRole { role_id, mount, .. } => f
                .debug_struct("AppRole")
                .field("role_id", role_id)
                .field("secret_id", &"***")
                .field("mount", mount)
                .finish(),
            VaultAuth::AwsIam { role } => f.debug_struct("AwsIam").field("role", role).finish(),
            VaultAuth::GcpIam { role } => f.debug_struct("GcpIam").field("role", role).finish(),
        }
    }
}
