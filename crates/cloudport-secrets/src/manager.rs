//! Credential manager: resolves provider credentials from the configured source.

use crate::env::{EnvLookup, ProcessEnv, credentials_from_env};
use crate::store::{AwsSecretsManager, SecretsStoreClient, credentials_from_store};
use crate::vault::{SecretReference, VaultSession};
use cloudport_core::{
    AwsCredentials, AzureCredentials, CancellationToken, CloudProvider, CloudflareCredentials,
    CredentialManagerConfig, CredentialSource, Error, GcpCredentials, ProviderCredentials, Result,
    ResultExt, validate_credentials,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Required and optional Vault keys for a provider's credential secret.
fn vault_keys(provider: CloudProvider) -> (&'static [&'static str], &'static [&'static str]) {
    match provider {
        CloudProvider::Aws => (&["access_key_id", "secret_access_key"], &["session_token"]),
        CloudProvider::Gcp => (
            &["project_id", "service_account_key"],
            &["service_account_email"],
        ),
        CloudProvider::Azure => (
            &["tenant_id", "client_id", "client_secret", "subscription_id"],
            &[],
        ),
        CloudProvider::Cloudflare => (&["api_token"], &["account_id", "email"]),
    }
}

/// Resolves provider credential bundles from exactly one configured source.
pub struct CredentialManager {
    config: CredentialManagerConfig,
    env: Arc<dyn EnvLookup>,
    store: Option<Arc<dyn SecretsStoreClient>>,
}

impl CredentialManager {
    /// Create a manager reading the process environment. The secrets-store
    /// client, when needed, is built from the ambient AWS configuration.
    pub fn new(config: CredentialManagerConfig) -> Self {
        Self {
            config,
            env: Arc::new(ProcessEnv),
            store: None,
        }
    }

    /// Replace the environment lookup.
    pub fn with_env(mut self, env: Arc<dyn EnvLookup>) -> Self {
        self.env = env;
        self
    }

    /// Use an explicit secrets-store client.
    pub fn with_secrets_store(mut self, store: Arc<dyn SecretsStoreClient>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source(&self) -> CredentialSource {
        self.config.source
    }

    /// Resolve `provider`'s credentials from the configured source.
    ///
    /// The returned bundle always passes [`validate_credentials`].
    pub async fn get_credentials(
        &self,
        cancel: &CancellationToken,
        provider: CloudProvider,
    ) -> Result<ProviderCredentials> {
        let source = self.config.source;
        debug!(provider = %provider, source = %source, "Resolving credentials");

        let bundle = match source {
            CredentialSource::Environment => credentials_from_env(self.env.as_ref(), provider),
            CredentialSource::SecretsStore => self.from_secrets_store(cancel, provider).await,
            CredentialSource::Vault => self.from_vault(cancel, provider).await,
            CredentialSource::EncryptedFile => Err(Error::Unsupported(
                "encrypted-file credential source is not implemented".to_string(),
            )),
        }
        .and_then(|bundle| validate_credentials(&bundle, provider).map(|()| bundle))
        .with_context(|| format!("resolving {provider} credentials from {source}"))?;

        info!(provider = %provider, source = %source, "Credentials resolved");
        Ok(bundle)
    }

    async fn from_secrets_store(
        &self,
        cancel: &CancellationToken,
        provider: CloudProvider,
    ) -> Result<ProviderCredentials> {
        let config = self.config.secrets_store.as_ref().ok_or_else(|| {
            Error::Configuration("secrets-store source selected but not configured".to_string())
        })?;

        match &self.store {
            Some(store) => credentials_from_store(cancel, config, store.as_ref(), provider).await,
            None => {
                let store = AwsSecretsManager::from_env(config.region.as_deref()).await;
                credentials_from_store(cancel, config, &store, provider).await
            }
        }
    }

    async fn from_vault(
        &self,
        cancel: &CancellationToken,
        provider: CloudProvider,
    ) -> Result<ProviderCredentials> {
        let vault = self.config.vault.clone().ok_or_else(|| {
            Error::Configuration("vault source selected but not configured".to_string())
        })?;

        // One session per resolution, dropped on return.
        let mut session = VaultSession::new(vault)?;
        session.authenticate(cancel).await?;

        let path = session.kv_path(provider);
        let (required, optional) = vault_keys(provider);

        let references: BTreeMap<String, SecretReference> = required
            .iter()
            .map(|&key| (key.to_string(), SecretReference::new(path.as_str(), key)))
            .collect();
        let mut values = session.get_secrets(cancel, &references).await?;

        for &key in optional {
            let value = match session.get_secret(cancel, &path, key).await {
                Ok(value) => value,
                Err(e) if e.is_not_found() => {
                    debug!(path = %path, key, "Optional vault key absent");
                    String::new()
                }
                Err(e) => return Err(e),
            };
            values.insert(key.to_string(), value);
        }

        Ok(bundle_from_values(provider, values))
    }
}

fn bundle_from_values(
    provider: CloudProvider,
    mut values: BTreeMap<String, String>,
) -> ProviderCredentials {
    let mut take = |key: &str| values.remove(key).unwrap_or_default();
    let non_empty = |value: String| Some(value).filter(|v| !v.is_empty());

    match provider {
        CloudProvider::Aws => ProviderCredentials::aws(AwsCredentials {
            access_key_id: take("access_key_id"),
            secret_access_key: take("secret_access_key"),
            session_token: non_empty(take("session_token")),
        }),
        CloudProvider::Gcp => ProviderCredentials::gcp(GcpCredentials {
            project_id: take("project_id"),
            service_account_key: take("service_account_key"),
            service_account_email: non_empty(take("service_account_email")),
        }),
        CloudProvider::Azure => ProviderCredentials::azure(AzureCredentials {
            tenant_id: take("tenant_id"),
            client_id: take("client_id"),
            client_secret: take("client_secret"),
            subscription_id: take("subscription_id"),
        }),
        CloudProvider::Cloudflare => ProviderCredentials::cloudflare(CloudflareCredentials {
            api_token: take("api_token"),
            account_id: non_empty(take("account_id")),
            email: non_empty(take("email")),
        }),
    }
}
