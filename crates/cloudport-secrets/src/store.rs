//! Managed secrets-store credential source.

use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use cloudport_core::{
    CancellationToken, CloudProvider, Error, ProviderCredentials, Result, SecretsStoreConfig,
    cancellable,
};
use tracing::debug;

/// Read access to a managed secrets store.
#[async_trait]
pub trait SecretsStoreClient: Send + Sync {
    /// The string payload stored under `secret_id`.
    async fn get_secret_string(&self, secret_id: &str) -> Result<String>;

    /// Store name for logging.
    fn name(&self) -> &str;
}

/// AWS Secrets Manager client.
pub struct AwsSecretsManager {
    client: aws_sdk_secretsmanager::Client,
}

impl AwsSecretsManager {
    /// Build a client from the ambient AWS configuration, optionally pinned to `region`.
    pub async fn from_env(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;

        Self {
            client: aws_sdk_secretsmanager::Client::new(&sdk_config),
        }
    }

    pub fn from_client(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretsStoreClient for AwsSecretsManager {
    async fn get_secret_string(&self, secret_id: &str) -> Result<String> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|svc| svc.is_resource_not_found_exception())
                {
                    Error::Backend(format!("secret {secret_id} does not exist"))
                } else {
                    Error::Backend(format!(
                        "failed to read secret {secret_id}: {}",
                        DisplayErrorContext(&e)
                    ))
                }
            })?;

        output
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| Error::Backend(format!("secret {secret_id} has no string payload")))
    }

    fn name(&self) -> &str {
        "aws-secrets-manager"
    }
}

/// Fetch and decode `provider`'s credential blob from the store.
///
/// The blob is a JSON [`ProviderCredentials`] document.
pub async fn credentials_from_store(
    cancel: &CancellationToken,
    config: &SecretsStoreConfig,
    store: &dyn SecretsStoreClient,
    provider: CloudProvider,
) -> Result<ProviderCredentials> {
    let secret_id = config.secret_id(provider).ok_or_else(|| {
        Error::Configuration(format!("no secrets-store identifier mapped for {provider}"))
    })?;

    debug!(
        provider = %provider,
        store = store.name(),
        secret_id = %secret_id,
        "Fetching credentials from secrets store"
    );

    let payload = cancellable(
        cancel,
        "secrets-store read",
        store.get_secret_string(secret_id),
    )
    .await
    .map_err(|e| match e {
        Error::Cancelled(_) | Error::Backend(_) => e,
        other => Error::Backend(other.to_string()),
    })?;

    serde_json::from_str::<ProviderCredentials>(&payload).map_err(|e| {
        Error::Backend(format!("secret {secret_id} is not a valid credential document: {e}"))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory store keyed by secret identifier.
    pub(crate) struct StaticStore(pub HashMap<String, String>);

    #[async_trait]
    impl SecretsStoreClient for StaticStore {
        async fn get_secret_string(&self, secret_id: &str) -> Result<String> {
            self.0
                .get(secret_id)
                .cloned()
                .ok_or_else(|| Error::Backend(format!("secret {secret_id} does not exist")))
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    fn config() -> SecretsStoreConfig {
        let mut config = SecretsStoreConfig::default();
        config
            .secret_ids
            .insert(CloudProvider::Aws, "prod/aws".to_string());
        config
            .secret_ids
            .insert(CloudProvider::Gcp, "prod/gcp".to_string());
        config
    }

    #[tokio::test]
    async fn test_decodes_blob() {
        let store = StaticStore(HashMap::from([(
            "prod/aws".to_string(),
            r#"{"aws": {"access_key_id": "AKIA", "secret_access_key": "s"}}"#.to_string(),
        )]));

        let cancel = CancellationToken::new();
        let bundle = credentials_from_store(&cancel, &config(), &store, CloudProvider::Aws)
            .await
            .unwrap();
        assert_eq!(bundle.aws.unwrap().access_key_id, "AKIA");
    }

    #[tokio::test]
    async fn test_unmapped_provider_is_configuration_error() {
        let store = StaticStore(HashMap::new());
        let cancel = CancellationToken::new();
        let err = credentials_from_store(&cancel, &config(), &store, CloudProvider::Azure)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_missing_secret_is_backend_error() {
        let store = StaticStore(HashMap::new());
        let cancel = CancellationToken::new();
        let err = credentials_from_store(&cancel, &config(), &store, CloudProvider::Gcp)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[tokio::test]
    async fn test_malformed_blob_is_backend_error() {
        let store = StaticStore(HashMap::from([("prod/aws".to_string(), "not json".to_string())]));
        let cancel = CancellationToken::new();
        let err = credentials_from_store(&cancel, &config(), &store, CloudProvider::Aws)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
