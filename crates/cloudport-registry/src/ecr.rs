//! Amazon Elastic Container Registry.

use crate::auth::Authenticator;
use crate::registry::{Registry, accept_existing, not_authenticated};
use async_trait::async_trait;
use aws_sdk_ecr::error::DisplayErrorContext;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cloudport_core::{AwsCredentials, CancellationToken, Error, Result, ResultExt, cancellable};
use tracing::{debug, info};

/// The ECR operations a registry needs.
#[async_trait]
pub trait EcrApi: Send + Sync {
    /// Account that owns the credentials.
    async fn account_id(&self) -> Result<String>;

    /// Succeeds if the repository exists, `NotFound` otherwise.
    async fn describe_repository(&self, name: &str) -> Result<()>;

    /// Create the repository. `AlreadyExists` if it was created concurrently.
    async fn create_repository(&self, name: &str) -> Result<()>;

    /// Base64-encoded `username:password` push token.
    async fn authorization_token(&self) -> Result<String>;
}

/// [`EcrApi`] backed by the AWS SDK.
pub struct AwsEcrApi {
    ecr: aws_sdk_ecr::Client,
    sts: aws_sdk_sts::Client,
}

impl AwsEcrApi {
    /// Build clients from static credentials pinned to `region`.
    pub async fn new(credentials: &AwsCredentials, region: &str) -> Self {
        let provider = aws_sdk_ecr::config::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            None,
            "cloudport",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .credentials_provider(provider)
            .load()
            .await;

        Self::from_sdk_config(&sdk_config)
    }

    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            ecr: aws_sdk_ecr::Client::new(sdk_config),
            sts: aws_sdk_sts::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl EcrApi for AwsEcrApi {
    async fn account_id(&self) -> Result<String> {
        let output = self.sts.get_caller_identity().send().await.map_err(|e| {
            Error::Authentication(format!(
                "caller identity lookup failed: {}",
                DisplayErrorContext(&e)
            ))
        })?;

        output
            .account()
            .map(str::to_string)
            .ok_or_else(|| Error::Authentication("caller identity has no account".to_string()))
    }

    async fn describe_repository(&self, name: &str) -> Result<()> {
        match self
            .ecr
            .describe_repositories()
            .repository_names(name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|svc| svc.is_repository_not_found_exception()) =>
            {
                Err(Error::NotFound(format!("ECR repository {name}")))
            }
            Err(e) => Err(Error::Network(format!(
                "describe repository {name}: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn create_repository(&self, name: &str) -> Result<()> {
        match self
            .ecr
            .create_repository()
            .repository_name(name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|svc| svc.is_repository_already_exists_exception()) =>
            {
                Err(Error::AlreadyExists(format!("ECR repository {name}")))
            }
            Err(e) => Err(Error::Network(format!(
                "create repository {name}: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn authorization_token(&self) -> Result<String> {
        let output = self
            .ecr
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| {
                Error::Authentication(format!(
                    "authorization token request failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        output
            .authorization_data()
            .first()
            .and_then(|data| data.authorization_token())
            .map(str::to_string)
            .ok_or_else(|| Error::Authentication("no ECR authorization data returned".to_string()))
    }
}

/// An ECR repository in one account and region.
pub struct EcrRegistry {
    region: String,
    repository: String,
    tag: String,
    api: Box<dyn EcrApi>,
    url: Option<String>,
}

impl EcrRegistry {
    pub fn new(
        region: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
        api: Box<dyn EcrApi>,
    ) -> Self {
        Self {
            region: region.into(),
            repository: repository.into(),
            tag: tag.into(),
            api,
            url: None,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    fn url(&self) -> Result<&str> {
        self.url.as_deref().ok_or_else(|| not_authenticated("ECR"))
    }
}

/// Registry host for an account and region.
pub fn ecr_registry_url(account_id: &str, region: &str) -> String {
    format!("{account_id}.dkr.ecr.{region}.amazonaws.com")
}

/// Decode a base64 `username:password` token.
fn decode_authorization_token(token: &str) -> Result<Authenticator> {
    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|e| Error::Authentication(format!("authorization token is not base64: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| Error::Authentication("authorization token is not UTF-8".to_string()))?;

    let (username, password) = decoded.split_once(':').ok_or_else(|| {
        Error::Authentication("authorization token is not username:password".to_string())
    })?;

    Ok(Authenticator::basic(username, password))
}

#[async_trait]
impl Registry for EcrRegistry {
    /// The account segment is only known after `authenticate`; until then the
    /// region-level host is returned.
    fn registry_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("dkr.ecr.{}.amazonaws.com", self.region))
    }

    fn name(&self) -> String {
        format!("{}/{}", self.registry_url(), self.repository)
    }

    async fn authenticate(&mut self, cancel: &CancellationToken) -> Result<Authenticator> {
        let account_id = cancellable(cancel, "ECR account lookup", self.api.account_id()).await?;
        let url = ecr_registry_url(&account_id, &self.region);
        debug!(registry = %url, repository = %self.repository, "Ensuring ECR repository");

        match cancellable(
            cancel,
            "ECR describe repository",
            self.api.describe_repository(&self.repository),
        )
        .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                let created = cancellable(
                    cancel,
                    "ECR create repository",
                    self.api.create_repository(&self.repository),
                )
                .await;
                accept_existing(created, &self.repository)
                    .with_context(|| format!("creating ECR repository {}", self.repository))?;
                info!(registry = %url, repository = %self.repository, "ECR repository created");
            }
            Err(e) => {
                return Err(e.context(format!("describing ECR repository {}", self.repository)));
            }
        }

        let token = cancellable(
            cancel,
            "ECR authorization token",
            self.api.authorization_token(),
        )
        .await?;
        let authenticator = decode_authorization_token(&token)?;

        self.url = Some(url);
        Ok(authenticator)
    }

    fn image_reference(&self) -> Result<String> {
        self.image_uri(&self.tag)
    }

    fn image_uri(&self, tag: &str) -> Result<String> {
        Ok(format!("{}/{}:{tag}", self.url()?, self.repository))
    }
}
