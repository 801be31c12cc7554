//! Azure Container Registry.

use crate::auth::Authenticator;
use crate::registry::{Registry, accept_existing};
use crate::rest::{check, check_grant, network};
use async_trait::async_trait;
use cloudport_core::{AzureCredentials, CancellationToken, Error, Result, ResultExt, cancellable};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

const ARM_API_VERSION: &str = "2023-07-01";
const REGISTRY_PROVIDER: &str = "providers/Microsoft.ContainerRegistry/registries";

/// The Azure Resource Manager operations a registry needs.
#[async_trait]
pub trait AcrApi: Send + Sync {
    /// Login server of an existing registry, `NotFound` otherwise.
    async fn get_registry(&self, resource_group: &str, name: &str) -> Result<String>;

    /// Create a Basic-tier registry with the admin user enabled.
    async fn create_registry(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<()>;

    /// Admin username and password.
    async fn admin_credentials(&self, resource_group: &str, name: &str) -> Result<Authenticator>;
}

/// [`AcrApi`] over the ARM REST API using a client-credentials token.
pub struct AzureRestApi {
    client: reqwest::Client,
    credentials: AzureCredentials,
    login_url: String,
    management_url: String,
    token: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct RegistryResource {
    #[serde(default)]
    properties: RegistryProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryProperties {
    #[serde(default)]
    login_server: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRegistry<'a> {
    location: &'a str,
    sku: Sku,
    properties: CreateProperties,
}

#[derive(Debug, Serialize)]
struct Sku {
    name: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProperties {
    admin_user_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RegistryCredentials {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    passwords: Vec<RegistryPassword>,
}

#[derive(Debug, Deserialize)]
struct RegistryPassword {
    #[serde(default)]
    value: Option<String>,
}

impl AzureRestApi {
    pub fn new(credentials: AzureCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            login_url: "https://login.microsoftonline.com".to_string(),
            management_url: "https://management.azure.com".to_string(),
            token: OnceCell::new(),
        }
    }

    /// Override the Azure AD and ARM endpoints (sovereign clouds, tests).
    pub fn with_endpoints(
        mut self,
        login_url: impl Into<String>,
        management_url: impl Into<String>,
    ) -> Self {
        self.login_url = login_url.into();
        self.management_url = management_url.into();
        self
    }

    async fn access_token(&self) -> Result<&str> {
        self.token
            .get_or_try_init(|| async {
                let params = [
                    ("client_id", self.credentials.client_id.as_str()),
                    ("client_secret", self.credentials.client_secret.as_str()),
                    ("scope", "https://management.azure.com/.default"),
                    ("grant_type", "client_credentials"),
                ];

                let response = self
                    .client
                    .post(format!(
                        "{}/{}/oauth2/v2.0/token",
                        self.login_url, self.credentials.tenant_id
                    ))
                    .form(&params)
                    .send()
                    .await
                    .map_err(|e| network("Azure AD token request", e))?;

                let response = check_grant(response, "Azure AD token request").await?;

                let token: TokenResponse = response.json().await.map_err(|e| {
                    Error::Authentication(format!("invalid Azure AD token response: {e}"))
                })?;
                Ok::<_, Error>(token.access_token)
            })
            .await
            .map(String::as_str)
    }

    fn registry_resource_url(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{resource_group}/{REGISTRY_PROVIDER}/{name}",
            self.management_url, self.credentials.subscription_id
        )
    }
}

#[async_trait]
impl AcrApi for AzureRestApi {
    async fn get_registry(&self, resource_group: &str, name: &str) -> Result<String> {
        let what = format!("container registry {name}");
        let token = self.access_token().await?;

        let response = self
            .client
            .get(self.registry_resource_url(resource_group, name))
            .query(&[("api-version", ARM_API_VERSION)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| network(&what, e))?;

        let resource: RegistryResource = check(response, &what)
            .await?
            .json()
            .await
            .map_err(|e| Error::Backend(format!("{what}: invalid response: {e}")))?;

        resource
            .properties
            .login_server
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Backend(format!("{what} has no login server")))
    }

    async fn create_registry(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<()> {
        let what = format!("container registry {name}");
        let token = self.access_token().await?;

        let body = CreateRegistry {
            location,
            sku: Sku { name: "Basic" },
            properties: CreateProperties {
                admin_user_enabled: true,
            },
        };

        let response = self
            .client
            .put(self.registry_resource_url(resource_group, name))
            .query(&[("api-version", ARM_API_VERSION)])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| network(&what, e))?;

        check(response, &what).await?;
        Ok(())
    }

    async fn admin_credentials(&self, resource_group: &str, name: &str) -> Result<Authenticator> {
        let what = format!("credentials of container registry {name}");
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!(
                "{}/listCredentials",
                self.registry_resource_url(resource_group, name)
            ))
            .query(&[("api-version", ARM_API_VERSION)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| network(&what, e))?;

        let credentials: RegistryCredentials = check(response, &what)
            .await?
            .json()
            .await
            .map_err(|e| Error::Backend(format!("{what}: invalid response: {e}")))?;

        let username = credentials
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Authentication(format!("{what}: admin username missing")))?;
        let password = credentials
            .passwords
            .into_iter()
            .find_map(|p| p.value.filter(|v| !v.is_empty()))
            .ok_or_else(|| Error::Authentication(format!("{what}: admin password missing")))?;

        Ok(Authenticator::basic(username, password))
    }
}

/// An Azure container registry holding one image repository.
pub struct AcrRegistry {
    resource_group: String,
    registry_name: String,
    location: String,
    image: String,
    tag: String,
    api: Box<dyn AcrApi>,
    login_server: Option<String>,
}

impl AcrRegistry {
    pub fn new(
        resource_group: impl Into<String>,
        registry_name: impl Into<String>,
        location: impl Into<String>,
        image: impl Into<String>,
        tag: impl Into<String>,
        api: Box<dyn AcrApi>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            registry_name: registry_name.into(),
            location: location.into(),
            image: image.into(),
            tag: tag.into(),
            api,
            login_server: None,
        }
    }

    fn url(&self) -> Result<&str> {
        self.login_server
            .as_deref()
            .ok_or_else(|| crate::registry::not_authenticated("ACR"))
    }
}

#[async_trait]
impl Registry for AcrRegistry {
    fn registry_url(&self) -> String {
        self.login_server
            .clone()
            .unwrap_or_else(|| format!("{}.azurecr.io", self.registry_name.to_lowercase()))
    }

    async fn authenticate(&mut self, cancel: &CancellationToken) -> Result<Authenticator> {
        let (group, name) = (&self.resource_group, &self.registry_name);
        debug!(resource_group = %group, registry = %name, "Ensuring container registry");

        let login_server = match cancellable(
            cancel,
            "ACR get registry",
            self.api.get_registry(group, name),
        )
        .await
        {
            Ok(server) => server,
            Err(e) if e.is_not_found() => {
                let created = cancellable(
                    cancel,
                    "ACR create registry",
                    self.api.create_registry(group, name, &self.location),
                )
                .await;
                accept_existing(created, name)
                    .with_context(|| format!("creating container registry {name}"))?;
                info!(resource_group = %group, registry = %name, "Container registry created");

                cancellable(
                    cancel,
                    "ACR get registry",
                    self.api.get_registry(group, name),
                )
                .await?
            }
            Err(e) => return Err(e.context(format!("looking up container registry {name}"))),
        };

        let authenticator = cancellable(
            cancel,
            "ACR admin credentials",
            self.api.admin_credentials(group, name),
        )
        .await?;

        self.login_server = Some(login_server);
        Ok(authenticator)
    }

    fn image_reference(&self) -> Result<String> {
        self.image_uri(&self.tag)
    }

    fn image_uri(&self, tag: &str) -> Result<String> {
        Ok(format!("{}/{}:{tag}", self.url()?, self.image))
    }
}
