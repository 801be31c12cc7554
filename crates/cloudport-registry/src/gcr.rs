//! Google Artifact Registry (Docker format).

use crate::auth::Authenticator;
use crate::registry::{Registry, accept_existing, not_authenticated};
use crate::rest::{check, check_grant, network};
use async_trait::async_trait;
use chrono::Utc;
use cloudport_core::{CancellationToken, Error, GcpCredentials, Result, ResultExt, cancellable};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// The Artifact Registry operations a registry needs.
#[async_trait]
pub trait ArtifactRegistryApi: Send + Sync {
    /// Succeeds if the repository exists, `NotFound` otherwise.
    async fn get_repository(&self, project: &str, location: &str, repository: &str) -> Result<()>;

    /// Create a Docker-format repository.
    async fn create_repository(
        &self,
        project: &str,
        location: &str,
        repository: &str,
    ) -> Result<()>;

    /// OAuth2 access token usable for pushes.
    async fn access_token(&self) -> Result<String>;
}

/// Fields of a service-account key file used for the JWT bearer grant.
#[derive(Deserialize)]
struct ServiceAccountKey {
    #[serde(default)]
    client_email: Option<String>,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct CreateRepository {
    format: &'static str,
}

/// [`ArtifactRegistryApi`] over the Artifact Registry v1 REST API.
pub struct GoogleRestApi {
    client: reqwest::Client,
    client_email: String,
    signing_key: EncodingKey,
    token_uri: String,
    api_url: String,
    token: OnceCell<String>,
}

impl GoogleRestApi {
    /// Parse the service-account key carried in `credentials`.
    pub fn new(credentials: &GcpCredentials) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(&credentials.service_account_key)
            .map_err(|e| Error::Configuration(format!("invalid service account key: {e}")))?;

        let client_email = key
            .client_email
            .filter(|e| !e.is_empty())
            .or_else(|| credentials.service_account_email.clone())
            .ok_or_else(|| {
                Error::Configuration("service account key has no client_email".to_string())
            })?;

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            Error::Configuration(format!("invalid service account private key: {e}"))
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            client_email,
            signing_key,
            token_uri: key.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.into()),
            api_url: "https://artifactregistry.googleapis.com".to_string(),
            token: OnceCell::new(),
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn repositories_url(&self, project: &str, location: &str) -> String {
        format!(
            "{}/v1/projects/{project}/locations/{location}/repositories",
            self.api_url
        )
    }

    fn assertion(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = GrantClaims {
            iss: &self.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + 3600,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| Error::Authentication(format!("failed to sign token request: {e}")))
    }

    async fn token(&self) -> Result<&str> {
        self.token
            .get_or_try_init(|| async {
                let assertion = self.assertion()?;
                debug!(service_account = %self.client_email, "Requesting Google access token");

                let response = self
                    .client
                    .post(&self.token_uri)
                    .form(&[
                        ("grant_type", JWT_BEARER_GRANT),
                        ("assertion", assertion.as_str()),
                    ])
                    .send()
                    .await
                    .map_err(|e| network("Google token request", e))?;

                let response = check_grant(response, "Google token request").await?;

                let token: TokenResponse = response.json().await.map_err(|e| {
                    Error::Authentication(format!("invalid Google token response: {e}"))
                })?;
                Ok::<_, Error>(token.access_token)
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl ArtifactRegistryApi for GoogleRestApi {
    async fn get_repository(&self, project: &str, location: &str, repository: &str) -> Result<()> {
        let what = format!("Artifact Registry repository {repository}");
        let token = self.token().await?;

        let response = self
            .client
            .get(format!("{}/{repository}", self.repositories_url(project, location)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| network(&what, e))?;

        check(response, &what).await?;
        Ok(())
    }

    async fn create_repository(
        &self,
        project: &str,
        location: &str,
        repository: &str,
    ) -> Result<()> {
        let what = format!("Artifact Registry repository {repository}");
        let token = self.token().await?;

        let response = self
            .client
            .post(self.repositories_url(project, location))
            .query(&[("repositoryId", repository)])
            .bearer_auth(token)
            .json(&CreateRepository { format: "DOCKER" })
            .send()
            .await
            .map_err(|e| network(&what, e))?;

        check(response, &what).await?;
        Ok(())
    }

    async fn access_token(&self) -> Result<String> {
        self.token().await.map(str::to_string)
    }
}

/// A Docker repository in Google Artifact Registry.
pub struct ArtifactRegistry {
    project: String,
    location: String,
    repository: String,
    image: String,
    tag: String,
    api: Box<dyn ArtifactRegistryApi>,
    authenticated: bool,
}

impl ArtifactRegistry {
    /// The image name defaults to the repository name.
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
        api: Box<dyn ArtifactRegistryApi>,
    ) -> Self {
        let repository = repository.into();
        Self {
            project: project.into(),
            location: location.into(),
            image: repository.clone(),
            repository,
            tag: tag.into(),
            api,
            authenticated: false,
        }
    }

    /// Push under a different image name inside the repository.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }
}

/// Registry host and path for a Docker repository.
pub fn artifact_registry_url(location: &str, project: &str, repository: &str) -> String {
    format!("{location}-docker.pkg.dev/{project}/{repository}")
}

#[async_trait]
impl Registry for ArtifactRegistry {
    fn registry_url(&self) -> String {
        artifact_registry_url(&self.location, &self.project, &self.repository)
    }

    async fn authenticate(&mut self, cancel: &CancellationToken) -> Result<Authenticator> {
        let (project, location, repository) = (&self.project, &self.location, &self.repository);
        debug!(registry = %self.registry_url(), "Ensuring Artifact Registry repository");

        match cancellable(
            cancel,
            "Artifact Registry get repository",
            self.api.get_repository(project, location, repository),
        )
        .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                let created = cancellable(
                    cancel,
                    "Artifact Registry create repository",
                    self.api.create_repository(project, location, repository),
                )
                .await;
                accept_existing(created, repository).with_context(|| {
                    format!("creating Artifact Registry repository {repository}")
                })?;
                info!(registry = %self.registry_url(), "Artifact Registry repository created");
            }
            Err(e) => {
                return Err(e.context(format!(
                    "looking up Artifact Registry repository {repository}"
                )));
            }
        }

        let token = cancellable(cancel, "Google access token", self.api.access_token()).await?;

        self.authenticated = true;
        Ok(Authenticator::oauth2_token(token))
    }

    fn image_reference(&self) -> Result<String> {
        self.image_uri(&self.tag)
    }

    fn image_uri(&self, tag: &str) -> Result<String> {
        if !self.authenticated {
            return Err(not_authenticated("Artifact Registry"));
        }
        Ok(format!("{}/{}:{tag}", self.registry_url(), self.image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRIVATE_KEY: &str = include_str!("../testdata/service-account-key.pem");
    const REPOSITORIES: &str = "/v1/projects/myproj/locations/us-central1/repositories";

    fn credentials(token_uri: &str) -> GcpCredentials {
        GcpCredentials {
            project_id: "myproj".to_string(),
            service_account_key: json!({
                "type": "service_account",
                "client_email": "deployer@myproj.iam.gserviceaccount.com",
                "private_key": PRIVATE_KEY,
                "token_uri": token_uri,
            })
            .to_string(),
            service_account_email: None,
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant-type%3Ajwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.token",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn registry(server: &MockServer) -> ArtifactRegistry {
        let api = GoogleRestApi::new(&credentials(&format!("{}/token", server.uri())))
            .unwrap()
            .with_api_url(server.uri());
        ArtifactRegistry::new("myproj", "us-central1", "myrepo", "v3", Box::new(api))
    }

    #[test]
    fn test_registry_url() {
        assert_eq!(
            artifact_registry_url("us-central1", "myproj", "myrepo"),
            "us-central1-docker.pkg.dev/myproj/myrepo"
        );
    }

    #[tokio::test]
    async fn test_creates_missing_repository() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("GET"))
            .and(path(format!("{REPOSITORIES}/myrepo")))
            .and(header("authorization", "Bearer ya29.token"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REPOSITORIES))
            .and(query_param("repositoryId", "myrepo"))
            .and(body_string_contains("DOCKER"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "operations/1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut registry = registry(&server);
        assert_eq!(
            registry.registry_url(),
            "us-central1-docker.pkg.dev/myproj/myrepo"
        );
        assert!(registry.image_reference().unwrap_err().is_configuration());

        let cancel = CancellationToken::new();
        let auth = registry.authenticate(&cancel).await.unwrap();
        assert_eq!(auth.username(), "oauth2accesstoken");
        assert_eq!(auth.password(), "ya29.token");
        assert_eq!(
            registry.image_reference().unwrap(),
            "us-central1-docker.pkg.dev/myproj/myrepo/myrepo:v3"
        );
    }

    #[tokio::test]
    async fn test_existing_repository_with_custom_image() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("GET"))
            .and(path(format!("{REPOSITORIES}/myrepo")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "format": "DOCKER"
            })))
            .mount(&server)
            .await;

        let mut registry = registry(&server).with_image("api");
        let cancel = CancellationToken::new();
        registry.authenticate(&cancel).await.unwrap();
        assert_eq!(
            registry.image_uri("latest").unwrap(),
            "us-central1-docker.pkg.dev/myproj/myrepo/api:latest"
        );
    }

    #[tokio::test]
    async fn test_unrelated_conflict_fails_authenticate() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("GET"))
            .and(path(format!("{REPOSITORIES}/myrepo")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REPOSITORIES))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": {
                    "code": 409,
                    "message": "Another operation on repository myrepo is in progress",
                    "status": "ABORTED"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut registry = registry(&server);
        let cancel = CancellationToken::new();
        let err = registry.authenticate(&cancel).await.unwrap_err();

        assert!(!err.is_already_exists());
        assert!(err.to_string().contains("in progress"));
        assert!(registry.image_reference().unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_rejected_grant_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let mut registry = registry(&server);
        let cancel = CancellationToken::new();
        let err = registry.authenticate(&cancel).await.unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn test_invalid_key_is_configuration_error() {
        let credentials = GcpCredentials {
            project_id: "myproj".to_string(),
            service_account_key: "not json".to_string(),
            service_account_email: None,
        };
        assert!(GoogleRestApi::new(&credentials).is_err_and(|e| e.is_configuration()));
    }
}
