//! Vault KV version 2 client session.
//!
//! A [`VaultSession`] is created unauthenticated, authenticated exactly once
//! (token adoption or AppRole login) and then used for secret reads. There is
//! no renewal: a session lives for a single credential resolution and is
//! dropped afterwards.
//!
//! KV v2 responses nest the stored values one level down:
//!
//! ```json
//! { "data": { "data": { "url": "postgres://x" }, "metadata": { "version": 3 } } }
//! ```

use cloudport_core::{
    CancellationToken, CloudProvider, Error, Result, ResultExt, VaultAuth, VaultConfig,
    cancellable,
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const DEFAULT_APPROLE_MOUNT: &str = "approle";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pointer to one key of a KV v2 secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    path: String,
    key: String,
}

impl SecretReference {
    pub fn new(path: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }

    /// Full API path, including the mount and the `data/` segment.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.key)
    }
}

enum SessionState {
    Created,
    Authenticated { token: String },
}

/// An authenticated (or about to be) connection to a Vault server.
pub struct VaultSession {
    config: VaultConfig,
    client: reqwest::Client,
    state: SessionState,
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("address", &self.config.address)
            .field("auth", &self.config.auth.method())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct AppRoleLoginRequest<'a> {
    role_id: &'a str,
    secret_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: Option<LoginAuth>,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    #[serde(default)]
    client_token: String,
}

impl VaultSession {
    /// Create an unauthenticated session.
    pub fn new(config: VaultConfig) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(Error::Configuration("vault address is not set".to_string()));
        }
        if config.timeout_seconds == 0 {
            return Err(Error::Configuration("vault timeout must be at least 1s".to_string()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build vault client: {e}")))?;

        Ok(Self {
            config,
            client,
            state: SessionState::Created,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// KV v2 path holding `provider`'s credentials:
    /// `<mount>/data/<app>/<provider>/credentials`.
    pub fn kv_path(&self, provider: CloudProvider) -> String {
        format!(
            "{}/data/{}/{}/credentials",
            self.config.mount.trim_matches('/'),
            self.config.app.trim_matches('/'),
            provider
        )
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.address.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, self.url(path));
        if let Some(namespace) = self.config.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            builder = builder.header(NAMESPACE_HEADER, namespace);
        }
        if let SessionState::Authenticated { token } = &self.state {
            builder = builder.header(TOKEN_HEADER, token);
        }
        builder
    }

    /// Establish the session token using the configured method.
    pub async fn authenticate(&mut self, cancel: &CancellationToken) -> Result<()> {
        let token = match &self.config.auth {
            VaultAuth::Token { token } => {
                if token.trim().is_empty() {
                    return Err(Error::Configuration(
                        "vault token auth requires a non-empty token".to_string(),
                    ));
                }
                token.clone()
            }
            VaultAuth::AppRole {
                role_id,
                secret_id,
                mount,
            } => {
                if role_id.trim().is_empty() || secret_id.trim().is_empty() {
                    return Err(Error::Configuration(
                        "vault approle auth requires both role_id and secret_id".to_string(),
                    ));
                }
                let mount = mount.as_deref().unwrap_or(DEFAULT_APPROLE_MOUNT);
                cancellable(
                    cancel,
                    "vault approle login",
                    self.approle_login(mount, role_id, secret_id),
                )
                .await?
            }
            VaultAuth::AwsIam { .. } | VaultAuth::GcpIam { .. } => {
                return Err(Error::Unsupported(format!(
                    "vault auth method {} is not implemented",
                    self.config.auth.method()
                )));
            }
        };

        info!(
            address = %self.config.address,
            method = self.config.auth.method(),
            "Vault session authenticated"
        );
        self.state = SessionState::Authenticated { token };
        Ok(())
    }

    async fn approle_login(&self, mount: &str, role_id: &str, secret_id: &str) -> Result<String> {
        let login_path = format!("auth/{}/login", mount.trim_matches('/'));
        debug!(path = %login_path, "Exchanging approle credentials for a vault token");

        let response = self
            .request(Method::POST, &login_path)
            .json(&AppRoleLoginRequest { role_id, secret_id })
            .send()
            .await
            .map_err(|e| Error::Network(format!("vault login request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(format!(
                "vault approle login rejected ({status}): {text}"
            )));
        }
        if !status.is_success() {
            return Err(Error::Network(format!("vault approle login returned {status}")));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("unreadable vault login response: {e}")))?;

        login
            .auth
            .map(|auth| auth.client_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                Error::Authentication("vault approle login returned no client token".to_string())
            })
    }

    /// Read `key` from the KV v2 secret at `path`.
    pub async fn get_secret(
        &self,
        cancel: &CancellationToken,
        path: &str,
        key: &str,
    ) -> Result<String> {
        if !self.is_authenticated() {
            return Err(Error::Authentication("vault session used before authenticate".to_string()));
        }

        let data = cancellable(cancel, "vault secret read", self.read_data(path))
            .await
            .with_context(|| format!("reading {key}"))?;

        let value = data
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("key {key} not present at {path}")))?;

        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Type(format!("value of {key} at {path} is not a string")))
    }

    /// Fetch the inner `data` map of the secret at `path`.
    async fn read_data(&self, path: &str) -> Result<serde_json::Map<String, Value>> {
        debug!(path = %path, "Reading vault secret");

        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| Error::Network(format!("vault read of {path} failed: {e}")))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(Error::NotFound(format!("no secret at {path}")));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::Authentication(format!(
                    "vault denied access to {path} ({status})"
                )));
            }
            s if !s.is_success() => {
                return Err(Error::Network(format!("vault read of {path} returned {s}")));
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::NotFound(format!("unreadable secret at {path}: {e}")))?;

        match body.get("data").and_then(|outer| outer.get("data")) {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Err(Error::NotFound(format!("secret at {path} has no data wrapper"))),
        }
    }

    /// Resolve every reference, all or nothing.
    ///
    /// The first failure aborts and is returned wrapped with the logical name
    /// of the reference that failed.
    pub async fn get_secrets(
        &self,
        cancel: &CancellationToken,
        references: &BTreeMap<String, SecretReference>,
    ) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();

        for (name, reference) in references {
            let value = self
                .get_secret(cancel, reference.path(), reference.key())
                .await
                .with_context(|| format!("secret {name}"))?;
            values.insert(name.clone(), value);
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DB_PATH: &str = "secret/data/app/db";

    fn token_config(server: &MockServer) -> VaultConfig {
        VaultConfig::new(
            server.uri(),
            VaultAuth::Token {
                token: "root-token".to_string(),
            },
        )
    }

    async fn mount_secret(server: &MockServer, secret_path: &str, data: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/{secret_path}")))
            .and(header(TOKEN_HEADER, "root-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": data, "metadata": { "version": 1 } }
            })))
            .mount(server)
            .await;
    }

    async fn authenticated(server: &MockServer) -> VaultSession {
        let mut session = VaultSession::new(token_config(server)).unwrap();
        let cancel = CancellationToken::new();
        session.authenticate(&cancel).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_get_secret_round_trip() {
        let server = MockServer::start().await;
        mount_secret(&server, DB_PATH, json!({ "url": "postgres://x" })).await;

        let session = authenticated(&server).await;
        let value = session
            .get_secret(&CancellationToken::new(), "secret/data/app/db", "url")
            .await
            .unwrap();

        assert_eq!(value, "postgres://x");
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_found() {
        let server = MockServer::start().await;
        mount_secret(&server, DB_PATH, json!({ "url": "postgres://x" })).await;

        let session = authenticated(&server).await;
        let err = session
            .get_secret(&CancellationToken::new(), "secret/data/app/db", "password")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(err.to_string().contains("password"));
        assert!(err.to_string().contains("secret/data/app/db"));
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
            .mount(&server)
            .await;

        let session = authenticated(&server).await;
        let err = session
            .get_secret(&CancellationToken::new(), "secret/data/app/nope", "url")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "reading url: Not found: no secret at secret/data/app/nope"
        );
    }

    #[tokio::test]
    async fn test_stalled_server_hits_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let config = token_config(&server).with_timeout_seconds(1);
        let mut session = VaultSession::new(config).unwrap();
        let cancel = CancellationToken::new();
        session.authenticate(&cancel).await.unwrap();

        let started = std::time::Instant::now();
        let err = session
            .get_secret(&cancel, DB_PATH, "url")
            .await
            .unwrap_err();

        assert!(matches!(err.root(), Error::Network(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let config = VaultConfig::new(
            "http://127.0.0.1:8200",
            VaultAuth::Token {
                token: "root-token".to_string(),
            },
        );
        let err = VaultSession::new(config.with_timeout_seconds(0)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_response_without_data_wrapper_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app/db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "url": "postgres://x" }
            })))
            .mount(&server)
            .await;

        let session = authenticated(&server).await;
        let err = session
            .get_secret(&CancellationToken::new(), "secret/data/app/db", "url")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_non_string_value_is_type_error() {
        let server = MockServer::start().await;
        mount_secret(&server, DB_PATH, json!({ "port": 5432 })).await;

        let session = authenticated(&server).await;
        let err = session
            .get_secret(&CancellationToken::new(), "secret/data/app/db", "port")
            .await
            .unwrap_err();

        assert!(matches!(err.root(), Error::Type(_)));
    }

    #[tokio::test]
    async fn test_read_before_authenticate_fails() {
        let server = MockServer::start().await;
        let session = VaultSession::new(token_config(&server)).unwrap();

        let err = session
            .get_secret(&CancellationToken::new(), "secret/data/app/db", "url")
            .await
            .unwrap_err();

        assert!(err.is_authentication());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_token_is_configuration_error() {
        let config = VaultConfig::new(
            "http://127.0.0.1:8200",
            VaultAuth::Token {
                token: String::new(),
            },
        );
        let mut session = VaultSession::new(config).unwrap();
        let cancel = CancellationToken::new();
        let err = session.authenticate(&cancel).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_approle_requires_both_ids_before_network() {
        let server = MockServer::start().await;

        for (role_id, secret_id) in [("", "secret"), ("role", ""), ("", "")] {
            let config = VaultConfig::new(
                server.uri(),
                VaultAuth::AppRole {
                    role_id: role_id.to_string(),
                    secret_id: secret_id.to_string(),
                    mount: None,
                },
            );
            let mut session = VaultSession::new(config).unwrap();
            let cancel = CancellationToken::new();
            let err = session.authenticate(&cancel).await.unwrap_err();
            assert!(err.is_configuration());
        }

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approle_login_sets_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .and(body_json(json!({ "role_id": "role", "secret_id": "secret" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": { "client_token": "root-token", "lease_duration": 3600 }
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_secret(
            &server,
            "secret/data/cloudport/aws/credentials",
            json!({ "access_key_id": "AKIA" }),
        )
        .await;

        let config = VaultConfig::new(
            server.uri(),
            VaultAuth::AppRole {
                role_id: "role".to_string(),
                secret_id: "secret".to_string(),
                mount: None,
            },
        );
        let cancel = CancellationToken::new();
        let mut session = VaultSession::new(config).unwrap();
        session.authenticate(&cancel).await.unwrap();

        let path = session.kv_path(CloudProvider::Aws);
        assert_eq!(path, "secret/data/cloudport/aws/credentials");
        let value = session
            .get_secret(&cancel, &path, "access_key_id")
            .await
            .unwrap();
        assert_eq!(value, "AKIA");
    }

    #[tokio::test]
    async fn test_approle_without_token_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "auth": null })))
            .mount(&server)
            .await;

        let config = VaultConfig::new(
            server.uri(),
            VaultAuth::AppRole {
                role_id: "role".to_string(),
                secret_id: "secret".to_string(),
                mount: None,
            },
        );
        let mut session = VaultSession::new(config).unwrap();
        let cancel = CancellationToken::new();
        let err = session.authenticate(&cancel).await.unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn test_iam_methods_are_unsupported() {
        for auth in [
            VaultAuth::AwsIam {
                role: "deployer".to_string(),
            },
            VaultAuth::GcpIam {
                role: "deployer".to_string(),
            },
        ] {
            let config = VaultConfig::new("http://127.0.0.1:8200", auth);
            let mut session = VaultSession::new(config).unwrap();
            let cancel = CancellationToken::new();
            let err = session.authenticate(&cancel).await.unwrap_err();
            assert!(err.is_unsupported());
        }
    }

    #[tokio::test]
    async fn test_namespace_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app/db"))
            .and(header(NAMESPACE_HEADER, "team-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": { "url": "postgres://x" } }
            })))
            .mount(&server)
            .await;

        let config = token_config(&server).with_namespace("team-a");
        let mut session = VaultSession::new(config).unwrap();
        let cancel = CancellationToken::new();
        session.authenticate(&cancel).await.unwrap();
        let value = session
            .get_secret(&cancel, "secret/data/app/db", "url")
            .await
            .unwrap();
        assert_eq!(value, "postgres://x");
    }

    #[tokio::test]
    async fn test_get_secrets_all_or_nothing() {
        let server = MockServer::start().await;
        mount_secret(&server, DB_PATH, json!({ "url": "postgres://x" })).await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app/cache"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let session = authenticated(&server).await;
        let references = BTreeMap::from([
            (
                "database".to_string(),
                SecretReference::new("secret/data/app/db", "url"),
            ),
            (
                "redis".to_string(),
                SecretReference::new("secret/data/app/cache", "url"),
            ),
        ]);

        let err = session
            .get_secrets(&CancellationToken::new(), &references)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("secret redis:"));
    }

    #[tokio::test]
    async fn test_get_secrets_success() {
        let server = MockServer::start().await;
        mount_secret(
            &server,
            DB_PATH,
            json!({ "url": "postgres://x", "user": "app" }),
        )
        .await;

        let session = authenticated(&server).await;
        let references = BTreeMap::from([
            ("url".to_string(), SecretReference::new(DB_PATH, "url")),
            ("user".to_string(), SecretReference::new(DB_PATH, "user")),
        ]);

        let values = session
            .get_secrets(&CancellationToken::new(), &references)
            .await
            .unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(values["url"], "postgres://x");
        assert_eq!(values["user"], "app");
    }

    #[tokio::test]
    async fn test_cancelled_read() {
        let server = MockServer::start().await;
        let session = authenticated(&server).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session
            .get_secret(&cancel, "secret/data/app/db", "url")
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
