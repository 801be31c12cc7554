//! Environment-variable credential source.

use cloudport_core::{
    AwsCredentials, AzureCredentials, CloudProvider, CloudflareCredentials, Error,
    GcpCredentials, ProviderCredentials, Result,
};
use std::collections::HashMap;
use tracing::debug;

/// Key-value lookup standing in for the process environment.
pub trait EnvLookup: Send + Sync {
    /// Value of `key`, or `None` when unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed mapping, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvLookup for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const GCP_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const GCP_SERVICE_ACCOUNT_KEY: &str = "GCP_SERVICE_ACCOUNT_KEY";
pub const GCP_SERVICE_ACCOUNT_EMAIL: &str = "GCP_SERVICE_ACCOUNT_EMAIL";
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const AZURE_SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
pub const CLOUDFLARE_API_TOKEN: &str = "CLOUDFLARE_API_TOKEN";
pub const CLOUDFLARE_ACCOUNT_ID: &str = "CLOUDFLARE_ACCOUNT_ID";
pub const CLOUDFLARE_EMAIL: &str = "CLOUDFLARE_EMAIL";

/// Required variables per provider.
pub fn required_vars(provider: CloudProvider) -> &'static [&'static str] {
    match provider {
        CloudProvider::Aws => &[AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY],
        CloudProvider::Gcp => &[GCP_PROJECT_ID, GCP_SERVICE_ACCOUNT_KEY],
        CloudProvider::Azure => &[
            AZURE_TENANT_ID,
            AZURE_CLIENT_ID,
            AZURE_CLIENT_SECRET,
            AZURE_SUBSCRIPTION_ID,
        ],
        CloudProvider::Cloudflare => &[CLOUDFLARE_API_TOKEN],
    }
}

/// Collects required variables, failing with every missing name at once.
struct Required<'a> {
    env: &'a dyn EnvLookup,
    values: HashMap<&'static str, String>,
}

impl<'a> Required<'a> {
    fn read(env: &'a dyn EnvLookup, provider: CloudProvider) -> Result<Self> {
        let mut values = HashMap::new();
        let mut missing = Vec::new();

        for &name in required_vars(provider) {
            match env.get(name).filter(|v| !v.trim().is_empty()) {
                Some(value) => {
                    values.insert(name, value);
                }
                None => missing.push(name.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(Error::MissingCredentials { provider, missing });
        }

        Ok(Self { env, values })
    }

    fn take(&mut self, name: &'static str) -> String {
        self.values.remove(name).unwrap_or_default()
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.env.get(name).filter(|v| !v.is_empty())
    }
}

/// Build `provider`'s credential bundle from environment variables.
///
/// Fails with `MissingCredentials` naming every absent or empty required
/// variable; optional variables are simply left out.
pub fn credentials_from_env(
    env: &dyn EnvLookup,
    provider: CloudProvider,
) -> Result<ProviderCredentials> {
    let mut vars = Required::read(env, provider)?;

    let bundle = match provider {
        CloudProvider::Aws => ProviderCredentials::aws(AwsCredentials {
            access_key_id: vars.take(AWS_ACCESS_KEY_ID),
            secret_access_key: vars.take(AWS_SECRET_ACCESS_KEY),
            session_token: vars.optional(AWS_SESSION_TOKEN),
        }),
        CloudProvider::Gcp => ProviderCredentials::gcp(GcpCredentials {
            project_id: vars.take(GCP_PROJECT_ID),
            service_account_key: vars.take(GCP_SERVICE_ACCOUNT_KEY),
            service_account_email: vars.optional(GCP_SERVICE_ACCOUNT_EMAIL),
        }),
        CloudProvider::Azure => ProviderCredentials::azure(AzureCredentials {
            tenant_id: vars.take(AZURE_TENANT_ID),
            client_id: vars.take(AZURE_CLIENT_ID),
            client_secret: vars.take(AZURE_CLIENT_SECRET),
            subscription_id: vars.take(AZURE_SUBSCRIPTION_ID),
        }),
        CloudProvider::Cloudflare => ProviderCredentials::cloudflare(CloudflareCredentials {
            api_token: vars.take(CLOUDFLARE_API_TOKEN),
            account_id: vars.optional(CLOUDFLARE_ACCOUNT_ID),
            email: vars.optional(CLOUDFLARE_EMAIL),
        }),
    };

    debug!(provider = %provider, "Credentials read from environment");
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudport_core::validate_credentials;
    use pretty_assertions::assert_eq;

    fn full_env() -> MapEnv {
        MapEnv::new()
            .with(AWS_ACCESS_KEY_ID, "AKIAEXAMPLE")
            .with(AWS_SECRET_ACCESS_KEY, "secret")
            .with(GCP_PROJECT_ID, "myproj")
            .with(GCP_SERVICE_ACCOUNT_KEY, "{\"type\":\"service_account\"}")
            .with(AZURE_TENANT_ID, "tenant")
            .with(AZURE_CLIENT_ID, "client")
            .with(AZURE_CLIENT_SECRET, "client-secret")
            .with(AZURE_SUBSCRIPTION_ID, "subscription")
            .with(CLOUDFLARE_API_TOKEN, "cf-token")
    }

    #[test]
    fn test_all_providers_resolve_with_full_env() {
        let env = full_env();
        for provider in CloudProvider::ALL {
            let bundle = credentials_from_env(&env, provider).unwrap();
            assert!(
                validate_credentials(&bundle, provider).is_ok(),
                "{provider}"
            );
        }
    }

    #[test]
    fn test_any_single_missing_variable_fails() {
        for provider in CloudProvider::ALL {
            for &name in required_vars(provider) {
                let env: MapEnv = required_vars(provider)
                    .iter()
                    .filter(|&&n| n != name)
                    .map(|&n| (n, "value"))
                    .collect();

                match credentials_from_env(&env, provider).unwrap_err() {
                    Error::MissingCredentials { missing, .. } => {
                        assert_eq!(missing, vec![name.to_string()])
                    }
                    other => panic!("unexpected error for {name}: {other}"),
                }
            }
        }
    }

    #[test]
    fn test_empty_variable_counts_as_missing() {
        let env = MapEnv::new()
            .with(AWS_ACCESS_KEY_ID, "AKIAEXAMPLE")
            .with(AWS_SECRET_ACCESS_KEY, "");
        let err = credentials_from_env(&env, CloudProvider::Aws).unwrap_err();
        assert!(err.is_missing_credentials());
    }

    #[test]
    fn test_optional_variables() {
        let env = full_env()
            .with(AWS_SESSION_TOKEN, "session")
            .with(CLOUDFLARE_ACCOUNT_ID, "");

        let aws = credentials_from_env(&env, CloudProvider::Aws)
            .unwrap()
            .aws
            .unwrap();
        assert_eq!(aws.session_token.as_deref(), Some("session"));

        let cf = credentials_from_env(&env, CloudProvider::Cloudflare)
            .unwrap()
            .cloudflare
            .unwrap();
        assert_eq!(cf.account_id, None);
        assert_eq!(cf.email, None);
    }
}
