//! Provider credential bundles.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const REDACTED: &str = "***";

/// Cloud providers Cloudport can resolve credentials for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gcp,
    Azure,
    /// Edge/CDN provider.
    Cloudflare,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 4] = [
        CloudProvider::Aws,
        CloudProvider::Gcp,
        CloudProvider::Azure,
        CloudProvider::Cloudflare,
    ];

    /// Canonical lowercase name, used in secret paths and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Azure => "azure",
            CloudProvider::Cloudflare => "cloudflare",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "gcp" | "google" => Ok(CloudProvider::Gcp),
            "azure" => Ok(CloudProvider::Azure),
            "cloudflare" => Ok(CloudProvider::Cloudflare),
            other => Err(Error::Configuration(format!("unknown provider: {other}"))),
        }
    }
}

/// AWS access key pair.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &REDACTED)
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| REDACTED),
            )
            .finish()
    }
}

/// GCP project and service-account key material (the JSON key file contents).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpCredentials {
    pub project_id: String,
    pub service_account_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
}

impl fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("project_id", &self.project_id)
            .field("service_account_key", &REDACTED)
            .field("service_account_email", &self.service_account_email)
            .finish()
    }
}

/// Azure service principal.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// Cloudflare API token.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudflareCredentials {
    pub api_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl fmt::Debug for CloudflareCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareCredentials")
            .field("api_token", &REDACTED)
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .finish()
    }
}

/// Credentials for one or more providers. At most one record per provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudflare: Option<CloudflareCredentials>,
}

impl ProviderCredentials {
    pub fn aws(creds: AwsCredentials) -> Self {
        Self {
            aws: Some(creds),
            ..Default::default()
        }
    }

    pub fn gcp(creds: GcpCredentials) -> Self {
        Self {
            gcp: Some(creds),
            ..Default::default()
        }
    }

    pub fn azure(creds: AzureCredentials) -> Self {
        Self {
            azure: Some(creds),
            ..Default::default()
        }
    }

    pub fn cloudflare(creds: CloudflareCredentials) -> Self {
        Self {
            cloudflare: Some(creds),
            ..Default::default()
        }
    }

    /// Whether a record for `provider` is present, regardless of its contents.
    pub fn has(&self, provider: CloudProvider) -> bool {
        match provider {
            CloudProvider::Aws => self.aws.is_some(),
            CloudProvider::Gcp => self.gcp.is_some(),
            CloudProvider::Azure => self.azure.is_some(),
            CloudProvider::Cloudflare => self.cloudflare.is_some(),
        }
    }

    /// Required fields for `provider`, as `(name, value)` pairs, or `None`
    /// when the record is absent.
    fn required_fields(&self, provider: CloudProvider) -> Option<Vec<(&'static str, &str)>> {
        match provider {
            CloudProvider::Aws => self.aws.as_ref().map(|c| {
                vec![
                    ("access_key_id", c.access_key_id.as_str()),
                    ("secret_access_key", c.secret_access_key.as_str()),
                ]
            }),
            CloudProvider::Gcp => self.gcp.as_ref().map(|c| {
                vec![
                    ("project_id", c.project_id.as_str()),
                    ("service_account_key", c.service_account_key.as_str()),
                ]
            }),
            CloudProvider::Azure => self.azure.as_ref().map(|c| {
                vec![
                    ("tenant_id", c.tenant_id.as_str()),
                    ("client_id", c.client_id.as_str()),
                    ("client_secret", c.client_secret.as_str()),
                    ("subscription_id", c.subscription_id.as_str()),
                ]
            }),
            CloudProvider::Cloudflare => self
                .cloudflare
                .as_ref()
                .map(|c| vec![("api_token", c.api_token.as_str())]),
        }
    }
}

/// Check that `bundle` holds every required field for `provider`.
///
/// Depends only on the bundle contents, never on where it came from.
pub fn validate_credentials(bundle: &ProviderCredentials, provider: CloudProvider) -> Result<()> {
    let Some(fields) = bundle.required_fields(provider) else {
        return Err(Error::MissingCredentials {
            provider,
            missing: vec![provider.as_str().to_string()],
        });
    };

    let missing: Vec<String> = fields
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingCredentials { provider, missing })
    }
}
