//! Deploy file: which image goes where, with which credentials.

use cloudport_core::{CloudProvider, CredentialManagerConfig, Error, Result, VaultAuth};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Deploy file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Source image reference in the local store.
    pub image: String,
    /// OCI image-layout directory holding `image`.
    #[serde(default = "default_image_store")]
    pub image_store: PathBuf,
    /// Tag pushed to every target.
    pub tag: String,
    #[serde(default)]
    pub credentials: CredentialManagerConfig,
    /// Push targets, pushed in this order.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_image_store() -> PathBuf {
    PathBuf::from("oci")
}

/// One registry to push to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum TargetConfig {
    Aws { region: String, repository: String },
    Azure {
        resource_group: String,
        registry: String,
        location: String,
        image: String,
    },
    Gcp {
        /// Defaults to the project of the resolved credentials.
        #[serde(default)]
        project: Option<String>,
        location: String,
        repository: String,
        /// Defaults to the repository name.
        #[serde(default)]
        image: Option<String>,
    },
}

impl TargetConfig {
    pub fn provider(&self) -> CloudProvider {
        match self {
            TargetConfig::Aws { .. } => CloudProvider::Aws,
            TargetConfig::Azure { .. } => CloudProvider::Azure,
            TargetConfig::Gcp { .. } => CloudProvider::Gcp,
        }
    }
}

impl DeployConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read deploy file {}: {e}", path.display()))
        })?;
        Self::parse(&content).map_err(|e| e.context(format!("deploy file {}", path.display())))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| Error::Configuration(e.to_string()))?;

        if config.image.trim().is_empty() {
            return Err(Error::Configuration("image must not be empty".to_string()));
        }
        if config.tag.trim().is_empty() {
            return Err(Error::Configuration("tag must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Copy with secret material replaced, for display.
    pub fn masked(&self) -> Self {
        let mut config = self.clone();
        if let Some(vault) = config.credentials.vault.as_mut() {
            match &mut vault.auth {
                VaultAuth::Token { token } => *token = mask(token),
                VaultAuth::AppRole { secret_id, .. } => *secret_id = mask(secret_id),
                VaultAuth::AwsIam { .. } | VaultAuth::GcpIam { .. } => {}
            }
        }
        config
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}
