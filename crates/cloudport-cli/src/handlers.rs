//! Command handlers.

use crate::config::{DeployConfig, TargetConfig};
use cloudport_core::{
    CancellationToken, CloudProvider, CredentialManagerConfig, Error, ProviderCredentials, Result,
    ResultExt,
};
use cloudport_registry::{
    AcrRegistry, ArtifactRegistry, AwsEcrApi, AzureRestApi, Distributor, EcrRegistry,
    GoogleRestApi, OciLayoutStore, OciPusher, Registry,
};
use cloudport_secrets::CredentialManager;
use console::style;
use std::path::Path;
use tracing::info;

pub async fn credentials(
    cancel: &CancellationToken,
    provider: CloudProvider,
    config: Option<&Path>,
) -> Result<()> {
    let manager_config = match config {
        Some(path) => DeployConfig::load(path)?.credentials,
        None => CredentialManagerConfig::default(),
    };
    let manager = CredentialManager::new(manager_config);

    println!(
        "Resolving {} credentials from {}...",
        style(provider).bold(),
        manager.source()
    );
    let bundle = manager.get_credentials(cancel, provider).await?;

    for (field, populated) in credential_fields(&bundle, provider) {
        if populated {
            println!("  {} {field}", style("✓").green());
        } else {
            println!("  {} {field} (not set)", style("-").dim());
        }
    }
    println!("{} Credentials valid", style("✓").green());
    Ok(())
}

pub async fn push(cancel: &CancellationToken, path: &Path) -> Result<()> {
    let config = DeployConfig::load(path)?;
    if config.targets.is_empty() {
        return Err(Error::Configuration(format!("{} lists no targets", path.display())));
    }

    let manager = CredentialManager::new(config.credentials.clone());
    let mut distributor = Distributor::new(
        config.image.clone(),
        Box::new(OciLayoutStore::new(&config.image_store)),
        Box::new(OciPusher::new()),
    );

    for target in &config.targets {
        let bundle = manager.get_credentials(cancel, target.provider()).await?;
        let registry = build_registry(target, &bundle, &config.tag).await?;
        distributor.add_registry(registry)?;
    }

    println!(
        "Pushing {} to {} registries...",
        style(&config.image).bold(),
        distributor.len()
    );
    let pushed = distributor.distribute(cancel).await?;

    let mut pushed: Vec<_> = pushed.into_iter().collect();
    pushed.sort();
    for (registry, uri) in &pushed {
        println!("  {} {registry} → {uri}", style("✓").green());
    }
    info!(registries = pushed.len(), "Push complete");
    Ok(())
}

pub fn show_config(path: &Path) -> Result<()> {
    let config = DeployConfig::load(path)?;
    let yaml =
        serde_yaml::to_string(&config.masked()).map_err(|e| Error::Serialization(e.to_string()))?;
    println!("{} {}", style("Deploy file").bold(), path.display());
    print!("{yaml}");
    Ok(())
}

async fn build_registry(
    target: &TargetConfig,
    bundle: &ProviderCredentials,
    tag: &str,
) -> Result<Box<dyn Registry>> {
    let missing = || Error::MissingCredentials {
        provider: target.provider(),
        missing: vec![target.provider().to_string()],
    };

    let registry: Box<dyn Registry> = match target {
        TargetConfig::Aws { region, repository } => {
            let aws = bundle.aws.as_ref().ok_or_else(missing)?;
            let api = AwsEcrApi::new(aws, region).await;
            Box::new(EcrRegistry::new(region, repository, tag, Box::new(api)))
        }
        TargetConfig::Azure {
            resource_group,
            registry,
            location,
            image,
        } => {
            let azure = bundle.azure.clone().ok_or_else(missing)?;
            let api = AzureRestApi::new(azure);
            Box::new(AcrRegistry::new(
                resource_group,
                registry,
                location,
                image,
                tag,
                Box::new(api),
            ))
        }
        TargetConfig::Gcp {
            project,
            location,
            repository,
            image,
        } => {
            let gcp = bundle.gcp.as_ref().ok_or_else(missing)?;
            let api = GoogleRestApi::new(gcp).context("loading service account key")?;
            let project = project.clone().unwrap_or_else(|| gcp.project_id.clone());
            let registry = ArtifactRegistry::new(project, location, repository, tag, Box::new(api));
            match image {
                Some(image) => Box::new(registry.with_image(image)),
                None => Box::new(registry),
            }
        }
    };
    Ok(registry)
}

/// Field names of `provider`'s record and whether each is populated.
fn credential_fields(
    bundle: &ProviderCredentials,
    provider: CloudProvider,
) -> Vec<(&'static str, bool)> {
    let set = |value: &str| !value.is_empty();
    let opt = |value: &Option<String>| value.as_deref().is_some_and(set);

    match provider {
        CloudProvider::Aws => bundle
            .aws
            .as_ref()
            .map(|c| {
                vec![
                    ("access_key_id", set(&c.access_key_id)),
                    ("secret_access_key", set(&c.secret_access_key)),
                    ("session_token", opt(&c.session_token)),
                ]
            })
            .unwrap_or_default(),
        CloudProvider::Gcp => bundle
            .gcp
            .as_ref()
            .map(|c| {
                vec![
                    ("project_id", set(&c.project_id)),
                    ("service_account_key", set(&c.service_account_key)),
                    ("service_account_email", opt(&c.service_account_email)),
                ]
            })
            .unwrap_or_default(),
        CloudProvider::Azure => bundle
            .azure
            .as_ref()
            .map(|c| {
                vec![
                    ("tenant_id", set(&c.tenant_id)),
                    ("client_id", set(&c.client_id)),
                    ("client_secret", set(&c.client_secret)),
                    ("subscription_id", set(&c.subscription_id)),
                ]
            })
            .unwrap_or_default(),
        CloudProvider::Cloudflare => bundle
            .cloudflare
            .as_ref()
            .map(|c| {
                vec![
                    ("api_token", set(&c.api_token)),
                    ("account_id", opt(&c.account_id)),
                    ("email", opt(&c.email)),
                ]
            })
            .unwrap_or_default(),
    }
}
