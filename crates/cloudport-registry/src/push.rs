//! Pushing loaded images over the OCI distribution protocol.

use crate::auth::Authenticator;
use crate::image::LoadedImage;
use async_trait::async_trait;
use cloudport_core::{Error, Result};
use oci_client::Reference;
use oci_client::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_client::secrets::RegistryAuth;
use std::time::Duration;
use tracing::{debug, info};

/// Uploads an image to a registry.
#[async_trait]
pub trait ImagePusher: Send + Sync {
    /// Push `image` to `target`, returning the manifest URL.
    async fn push(
        &self,
        image: &LoadedImage,
        target: &Reference,
        auth: &Authenticator,
    ) -> Result<String>;
}

/// [`ImagePusher`] backed by `oci_client`.
pub struct OciPusher {
    client: oci_client::Client,
}

impl OciPusher {
    pub fn new() -> Self {
        Self::with_protocol(ClientProtocol::Https)
    }

    /// Plain HTTP is only useful against local test registries.
    pub fn with_protocol(protocol: ClientProtocol) -> Self {
        let config = ClientConfig {
            protocol,
            connect_timeout: Some(Duration::from_secs(30)),
            read_timeout: Some(Duration::from_secs(300)),
            ..Default::default()
        };

        Self {
            client: oci_client::Client::new(config),
        }
    }
}

impl Default for OciPusher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImagePusher for OciPusher {
    async fn push(
        &self,
        image: &LoadedImage,
        target: &Reference,
        auth: &Authenticator,
    ) -> Result<String> {
        let layers: Vec<ImageLayer> = image
            .layers
            .iter()
            .map(|layer| ImageLayer::new(layer.data.clone().into(), layer.media_type.clone(), None))
            .collect();
        let config = Config::new(
            image.config.data.clone().into(),
            image.config.media_type.clone(),
            None,
        );

        debug!(target = %target, layers = layers.len(), "Pushing image");

        let response = self
            .client
            .push(
                target,
                &layers,
                config,
                &RegistryAuth::from(auth),
                Some(image.manifest.clone()),
            )
            .await
            .map_err(|e| Error::Network(format!("push to {target} failed: {e}")))?;

        info!(target = %target, manifest = %response.manifest_url, "Image pushed");
        Ok(response.manifest_url)
    }
}
