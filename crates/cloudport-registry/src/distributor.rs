//! Pushes one local image to every registered registry, in order.

use crate::image::ImageSource;
use crate::push::ImagePusher;
use crate::registry::Registry;
use cloudport_core::{CancellationToken, Error, Result, ResultExt, cancellable};
use oci_client::Reference;
use std::collections::HashMap;
use tracing::{error, info};

/// Single-use fan-out of a source image to a list of registries.
///
/// Registries are pushed in registration order and the first failure stops
/// the run. Pushes that already completed are not rolled back.
pub struct Distributor {
    source_image: String,
    image_source: Box<dyn ImageSource>,
    pusher: Box<dyn ImagePusher>,
    registries: Vec<Box<dyn Registry>>,
    consumed: bool,
}

impl Distributor {
    pub fn new(
        source_image: impl Into<String>,
        image_source: Box<dyn ImageSource>,
        pusher: Box<dyn ImagePusher>,
    ) -> Self {
        Self {
            source_image: source_image.into(),
            image_source,
            pusher,
            registries: Vec::new(),
            consumed: false,
        }
    }

    pub fn source_image(&self) -> &str {
        &self.source_image
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    /// Append a push target. Rejected once [`Distributor::distribute`] has run.
    pub fn add_registry(&mut self, registry: Box<dyn Registry>) -> Result<()> {
        if self.consumed {
            return Err(Error::Configuration(
                "distributor already ran; registries can no longer be added".to_string(),
            ));
        }
        self.registries.push(registry);
        Ok(())
    }

    /// Push the source image to every registry.
    ///
    /// Returns registry URL to image URI for every target, or the first error.
    /// No partial map is returned.
    pub async fn distribute(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>> {
        if self.consumed {
            return Err(Error::Configuration("distributor already ran".to_string()));
        }
        self.consumed = true;

        info!(
            image = %self.source_image,
            registries = self.registries.len(),
            "Distributing image"
        );

        let image = cancellable(
            cancel,
            "image load",
            self.image_source.load(&self.source_image),
        )
        .await
        .with_context(|| format!("loading source image {}", self.source_image))?;

        let pusher = &self.pusher;
        let mut pushed = HashMap::with_capacity(self.registries.len());
        let mut completed = Vec::new();

        for registry in self.registries.iter_mut() {
            let step = async {
                let auth = registry.authenticate(cancel).await?;
                let uri = registry.image_reference()?;
                let target: Reference = uri.parse().map_err(|e| {
                    Error::Configuration(format!("invalid target reference {uri}: {e}"))
                })?;
                cancellable(cancel, "image push", pusher.push(&image, &target, &auth)).await?;
                Ok::<_, Error>((registry.registry_url(), uri))
            };

            match step.await {
                Ok((url, uri)) => {
                    info!(registry = %url, image = %uri, "Image distributed");
                    completed.push(registry.name());
                    pushed.insert(url, uri);
                }
                Err(e) => {
                    let name = registry.name();
                    error!(registry = %name, error = %e, "Distribution failed");
                    return Err(Error::Distribution {
                        registry: name,
                        completed,
                        inner: Box::new(e),
                    });
                }
            }
        }

        Ok(pushed)
    }
}
