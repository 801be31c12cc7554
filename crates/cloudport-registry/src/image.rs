//! Local image store backed by an OCI image-layout directory.
//!
//! ```text
//! <root>/
//! |-- oci-layout
//! |-- index.json
//! `-- blobs/sha256/<hex>
//! ```

use async_trait::async_trait;
use cloudport_core::{Error, Result};
use oci_client::Reference;
use oci_client::manifest::OciImageManifest;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// A content-addressed blob held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    pub media_type: String,
    pub digest: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("media_type", &self.media_type)
            .field("digest", &self.digest)
            .field("size", &self.data.len())
            .finish()
    }
}

/// An image read once from the local store, ready to push anywhere.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Reference the image was loaded by.
    pub reference: String,
    pub manifest: OciImageManifest,
    pub manifest_digest: String,
    pub config: Blob,
    pub layers: Vec<Blob>,
}

impl LoadedImage {
    pub fn size(&self) -> usize {
        self.config.data.len() + self.layers.iter().map(|l| l.data.len()).sum::<usize>()
    }
}

/// Source of locally built images.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Materialize manifest, config and layers for `reference`.
    async fn load(&self, reference: &str) -> Result<LoadedImage>;
}

#[derive(Debug, Deserialize)]
struct ImageLayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

#[derive(Debug, Deserialize)]
struct ImageIndex {
    #[serde(default)]
    manifests: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
    digest: String,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Reads images from an OCI image layout on disk.
#[derive(Debug, Clone)]
pub struct OciLayoutStore {
    root: PathBuf,
}

impl OciLayoutStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.root.join(name);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "no OCI image layout at {} (missing {name})",
                    self.root.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data)
            .map_err(|e| Error::Backend(format!("invalid {}: {e}", path.display())))
    }

    /// Read a blob and check it against its digest.
    async fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let hex = digest
            .strip_prefix("sha256:")
            .ok_or_else(|| Error::Backend(format!("unsupported digest algorithm: {digest}")))?;
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Backend(format!("malformed digest: {digest}")));
        }

        let path = self.root.join("blobs").join("sha256").join(hex);
        let data = fs::read(&path)
            .await
            .map_err(|e| Error::Backend(format!("blob {digest} unreadable: {e}")))?;

        let actual = format!("{:x}", Sha256::digest(&data));
        if !actual.eq_ignore_ascii_case(hex) {
            return Err(Error::Backend(format!(
                "blob {digest} is corrupt: content hashes to sha256:{actual}"
            )));
        }

        Ok(data)
    }

    fn select<'a>(
        index: &'a ImageIndex,
        reference: &str,
        parsed: &Reference,
    ) -> Option<&'a IndexEntry> {
        let by_name = index.manifests.iter().find(|entry| {
            entry
                .annotations
                .get(REF_NAME_ANNOTATION)
                .is_some_and(|name| {
                    name == reference
                        || Some(name.as_str()) == parsed.tag()
                        || *name == parsed.whole()
                })
        });

        match (by_name, index.manifests.as_slice()) {
            (Some(entry), _) => Some(entry),
            (None, [only]) if !only.annotations.contains_key(REF_NAME_ANNOTATION) => Some(only),
            _ => None,
        }
    }
}

#[async_trait]
impl ImageSource for OciLayoutStore {
    async fn load(&self, reference: &str) -> Result<LoadedImage> {
        let parsed: Reference = reference.parse().map_err(|e| {
            Error::Configuration(format!("invalid image reference {reference}: {e}"))
        })?;

        let marker: ImageLayoutMarker = self.read_json("oci-layout").await?;
        if marker.image_layout_version != "1.0.0" {
            return Err(Error::Backend(format!(
                "unsupported OCI layout version {}",
                marker.image_layout_version
            )));
        }

        let index: ImageIndex = self.read_json("index.json").await?;
        let entry = Self::select(&index, reference, &parsed).ok_or_else(|| {
            Error::NotFound(format!("image {reference} in {}", self.root.display()))
        })?;

        if let Some(media_type) = &entry.media_type
            && media_type.contains("index")
        {
            return Err(Error::Unsupported(format!("multi-platform image index for {reference}")));
        }

        let manifest_bytes = self.read_blob(&entry.digest).await?;
        let manifest: OciImageManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| Error::Backend(format!("invalid manifest {}: {e}", entry.digest)))?;

        let config = Blob {
            media_type: manifest.config.media_type.clone(),
            digest: manifest.config.digest.clone(),
            data: self.read_blob(&manifest.config.digest).await?,
        };

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            layers.push(Blob {
                media_type: layer.media_type.clone(),
                digest: layer.digest.clone(),
                data: self.read_blob(&layer.digest).await?,
            });
        }

        let image = LoadedImage {
            reference: reference.to_string(),
            manifest,
            manifest_digest: entry.digest.clone(),
            config,
            layers,
        };
        debug!(
            image = %reference,
            digest = %image.manifest_digest,
            layers = image.layers.len(),
            bytes = image.size(),
            "Image loaded from OCI layout"
        );
        Ok(image)
    }
}
