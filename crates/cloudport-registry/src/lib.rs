//! Cloudport Registry
//!
//! Provisioning and authentication for cloud container registries (ECR, ACR,
//! Artifact Registry), a local OCI image store, and the distributor that
//! pushes one image to many registries.

mod rest;

pub mod acr;
pub mod auth;
pub mod distributor;
pub mod ecr;
pub mod gcr;
pub mod image;
pub mod push;
pub mod registry;

pub use acr::{AcrApi, AcrRegistry, AzureRestApi};
pub use auth::Authenticator;
pub use distributor::Distributor;
pub use ecr::{AwsEcrApi, EcrApi, EcrRegistry, ecr_registry_url};
pub use gcr::{ArtifactRegistry, ArtifactRegistryApi, GoogleRestApi, artifact_registry_url};
pub use image::{Blob, ImageSource, LoadedImage, OciLayoutStore};
pub use push::{ImagePusher, OciPusher};
pub use registry::{Registry, accept_existing};
