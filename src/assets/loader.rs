//! Asset I/O
//!
//! The scheduler reaches storage or network through `AssetFetcher`. A
//! fetch error says whether retrying can help; everything else about the
//! transport stays behind the trait.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use super::{AssetDescriptor, AssetPriority, AssetType, SizeHint};

/// Fetch failure, classified for the retry policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Worth retrying (timeouts, interrupted transfers)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help (missing resource, malformed request)
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            FetchError::Transient(message) | FetchError::Permanent(message) => message,
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::Unsupported => FetchError::Permanent(error.to_string()),
            _ => FetchError::Transient(error.to_string()),
        }
    }
}

/// Loads the raw bytes of an asset
pub trait AssetFetcher: Send + Sync + 'static {
    fn fetch(&self, descriptor: &AssetDescriptor) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Reads assets from a directory; URLs are paths relative to the root
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a URL below the root, rejecting escapes
    pub fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(url.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(FetchError::Permanent(format!("'{}' escapes the asset root", url)));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetFetcher for FileFetcher {
    async fn fetch(&self, descriptor: &AssetDescriptor) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(&descriptor.url)?;
        let bytes = tokio::fs::read(&path).await?;
        debug!("📂 Read {} bytes from {}", bytes.len(), path.display());
        Ok(bytes)
    }
}

/// One manifest line; unset fields take the type's defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub url: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub priority: Option<AssetPriority>,
    #[serde(default)]
    pub estimated_size_bytes: Option<u64>,
    #[serde(default)]
    pub size_hint: Option<SizeHint>,
    #[serde(default)]
    pub persistent: bool,
}

impl ManifestEntry {
    pub fn to_descriptor(&self) -> AssetDescriptor {
        AssetDescriptor {
            asset_type: self.asset_type,
            url: self.url.clone(),
            version: self.version.clone(),
            priority: self.priority.unwrap_or_else(|| self.asset_type.default_priority()),
            estimated_size_bytes: self.estimated_size_bytes,
            size_hint: self.size_hint,
            persistent: self.persistent,
        }
    }
}

/// List of assets to load, stored as TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetManifest {
    #[serde(default)]
    pub assets: Vec<ManifestEntry>,
}

impl AssetManifest {
    /// Load a manifest from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read asset manifest: {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse asset manifest: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let manifest: AssetManifest = toml::from_str(contents)?;
        Ok(manifest)
    }

    pub fn descriptors(&self) -> Vec<AssetDescriptor> {
        self.assets.iter().map(ManifestEntry::to_descriptor).collect()
    }
}
