//! Asset manifests: listings of assets to preload as one group.
//!
//! Two formats are accepted. The plain form is a newline-delimited list
//! of URLs, one per line with blank lines ignored; every entry shares one
//! caller-supplied kind. The JSON form names per-entry kinds and
//! priorities and may pin a group. Preloading issues every request
//! through the scheduler, so manifest loads coalesce with and obey the
//! same slot limits as ad-hoc requests.
//!
//! JSON format:
//!
//! ```json
//! {
//!   "group": "level1",
//!   "assets": [
//!     { "url": "https://cdn.example.com/map.json", "kind": "json", "priority": 10 },
//!     { "url": "https://cdn.example.com/hero.webp", "kind": "texture" }
//!   ]
//! }
//! ```

use crate::decoder::{AssetKind, AudioTransport, DecodeConfig};
use crate::downloader::Downloader;
use crate::request::{AssetKey, GroupId};
use crate::scheduler::{LoadOutcome, Scheduler};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid manifest: {0}")]
    Parse(String),
}

/// One asset named by a manifest.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub key: AssetKey,
    pub kind: AssetKind,
    pub priority: i32,
}

/// A parsed manifest.
#[derive(Debug, Clone)]
pub struct AssetManifest {
    /// Group every entry loads into; the scheduler's selected group is
    /// used when absent.
    pub group: Option<GroupId>,
    pub entries: Vec<ManifestEntry>,
}

impl AssetManifest {
    /// Parses the plain boundary format: one URL per line, blank
    /// (whitespace-only) lines ignored. Every entry gets `kind` and
    /// priority 0; the scheduler's selected group applies.
    pub fn from_lines(text: &str, kind: AssetKind) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|url| ManifestEntry {
                key: url.into(),
                kind,
                priority: 0,
            })
            .collect();
        Self {
            group: None,
            entries,
        }
    }

    /// Reads a newline-delimited manifest file.
    pub async fn load_lines(path: &Path, kind: AssetKind) -> Result<Self, ManifestError> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::from_lines(&text, kind))
    }

    /// Reads and parses a JSON manifest file.
    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let data = tokio::fs::read(path).await?;
        Self::from_json(&data)
    }

    /// Parses manifest JSON.
    pub fn from_json(data: &[u8]) -> Result<Self, ManifestError> {
        let root: serde_json::Value =
            serde_json::from_slice(data).map_err(|e| ManifestError::Parse(e.to_string()))?;

        let group = match root.get("group") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(name)) => Some(name.as_str().into()),
            Some(other) => {
                return Err(ManifestError::Parse(format!(
                    "\"group\" must be a string, got {}",
                    other
                )))
            }
        };

        let assets = root
            .get("assets")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| ManifestError::Parse("missing \"assets\" array".to_string()))?;

        let mut entries = Vec::with_capacity(assets.len());
        for asset in assets {
            let url = asset
                .get("url")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| ManifestError::Parse("asset missing \"url\"".to_string()))?;
            let kind_name = asset
                .get("kind")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    ManifestError::Parse(format!("asset {} missing \"kind\"", url))
                })?;
            let kind = AssetKind::parse(kind_name).ok_or_else(|| {
                ManifestError::Parse(format!("unknown kind {:?} for {}", kind_name, url))
            })?;
            let priority = asset
                .get("priority")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0) as i32;
            entries.push(ManifestEntry {
                key: url.into(),
                kind,
                priority,
            });
        }

        Ok(Self { group, entries })
    }

    /// Requests every entry concurrently. Returns each key with its
    /// outcome; individual failures do not stop the rest of the batch.
    pub async fn preload<D: Downloader, A: AudioTransport>(
        &self,
        scheduler: &Scheduler<D, A>,
    ) -> Vec<(AssetKey, LoadOutcome)> {
        info!(entries = self.entries.len(), group = ?self.group, "preloading manifest");
        let loads = self.entries.iter().map(|entry| {
            let group = self.group.clone();
            async move {
                let outcome = match group {
                    Some(group) => {
                        scheduler
                            .request_in(
                                group,
                                entry.kind,
                                entry.key.clone(),
                                entry.priority,
                                DecodeConfig::default(),
                            )
                            .await
                    }
                    None => {
                        scheduler
                            .request(
                                entry.kind,
                                entry.key.clone(),
                                entry.priority,
                                DecodeConfig::default(),
                            )
                            .await
                    }
                };
                (entry.key.clone(), outcome)
            }
        });
        futures::future::join_all(loads).await
    }
}
