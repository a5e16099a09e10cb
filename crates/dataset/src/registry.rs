//! Dataset registry and local dataset cache.
//!
//! The registry maps dataset names and versions to their upstream location.
//! Fetching from upstream happens outside this crate; here a reference is
//! resolved to the cached JSONL file the fetcher is expected to have written.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DatasetError, Result};
use crate::reference::DatasetRef;

/// One dataset version listed in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Dataset name (no `/`)
    pub name: String,
    /// Version label: `latest`, an ISO date, a semver, or anything else
    pub version: String,
    /// Human description
    #[serde(default)]
    pub description: String,
    /// Upstream git repository
    pub git_url: String,
    /// Upstream ref to check out
    pub git_ref: String,
    /// Path of the JSONL inside the repository
    pub path: String,
    /// Expected SHA-256 of the JSONL
    #[serde(default)]
    pub checksum_sha256: Option<String>,
}

/// A parsed registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryPayload {
    Wrapped { datasets: Vec<RegistryEntry> },
    List(Vec<RegistryEntry>),
}

impl Registry {
    /// Parse a registry document: a list of entries or `{"datasets": [...]}`.
    pub fn from_json(payload: &str) -> Result<Self> {
        let parsed: RegistryPayload = serde_json::from_str(payload).map_err(|e| {
            DatasetError::Registry(format!("registry payload must be a list of dataset entries: {}", e))
        })?;
        let entries = match parsed {
            RegistryPayload::Wrapped { datasets } => datasets,
            RegistryPayload::List(list) => list,
        };

        for entry in &entries {
            let name = entry.name.trim();
            if name.is_empty() {
                return Err(DatasetError::Registry("dataset name must be non-empty".into()));
            }
            if name.contains('/') {
                return Err(DatasetError::Registry(format!(
                    "registry dataset names cannot contain '/': {}",
                    name
                )));
            }
        }

        Ok(Self { entries })
    }

    /// Read and parse a registry file.
    pub async fn load(path: &Path) -> Result<Self> {
        let payload = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DatasetError::Io { path: path.to_path_buf(), source })?;
        Self::from_json(&payload)
    }

    /// Find the entry for `name`, picking the latest version when `version` is
    /// `None` or `"latest"`.
    pub fn resolve(&self, name: &str, version: Option<&str>) -> Result<&RegistryEntry> {
        let candidates: Vec<&RegistryEntry> = self.entries.iter().filter(|e| e.name == name).collect();
        if candidates.is_empty() {
            return Err(DatasetError::Registry(format!("Dataset '{}' not found in registry", name)));
        }

        let wanted = match version {
            None | Some("latest") => {
                let versions: Vec<&str> = candidates.iter().map(|e| e.version.as_str()).collect();
                resolve_latest_version(&versions)
                    .ok_or_else(|| DatasetError::Registry("No versions available".into()))?
                    .to_string()
            }
            Some(v) => v.to_string(),
        };

        candidates
            .into_iter()
            .find(|e| e.version == wanted)
            .ok_or_else(|| {
                DatasetError::Registry(format!("Dataset '{}@{}' not found in registry", name, wanted))
            })
    }
}

/// Ordering key for version labels: other < semver < date < `latest`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum VersionKey {
    Other(String),
    Semver(u64, u64, u64),
    Date(NaiveDate),
    Latest,
}

fn semver_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)$").ok()).as_ref()
}

fn version_key(version: &str) -> VersionKey {
    if version == "latest" {
        return VersionKey::Latest;
    }
    if let Ok(date) = NaiveDate::parse_from_str(version, "%Y-%m-%d") {
        return VersionKey::Date(date);
    }
    if let Some(caps) = semver_re().and_then(|re| re.captures(version)) {
        let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
        if let (Some(major), Some(minor), Some(patch)) = (part(1), part(2), part(3)) {
            return VersionKey::Semver(major, minor, patch);
        }
    }
    VersionKey::Other(version.to_string())
}

/// Pick the newest version label.
pub fn resolve_latest_version<'a>(versions: &[&'a str]) -> Option<&'a str> {
    versions.iter().copied().max_by_key(|v| version_key(v))
}

/// How a dataset was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSourceKind {
    /// A JSONL path given directly
    LocalFile,
    /// A registry dataset
    Registry,
    /// A hub dataset
    Hf,
}

/// A dataset resolved to a local JSONL file, with provenance for the summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDataset {
    /// Source kind
    #[serde(rename = "dataset_source_kind")]
    pub kind: DatasetSourceKind,
    /// Canonical reference string
    #[serde(rename = "dataset_ref")]
    pub source_ref: String,
    /// JSONL location
    #[serde(rename = "cached_dataset_path")]
    pub path: PathBuf,
    /// Dataset name
    #[serde(rename = "dataset_name")]
    pub name: String,
    /// Version or revision, if any
    #[serde(rename = "dataset_version_or_revision")]
    pub version: Option<String>,
    /// Source-specific details
    #[serde(rename = "dataset_metadata")]
    pub metadata: serde_json::Value,
}

impl ResolvedDataset {
    /// Provenance for a dataset passed as a plain file path.
    pub fn local_file(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());
        Self {
            kind: DatasetSourceKind::LocalFile,
            source_ref: path.display().to_string(),
            path: path.to_path_buf(),
            name,
            version: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Label used in default output directory names.
    pub fn label(&self) -> String {
        match self.kind {
            DatasetSourceKind::LocalFile => self.name.clone(),
            _ => self.source_ref.replace('/', "__").replace('@', "_"),
        }
    }
}

/// On-disk cache of materialised datasets.
#[derive(Debug, Clone)]
pub struct DatasetCache {
    root: PathBuf,
}

impl DatasetCache {
    /// Create a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache path for a registry dataset version.
    pub fn registry_path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join("registry").join(name).join(version).join("dataset.jsonl")
    }

    /// Cache path for a hub dataset split.
    pub fn hub_path(&self, repo: &str, revision: Option<&str>, split: &str) -> PathBuf {
        let safe = |s: &str| s.replace('/', "__");
        self.root
            .join("hf")
            .join(safe(repo))
            .join(safe(revision.unwrap_or("default")))
            .join(format!("{}.jsonl", safe(split)))
    }

    /// Resolve a reference to a cached JSONL file.
    pub async fn resolve(
        &self,
        reference: &DatasetRef,
        registry: Option<&Registry>,
        split: &str,
    ) -> Result<ResolvedDataset> {
        let resolved = match reference {
            DatasetRef::Hub { repo, revision } => ResolvedDataset {
                kind: DatasetSourceKind::Hf,
                source_ref: reference.to_string(),
                path: self.hub_path(repo, revision.as_deref(), split),
                name: repo.clone(),
                version: revision.clone(),
                metadata: serde_json::json!({ "split": split }),
            },
            DatasetRef::Registry { name, version } => {
                let registry = registry.ok_or_else(|| {
                    DatasetError::Registry("a registry is required to resolve named datasets".into())
                })?;
                let entry = registry.resolve(name, version.as_deref())?;
                ResolvedDataset {
                    kind: DatasetSourceKind::Registry,
                    source_ref: format!("{}@{}", entry.name, entry.version),
                    path: self.registry_path(&entry.name, &entry.version),
                    name: entry.name.clone(),
                    version: Some(entry.version.clone()),
                    metadata: serde_json::json!({
                        "git_url": entry.git_url,
                        "git_ref": entry.git_ref,
                        "registry_path": entry.path,
                    }),
                }
            }
        };

        if tokio::fs::metadata(&resolved.path).await.is_err() {
            return Err(DatasetError::NotCached {
                reference: resolved.source_ref.clone(),
                path: resolved.path.clone(),
            });
        }

        debug!(reference = %resolved.source_ref, path = %resolved.path.display(), "resolved dataset");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"{"datasets": [
        {"name": "weekly", "version": "2026-02-28", "git_url": "u", "git_ref": "main", "path": "a.jsonl"},
        {"name": "weekly", "version": "2026-03-01", "git_url": "u", "git_ref": "main", "path": "b.jsonl"},
        {"name": "weekly", "version": "1.9.0", "git_url": "u", "git_ref": "main", "path": "c.jsonl"},
        {"name": "other", "version": "v1.0.0", "git_url": "u", "git_ref": "main", "path": "d.jsonl"}
    ]}"#;

    #[test]
    fn test_latest_prefers_literal_latest() {
        assert_eq!(resolve_latest_version(&["2026-02-20", "latest", "1.2.0"]), Some("latest"));
    }

    #[test]
    fn test_latest_prefers_date_then_semver() {
        assert_eq!(
            resolve_latest_version(&["2026-02-28", "2026-03-01", "1.9.0"]),
            Some("2026-03-01")
        );
        assert_eq!(resolve_latest_version(&["1.2.0", "v2.0.0", "alpha"]), Some("v2.0.0"));
        assert_eq!(resolve_latest_version(&[]), None);
    }

    #[test]
    fn test_registry_resolve() {
        let registry = Registry::from_json(REGISTRY).unwrap();
        assert_eq!(registry.resolve("weekly", None).unwrap().path, "b.jsonl");
        assert_eq!(registry.resolve("weekly", Some("1.9.0")).unwrap().path, "c.jsonl");
        assert!(registry.resolve("weekly", Some("9.9.9")).is_err());
        assert!(registry.resolve("missing", None).is_err());
    }

    #[test]
    fn test_registry_rejects_slash_in_name() {
        let payload = r#"[{"name": "alice/ds", "version": "latest", "git_url": "u", "git_ref": "main", "path": "p"}]"#;
        let err = Registry::from_json(payload).unwrap_err();
        assert!(err.to_string().contains("cannot contain '/'"));
    }

    #[tokio::test]
    async fn test_cache_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DatasetCache::new(dir.path());
        let registry = Registry::from_json(REGISTRY).unwrap();
        let reference = DatasetRef::parse("weekly").unwrap();

        let err = cache.resolve(&reference, Some(&registry), "train").await.unwrap_err();
        assert!(matches!(err, DatasetError::NotCached { .. }));

        let path = cache.registry_path("weekly", "2026-03-01");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "").await.unwrap();

        let resolved = cache.resolve(&reference, Some(&registry), "train").await.unwrap();
        assert_eq!(resolved.source_ref, "weekly@2026-03-01");
        assert_eq!(resolved.kind, DatasetSourceKind::Registry);
        assert_eq!(resolved.label(), "weekly_2026-03-01");
    }

    #[test]
    fn test_hub_path_layout() {
        let cache = DatasetCache::new("/cache");
        assert_eq!(
            cache.hub_path("alice/ds", None, "train"),
            PathBuf::from("/cache/hf/alice__ds/default/train.jsonl")
        );
    }
}
