//! `depot.toml` configuration
//!
//! Files are read in order and merged, later files overriding earlier ones:
//!
//! 1. `$XDG_CONFIG_DIRS/depot/depot.toml` (system, default `/etc/xdg`)
//! 2. `$XDG_CONFIG_HOME/depot/depot.toml` (user)
//! 3. `$DEPOT_CONFIG`
//! 4. an explicit `--config` path, which must exist
//!
//! Scalars are replaced when set. Repositories are merged by name: a later
//! `[[repositories]]` table with the same `name` replaces the earlier one.
//!
//! ```toml
//! cache_dir = "/var/cache/depot"
//! checksums = ["sha1", "md5"]
//! http_timeout_secs = 30
//!
//! [[repositories]]
//! name = "central"
//! url = "https://repo.example.com/maven2"
//!
//! [[repositories]]
//! name = "legacy"
//! url = "file:///srv/ivy"
//! layout = "flat"
//! cache_group = "central"
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{ArtifactCache, CacheCandidateFinder};
use crate::layout::Layout;
use crate::resolver::{ArtifactResolver, DEFAULT_CHECKSUMS};
use crate::transport::http::{DEFAULT_HTTP_TIMEOUT_SECS, clamp_timeout};
use crate::transport::{self, Credentials, Transport};

const CONFIG_DIR: &str = "depot";
const CONFIG_FILE: &str = "depot.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DepotToml {
    cache_dir: Option<PathBuf>,
    checksums: Option<Vec<String>>,
    http_timeout_secs: Option<u64>,
    repositories: Option<Vec<RepositoryConfig>>,
}

impl DepotToml {
    fn merge(&mut self, other: DepotToml) {
        if other.cache_dir.is_some() {
            self.cache_dir = other.cache_dir;
        }
        if other.checksums.is_some() {
            self.checksums = other.checksums;
        }
        if other.http_timeout_secs.is_some() {
            self.http_timeout_secs = other.http_timeout_secs;
        }
        match (self.repositories.as_mut(), other.repositories) {
            (Some(dst), Some(src)) => {
                for repo in src {
                    match dst.iter_mut().find(|r| r.name == repo.name) {
                        Some(existing) => *existing = repo,
                        None => dst.push(repo),
                    }
                }
            }
            (None, Some(src)) => self.repositories = Some(src),
            _ => {}
        }
    }
}

/// One `[[repositories]]` table.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: String,
    /// `file://`, `http://`, `https://` or `sftp://`.
    pub url: String,
    #[serde(default)]
    pub layout: Layout,
    pub metadata_patterns: Option<Vec<String>>,
    pub artifact_patterns: Option<Vec<String>>,
    /// `[ext]` in metadata patterns. Defaults to `pom` or `xml` by layout.
    pub metadata_extension: Option<String>,
    /// Repositories sharing a group share cache slots. Defaults to `name`.
    pub cache_group: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RepositoryConfig {
    pub fn cache_group(&self) -> &str {
        self.cache_group.as_deref().unwrap_or(&self.name)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.password.clone().unwrap_or_default(),
        })
    }
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("layout", &self.layout)
            .field("metadata_patterns", &self.metadata_patterns)
            .field("artifact_patterns", &self.artifact_patterns)
            .field("metadata_extension", &self.metadata_extension)
            .field("cache_group", &self.cache_group)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Effective configuration after merging every layer.
#[derive(Debug, Clone)]
pub struct DepotConfig {
    pub cache_dir: PathBuf,
    pub checksums: Vec<String>,
    pub http_timeout: Duration,
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self::from_toml(DepotToml::default())
    }
}

impl DepotConfig {
    /// Load from the standard locations plus an optional explicit file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut layers = find_config_files();
        if let Ok(path) = std::env::var("DEPOT_CONFIG") {
            let path = path.trim();
            if !path.is_empty() {
                layers.push(PathBuf::from(path));
            }
        }

        let mut merged = read_layers(&layers)?;
        if let Some(path) = explicit {
            merged.merge(read_toml(path)?);
        }
        Ok(Self::from_toml(merged))
    }

    /// Merge the given files in order, skipping ones that don't exist.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self> {
        Ok(Self::from_toml(read_layers(paths)?))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let parsed: DepotToml = toml::from_str(text).context("Invalid depot configuration")?;
        Ok(Self::from_toml(parsed))
    }

    fn from_toml(raw: DepotToml) -> Self {
        Self {
            cache_dir: raw.cache_dir.unwrap_or_else(default_cache_dir),
            checksums: raw
                .checksums
                .unwrap_or_else(|| DEFAULT_CHECKSUMS.iter().map(|s| s.to_string()).collect()),
            http_timeout: clamp_timeout(raw.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)),
            repositories: raw.repositories.unwrap_or_default(),
        }
    }

    /// The named repository, or the first configured one.
    pub fn repository(&self, name: Option<&str>) -> Result<&RepositoryConfig> {
        match name {
            Some(name) => self
                .repositories
                .iter()
                .find(|r| r.name == name)
                .with_context(|| format!("No repository named '{}' is configured", name)),
            None => match self.repositories.first() {
                Some(repo) => Ok(repo),
                None => bail!("No repositories configured (add a [[repositories]] table to {})", CONFIG_FILE),
            },
        }
    }

    pub fn transport(&self, repo: &RepositoryConfig) -> Result<Arc<dyn Transport>> {
        transport::open(&repo.url, repo.credentials(), self.http_timeout)
            .with_context(|| format!("Cannot open repository '{}'", repo.name))
    }

    /// Build a resolver for `repo`, caching under its cache group and
    /// reusing files cached by the other groups.
    pub fn resolver(&self, repo: &RepositoryConfig, progress: bool) -> Result<ArtifactResolver> {
        let transport = self.transport(repo)?;
        let cache = ArtifactCache::open(&self.cache_dir, repo.cache_group())
            .with_context(|| format!("Cannot open cache at {}", self.cache_dir.display()))?;
        let finder = CacheCandidateFinder::for_cache(&cache);

        let mut builder = ArtifactResolver::builder(transport, Arc::new(cache))
            .layout(repo.layout)
            .checksums(self.checksums.iter().cloned())
            .candidate_finder(Arc::new(finder))
            .progress(progress);
        if let Some(patterns) = &repo.metadata_patterns {
            builder = builder.metadata_patterns(patterns.iter().cloned());
        }
        if let Some(patterns) = &repo.artifact_patterns {
            builder = builder.artifact_patterns(patterns.iter().cloned());
        }
        if let Some(extension) = &repo.metadata_extension {
            builder = builder.metadata_extension(extension.clone());
        }
        builder
            .build()
            .with_context(|| format!("Invalid configuration for repository '{}'", repo.name))
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".").join(".cache"))
        .join(CONFIG_DIR)
}

fn split_xdg_config_dirs() -> Vec<PathBuf> {
    let raw = std::env::var("XDG_CONFIG_DIRS").unwrap_or_else(|_| "/etc/xdg".to_owned());
    raw.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn find_config_files() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = split_xdg_config_dirs()
        .into_iter()
        .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
        .collect();
    if let Some(home) = dirs::config_dir() {
        paths.push(home.join(CONFIG_DIR).join(CONFIG_FILE));
    }
    paths
}

fn read_toml(path: &Path) -> Result<DepotToml> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid TOML in {}", path.display()))
}

fn read_layers(paths: &[PathBuf]) -> Result<DepotToml> {
    let mut merged = DepotToml::default();
    for path in paths {
        if !path.is_file() {
            continue;
        }
        tracing::debug!(path = %path.display(), "loading config layer");
        merged.merge(read_toml(path)?);
    }
    Ok(merged)
}
