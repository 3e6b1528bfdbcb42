//! Artifact cache
//!
//! On-disk layout under the cache root:
//!
//! ```text
//! <root>/
//!   .staging/                          in-progress downloads, never visible
//!   <group>/<org>/<module>/<version>/
//!     widget-1.0.jar                   visible slot
//!     widget-1.0.jar.sha1              SHA-1 of the slot content
//!     widget-1.0.jar.lock              cross-process slot lock
//!     metadata/widget-1.0.pom          module descriptor, same scheme
//! ```
//!
//! `<group>` is the cache group of the owning repository. Repositories only
//! share slots when they are configured with the same group.
//!
//! A slot becomes visible through a single rename from `.staging`, so a
//! reader either sees nothing or the complete verified file. The sidecar is
//! renamed in after the slot, never before. Writers for the
//! same slot are serialised by an in-process mutex (threads) and an `fs2`
//! file lock (processes); whoever gets the slot second finds it populated
//! and skips the download.

mod candidates;

pub use candidates::{CacheCandidateFinder, LocalCandidateFinder, NoCandidates};

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tempfile::TempPath;

use crate::download::{ChecksumAlgorithm, ResourceDownloader};
use crate::error::{CacheError, Lookup, ResolveError};
use crate::identity::ArtifactIdentity;
use crate::transport::RemoteResource;
use crate::util::lock::acquire_slot_lock;

/// Directory under the cache root holding in-progress downloads.
pub const STAGING_DIR: &str = ".staging";

/// Per-version directory holding module descriptors. Artifact file names
/// always carry an extension, so this never collides with one.
const METADATA_DIR: &str = "metadata";

/// Staged files older than this are leftovers from a crashed writer.
const STALE_STAGING_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// A verified artifact in its visible cache slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub identity: ArtifactIdentity,
    pub path: PathBuf,
    /// SHA-1 recorded when the slot was populated, if the sidecar is intact.
    pub sha1: Option<String>,
}

type SlotMutex = Arc<Mutex<()>>;

/// Cache service for one cache group.
///
/// Construct once per repository configuration and share it (behind an
/// `Arc`) between every resolution against that repository.
pub struct ArtifactCache {
    root: PathBuf,
    group: String,
    staging: PathBuf,
    in_flight: Mutex<HashMap<PathBuf, SlotMutex>>,
}

impl ArtifactCache {
    /// Open (creating if needed) the cache at `root` for `group`.
    pub fn open(root: impl Into<PathBuf>, group: &str) -> Result<Self, CacheError> {
        let root = root.into();
        if !is_safe_component(group) || group == STAGING_DIR {
            return Err(CacheError::new(
                "open",
                root.join(group),
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("'{}' is not a valid cache group name", group),
                ),
            ));
        }

        let group_dir = root.join(group);
        fs::create_dir_all(&group_dir).map_err(|e| CacheError::new("open", &group_dir, e))?;
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging).map_err(|e| CacheError::new("open", &staging, e))?;
        clean_stale_staging(&staging);

        Ok(Self {
            root,
            group: group.to_string(),
            staging,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Visible slot path for `identity`.
    pub fn slot_path(&self, identity: &ArtifactIdentity) -> Result<PathBuf, CacheError> {
        let relative = slot_relative_path(identity)
            .map_err(|e| CacheError::new("locate", self.root.join(&self.group), e))?;
        Ok(self.root.join(&self.group).join(relative))
    }

    /// The cached entry for `identity`, if its slot is populated.
    pub fn lookup(&self, identity: &ArtifactIdentity) -> Result<Lookup<CacheEntry>, CacheError> {
        let slot = self.slot_path(identity)?;
        read_slot(identity, &slot)
    }

    /// Download `resource` through `downloader` and promote it into the
    /// slot for `identity`.
    ///
    /// At most one caller per slot runs the download at a time. A caller
    /// that finds the slot already populated once it holds the lock releases
    /// its resource and returns the existing entry. The resource is released
    /// on every path; a failed download leaves the slot untouched.
    pub fn download_and_cache(
        &self,
        identity: &ArtifactIdentity,
        downloader: &dyn ResourceDownloader,
        resource: RemoteResource,
    ) -> Result<CacheEntry, ResolveError> {
        let slot = self.slot_path(identity)?;

        let slot_mutex = self.slot_mutex(&slot);
        let result = {
            let _guard = slot_mutex.lock().unwrap_or_else(PoisonError::into_inner);
            self.populate(identity, &slot, downloader, resource)
        };
        self.forget_slot(&slot, slot_mutex);
        result
    }

    fn populate(
        &self,
        identity: &ArtifactIdentity,
        slot: &Path,
        downloader: &dyn ResourceDownloader,
        resource: RemoteResource,
    ) -> Result<CacheEntry, ResolveError> {
        let _slot_lock = acquire_slot_lock(&with_suffix(slot, "lock"))?;

        if let Lookup::Found(entry) = read_slot(identity, slot)? {
            tracing::debug!(path = %slot.display(), "slot populated by another writer");
            resource.close()?;
            return Ok(entry);
        }

        let staged = tempfile::Builder::new()
            .prefix(&format!("{}.", identity.file_name()))
            .suffix(".part")
            .tempfile_in(&self.staging)
            .map_err(|e| CacheError::new("stage", &self.staging, e))?
            .into_temp_path();

        let downloaded = downloader.download(resource, &staged)?;

        let sha1 = match downloaded.checksums.get(ChecksumAlgorithm::Sha1) {
            Some(sha1) => sha1.to_string(),
            None => ChecksumAlgorithm::Sha1
                .digest_file(&staged)
                .map_err(|e| CacheError::new("stage", &*staged, e))?,
        };
        let sidecar = self.stage_sidecar(&sha1)?;

        staged
            .persist(slot)
            .map_err(|e| CacheError::new("promote", slot, e.error))?;

        let sidecar_path = with_suffix(slot, "sha1");
        let sha1 = match sidecar.persist(&sidecar_path) {
            Ok(()) => Some(sha1),
            Err(e) => {
                tracing::warn!(path = %sidecar_path.display(), "could not record sha1: {}", e.error);
                let _ = fs::remove_file(&sidecar_path);
                None
            }
        };

        tracing::info!(
            identity = %identity,
            path = %slot.display(),
            bytes = downloaded.bytes,
            verified_by = ?downloaded.verified_by,
            "cached artifact"
        );
        Ok(CacheEntry {
            identity: identity.clone(),
            path: slot.to_path_buf(),
            sha1,
        })
    }

    fn stage_sidecar(&self, sha1: &str) -> Result<TempPath, CacheError> {
        let staged = tempfile::Builder::new()
            .suffix(".sha1.part")
            .tempfile_in(&self.staging)
            .map_err(|e| CacheError::new("stage", &self.staging, e))?
            .into_temp_path();
        fs::write(&staged, format!("{}\n", sha1))
            .map_err(|e| CacheError::new("stage", &*staged, e))?;
        Ok(staged)
    }

    fn slot_mutex(&self, slot: &Path) -> SlotMutex {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(slot.to_path_buf()).or_default())
    }

    /// Drop the map entry once no other thread is waiting on it.
    fn forget_slot(&self, slot: &Path, slot_mutex: SlotMutex) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        drop(slot_mutex);
        if in_flight
            .get(slot)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            in_flight.remove(slot);
        }
    }
}

/// Slot path relative to a cache group directory.
pub fn slot_relative_path(identity: &ArtifactIdentity) -> io::Result<PathBuf> {
    let file_name = identity.file_name();
    let mut components = vec![identity.group(), identity.module(), identity.version()];
    if identity.is_metadata() {
        components.push(METADATA_DIR);
    }
    components.push(&file_name);

    let mut path = PathBuf::new();
    for component in components {
        if !is_safe_component(component) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsafe path component '{}' in {}", component, identity),
            ));
        }
        path.push(component);
    }
    Ok(path)
}

/// Rejects anything that could escape the directory it is joined onto.
fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains(['/', '\\'])
}

/// `path` with `.suffix` appended to its file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn read_sha1_sidecar(file: &Path) -> Option<String> {
    let content = fs::read_to_string(with_suffix(file, "sha1")).ok()?;
    ChecksumAlgorithm::Sha1.parse_sidecar(&content)
}

fn read_slot(identity: &ArtifactIdentity, slot: &Path) -> Result<Lookup<CacheEntry>, CacheError> {
    match fs::metadata(slot) {
        Ok(meta) if meta.is_file() => Ok(Lookup::Found(CacheEntry {
            identity: identity.clone(),
            path: slot.to_path_buf(),
            sha1: read_sha1_sidecar(slot),
        })),
        Ok(_) => Ok(Lookup::NotFound),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Lookup::NotFound),
        Err(e) => Err(CacheError::new("read", slot, e)),
    }
}

/// Remove staged files a crashed writer left behind. Best effort.
fn clean_stale_staging(staging: &Path) {
    let Ok(entries) = fs::read_dir(staging) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > STALE_STAGING_AGE);
        if stale {
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed stale staging file"),
                Err(e) => tracing::debug!(path = %path.display(), "could not remove stale staging file: {}", e),
            }
        }
    }
}
