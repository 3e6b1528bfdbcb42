//! Local candidates from the cache
//!
//! Before downloading, the resolver asks a [`LocalCandidateFinder`] for files
//! already on disk that might be the same bytes. The cache-backed finder
//! looks for the same identity cached under other cache groups (a mirror of
//! the same repository, say); the transport then confirms a match by hashing
//! the file before serving the local copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::identity::ArtifactIdentity;
use crate::transport::{LocalCandidate, LocalCandidates};

use super::{ArtifactCache, STAGING_DIR, read_sha1_sidecar, slot_relative_path};

/// Supplies reuse candidates for an identity, most likely match first.
pub trait LocalCandidateFinder: Send + Sync {
    fn find_candidates(&self, identity: &ArtifactIdentity) -> LocalCandidates;
}

/// Never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCandidates;

impl LocalCandidateFinder for NoCandidates {
    fn find_candidates(&self, _identity: &ArtifactIdentity) -> LocalCandidates {
        LocalCandidates::none()
    }
}

/// Finds the identity in sibling cache groups, newest first.
#[derive(Debug, Clone)]
pub struct CacheCandidateFinder {
    root: PathBuf,
    exclude_group: String,
}

impl CacheCandidateFinder {
    pub fn new(root: impl Into<PathBuf>, exclude_group: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            exclude_group: exclude_group.into(),
        }
    }

    /// Finder over every group of `cache` except its own.
    pub fn for_cache(cache: &ArtifactCache) -> Self {
        Self::new(cache.root(), cache.group())
    }

    fn group_dirs(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(root = %self.root.display(), "cannot scan cache root: {}", e);
                return Vec::new();
            }
        };
        entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|entry| {
                let name = entry.file_name();
                name != STAGING_DIR && name != self.exclude_group.as_str()
            })
            .map(|entry| entry.path())
            .collect()
    }
}

impl LocalCandidateFinder for CacheCandidateFinder {
    fn find_candidates(&self, identity: &ArtifactIdentity) -> LocalCandidates {
        let Ok(relative) = slot_relative_path(identity) else {
            return LocalCandidates::none();
        };

        let mut found: Vec<(SystemTime, PathBuf)> = self
            .group_dirs()
            .into_iter()
            .map(|group| group.join(&relative))
            .filter_map(|path| {
                let meta = fs::metadata(&path).ok().filter(|m| m.is_file())?;
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, path))
            })
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0));

        tracing::debug!(identity = %identity, count = found.len(), "local candidates");
        LocalCandidates::new(found.into_iter().map(|(_, path)| candidate(&path)).collect())
    }
}

fn candidate(path: &Path) -> LocalCandidate {
    match read_sha1_sidecar(path) {
        Some(sha1) => LocalCandidate::with_sha1(path, sha1),
        None => LocalCandidate::new(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::time::Duration;
    use tempfile::TempDir;

    fn widget() -> ArtifactIdentity {
        ArtifactIdentity::new("org.acme", "widget", "1.0", "jar")
    }

    fn cache_in(root: &Path, group: &str, content: &[u8], age_secs: u64) -> PathBuf {
        let path = root.join(group).join("org.acme/widget/1.0/widget-1.0.jar");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        filetime::set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
        path
    }

    #[test]
    fn test_no_candidates_is_empty() {
        assert!(NoCandidates.find_candidates(&widget()).is_empty());
    }

    #[test]
    fn test_newest_first_excluding_own_group() {
        let dir = TempDir::new().unwrap();
        let old = cache_in(dir.path(), "mirror-a", b"a", 3600);
        let new = cache_in(dir.path(), "mirror-b", b"b", 60);
        cache_in(dir.path(), "central", b"c", 0);

        let finder = CacheCandidateFinder::new(dir.path(), "central");
        let candidates = finder.find_candidates(&widget());
        let paths: Vec<&Path> = candidates.iter().map(|c| c.path()).collect();

        assert_eq!(paths, vec![new.as_path(), old.as_path()]);
    }

    #[test]
    fn test_sidecar_sha1_attached_but_not_trusted() {
        let dir = TempDir::new().unwrap();
        let path = cache_in(dir.path(), "mirror", b"hello world", 0);
        fs::write(
            super::super::with_suffix(&path, "sha1"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed\n",
        )
        .unwrap();

        let finder = CacheCandidateFinder::new(dir.path(), "central");
        let candidates = finder.find_candidates(&widget());
        assert_eq!(
            candidates.iter().next().unwrap().recorded_sha1(),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );
        assert!(
            candidates
                .find_by_sha1("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
                .is_some()
        );

        // content rotted after the sidecar was written
        fs::write(&path, b"hello w0rld").unwrap();
        let candidates = finder.find_candidates(&widget());
        assert!(
            candidates
                .find_by_sha1("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
                .is_none()
        );
    }

    #[test]
    fn test_staging_and_missing_root_ignored() {
        let dir = TempDir::new().unwrap();
        cache_in(dir.path(), STAGING_DIR, b"partial", 0);
        let finder = CacheCandidateFinder::new(dir.path(), "central");
        assert!(finder.find_candidates(&widget()).is_empty());

        let finder = CacheCandidateFinder::new(dir.path().join("missing"), "central");
        assert!(finder.find_candidates(&widget()).is_empty());
    }
}
