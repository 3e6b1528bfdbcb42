//! Filesystem repository
//!
//! Serves a repository laid out under a local directory (or a network
//! mount). Directories are never resources: fetching or probing one is
//! `NotFound`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Lookup, TransportError};

use super::{LocalCandidates, RemoteResource, ResourceMetadata, Transport, reuse_candidate};

pub struct FileTransport {
    root: PathBuf,
    base: String,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base = format!("file://{}", root.display());
        Self { root, base }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn file_metadata(
        &self,
        path: &str,
        action: &'static str,
    ) -> Result<Lookup<(PathBuf, ResourceMetadata)>, TransportError> {
        let file = self.resolve(path);
        let location = file.display().to_string();
        match fs::metadata(&file) {
            Ok(meta) if meta.is_file() => {
                let metadata = ResourceMetadata {
                    location,
                    content_length: Some(meta.len()),
                    last_modified: meta.modified().ok(),
                    sha1: None,
                };
                Ok(Lookup::Found((file, metadata)))
            }
            Ok(_) => Ok(Lookup::NotFound),
            Err(e) if is_absent(&e) => Ok(Lookup::NotFound),
            Err(e) => Err(TransportError::io(action, location, &e)),
        }
    }

    /// Sidecar SHA-1 next to `file`, if one exists and parses.
    fn sidecar_sha1(&self, file: &Path) -> Option<String> {
        let mut sidecar = file.as_os_str().to_owned();
        sidecar.push(".sha1");
        let content = fs::read_to_string(PathBuf::from(sidecar)).ok()?;
        crate::download::ChecksumAlgorithm::Sha1.parse_sidecar(&content)
    }
}

impl Transport for FileTransport {
    fn base(&self) -> &str {
        &self.base
    }

    fn metadata(&self, path: &str) -> Result<Lookup<ResourceMetadata>, TransportError> {
        Ok(self.file_metadata(path, "get")?.map(|(_, metadata)| metadata))
    }

    fn fetch(
        &self,
        path: &str,
        candidates: &LocalCandidates,
    ) -> Result<Lookup<RemoteResource>, TransportError> {
        let (file, metadata) = match self.file_metadata(path, "get")? {
            Lookup::Found(found) => found,
            Lookup::NotFound => return Ok(Lookup::NotFound),
        };

        if !candidates.is_empty() {
            let sha1 = self.sidecar_sha1(&file);
            if let Some(resource) = reuse_candidate(path, &metadata, sha1.as_deref(), candidates) {
                return Ok(Lookup::Found(resource));
            }
        }

        match fs::File::open(&file) {
            Ok(handle) => Ok(Lookup::Found(RemoteResource::new(path, metadata, handle))),
            // Removed between stat and open.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Lookup::NotFound),
            Err(e) => Err(TransportError::io("get", metadata.location, &e)),
        }
    }

    fn list(&self, path: &str) -> Result<Lookup<Vec<String>>, TransportError> {
        let dir = self.resolve(path);
        let location = dir.display().to_string();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if is_absent(&e) => return Ok(Lookup::NotFound),
            Err(e) => return Err(TransportError::io("list children for", location, &e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TransportError::io("list children for", &location, &e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(Lookup::Found(names))
    }
}

/// Missing, or a path component is a regular file.
fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalCandidate;
    use std::io::Read;
    use tempfile::TempDir;

    fn repo() -> (TempDir, FileTransport) {
        let dir = TempDir::new().unwrap();
        let module = dir.path().join("acme/widget/1.0");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::write(module.join("widget-1.0.jar"), b"hello world").unwrap();
        std::fs::write(
            module.join("widget-1.0.jar.sha1"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed\n",
        )
        .unwrap();
        let transport = FileTransport::new(dir.path());
        (dir, transport)
    }

    #[test]
    fn test_metadata_present_and_absent() {
        let (_dir, transport) = repo();

        let meta = transport.metadata("acme/widget/1.0/widget-1.0.jar").unwrap();
        let meta = meta.found().unwrap();
        assert_eq!(meta.content_length, Some(11));
        assert!(meta.last_modified.is_some());

        assert_eq!(
            transport.metadata("acme/widget/2.0/widget-2.0.jar").unwrap(),
            Lookup::NotFound
        );
        // Directories are not resources
        assert_eq!(transport.metadata("acme/widget").unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_fetch_streams_content() {
        let (_dir, transport) = repo();
        let mut resource = transport
            .fetch("acme/widget/1.0/widget-1.0.jar", &LocalCandidates::none())
            .unwrap()
            .found()
            .unwrap();
        assert!(!resource.is_local());
        assert_eq!(resource.path(), "acme/widget/1.0/widget-1.0.jar");

        let mut content = String::new();
        resource.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello world");
        resource.close().unwrap();
    }

    #[test]
    fn test_fetch_missing_is_not_found() {
        let (_dir, transport) = repo();
        let result = transport.fetch("nope.jar", &LocalCandidates::none()).unwrap();
        assert!(!result.is_found());
    }

    #[test]
    fn test_fetch_reuses_matching_candidate() {
        let (dir, transport) = repo();
        let local = dir.path().join("elsewhere.jar");
        std::fs::write(&local, b"hello world").unwrap();

        let candidates = LocalCandidates::new(vec![LocalCandidate::new(&local)]);
        let resource = transport
            .fetch("acme/widget/1.0/widget-1.0.jar", &candidates)
            .unwrap()
            .found()
            .unwrap();
        assert!(resource.is_local());
    }

    #[test]
    fn test_fetch_ignores_mismatched_candidate() {
        let (dir, transport) = repo();
        let local = dir.path().join("elsewhere.jar");
        std::fs::write(&local, b"something else").unwrap();

        let candidates = LocalCandidates::new(vec![LocalCandidate::new(&local)]);
        let resource = transport
            .fetch("acme/widget/1.0/widget-1.0.jar", &candidates)
            .unwrap()
            .found()
            .unwrap();
        assert!(!resource.is_local());
    }

    #[test]
    fn test_list_distinguishes_missing_from_empty() {
        let (dir, transport) = repo();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        assert_eq!(
            transport.list("acme/widget/1.0").unwrap(),
            Lookup::Found(vec![
                "widget-1.0.jar".to_string(),
                "widget-1.0.jar.sha1".to_string()
            ])
        );
        assert_eq!(transport.list("empty").unwrap(), Lookup::Found(vec![]));
        assert_eq!(transport.list("missing").unwrap(), Lookup::NotFound);
    }
}
