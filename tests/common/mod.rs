//! Shared test doubles for resolver integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use levitate_depot::ChecksumAlgorithm;
use levitate_depot::error::{Lookup, TransportError, TransportErrorKind};
use levitate_depot::transport::{LocalCandidates, RemoteResource, ResourceMetadata, Transport};

pub const HELLO_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Metadata(String),
    Fetch(String),
    List(String),
}

/// In-memory repository that records every call and counts handle
/// releases.
#[derive(Default)]
pub struct RecordingTransport {
    files: HashMap<String, Vec<u8>>,
    failures: HashMap<String, TransportErrorKind>,
    local_copies: HashMap<String, Vec<u8>>,
    fetch_delay: Duration,
    calls: Mutex<Vec<Call>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.insert(path.to_string(), content.to_vec());
        self
    }

    /// Add `path` plus a `.sha1` sidecar with its real digest.
    pub fn with_verified_file(self, path: &str, content: &[u8]) -> Self {
        let mut hasher = ChecksumAlgorithm::Sha1.hasher();
        hasher.update(content);
        let sha1 = hasher.finalize_hex();
        self.with_file(path, content)
            .with_file(&format!("{}.sha1", path), sha1.as_bytes())
    }

    /// Serve `content` as a reused local file whenever `path` is fetched
    /// with candidates, vouching for it with the repository's real SHA-1.
    pub fn with_local_copy(mut self, path: &str, content: &[u8]) -> Self {
        self.local_copies.insert(path.to_string(), content.to_vec());
        self
    }

    pub fn with_failure(mut self, path: &str, kind: TransportErrorKind) -> Self {
        self.failures.insert(path.to_string(), kind);
        self
    }

    /// Slow every fetch down, to widen race windows.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Fetches of anything but checksum sidecars.
    pub fn artifact_fetches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Fetch(path) if !is_sidecar(&path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn sidecar_fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Fetch(path) if is_sidecar(path)))
            .count()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, action: &'static str, path: &str) -> Result<(), TransportError> {
        match self.failures.get(path) {
            Some(kind) => Err(TransportError::new(
                action,
                self.location(path),
                *kind,
                "injected failure",
            )),
            None => Ok(()),
        }
    }

    fn location(&self, path: &str) -> String {
        format!("mem://repo/{}", path)
    }

    fn counted(&self, resource: RemoteResource) -> RemoteResource {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        resource.on_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

fn is_sidecar(path: &str) -> bool {
    path.ends_with(".sha1") || path.ends_with(".md5")
}

impl Transport for RecordingTransport {
    fn base(&self) -> &str {
        "mem://repo"
    }

    fn metadata(&self, path: &str) -> Result<Lookup<ResourceMetadata>, TransportError> {
        self.record(Call::Metadata(path.to_string()));
        self.check("get", path)?;
        let found = self.files.get(path).map(|content| {
            let mut metadata = ResourceMetadata::new(self.location(path));
            metadata.content_length = Some(content.len() as u64);
            metadata
        });
        Ok(Lookup::from(found))
    }

    fn fetch(
        &self,
        path: &str,
        candidates: &LocalCandidates,
    ) -> Result<Lookup<RemoteResource>, TransportError> {
        self.record(Call::Fetch(path.to_string()));
        std::thread::sleep(self.fetch_delay);
        self.check("get", path)?;

        let Some(content) = self.files.get(path) else {
            return Ok(Lookup::NotFound);
        };
        let mut metadata = ResourceMetadata::new(self.location(path));
        metadata.content_length = Some(content.len() as u64);

        if !candidates.is_empty()
            && let Some(local) = self.local_copies.get(path)
        {
            let mut hasher = ChecksumAlgorithm::Sha1.hasher();
            hasher.update(content);
            metadata.sha1 = Some(hasher.finalize_hex());
            let resource = RemoteResource::new(path, metadata, io::Cursor::new(local.clone()));
            return Ok(Lookup::Found(self.counted(resource.served_locally())));
        }

        let resource = RemoteResource::new(path, metadata, io::Cursor::new(content.clone()));
        Ok(Lookup::Found(self.counted(resource)))
    }

    fn list(&self, path: &str) -> Result<Lookup<Vec<String>>, TransportError> {
        self.record(Call::List(path.to_string()));
        self.check("list children for", path)?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .files
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            Ok(Lookup::NotFound)
        } else {
            Ok(Lookup::Found(names))
        }
    }
}
