//! Transport abstraction
//!
//! Every repository protocol implements [`Transport`]: a cheap existence
//! check, a fetch that hands back an owned [`RemoteResource`], and a
//! directory-style listing. All three return `Result<Lookup<T>, _>`, so an
//! absent resource is `Ok(Lookup::NotFound)` and only real failures are
//! errors. Backends translate their native errors at this boundary.
//!
//! Backends:
//! - [`file::FileTransport`] - a repository on a local or mounted filesystem
//! - [`http::HttpTransport`] - plain HTTP(S), connection pooling via the agent
//! - [`sftp::SftpTransport`] - SFTP over a pluggable client factory

pub mod file;
pub mod http;
pub mod sftp;

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use url::Url;

use crate::download::ChecksumAlgorithm;
use crate::error::{ConfigError, Lookup, TransportError};

/// What a repository knows about a resource without transferring it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMetadata {
    pub location: String,
    pub content_length: Option<u64>,
    pub last_modified: Option<SystemTime>,
    /// SHA-1 advertised by the repository alongside the resource, if any.
    pub sha1: Option<String>,
}

impl ResourceMetadata {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }
}

type Release = Box<dyn FnOnce() -> Result<(), TransportError> + Send>;
type Interrupt = Box<dyn FnOnce() + Send>;

/// How a resource lets go of its connection. Taken exactly once, by
/// whichever of close, drop or abort gets there first.
#[derive(Default)]
struct Teardown {
    release: Option<Release>,
    /// Replaces `release` when the transfer is aborted mid-stream.
    interrupt: Option<Interrupt>,
}

type SharedTeardown = Arc<Mutex<Teardown>>;

fn take_teardown(teardown: &SharedTeardown) -> Teardown {
    std::mem::take(&mut *teardown.lock().unwrap_or_else(PoisonError::into_inner))
}

fn run_aborted(teardown: &SharedTeardown) {
    let Teardown { release, interrupt } = take_teardown(teardown);
    if let Some(interrupt) = interrupt {
        interrupt();
    } else if let Some(release) = release
        && let Err(e) = release()
    {
        tracing::warn!("failed to release aborted resource: {}", e);
    }
}

/// An open resource: content stream plus metadata.
///
/// Owned by whoever fetched it. Release happens exactly once, either through
/// [`RemoteResource::close`], which reports release failures, on drop as a
/// fallback for early exits, or from another thread through an
/// [`AbortHandle`].
pub struct RemoteResource {
    path: String,
    metadata: ResourceMetadata,
    reader: Option<Box<dyn Read + Send>>,
    teardown: SharedTeardown,
    abort: AbortHandle,
    local: bool,
}

impl RemoteResource {
    /// `path` is the repository-relative path that was fetched.
    pub fn new(
        path: impl Into<String>,
        metadata: ResourceMetadata,
        reader: impl Read + Send + 'static,
    ) -> Self {
        let teardown = SharedTeardown::default();
        let abort = AbortHandle::new();
        abort.bind(&teardown);
        Self {
            path: path.into(),
            metadata,
            reader: Some(Box::new(reader)),
            teardown,
            abort,
            local: false,
        }
    }

    /// Run `release` when the handle is closed, dropped or aborted.
    pub fn on_release(
        self,
        release: impl FnOnce() -> Result<(), TransportError> + Send + 'static,
    ) -> Self {
        self.teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release = Some(Box::new(release));
        self
    }

    /// Run `interrupt` instead of the release hook when the transfer is
    /// aborted. It must unblock a read in progress on another thread.
    pub fn on_abort(self, interrupt: impl FnOnce() + Send + 'static) -> Self {
        self.teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .interrupt = Some(Box::new(interrupt));
        self
    }

    /// Tie this resource to a caller's handle. If the handle has already
    /// been aborted the connection is torn down immediately.
    pub fn with_abort(mut self, abort: &AbortHandle) -> Self {
        abort.bind(&self.teardown);
        self.abort = abort.clone();
        self
    }

    /// Mark the content as served from a local candidate.
    pub fn served_locally(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn location(&self) -> &str {
        &self.metadata.location
    }

    pub fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Handle that lets another thread abandon the transfer.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Release the underlying connection and report any failure doing so.
    pub fn close(mut self) -> Result<(), TransportError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), TransportError> {
        self.reader.take();
        match take_teardown(&self.teardown).release {
            Some(release) => release(),
            None => Ok(()),
        }
    }
}

impl Read for RemoteResource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.abort.is_aborted() {
            self.reader.take();
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "transfer aborted"));
        }
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "resource closed")),
        }
    }
}

impl Drop for RemoteResource {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(location = %self.metadata.location, "failed to release resource: {}", e);
        }
    }
}

impl fmt::Debug for RemoteResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteResource")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .field("local", &self.local)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct AbortState {
    aborted: AtomicBool,
    bound: Mutex<Vec<Weak<Mutex<Teardown>>>>,
}

/// Cancels in-flight transfers.
///
/// Aborting tears down every resource bound to the handle: its interrupt
/// hook runs (or its release hook, if it has none), so a read blocked on
/// the connection returns, and the next read fails. A partially staged file
/// is never promoted. Once aborted a handle stays aborted.
#[derive(Clone, Default)]
pub struct AbortHandle(Arc<AbortState>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.aborted.store(true, Ordering::Release);
        let bound = std::mem::take(&mut *self.0.bound.lock().unwrap_or_else(PoisonError::into_inner));
        for teardown in bound.iter().filter_map(Weak::upgrade) {
            run_aborted(&teardown);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.0.aborted.load(Ordering::Acquire)
    }

    fn bind(&self, teardown: &SharedTeardown) {
        let mut bound = self.0.bound.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_aborted() {
            drop(bound);
            run_aborted(teardown);
            return;
        }
        bound.retain(|weak| weak.strong_count() > 0);
        bound.push(Arc::downgrade(teardown));
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// A file already on local disk that may be byte-identical to a remote
/// resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCandidate {
    path: PathBuf,
    sha1: Option<String>,
}

impl LocalCandidate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sha1: None,
        }
    }

    /// Candidate with a recorded SHA-1 (e.g. from a cache sidecar).
    pub fn with_sha1(path: impl Into<PathBuf>, sha1: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sha1: Some(sha1.into().to_lowercase()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SHA-1 recorded next to the file. Says nothing about the bytes on
    /// disk now.
    pub fn recorded_sha1(&self) -> Option<&str> {
        self.sha1.as_deref()
    }

    /// SHA-1 of the file's current content.
    pub fn sha1(&self) -> io::Result<String> {
        ChecksumAlgorithm::Sha1.digest_file(&self.path)
    }
}

/// Ordered local candidates, most likely match first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCandidates(Vec<LocalCandidate>);

impl LocalCandidates {
    pub fn new(candidates: Vec<LocalCandidate>) -> Self {
        Self(candidates)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalCandidate> {
        self.0.iter()
    }

    /// First candidate whose content hashes to `sha1`. A recorded SHA-1
    /// can only rule a candidate out; a match is always confirmed against
    /// the bytes. Unreadable candidates are skipped.
    pub fn find_by_sha1(&self, sha1: &str) -> Option<&LocalCandidate> {
        let sha1 = sha1.to_lowercase();
        self.0
            .iter()
            .filter(|candidate| candidate.recorded_sha1().is_none_or(|recorded| recorded == sha1))
            .find(|candidate| match candidate.sha1() {
                Ok(actual) if actual == sha1 => true,
                Ok(_) => {
                    tracing::debug!(path = %candidate.path.display(), "candidate content changed, skipping");
                    false
                }
                Err(e) => {
                    tracing::debug!(path = %candidate.path.display(), "skipping unreadable candidate: {}", e);
                    false
                }
            })
    }
}

/// Opaque credentials handed to a connection factory.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Acquires and releases protocol connections. Must be safe for concurrent
/// use; it is the only state shared between concurrent resolutions besides
/// the cache.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Send;

    fn acquire(
        &self,
        location: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Self::Connection, TransportError>;

    fn release(&self, connection: Self::Connection);

    /// Tear down a connection whose transfer was aborted mid-stream. It must
    /// not go back into a pool. Dropping it is the default.
    fn discard(&self, connection: Self::Connection) {
        drop(connection);
    }
}

/// Capabilities every repository protocol provides.
pub trait Transport: Send + Sync {
    /// Base location, for messages.
    fn base(&self) -> &str;

    /// Existence, size and timestamp, without content.
    fn metadata(&self, path: &str) -> Result<Lookup<ResourceMetadata>, TransportError>;

    /// Open a resource. Backends may serve the content from one of
    /// `candidates` when the repository confirms it is identical.
    fn fetch(
        &self,
        path: &str,
        candidates: &LocalCandidates,
    ) -> Result<Lookup<RemoteResource>, TransportError>;

    /// Child names of `path`. `NotFound` means `path` doesn't exist; an
    /// existing empty directory is `Found(vec![])`.
    fn list(&self, path: &str) -> Result<Lookup<Vec<String>>, TransportError>;
}

/// Join a repository base and a relative path with exactly one `/`.
pub fn join_location(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Conditional fetch shared by the backends: if the repository's SHA-1 for
/// `path` matches a local candidate, serve that file instead of
/// transferring.
pub(crate) fn reuse_candidate(
    path: &str,
    metadata: &ResourceMetadata,
    remote_sha1: Option<&str>,
    candidates: &LocalCandidates,
) -> Option<RemoteResource> {
    let candidate = candidates.find_by_sha1(remote_sha1?)?;
    let file = match std::fs::File::open(candidate.path()) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path = %candidate.path().display(), "candidate vanished: {}", e);
            return None;
        }
    };
    tracing::debug!(
        location = %metadata.location,
        candidate = %candidate.path().display(),
        "reusing local candidate"
    );
    let mut metadata = metadata.clone();
    metadata.sha1 = remote_sha1.map(str::to_string);
    Some(RemoteResource::new(path, metadata, file).served_locally())
}

/// Read a small text resource (checksum sidecars) fully and release it.
pub(crate) fn read_small_text(
    resource: RemoteResource,
    limit: u64,
) -> Result<String, TransportError> {
    let mut resource = resource;
    let mut text = String::new();
    let read = (&mut resource).take(limit).read_to_string(&mut text);
    let location = resource.location().to_string();
    let closed = resource.close();
    read.map_err(|e| TransportError::io("read", location, &e))?;
    closed?;
    Ok(text)
}

/// Build a transport for a repository URL.
///
/// `file://` and `http(s)://` are built in. `sftp://` needs an SSH client,
/// which is supplied programmatically through [`sftp::SftpTransport::new`].
pub fn open(
    url: &str,
    credentials: Option<Credentials>,
    timeout: Duration,
) -> Result<Arc<dyn Transport>, ConfigError> {
    let unsupported = |reason: &str| ConfigError::UnsupportedUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url).map_err(|e| unsupported(&e.to_string()))?;

    match parsed.scheme() {
        "file" => {
            let root = parsed
                .to_file_path()
                .map_err(|_| unsupported("not a local path"))?;
            Ok(Arc::new(file::FileTransport::new(root)))
        }
        "http" | "https" => Ok(Arc::new(http::HttpTransport::new(url, credentials, timeout))),
        "sftp" => Err(unsupported(
            "sftp repositories need a client factory; construct SftpTransport directly",
        )),
        other => Err(unsupported(&format!("unknown scheme '{}'", other))),
    }
}
