//! SFTP repository
//!
//! The SSH session itself is an external collaborator: callers supply a
//! [`ConnectionFactory`] whose connections implement [`SftpClient`]. This
//! backend only borrows clients, maps SFTP status codes onto the transport
//! contract and returns every client to the factory, whatever the outcome.
//! A client whose transfer is aborted is discarded instead.
//!
//! `SSH_FX_NO_SUCH_FILE` becomes `NotFound`. Every other status is a
//! [`TransportError`].

use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use url::Url;

use crate::download::ChecksumAlgorithm;
use crate::error::{ConfigError, Lookup, TransportError, TransportErrorKind};

use super::{
    ConnectionFactory, Credentials, LocalCandidates, RemoteResource, ResourceMetadata, Transport,
    join_location, reuse_candidate,
};

/// `SSH_FX_NO_SUCH_FILE`, the one status that means absent.
pub const SSH_FX_NO_SUCH_FILE: u32 = 2;

/// Status returned by a failed SFTP request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("sftp status {code}: {message}")]
pub struct SftpStatus {
    pub code: u32,
    pub message: String,
}

impl SftpStatus {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_no_such_file(&self) -> bool {
        self.code == SSH_FX_NO_SUCH_FILE
    }
}

/// One directory entry or `stat` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpEntry {
    pub filename: String,
    pub size: u64,
    /// Seconds since the epoch.
    pub mtime: Option<u64>,
    pub is_dir: bool,
}

/// The subset of an SFTP channel this backend needs.
pub trait SftpClient: Send {
    fn ls(&mut self, path: &str) -> Result<Vec<SftpEntry>, SftpStatus>;

    fn stat(&mut self, path: &str) -> Result<SftpEntry, SftpStatus>;

    /// Open a file for streaming. The reader must not borrow the client.
    fn open(&mut self, path: &str) -> Result<Box<dyn Read + Send>, SftpStatus>;
}

pub struct SftpTransport<F: ConnectionFactory> {
    url: Url,
    base: String,
    factory: Arc<F>,
    credentials: Option<Credentials>,
}

impl<F> SftpTransport<F>
where
    F: ConnectionFactory + 'static,
    F::Connection: SftpClient + 'static,
{
    pub fn new(
        url: &str,
        factory: Arc<F>,
        credentials: Option<Credentials>,
    ) -> Result<Self, ConfigError> {
        let parsed = Url::parse(url).map_err(|e| ConfigError::UnsupportedUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "sftp" || parsed.host_str().is_none() {
            return Err(ConfigError::UnsupportedUrl {
                url: url.to_string(),
                reason: "expected sftp://host[:port]/path".to_string(),
            });
        }
        Ok(Self {
            base: url.trim_end_matches('/').to_string(),
            url: parsed,
            factory,
            credentials,
        })
    }

    fn remote_path(&self, path: &str) -> String {
        join_location(self.url.path(), path)
    }

    fn location(&self, path: &str) -> String {
        join_location(&self.base, path)
    }

    /// Run `op` on a borrowed client and hand the client back, whatever
    /// `op` returns.
    fn with_client<T>(
        &self,
        op: impl FnOnce(&mut F::Connection) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut client = self
            .factory
            .acquire(&self.url, self.credentials.as_ref())?;
        let result = op(&mut client);
        self.factory.release(client);
        result
    }

    fn stat(
        &self,
        client: &mut F::Connection,
        path: &str,
    ) -> Result<Lookup<ResourceMetadata>, TransportError> {
        let location = self.location(path);
        match client.stat(&self.remote_path(path)) {
            Ok(entry) if entry.is_dir => Ok(Lookup::NotFound),
            Ok(entry) => Ok(Lookup::Found(ResourceMetadata {
                location,
                content_length: Some(entry.size),
                last_modified: entry
                    .mtime
                    .map(|secs| std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs)),
                sha1: None,
            })),
            Err(status) if status.is_no_such_file() => Ok(Lookup::NotFound),
            Err(status) => Err(translate("get", location, status)),
        }
    }

    fn sidecar_sha1(&self, client: &mut F::Connection, path: &str) -> Option<String> {
        let mut reader = client
            .open(&self.remote_path(&format!("{}.sha1", path)))
            .ok()?;
        let mut text = String::new();
        (&mut reader).take(4096).read_to_string(&mut text).ok()?;
        ChecksumAlgorithm::Sha1.parse_sidecar(&text)
    }

    fn open_stream(
        &self,
        client: &mut F::Connection,
        path: &str,
        candidates: &LocalCandidates,
    ) -> Result<Lookup<Opened>, TransportError> {
        let metadata = match self.stat(client, path)? {
            Lookup::Found(metadata) => metadata,
            Lookup::NotFound => return Ok(Lookup::NotFound),
        };

        if !candidates.is_empty() {
            let sha1 = self.sidecar_sha1(client, path);
            if let Some(resource) = reuse_candidate(path, &metadata, sha1.as_deref(), candidates) {
                return Ok(Lookup::Found(Opened::Local(resource)));
            }
        }

        match client.open(&self.remote_path(path)) {
            Ok(reader) => Ok(Lookup::Found(Opened::Remote(metadata, reader))),
            Err(status) if status.is_no_such_file() => Ok(Lookup::NotFound),
            Err(status) => Err(translate("get", metadata.location, status)),
        }
    }
}

enum Opened {
    Local(RemoteResource),
    Remote(ResourceMetadata, Box<dyn Read + Send>),
}

fn take_client<C>(slot: &Mutex<Option<C>>) -> Option<C> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl<F> Transport for SftpTransport<F>
where
    F: ConnectionFactory + 'static,
    F::Connection: SftpClient + 'static,
{
    fn base(&self) -> &str {
        &self.base
    }

    fn metadata(&self, path: &str) -> Result<Lookup<ResourceMetadata>, TransportError> {
        self.with_client(|client| self.stat(client, path))
    }

    fn fetch(
        &self,
        path: &str,
        candidates: &LocalCandidates,
    ) -> Result<Lookup<RemoteResource>, TransportError> {
        let mut client = self
            .factory
            .acquire(&self.url, self.credentials.as_ref())?;
        let (metadata, reader) = match self.open_stream(&mut client, path, candidates) {
            Ok(Lookup::Found(Opened::Remote(metadata, reader))) => (metadata, reader),
            Ok(Lookup::Found(Opened::Local(resource))) => {
                self.factory.release(client);
                return Ok(Lookup::Found(resource));
            }
            Ok(Lookup::NotFound) => {
                self.factory.release(client);
                return Ok(Lookup::NotFound);
            }
            Err(e) => {
                self.factory.release(client);
                return Err(e);
            }
        };

        // The stream keeps using the session. A normal release hands the
        // client back to the factory; an abort discards it.
        let slot = Arc::new(Mutex::new(Some(client)));
        let release = {
            let factory = Arc::clone(&self.factory);
            let slot = Arc::clone(&slot);
            move || {
                if let Some(client) = take_client(&slot) {
                    factory.release(client);
                }
                Ok(())
            }
        };
        let factory = Arc::clone(&self.factory);
        let resource = RemoteResource::new(path, metadata, reader)
            .on_release(release)
            .on_abort(move || {
                if let Some(client) = take_client(&slot) {
                    factory.discard(client);
                }
            });
        Ok(Lookup::Found(resource))
    }

    fn list(&self, path: &str) -> Result<Lookup<Vec<String>>, TransportError> {
        self.with_client(|client| match client.ls(&self.remote_path(path)) {
            Ok(entries) => Ok(Lookup::Found(
                entries
                    .into_iter()
                    .map(|entry| entry.filename)
                    .filter(|name| name != "." && name != "..")
                    .collect(),
            )),
            Err(status) if status.is_no_such_file() => Ok(Lookup::NotFound),
            Err(status) => Err(translate("list children for", self.location(path), status)),
        })
    }
}

fn translate(action: &'static str, location: String, status: SftpStatus) -> TransportError {
    TransportError::new(
        action,
        location,
        TransportErrorKind::Status(status.code as u16),
        status.message,
    )
}
