//! Verifying downloader
//!
//! Streams an open [`RemoteResource`] into a staging file, hashing every
//! configured algorithm on the way through, then checks the result against
//! the repository's reference checksum.
//!
//! Reference checksums come from the resource's own metadata (an
//! `X-Checksum-Sha1` style header) or from a sidecar resource at
//! `path + ".<ext>"`. Algorithms are tried in configuration order and the
//! first one with a reference decides. With no reference at all the
//! download is accepted unverified; a reference that doesn't match is
//! always fatal.

mod checksum;

pub use checksum::{ChecksumAlgorithm, Checksums, Hasher, MultiHasher};

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{CacheError, Lookup, ResolveError, TransportError};
use crate::transport::{LocalCandidates, RemoteResource, Transport, read_small_text};
use crate::util::progress::{self, ProgressGuard};

const CHUNK_SIZE: usize = 64 * 1024;

/// Largest sidecar we read.
const SIDECAR_LIMIT: u64 = 4096;

/// Result of a successful download into staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub bytes: u64,
    pub checksums: Checksums,
    /// Algorithm whose reference checksum matched; `None` if the repository
    /// published none.
    pub verified_by: Option<ChecksumAlgorithm>,
}

/// Moves a resource's content into a staging file.
///
/// Implementations take ownership of the resource and must release it on
/// every path.
pub trait ResourceDownloader {
    fn download(
        &self,
        resource: RemoteResource,
        destination: &Path,
    ) -> Result<Downloaded, ResolveError>;
}

/// Downloader that verifies against repository checksums.
pub struct VerifyingDownloader<'a> {
    algorithms: &'a [ChecksumAlgorithm],
    transport: &'a dyn Transport,
    show_progress: bool,
}

impl<'a> VerifyingDownloader<'a> {
    pub fn new(algorithms: &'a [ChecksumAlgorithm], transport: &'a dyn Transport) -> Self {
        Self {
            algorithms,
            transport,
            show_progress: false,
        }
    }

    /// Draw a progress bar for large transfers.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn stream(
        &self,
        resource: &mut RemoteResource,
        destination: &Path,
    ) -> Result<(u64, Checksums), ResolveError> {
        let mut file =
            File::create(destination).map_err(|e| CacheError::new("stage", destination, e))?;
        let mut hashers = MultiHasher::new(self.algorithms);

        let guard = ProgressGuard::new(if self.show_progress && !resource.is_local() {
            progress::for_transfer(resource.path(), resource.metadata().content_length)
        } else {
            None
        });

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match resource.read(&mut buffer) {
                Ok(n) => n,
                Err(_) if resource.is_aborted() => return Err(cancelled(resource)),
                Err(e) => return Err(TransportError::io("read", resource.location(), &e).into()),
            };
            if n == 0 {
                break;
            }
            hashers.update(&buffer[..n]);
            file.write_all(&buffer[..n])
                .map_err(|e| CacheError::new("stage", destination, e))?;
            total += n as u64;
            guard.set_position(total);
        }

        file.sync_all()
            .map_err(|e| CacheError::new("stage", destination, e))?;
        Ok((total, hashers.finish()))
    }

    /// Reference checksum for `algorithm`, if the repository has one.
    fn reference(
        &self,
        resource: &RemoteResource,
        algorithm: ChecksumAlgorithm,
    ) -> Result<Option<String>, TransportError> {
        if algorithm == ChecksumAlgorithm::Sha1
            && let Some(sha1) = &resource.metadata().sha1
        {
            return Ok(Some(sha1.clone()));
        }

        let sidecar = format!("{}.{}", resource.path(), algorithm.extension());
        let text = match self.transport.fetch(&sidecar, &LocalCandidates::none())? {
            Lookup::Found(handle) => read_small_text(handle, SIDECAR_LIMIT)?,
            Lookup::NotFound => return Ok(None),
        };
        let parsed = algorithm.parse_sidecar(&text);
        if parsed.is_none() {
            tracing::warn!(%sidecar, "ignoring unparseable {} checksum", algorithm);
        }
        Ok(parsed)
    }

    fn verify(
        &self,
        resource: &RemoteResource,
        checksums: &Checksums,
    ) -> Result<Option<ChecksumAlgorithm>, ResolveError> {
        if resource.is_aborted() {
            return Err(cancelled(resource));
        }
        for (algorithm, actual) in checksums.iter() {
            let Some(expected) = self.reference(resource, algorithm)? else {
                continue;
            };
            if expected != actual {
                return Err(ResolveError::ChecksumMismatch {
                    location: resource.location().to_string(),
                    algorithm,
                    expected,
                    actual: actual.to_string(),
                });
            }
            tracing::debug!(location = %resource.location(), "{} checksum verified", algorithm);
            return Ok(Some(algorithm));
        }

        if !self.algorithms.is_empty() {
            tracing::warn!(
                location = %resource.location(),
                "no reference checksum published, accepting unverified"
            );
        }
        Ok(None)
    }
}

impl ResourceDownloader for VerifyingDownloader<'_> {
    fn download(
        &self,
        mut resource: RemoteResource,
        destination: &Path,
    ) -> Result<Downloaded, ResolveError> {
        let streamed = self.stream(&mut resource, destination);
        let verified = match streamed {
            Ok((bytes, checksums)) => self
                .verify(&resource, &checksums)
                .map(|verified_by| Downloaded {
                    bytes,
                    checksums,
                    verified_by,
                }),
            Err(e) => Err(e),
        };

        // The stream error wins over a release error; both are reported.
        let closed = resource.close();
        let downloaded = verified?;
        closed?;
        Ok(downloaded)
    }
}

fn cancelled(resource: &RemoteResource) -> ResolveError {
    ResolveError::Cancelled {
        location: resource.location().to_string(),
    }
}
