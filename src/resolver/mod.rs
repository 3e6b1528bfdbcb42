//! Artifact resolution
//!
//! [`ArtifactResolver`] ties the pieces together for one repository:
//!
//! 1. the cache is consulted first; a populated slot is returned without
//!    touching the repository
//! 2. local candidates are gathered for conditional fetches
//! 3. each pattern is tried in declaration order: absent means try the next
//!    one, a transport failure ends the resolution
//! 4. the first resource found is downloaded, verified and promoted into
//!    the cache; a local copy that fails verification is dropped in favour
//!    of the repository's own bytes
//!
//! Metadata and artifacts use separate pattern lists but the same pipeline.
//! Metadata is resolved under [`ArtifactIdentity::module_metadata`], so the
//! two never share a cache slot.
//!
//! Firing the resolver's [`AbortHandle`] cancels every transfer in flight
//! and every resolution that hasn't started one yet.

use std::sync::Arc;

use crate::cache::{ArtifactCache, CacheEntry, LocalCandidateFinder, NoCandidates};
use crate::download::{ChecksumAlgorithm, VerifyingDownloader};
use crate::error::{ConfigError, Lookup, ResolveError, TransportError};
use crate::identity::ArtifactIdentity;
use crate::layout::{Layout, LayoutPattern};
use crate::transport::{AbortHandle, LocalCandidates, Transport, join_location};

/// Checksums tried when none are configured.
pub const DEFAULT_CHECKSUMS: &[&str] = &["sha1", "md5"];

/// Resolves artifacts and metadata from a single repository into a cache.
///
/// Cheap to share between threads; every method takes `&self`.
pub struct ArtifactResolver {
    transport: Arc<dyn Transport>,
    cache: Arc<ArtifactCache>,
    metadata_patterns: Vec<LayoutPattern>,
    artifact_patterns: Vec<LayoutPattern>,
    checksums: Vec<ChecksumAlgorithm>,
    finder: Arc<dyn LocalCandidateFinder>,
    metadata_extension: String,
    abort: AbortHandle,
    show_progress: bool,
}

impl ArtifactResolver {
    pub fn builder(
        transport: Arc<dyn Transport>,
        cache: Arc<ArtifactCache>,
    ) -> ArtifactResolverBuilder {
        ArtifactResolverBuilder {
            transport,
            cache,
            layout: Layout::default(),
            metadata_patterns: None,
            artifact_patterns: None,
            checksums: DEFAULT_CHECKSUMS.iter().map(|s| s.to_string()).collect(),
            finder: Arc::new(NoCandidates),
            metadata_extension: None,
            abort: AbortHandle::new(),
            show_progress: false,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn artifact_patterns(&self) -> &[LayoutPattern] {
        &self.artifact_patterns
    }

    pub fn metadata_patterns(&self) -> &[LayoutPattern] {
        &self.metadata_patterns
    }

    pub fn checksums(&self) -> &[ChecksumAlgorithm] {
        &self.checksums
    }

    /// Cancels this resolver's transfers when fired. Clones share state.
    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    /// Resolve a binary artifact to a verified file in the cache.
    pub fn resolve_artifact(
        &self,
        identity: &ArtifactIdentity,
    ) -> Result<Lookup<CacheEntry>, ResolveError> {
        self.resolve(&self.artifact_patterns, identity)
    }

    /// Resolve the metadata describing `identity`'s module version.
    pub fn resolve_metadata(
        &self,
        identity: &ArtifactIdentity,
    ) -> Result<Lookup<CacheEntry>, ResolveError> {
        self.resolve(&self.metadata_patterns, &self.metadata_identity(identity))
    }

    /// Whether any artifact pattern matches an existing resource. Never
    /// downloads and never touches the cache.
    pub fn artifact_exists(&self, identity: &ArtifactIdentity) -> Result<bool, TransportError> {
        self.exists(&self.artifact_patterns, identity)
    }

    /// Whether any metadata pattern matches an existing resource.
    pub fn metadata_exists(&self, identity: &ArtifactIdentity) -> Result<bool, TransportError> {
        self.exists(&self.metadata_patterns, &self.metadata_identity(identity))
    }

    /// Identity the metadata of `identity`'s module is resolved and cached
    /// under. `[ext]` in a metadata pattern becomes the descriptor
    /// extension (`pom`, `xml`), not the artifact's.
    pub fn metadata_identity(&self, identity: &ArtifactIdentity) -> ArtifactIdentity {
        identity.module_metadata(&self.metadata_extension)
    }

    fn resolve(
        &self,
        patterns: &[LayoutPattern],
        identity: &ArtifactIdentity,
    ) -> Result<Lookup<CacheEntry>, ResolveError> {
        if let Lookup::Found(entry) = self.cache.lookup(identity)? {
            tracing::debug!(identity = %identity, path = %entry.path.display(), "cache hit");
            return Ok(Lookup::Found(entry));
        }

        let candidates = self.finder.find_candidates(identity);
        let downloader = VerifyingDownloader::new(&self.checksums, self.transport.as_ref())
            .with_progress(self.show_progress);

        for pattern in patterns {
            let path = pattern.resolve(identity);
            let location = join_location(self.transport.base(), &path);
            if self.abort.is_aborted() {
                return Err(ResolveError::Cancelled { location });
            }
            tracing::debug!("Loading {}", location);

            let resource = match self.transport.fetch(&path, &candidates)? {
                Lookup::Found(resource) => resource.with_abort(&self.abort),
                Lookup::NotFound => {
                    tracing::debug!(pattern = pattern.as_str(), "not found: {}", path);
                    continue;
                }
            };

            let local = resource.is_local();
            let entry = match self.cache.download_and_cache(identity, &downloader, resource) {
                Err(ResolveError::ChecksumMismatch { .. }) if local => {
                    tracing::warn!(%location, "local copy failed verification, downloading");
                    match self.transport.fetch(&path, &LocalCandidates::none())? {
                        Lookup::Found(resource) => self.cache.download_and_cache(
                            identity,
                            &downloader,
                            resource.with_abort(&self.abort),
                        )?,
                        Lookup::NotFound => {
                            tracing::debug!(pattern = pattern.as_str(), "gone on refetch: {}", path);
                            continue;
                        }
                    }
                }
                result => result?,
            };
            return Ok(Lookup::Found(entry));
        }

        tracing::debug!(identity = %identity, "no pattern matched");
        Ok(Lookup::NotFound)
    }

    fn exists(
        &self,
        patterns: &[LayoutPattern],
        identity: &ArtifactIdentity,
    ) -> Result<bool, TransportError> {
        for pattern in patterns {
            let path = pattern.resolve(identity);
            tracing::debug!("Probing {}", join_location(self.transport.base(), &path));
            if self.transport.metadata(&path)?.is_found() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Configures an [`ArtifactResolver`]. Patterns and checksum names are
/// validated by [`build`](Self::build).
pub struct ArtifactResolverBuilder {
    transport: Arc<dyn Transport>,
    cache: Arc<ArtifactCache>,
    layout: Layout,
    metadata_patterns: Option<Vec<String>>,
    artifact_patterns: Option<Vec<String>>,
    checksums: Vec<String>,
    finder: Arc<dyn LocalCandidateFinder>,
    metadata_extension: Option<String>,
    abort: AbortHandle,
    show_progress: bool,
}

impl ArtifactResolverBuilder {
    /// Layout applied to every pattern. Also picks the default patterns.
    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn metadata_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_patterns = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn artifact_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifact_patterns = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Checksum algorithm names, in the order references are sought.
    pub fn checksums<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checksums = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn candidate_finder(mut self, finder: Arc<dyn LocalCandidateFinder>) -> Self {
        self.finder = finder;
        self
    }

    /// Extension substituted for `[ext]` in metadata patterns. Defaults to
    /// the layout's descriptor extension.
    pub fn metadata_extension(mut self, extension: impl Into<String>) -> Self {
        self.metadata_extension = Some(extension.into());
        self
    }

    /// Share an abort handle, e.g. one wired to Ctrl-C.
    pub fn abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn build(self) -> Result<ArtifactResolver, ConfigError> {
        let layout = self.layout;
        let (default_metadata, default_artifact) = layout.default_patterns();
        let compile = |patterns: Option<Vec<String>>, default: &str| {
            patterns
                .unwrap_or_else(|| vec![default.to_string()])
                .iter()
                .map(|p| LayoutPattern::new(p, layout))
                .collect::<Result<Vec<_>, _>>()
        };
        let metadata_patterns = compile(self.metadata_patterns, default_metadata)?;
        let artifact_patterns = compile(self.artifact_patterns, default_artifact)?;

        let mut checksums = Vec::with_capacity(self.checksums.len());
        for name in &self.checksums {
            let algorithm: ChecksumAlgorithm = name.parse()?;
            if !checksums.contains(&algorithm) {
                checksums.push(algorithm);
            }
        }

        Ok(ArtifactResolver {
            transport: self.transport,
            cache: self.cache,
            metadata_patterns,
            artifact_patterns,
            checksums,
            finder: self.finder,
            metadata_extension: self
                .metadata_extension
                .unwrap_or_else(|| layout.metadata_extension().to_string()),
            abort: self.abort,
            show_progress: self.show_progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::file::FileTransport;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    struct Fixture {
        repo: TempDir,
        _cache: TempDir,
        resolver: ArtifactResolver,
    }

    fn fixture(configure: impl FnOnce(ArtifactResolverBuilder) -> ArtifactResolverBuilder) -> Fixture {
        let repo = TempDir::new().unwrap();
        let module = repo.path().join("org/acme/widget/1.0");
        fs::create_dir_all(&module).unwrap();
        fs::write(module.join("widget-1.0.jar"), b"hello world").unwrap();
        fs::write(module.join("widget-1.0.jar.sha1"), HELLO_SHA1).unwrap();
        fs::write(module.join("widget-1.0.pom"), b"<project/>").unwrap();

        let cache = TempDir::new().unwrap();
        let artifact_cache = Arc::new(ArtifactCache::open(cache.path(), "local").unwrap());
        let transport: Arc<dyn Transport> = Arc::new(FileTransport::new(repo.path()));
        let resolver = configure(ArtifactResolver::builder(transport, artifact_cache))
            .build()
            .unwrap();
        Fixture {
            repo,
            _cache: cache,
            resolver,
        }
    }

    fn widget() -> ArtifactIdentity {
        ArtifactIdentity::new("org.acme", "widget", "1.0", "jar")
    }

    #[test]
    fn test_default_patterns_follow_layout() {
        let fx = fixture(|b| b);
        assert_eq!(fx.resolver.artifact_patterns().len(), 1);
        assert_eq!(fx.resolver.artifact_patterns()[0].layout(), Layout::Hierarchical);
        assert_eq!(
            fx.resolver.checksums(),
            &[ChecksumAlgorithm::Sha1, ChecksumAlgorithm::Md5]
        );

        let fx = fixture(|b| b.layout(Layout::Flat));
        assert_eq!(
            fx.resolver.metadata_patterns()[0].as_str(),
            crate::layout::FLAT_METADATA_PATTERN
        );
    }

    #[test]
    fn test_build_rejects_bad_configuration() {
        let repo = TempDir::new().unwrap();
        let cache = Arc::new(ArtifactCache::open(repo.path().join("cache"), "local").unwrap());
        let transport: Arc<dyn Transport> = Arc::new(FileTransport::new(repo.path()));

        let err = ArtifactResolver::builder(Arc::clone(&transport), Arc::clone(&cache))
            .artifact_patterns(["[org]/[modul]/[revision]"])
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownToken { ref token, .. } if token == "modul"));

        let err = ArtifactResolver::builder(transport, cache)
            .checksums(["sha1", "crc32"])
            .build()
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::UnknownChecksum("crc32".to_string()));
    }

    #[test]
    fn test_resolve_artifact_from_file_repository() {
        let fx = fixture(|b| b);
        let entry = fx.resolver.resolve_artifact(&widget()).unwrap().found().unwrap();
        assert_eq!(fs::read(&entry.path).unwrap(), b"hello world");
        assert_eq!(entry.sha1.as_deref(), Some(HELLO_SHA1));
    }

    #[test]
    fn test_metadata_cached_apart_from_artifact() {
        let fx = fixture(|b| b);
        let artifact = fx.resolver.resolve_artifact(&widget()).unwrap().found().unwrap();
        let metadata = fx.resolver.resolve_metadata(&widget()).unwrap().found().unwrap();

        assert_ne!(artifact.path, metadata.path);
        assert!(metadata.path.ends_with("org.acme/widget/1.0/metadata/widget-1.0.pom"));
        assert_eq!(fs::read(&metadata.path).unwrap(), b"<project/>");
        assert!(metadata.identity.is_metadata());
    }

    #[test]
    fn test_ext_metadata_pattern_does_not_shadow_artifact() {
        let fx = fixture(|b| {
            b.layout(Layout::Flat)
                .metadata_patterns(["[org]/[module]/[revision]/ivys/ivy-[revision].[ext]"])
                .artifact_patterns(["[org]/[module]/[revision]/jars/[artifact]-[revision].[ext]"])
        });
        let version = fx.repo.path().join("org.acme/widget/1.0");
        fs::create_dir_all(version.join("ivys")).unwrap();
        fs::create_dir_all(version.join("jars")).unwrap();
        fs::write(version.join("ivys/ivy-1.0.xml"), b"<ivy-module/>").unwrap();
        fs::write(version.join("jars/widget-1.0.jar"), b"hello world").unwrap();

        let metadata = fx.resolver.resolve_metadata(&widget()).unwrap().found().unwrap();
        let artifact = fx.resolver.resolve_artifact(&widget()).unwrap().found().unwrap();

        assert_eq!(fs::read(&metadata.path).unwrap(), b"<ivy-module/>");
        assert_eq!(fs::read(&artifact.path).unwrap(), b"hello world");
        assert_ne!(artifact.path, metadata.path);
        assert!(fx.resolver.metadata_exists(&widget()).unwrap());
    }

    #[test]
    fn test_aborted_resolver_fetches_nothing() {
        let fx = fixture(|b| b);
        fx.resolver.abort_handle().abort();

        let err = fx.resolver.resolve_artifact(&widget()).unwrap_err();
        assert!(matches!(err, ResolveError::Cancelled { .. }));
        assert_eq!(fx.resolver.cache().lookup(&widget()).unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_exists_probes_do_not_populate_cache() {
        let fx = fixture(|b| b);
        assert!(fx.resolver.artifact_exists(&widget()).unwrap());
        assert!(fx.resolver.metadata_exists(&widget()).unwrap());
        assert!(!fx.resolver.artifact_exists(&widget().with_classifier("sources")).unwrap());
        assert_eq!(fx.resolver.cache().lookup(&widget()).unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_missing_everywhere_is_not_found() {
        let fx = fixture(|b| {
            b.artifact_patterns([
                "[organisation]/[module]/[revision]/[artifact]-[revision].[ext]",
                "flat/[artifact]-[revision].[ext]",
            ])
        });
        let id = ArtifactIdentity::new("org.acme", "gadget", "2.0", "jar");
        assert_eq!(fx.resolver.resolve_artifact(&id).unwrap(), Lookup::NotFound);
    }
}
