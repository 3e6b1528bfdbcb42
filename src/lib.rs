//! Artifact resolution and caching for LevitateOS builds
//!
//! Given one artifact's coordinates, `levitate-depot` finds it in a
//! repository, downloads and verifies it, and commits it atomically to a
//! local cache shared by concurrent builds. Repeat resolutions are served
//! from the cache without touching the network.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use levitate_depot::{ArtifactCache, ArtifactIdentity, ArtifactResolver, Lookup};
//! use levitate_depot::transport::file::FileTransport;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(FileTransport::new("/srv/maven2"));
//! let cache = Arc::new(ArtifactCache::open("/var/cache/depot", "local")?);
//! let resolver = ArtifactResolver::builder(transport, cache)
//!     .checksums(["sha1", "md5"])
//!     .build()?;
//!
//! let id = ArtifactIdentity::parse("org.acme:widget:1.0")?;
//! match resolver.resolve_artifact(&id)? {
//!     Lookup::Found(entry) => println!("{}", entry.path.display()),
//!     Lookup::NotFound => eprintln!("{} not found", id),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Pipeline
//!
//! - [`layout`] - coordinates to repository path via `[token]` patterns
//! - [`transport`] - metadata/fetch/list over file, HTTP and SFTP
//! - [`cache::LocalCandidateFinder`] - files already on disk that may match
//! - [`download`] - stream to staging while hashing, then verify
//! - [`cache`] - atomic promotion, one writer per slot
//! - [`resolver`] - tries patterns in order, cache first
//!
//! Absence is never an error: lookups return `Result<Lookup<T>, E>` and
//! `Lookup::NotFound` means "try the next place".

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod identity;
pub mod layout;
pub mod resolver;
pub mod transport;
pub mod util;

pub use cache::{ArtifactCache, CacheEntry};
pub use config::DepotConfig;
pub use download::ChecksumAlgorithm;
pub use error::{CacheError, ConfigError, Lookup, ResolveError, TransportError};
pub use identity::ArtifactIdentity;
pub use layout::{Layout, LayoutPattern};
pub use resolver::ArtifactResolver;
