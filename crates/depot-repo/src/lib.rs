//! Depot Repository Engine
//!
//! This crate resolves artifact requests across local, remote and virtual
//! repositories:
//!
//! - **Local repositories**: deployable, no upstream
//! - **Remote repositories**: proxies caching an HTTP or file origin
//! - **Virtual repositories**: ordered aggregations of the others
//!
//! ## Key Features
//!
//! - **Single-flight downloads**: concurrent requests for one path share a
//!   single remote transfer
//! - **Self-healing offline mode**: a failing origin is left alone for a
//!   cooldown window while cached copies keep being served
//! - **Snapshot and metadata resolution**: newest snapshot wins, metadata is
//!   merged across repositories
//! - **Checksum policies**: remote content is verified before it is cached
//!
//! ## Example
//!
//! ```rust,no_run
//! use depot_core::{RepoPath, RequestContext};
//! use depot_repo::{DepotConfig, RepositoryService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DepotConfig::load()?;
//! let service = RepositoryService::builder(config).build()?;
//!
//! let ctx = RequestContext::anonymous(RepoPath::new("public", "org/acme/lib/1.0/lib-1.0.jar"));
//! let (resource, content) = service.download(&ctx).await?;
//! println!("{} ({} bytes)", resource.repo_path(), content.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Notes
//!
//! - Credentials are never sent after a cross-origin redirect
//! - Permission-gate refusals are never cached

pub mod error;
pub mod config;
pub mod credentials;
pub mod ttl_cache;
pub mod stream;
pub mod handle_pool;
pub mod single_flight;
pub mod storage;
pub mod security;
pub mod transport;
pub mod interceptor;
pub mod repo;
pub mod resolver;
pub mod merge;
pub mod download;
pub mod responder;
pub mod service;

// Re-exports for convenience
pub use error::{RepoError, Result};
pub use config::{
    DepotConfig, DownloadSettings, RemoteRepoDescriptor, RepoDescriptor, RepoPatterns,
    StorageSettings, TransportKind, VirtualRepoDescriptor, GLOBAL_REPO_KEY,
};
pub use credentials::{Credentials, ResolvedCredentials, ScopedCredentials};
pub use ttl_cache::TtlCache;
pub use stream::{BinaryReader, ByteStream, ResourceStream};
pub use handle_pool::HandlePool;
pub use single_flight::{Flight, FlightLeader, SingleFlight};
pub use storage::{
    BinaryStore, FsBinaryStore, ItemStore, MemoryBinaryStore, MemoryItemStore, MemoryPropertiesStore,
    PropertiesStore, SqliteItemStore, Storage, StoredItem,
};
pub use security::{AccessStatus, AllowAll, AnonymousReadOnly, PermissionGate};
pub use transport::{
    FileTransport, HttpTransport, MockTransport, RemoteInfo, RemoteItem, RemoteTransport,
    create_transport,
};
pub use interceptor::DownloadInterceptor;
pub use repo::{
    LocalCacheRepo, LocalRepo, RemoteRepo, RepoKind, Repositories, Repository, VirtualRepo,
};
pub use resolver::{Candidates, RepositoryResolver};
pub use merge::{Merged, MergedChecksumCache, MetadataMerger};
pub use download::{DownloadEngine, Resolution, Strategy};
pub use responder::{BufferedSink, RequestResponder, ResponseHead, ResponseOutcome, ResponseSink};
pub use service::{RepositoryService, RepositoryServiceBuilder};
