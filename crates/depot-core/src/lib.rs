//! Depot Core - Core types for the artifact repository engine
//!
//! This crate provides the foundational types used throughout Depot:
//! - `RepoPath`: Identifier of an item in a repository namespace
//! - `RepoResource`: Result of looking an item up in a repository (found or unfound)
//! - `ChecksumPolicy`: Reconciliation of remote and computed checksums
//! - `MavenMetadata`: The `maven-metadata.xml` document model with merge support
//! - `RequestContext`: Explicit per-request state (principal, flags, properties)
//! - `naming`: Maven layout rules (snapshots, metadata, checksum files, companions)

pub mod path;
pub mod properties;
pub mod checksum;
pub mod policy;
pub mod resource;
pub mod naming;
pub mod metadata;
pub mod context;
pub mod error;

pub use path::RepoPath;
pub use properties::Properties;
pub use checksum::{ChecksumInfo, ChecksumType, ChecksumsInfo, Checksummer, ComputedChecksums};
pub use policy::{ChecksumMismatch, ChecksumPolicy, ChecksumPolicyType};
pub use resource::{RepoResource, ResourceInfo, ResourceState};
pub use metadata::{MavenMetadata, Plugin, Snapshot, SnapshotVersion, Versioning};
pub use context::{DownloadRequest, Principal, RequestContext, RequestOrigin};
pub use error::{CoreError, Result};
