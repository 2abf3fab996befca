//! Download extension points
//!
//! Interceptors run inside the single-flight leader, before a remote item is
//! transferred. One may hand back alternate content (from a mirror, a
//! pre-seeded archive, ...) in which case the origin is not contacted for the
//! body at all.

use async_trait::async_trait;
use depot_core::{RepoResource, RequestContext};

use crate::error::Result;
use crate::stream::ByteStream;

#[async_trait]
pub trait DownloadInterceptor: Send + Sync {
    /// Content to store instead of downloading `remote`
    async fn alternate_content(
        &self,
        ctx: &RequestContext,
        remote: &RepoResource,
    ) -> Result<Option<ByteStream>>;

    /// Called once the item is stored in the cache
    async fn after_download(&self, _ctx: &RequestContext, _cached: &RepoResource) {}
}
