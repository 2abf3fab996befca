//! Content streams handed out by repositories

use bytes::Bytes;
use depot_core::RepoResource;
use futures::stream::BoxStream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Boxed byte reader
pub type BinaryReader = Box<dyn AsyncRead + Send + Unpin>;

/// Chunked byte stream as produced by remote transports
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Content of a resource, readable once
///
/// Dropping the stream closes the underlying reader.
pub struct ResourceStream {
    resource: RepoResource,
    reader: BinaryReader,
}

impl ResourceStream {
    pub fn new(resource: RepoResource, reader: BinaryReader) -> Self {
        Self { resource, reader }
    }

    /// Stream over an in-memory buffer
    pub fn from_bytes(resource: RepoResource, data: Bytes) -> Self {
        Self::new(resource, Box::new(io::Cursor::new(data)))
    }

    /// Resource this stream reads
    pub fn resource(&self) -> &RepoResource {
        &self.resource
    }

    pub fn size(&self) -> u64 {
        self.resource.size()
    }

    /// Read the remaining content into memory
    pub async fn read_all(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::with_capacity(self.size() as usize);
        self.reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    pub fn into_parts(self) -> (RepoResource, BinaryReader) {
        (self.resource, self.reader)
    }
}

impl AsyncRead for ResourceStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl std::fmt::Debug for ResourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStream")
            .field("resource", &self.resource.repo_path().to_string())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use depot_core::{RepoPath, ResourceInfo};

    #[tokio::test]
    async fn test_read_all() {
        let resource = RepoResource::found(
            RepoPath::new("libs", "a.txt"),
            ResourceInfo::new(5, Utc::now()),
        );
        let stream = ResourceStream::from_bytes(resource, Bytes::from_static(b"hello"));
        assert_eq!(stream.size(), 5);
        assert_eq!(stream.read_all().await.unwrap(), Bytes::from_static(b"hello"));
    }
}
