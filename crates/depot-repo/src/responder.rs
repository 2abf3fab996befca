//! Writing resolved resources to a client
//!
//! The responder is front-end agnostic: it talks to a [`ResponseSink`] which
//! an HTTP layer (or the CLI) implements. Failures while streaming the body
//! are reported to the client as not-found, never as a server error, and
//! logged here with the details.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use depot_core::{ChecksumType, RepoPath, RequestContext};
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::download::Resolution;

const CHUNK_SIZE: usize = 64 * 1024;

/// Response headers of a found resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub repo_path: RepoPath,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    pub checksums: BTreeMap<ChecksumType, String>,
}

/// Destination of a response
#[async_trait]
pub trait ResponseSink: Send {
    async fn send_head(&mut self, head: ResponseHead) -> io::Result<()>;

    async fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()>;

    async fn send_error(&mut self, status: u16, reason: &str) -> io::Result<()>;

    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What the client ended up receiving
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Content { bytes: u64 },
    HeadOnly,
    NotModified,
    NotFound { reason: String },
    Error { status: u16, reason: String },
    /// The client went away
    Aborted,
}

impl ResponseOutcome {
    pub fn status(&self) -> u16 {
        match self {
            ResponseOutcome::Content { .. } | ResponseOutcome::HeadOnly => 200,
            ResponseOutcome::NotModified => 304,
            ResponseOutcome::NotFound { .. } => 404,
            ResponseOutcome::Error { status, .. } => *status,
            ResponseOutcome::Aborted => 499,
        }
    }
}

/// Sink collecting everything in memory
#[derive(Debug, Default)]
pub struct BufferedSink {
    pub head: Option<ResponseHead>,
    pub body: BytesMut,
    pub error: Option<(u16, String)>,
    pub finished: bool,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(&self) -> Bytes {
        self.body.clone().freeze()
    }
}

#[async_trait]
impl ResponseSink for BufferedSink {
    async fn send_head(&mut self, head: ResponseHead) -> io::Result<()> {
        self.head = Some(head);
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.body.extend_from_slice(&chunk);
        Ok(())
    }

    async fn send_error(&mut self, status: u16, reason: &str) -> io::Result<()> {
        self.error = Some((status, reason.to_string()));
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RequestResponder {
    stream_timeout: Duration,
}

impl RequestResponder {
    pub fn new(stream_timeout: Duration) -> Self {
        Self { stream_timeout }
    }

    fn head(status: u16, resolution: &Resolution) -> ResponseHead {
        let resource = &resolution.resource;
        let checksums = resource
            .checksums()
            .map(|checksums| {
                checksums
                    .iter()
                    .filter_map(|info| {
                        info.actual
                            .clone()
                            .or_else(|| info.original.clone())
                            .map(|value| (info.checksum_type, value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        ResponseHead {
            status,
            repo_path: resource.response_repo_path().clone(),
            size: resource.size(),
            last_modified: resource.last_modified(),
            mime_type: resource.info().and_then(|info| info.mime_type.clone()),
            checksums,
        }
    }

    /// Send `resolution` to `sink`
    pub async fn respond(
        &self,
        ctx: &RequestContext,
        resolution: &Resolution,
        sink: &mut dyn ResponseSink,
    ) -> ResponseOutcome {
        match self.send(ctx, resolution, sink).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!("Client gave up on {}: {}", ctx.repo_path(), e);
                ResponseOutcome::Aborted
            }
        }
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        resolution: &Resolution,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<ResponseOutcome> {
        let resource = &resolution.resource;
        if !resource.is_found() {
            let reason = resource.reason().unwrap_or("Not found").to_string();
            let status = resource.status_code().unwrap_or(404);
            sink.send_error(status, &reason).await?;
            return Ok(if status == 404 {
                ResponseOutcome::NotFound { reason }
            } else {
                ResponseOutcome::Error { status, reason }
            });
        }

        if ctx.request.head_only {
            sink.send_head(Self::head(200, resolution)).await?;
            sink.finish().await?;
            return Ok(ResponseOutcome::HeadOnly);
        }

        // HTTP dates have second precision
        if let (Some(since), Some(modified)) =
            (ctx.request.if_modified_since, resource.last_modified())
        {
            if since.timestamp() >= modified.timestamp() {
                sink.send_head(Self::head(304, resolution)).await?;
                sink.finish().await?;
                return Ok(ResponseOutcome::NotModified);
            }
        }

        let mut stream = match resolution.open(ctx).await {
            Ok(stream) => stream,
            Err(e) => {
                let status = e.status_code();
                let reason = e.to_string();
                tracing::warn!("Cannot open {}: {}", resource.repo_path(), reason);
                sink.send_error(status, &reason).await?;
                return Ok(if status == 404 {
                    ResponseOutcome::NotFound { reason }
                } else {
                    ResponseOutcome::Error { status, reason }
                });
            }
        };

        sink.send_head(Self::head(200, resolution)).await?;

        let mut sent = 0u64;
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            buf.reserve(CHUNK_SIZE);
            let read = tokio::time::timeout(self.stream_timeout, stream.read_buf(&mut buf)).await;
            let failure = match read {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {
                    sent += buf.len() as u64;
                    sink.send_chunk(buf.split().freeze()).await?;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no data for {:?}", self.stream_timeout),
            };

            tracing::warn!(
                "Streaming {} failed after {} bytes: {}",
                resource.repo_path(),
                sent,
                failure
            );
            let reason = format!("Transfer of {} interrupted", resource.response_repo_path());
            sink.send_error(404, &reason).await?;
            return Ok(ResponseOutcome::NotFound { reason });
        }

        sink.finish().await?;
        tracing::debug!("Sent {} ({} bytes)", resource.response_repo_path(), sent);
        Ok(ResponseOutcome::Content { bytes: sent })
    }
}
