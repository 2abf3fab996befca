//! Get command - resolve an item and stream it to stdout or a file

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use console::style;
use depot_core::{DownloadRequest, RequestContext};
use depot_repo::{ResponseHead, ResponseOutcome, ResponseSink};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{CliError, Result};
use crate::util;

enum Target {
    Stdout,
    File(PathBuf),
}

/// Writes the body to the target; the target is only opened once content
/// is actually coming, so a miss leaves no empty file behind.
struct OutputSink {
    target: Target,
    print_head: bool,
    writer: Option<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl OutputSink {
    fn new(target: Target, print_head: bool) -> Self {
        Self {
            target,
            print_head,
            writer: None,
        }
    }
}

#[async_trait]
impl ResponseSink for OutputSink {
    async fn send_head(&mut self, head: ResponseHead) -> io::Result<()> {
        if self.print_head {
            print_head(&head);
        } else if head.status == 200 {
            let writer: Box<dyn AsyncWrite + Send + Unpin> = match &self.target {
                Target::Stdout => Box::new(tokio::io::stdout()),
                Target::File(path) => Box::new(tokio::fs::File::create(path).await?),
            };
            self.writer = Some(writer);
        }
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_all(&chunk).await,
            None => Ok(()),
        }
    }

    async fn send_error(&mut self, status: u16, reason: &str) -> io::Result<()> {
        tracing::debug!("Response {}: {}", status, reason);
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }
}

fn print_head(head: &ResponseHead) {
    println!("{} {}", style("status:").dim(), head.status);
    println!("{} {}", style("path:").dim(), head.repo_path);
    println!("{} {}", style("size:").dim(), head.size);
    if let Some(modified) = head.last_modified {
        println!("{} {}", style("last-modified:").dim(), modified.to_rfc2822());
    }
    if let Some(mime_type) = &head.mime_type {
        println!("{} {}", style("content-type:").dim(), mime_type);
    }
    for (checksum_type, value) in &head.checksums {
        println!("{} {}", style(format!("{}:", checksum_type.header_name())).dim(), value);
    }
}

pub async fn run(
    config_path: Option<&Path>,
    offline: bool,
    id: &str,
    output: Option<&Path>,
    head: bool,
    if_modified_since: Option<DateTime<Utc>>,
    user: Option<&str>,
) -> Result<()> {
    let repo_path = util::parse_repo_path(id)?;
    let config = util::load_config(config_path)?;
    let service = util::open_service(config, offline)?;

    let mut request = DownloadRequest::new(repo_path.clone()).head_only(head);
    if let Some(since) = if_modified_since {
        request = request.if_modified_since(since);
    }
    let ctx = RequestContext::new(util::principal(user), request);

    let resolution = service.resolve(&ctx).await?;
    if let Some(repository) = resolution.repository_key() {
        tracing::debug!("{} resolved from {}", repo_path, repository);
    }

    let target = match output {
        Some(path) => Target::File(path.to_path_buf()),
        None => Target::Stdout,
    };
    let mut sink = OutputSink::new(target, head);
    let outcome = service.respond(&ctx, &resolution, &mut sink).await;

    match outcome {
        ResponseOutcome::Content { bytes } => {
            if let Some(path) = output {
                eprintln!(
                    "{} Saved {} to {} ({})",
                    style("✓").green(),
                    repo_path,
                    path.display(),
                    util::format_size(bytes)
                );
            }
            Ok(())
        }
        ResponseOutcome::HeadOnly => Ok(()),
        ResponseOutcome::NotModified => {
            eprintln!("{} {} not modified", style("→").blue(), repo_path);
            Ok(())
        }
        failure => {
            // A transfer that broke off mid-stream may have left a partial file
            if let (Some(path), Some(_)) = (output, sink.writer.as_ref()) {
                tokio::fs::remove_file(path).await.ok();
            }
            Err(match failure {
                ResponseOutcome::NotFound { reason } => CliError::not_found(reason),
                ResponseOutcome::Error { status, reason } => CliError::from_status(status, reason),
                _ => CliError::Io {
                    message: format!("Output closed before {} was written", repo_path),
                },
            })
        }
    }
}
