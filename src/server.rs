use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::connection::{ConnectionState, ConnectionTable, Upload};
use crate::error::IngestError;
use crate::request::{Method, RequestDescriptor};
use crate::response::ResponseBuffer;
use crate::security::sanitize_filename;

/// Upper bound on request bytes discarded after an early answer
const DRAIN_LIMIT: u64 = 1 << 20;
/// How long to wait for the peer to finish sending after an early answer
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub upload_dir: PathBuf,
    pub port: u16,
    pub log_requests: bool,
    pub ingest: IngestConfig,
}

pub async fn start_server(config: ServeConfig) -> Result<()> {
    config.ingest.validate()?;
    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload directory {:?}", config.upload_dir))?;

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Starting server on http://{}", addr);
    info!("Storing uploads in {:?}", config.upload_dir);

    serve(listener, config).await
}

/// Accept loop. Connections are served one at a time from a single slot;
/// the rest wait in the listen backlog.
pub async fn serve(listener: TcpListener, config: ServeConfig) -> Result<()> {
    let mut table: ConnectionTable<TcpStream> = ConnectionTable::new(1, config.ingest);

    loop {
        let (stream, peer) = listener.accept().await?;
        let Some(id) = table.insert(stream, Some(peer)) else {
            warn!(peer = %peer, "No free connection slot");
            continue;
        };

        if let Some(conn) = table.get_mut(id) {
            handle_connection(conn, &config).await;
        }
        table.release(id);
    }
}

async fn handle_connection(conn: &mut ConnectionState<TcpStream>, config: &ServeConfig) {
    let response = match respond(conn, config).await {
        Ok(response) => response,
        Err(e) => {
            warn!(peer = ?conn.peer(), error = %e, "Request failed");
            match e.downcast_ref::<IngestError>() {
                Some(err) if !err.peer_reachable() => return,
                Some(err) => {
                    let (code, text) = err.http_status();
                    ResponseBuffer::status(code, text)
                }
                None => ResponseBuffer::internal_error(),
            }
        }
    };

    let stream = conn.stream_mut();
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Write error: {}", e);
        return;
    }
    let _ = stream.shutdown().await;

    // Closing with unread bytes would reset the connection and could discard
    // the response before the peer reads it.
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, drain(stream)).await;
    if let Ok(Ok(n)) = drained {
        if n > 0 {
            debug!(bytes = n, "Discarded unread request bytes");
        }
    }
}

async fn drain(stream: &mut TcpStream) -> std::io::Result<u64> {
    let mut rest = stream.take(DRAIN_LIMIT);
    tokio::io::copy(&mut rest, &mut tokio::io::sink()).await
}

async fn respond(conn: &mut ConnectionState<TcpStream>, config: &ServeConfig) -> Result<ResponseBuffer> {
    let request = conn.consume_ready_socket().await?;
    let method = request.method;
    if config.log_requests {
        info!(method = %method, path = %request.path, "request");
    }

    match method {
        Method::Get => Ok(ResponseBuffer::text(&describe(request))),
        Method::Post => store_upload(conn, &config.upload_dir).await,
    }
}

/// Plain-text echo of a parsed request
fn describe(request: &RequestDescriptor) -> String {
    let mut text = format!("{} {}\n", request.method, request.path);
    for param in request.query() {
        text.push_str(&format!("  {} -> {}\n", param.name, param.value));
    }
    text
}

/// Stream an upload into a hidden temp file, then move it into place.
/// A failed upload leaves nothing behind: the temp file is removed on drop.
async fn store_upload(conn: &mut ConnectionState<TcpStream>, upload_dir: &Path) -> Result<ResponseBuffer> {
    let partial = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(upload_dir)
        .context("Failed to create temp file")?;
    let file = tokio::fs::File::from_std(partial.as_file().try_clone()?);
    let mut sink = BufWriter::new(file);

    let upload = conn.extract_upload(&mut sink).await?;
    sink.into_inner().sync_all().await?;

    let stored = match sanitize_filename(&upload.filename) {
        Ok(name) => Upload {
            filename: name,
            ..upload
        },
        Err(e) => {
            warn!(filename = %upload.filename, error = %e, "Rejected upload filename");
            return Ok(ResponseBuffer::bad_request());
        }
    };
    let dest = upload_dir.join(&stored.filename);
    partial
        .persist(&dest)
        .with_context(|| format!("Failed to store upload at {dest:?}"))?;

    info!(filename = %stored.filename, bytes = stored.bytes_written, "Upload stored");
    Ok(ResponseBuffer::created(&stored))
}
