use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::buffer::ByteWindow;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::multipart::{read_boundary, read_filename, stream_file};
use crate::request::{parse_request_line, RequestDescriptor};

/// Outcome of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub filename: String,
    pub bytes_written: u64,
}

/// Everything needed to parse one client's stream across many reads
#[derive(Debug)]
pub struct ConnectionState<S> {
    stream: S,
    peer: Option<SocketAddr>,
    window: ByteWindow,
    request: Option<RequestDescriptor>,
    max_query_params: usize,
    idle_timeout: Option<Duration>,
}

impl<S> ConnectionState<S> {
    pub fn new(stream: S, peer: Option<SocketAddr>, config: &IngestConfig) -> Self {
        Self {
            stream,
            peer,
            window: ByteWindow::with_capacity(config.buffer_capacity),
            request: None,
            max_query_params: config.max_query_params,
            idle_timeout: config.idle_timeout,
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn window(&self) -> &ByteWindow {
        &self.window
    }

    pub(crate) fn window_mut(&mut self) -> &mut ByteWindow {
        &mut self.window
    }

    pub fn request(&self) -> Option<&RequestDescriptor> {
        self.request.as_ref()
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Try to parse the buffered request line.
    ///
    /// Returns `Ok(None)` until a full line is buffered. On success the
    /// descriptor replaces any previous one. The line stays in the window.
    pub fn parse_request_line(&mut self) -> Result<Option<&RequestDescriptor>, IngestError> {
        match parse_request_line(self.window.as_slice(), self.max_query_params)? {
            Some(request) => Ok(Some(self.attach(request))),
            None => Ok(None),
        }
    }

    fn attach(&mut self, request: RequestDescriptor) -> &RequestDescriptor {
        debug!(
            peer = ?self.peer,
            method = %request.method,
            path = %request.path,
            "Request parsed"
        );
        for param in request.query() {
            debug!(name = %param.name, value = %param.value, "  query param");
        }
        if request.query_truncated {
            warn!(
                path = %request.path,
                kept = request.query().count(),
                "Query string truncated"
            );
        }
        self.request.insert(request)
    }
}

impl<S> ConnectionState<S>
where
    S: AsyncRead + Unpin,
{
    /// Drop the line that was just handled, then read more bytes.
    ///
    /// Returns the number of bytes added; zero means the peer closed the
    /// stream. Fails with `LineTooLong` when the window is full and holds no
    /// complete line, since no amount of reading can produce one.
    pub async fn read_more(&mut self) -> Result<usize, IngestError> {
        self.window.remove_line();
        if self.window.is_full() && self.window.line_len().is_none() {
            return Err(IngestError::LineTooLong {
                capacity: self.window.capacity(),
            });
        }
        self.fill().await
    }

    /// Read more bytes without consuming any line first
    pub async fn read_raw(&mut self) -> Result<usize, IngestError> {
        self.fill().await
    }

    /// One bounded read. The idle limit restarts with every read, so a slow
    /// peer that keeps sending is never cut off.
    async fn fill(&mut self) -> Result<usize, IngestError> {
        let read = self.window.append(&mut self.stream);
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| IngestError::IdleTimeout(limit))?,
            None => read.await,
        }
    }

    /// Read until one full request line is buffered and parse it.
    pub async fn consume_ready_socket(&mut self) -> Result<&RequestDescriptor, IngestError> {
        loop {
            if let Some(request) =
                parse_request_line(self.window.as_slice(), self.max_query_params)?
            {
                return Ok(self.attach(request));
            }
            if self.read_more().await? == 0 {
                return Err(IngestError::ConnectionClosed);
            }
        }
    }

    /// Find the boundary and filename, then stream the file body into `sink`.
    ///
    /// On error the sink may hold a partial file; discarding it is up to the
    /// caller.
    pub async fn extract_upload<W>(&mut self, sink: &mut W) -> Result<Upload, IngestError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let boundary = read_boundary(self).await?;
        let filename = read_filename(self, &boundary).await?;
        let bytes_written = stream_file(self, &boundary, sink).await?;
        debug!(peer = ?self.peer, filename = %filename, bytes = bytes_written, "Upload complete");
        Ok(Upload {
            filename,
            bytes_written,
        })
    }
}

/// Opaque handle to a connection slot.
///
/// Carries the slot's generation, so a handle kept after `release` can never
/// reach the next connection placed in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<S> {
    generation: u64,
    state: Option<ConnectionState<S>>,
}

/// Fixed set of connection slots handed out by id
#[derive(Debug)]
pub struct ConnectionTable<S> {
    slots: Vec<Slot<S>>,
    config: IngestConfig,
    live: usize,
}

/// Allocate `n` unused connection slots
pub fn create_connection_slots<S>(n: usize, config: IngestConfig) -> ConnectionTable<S> {
    ConnectionTable::new(n, config)
}

impl<S> ConnectionTable<S> {
    pub fn new(n: usize, config: IngestConfig) -> Self {
        let slots = (0..n)
            .map(|_| Slot {
                generation: 0,
                state: None,
            })
            .collect();
        Self {
            slots,
            config,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn is_full(&self) -> bool {
        self.live == self.slots.len()
    }

    /// Place a new connection in a free slot. `None` when every slot is taken.
    pub fn insert(&mut self, stream: S, peer: Option<SocketAddr>) -> Option<ConnectionId> {
        let index = self.slots.iter().position(|slot| slot.state.is_none())?;
        let slot = &mut self.slots[index];
        slot.state = Some(ConnectionState::new(stream, peer, &self.config));
        self.live += 1;
        debug!(slot = index, peer = ?peer, "Connection slot assigned");
        Some(ConnectionId {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionState<S>> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.state.as_ref())
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionState<S>> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.state.as_mut())
    }

    /// Free a slot, dropping its parsed request and closing its stream.
    ///
    /// Returns `false` for an id that is stale or was never handed out.
    pub fn release(&mut self, id: ConnectionId) -> bool {
        let Some(slot) = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
        else {
            return false;
        };
        let Some(state) = slot.state.take() else {
            return false;
        };
        slot.generation += 1;
        self.live -= 1;
        debug!(slot = id.index, peer = ?state.peer, "Connection released");
        drop(state);
        true
    }
}

/// Release a connection slot; see [`ConnectionTable::release`]
pub fn release_connection<S>(table: &mut ConnectionTable<S>, id: ConnectionId) -> bool {
    table.release(id)
}
