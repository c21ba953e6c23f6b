use std::io;
use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while ingesting one connection.
///
/// All of these are local to the connection that produced them. The driver
/// answers (when it still can) and releases that one slot; nothing here is
/// meant to take the process down.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read from socket: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write upload data: {0}")]
    Write(#[source] io::Error),

    #[error("peer closed the connection before a full request line arrived")]
    ConnectionClosed,

    #[error("line does not fit in a {capacity} byte buffer")]
    LineTooLong { capacity: usize },

    #[error("unsupported request method `{0}`")]
    MalformedMethod(String),

    #[error("request line has no target path")]
    MissingTarget,

    #[error("no multipart boundary header before end of stream")]
    BoundaryNotFound,

    #[error("multipart terminator of {len} bytes cannot be streamed through a {capacity} byte buffer")]
    BoundaryTooLong { len: usize, capacity: usize },

    #[error("no uploaded filename before end of stream")]
    FilenameNotFound,

    #[error("stream ended before the multipart terminator")]
    IncompleteBody,

    #[error("no data from peer for {0:?}")]
    IdleTimeout(Duration),
}

impl IngestError {
    /// HTTP status code and reason phrase to answer this error with
    pub fn http_status(&self) -> (u16, &'static str) {
        use self::IngestError::*;
        match *self {
            LineTooLong { .. } | BoundaryTooLong { .. } => (413, "Payload Too Large"),
            Write(_) => (500, "Internal Server Error"),
            IdleTimeout(_) => (408, "Request Timeout"),
            // The peer is usually gone already, but a 400 is the honest answer
            Read(_) | ConnectionClosed | IncompleteBody => (400, "Bad Request"),
            MalformedMethod(_) | MissingTarget | BoundaryNotFound | FilenameNotFound => {
                (400, "Bad Request")
            }
        }
    }

    /// Whether a response can still be written back to the peer
    pub fn peer_reachable(&self) -> bool {
        !matches!(self, IngestError::Read(_) | IngestError::ConnectionClosed)
    }
}
