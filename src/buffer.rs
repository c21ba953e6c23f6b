use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::IngestError;
use crate::scan::find_newline;

/// Fixed-capacity staging buffer for one connection.
///
/// Holds only the bytes that have not been interpreted yet, always starting
/// at offset 0. The capacity is a hard bound: reads never add more than
/// `capacity() - occupied()` bytes.
#[derive(Debug)]
pub struct ByteWindow {
    bytes: BytesMut,
    capacity: usize,
}

impl ByteWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid, not yet consumed bytes
    #[inline]
    pub fn occupied(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Read once from `reader`, appending at most `remaining()` bytes.
    ///
    /// Returns the number of bytes added. Zero means either end of stream or
    /// a full window; callers that care check `is_full()` first.
    pub async fn append<R>(&mut self, reader: &mut R) -> Result<usize, IngestError>
    where
        R: AsyncRead + Unpin,
    {
        let room = self.remaining();
        if room == 0 {
            return Ok(0);
        }
        // Reclaims the space freed by earlier consumes before growing
        self.bytes.reserve(room);
        let mut limited = (&mut self.bytes).limit(room);
        reader.read_buf(&mut limited).await.map_err(IngestError::Read)
    }

    /// Copy as much of `data` as fits. Returns how many bytes were taken.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        self.bytes.extend_from_slice(&data[..take]);
        take
    }

    /// Discard the first `n` bytes.
    ///
    /// # Panics
    /// If `n` exceeds `occupied()`.
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.bytes.len(),
            "consume({n}) past {} buffered bytes",
            self.bytes.len()
        );
        self.bytes.advance(n);
    }

    /// Length of the first complete line, CRLF included
    #[inline]
    pub fn line_len(&self) -> Option<usize> {
        find_newline(&self.bytes)
    }

    /// First complete line without its CRLF
    pub fn peek_line(&self) -> Option<&[u8]> {
        self.line_len().map(|end| &self.bytes[..end - 2])
    }

    /// Remove exactly one CRLF-terminated line from the front.
    ///
    /// Returns the number of bytes removed. A trailing partial line is kept
    /// untouched until its CRLF arrives.
    pub fn remove_line(&mut self) -> Option<usize> {
        let end = self.line_len()?;
        self.bytes.advance(end);
        Some(end)
    }
}
