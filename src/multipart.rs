//! Single-file `multipart/form-data` extraction.
//!
//! Only the shape a browser file form produces is understood: one boundary
//! header in the request head, then a part made of the boundary line, a
//! `Content-Disposition` line carrying the filename, a `Content-Type` line, a
//! blank line, the raw file bytes and the closing `\r\n--<token>--\r\n`.
//!
//! Header lines are consumed through the line-oriented window. The file body
//! is streamed as opaque bytes and never scanned for CRLF.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::connection::ConnectionState;
use crate::error::IngestError;
use crate::scan::find_terminator;

/// Request header announcing the boundary token
pub const BOUNDARY_HEADER: &[u8] = b"Content-Type: multipart/form-data; boundary=";

/// Boundary line of a multipart body, `--` prefix included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    line: String,
}

impl Boundary {
    /// Build from the raw token found after `boundary=`.
    ///
    /// Surrounding quotes are dropped. Returns `None` for an empty or
    /// non-UTF-8 token.
    pub fn from_token(token: &[u8]) -> Option<Self> {
        let token = token
            .strip_prefix(b"\"")
            .and_then(|t| t.strip_suffix(b"\""))
            .unwrap_or(token);
        if token.is_empty() {
            return None;
        }
        let token = std::str::from_utf8(token).ok()?;
        Some(Self {
            line: format!("--{token}"),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.line.as_bytes()
    }

    /// `\r\n<boundary>--\r\n`, which closes the file payload
    pub fn terminator(&self) -> Vec<u8> {
        let mut end = Vec::with_capacity(self.line.len() + 6);
        end.extend_from_slice(b"\r\n");
        end.extend_from_slice(self.line.as_bytes());
        end.extend_from_slice(b"--\r\n");
        end
    }
}

/// Read more bytes for a line-oriented step, mapping the end of the stream
/// (or a failed read) to `missing`.
async fn refill<S>(conn: &mut ConnectionState<S>, missing: IngestError) -> Result<(), IngestError>
where
    S: AsyncRead + Unpin,
{
    match conn.read_more().await {
        Ok(0) => Err(missing),
        Ok(_) => Ok(()),
        Err(IngestError::Read(e)) => {
            debug!(error = %e, "Read failed during multipart headers");
            Err(missing)
        }
        Err(e) => Err(e),
    }
}

/// Skip lines until the multipart boundary header and extract its token.
///
/// The header line itself stays buffered; later steps discard it as an
/// ordinary non-boundary line.
pub async fn read_boundary<S>(conn: &mut ConnectionState<S>) -> Result<Boundary, IngestError>
where
    S: AsyncRead + Unpin,
{
    loop {
        let Some(line) = conn.window().peek_line() else {
            refill(conn, IngestError::BoundaryNotFound).await?;
            continue;
        };
        if let Some(token) = line.strip_prefix(BOUNDARY_HEADER) {
            let boundary = Boundary::from_token(token).ok_or(IngestError::BoundaryNotFound)?;
            debug!(boundary = boundary.as_str(), "Found multipart boundary");
            return Ok(boundary);
        }
        conn.window_mut().remove_line();
    }
}

/// Skip to the boundary line and pull the filename out of the
/// `Content-Disposition` line that follows it. Both lines are consumed.
pub async fn read_filename<S>(
    conn: &mut ConnectionState<S>,
    boundary: &Boundary,
) -> Result<String, IngestError>
where
    S: AsyncRead + Unpin,
{
    loop {
        let Some(line) = conn.window().peek_line() else {
            refill(conn, IngestError::FilenameNotFound).await?;
            continue;
        };
        let is_boundary = line == boundary.as_bytes();
        conn.window_mut().remove_line();
        if is_boundary {
            break;
        }
    }

    while conn.window().line_len().is_none() {
        refill(conn, IngestError::FilenameNotFound).await?;
    }
    let filename = conn
        .window()
        .peek_line()
        .and_then(filename_from_disposition)
        .ok_or(IngestError::FilenameNotFound)?;
    conn.window_mut().remove_line();

    debug!(filename = %filename, "Found upload filename");
    Ok(filename)
}

/// Text after the last `=` of a disposition line, quotes stripped
fn filename_from_disposition(line: &[u8]) -> Option<String> {
    let eq = line.iter().rposition(|&b| b == b'=')?;
    let raw = &line[eq + 1..];
    let raw = raw.strip_prefix(b"\"").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\"").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(raw).into_owned())
}

/// Discard one header line, reading until it is complete
async fn skip_line<S>(conn: &mut ConnectionState<S>) -> Result<(), IngestError>
where
    S: AsyncRead + Unpin,
{
    while conn.window_mut().remove_line().is_none() {
        if conn.read_more().await? == 0 {
            return Err(IngestError::IncompleteBody);
        }
    }
    Ok(())
}

/// Copy the file payload into `sink` until the closing boundary.
///
/// Expects the window to start at the part's `Content-Type` line. Returns the
/// number of payload bytes written. The last `terminator - 1` bytes are held
/// back between reads, so a terminator split across any number of reads is
/// still recognised and never leaks into the sink.
pub async fn stream_file<S, W>(
    conn: &mut ConnectionState<S>,
    boundary: &Boundary,
    sink: &mut W,
) -> Result<u64, IngestError>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    // Content-Type line, then the blank line before the payload
    skip_line(conn).await?;
    skip_line(conn).await?;

    let terminator = boundary.terminator();
    let capacity = conn.window().capacity();
    if terminator.len() >= capacity {
        return Err(IngestError::BoundaryTooLong {
            len: terminator.len(),
            capacity,
        });
    }
    let lookback = terminator.len() - 1;
    let mut written = 0u64;

    loop {
        let pending = conn.window().as_slice();
        if let Some(at) = find_terminator(pending, &terminator) {
            sink.write_all(&pending[..at])
                .await
                .map_err(IngestError::Write)?;
            sink.flush().await.map_err(IngestError::Write)?;
            written += at as u64;
            conn.window_mut().consume(at + terminator.len());
            return Ok(written);
        }

        let flushable = pending.len().saturating_sub(lookback);
        if flushable > 0 {
            sink.write_all(&pending[..flushable])
                .await
                .map_err(IngestError::Write)?;
            written += flushable as u64;
            conn.window_mut().consume(flushable);
        }

        if conn.read_raw().await? == 0 {
            return Err(IngestError::IncompleteBody);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use tokio_test::io::Builder;

    const TOKEN: &str = "----WebKitFormBoundaryXYZ";

    fn conn_over<R>(reader: R) -> ConnectionState<R> {
        ConnectionState::new(reader, None, &IngestConfig::default())
    }

    fn upload_head() -> String {
        format!(
            "POST /upload HTTP/1.1\r\n\
             Host: localhost\r\n\
             Content-Type: multipart/form-data; boundary={TOKEN}\r\n\
             Content-Length: 999\r\n\
             \r\n\
             --{TOKEN}\r\n\
             Content-Disposition: form-data; name=\"image\"; filename=\"cat.bmp\"\r\n\
             Content-Type: image/bmp\r\n\
             \r\n"
        )
    }

    fn terminator() -> String {
        format!("\r\n--{TOKEN}--\r\n")
    }

    fn payload(len: usize) -> Vec<u8> {
        // Binary data full of CR, LF and dashes
        (0..len)
            .map(|i| match i % 7 {
                0 => b'\r',
                1 => b'\n',
                2 => b'-',
                _ => (i % 251) as u8,
            })
            .collect()
    }

    #[test]
    fn test_boundary_from_header_token() {
        let line = format!("Content-Type: multipart/form-data; boundary={TOKEN}");
        let token = line.as_bytes().strip_prefix(BOUNDARY_HEADER).unwrap();
        let boundary = Boundary::from_token(token).unwrap();
        assert_eq!(boundary.as_str(), "------WebKitFormBoundaryXYZ");
        assert_eq!(
            boundary.terminator(),
            b"\r\n------WebKitFormBoundaryXYZ--\r\n".to_vec()
        );
    }

    #[test]
    fn test_boundary_token_edge_cases() {
        assert_eq!(Boundary::from_token(b"\"abc\"").unwrap().as_str(), "--abc");
        assert!(Boundary::from_token(b"").is_none());
        assert!(Boundary::from_token(b"\"\"").is_none());
        assert!(Boundary::from_token(&[0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition(b"Content-Disposition: form-data; name=\"f\"; filename=\"a b.bmp\""),
            Some("a b.bmp".to_string())
        );
        assert_eq!(
            filename_from_disposition(b"Content-Disposition: form-data; filename=raw.txt"),
            Some("raw.txt".to_string())
        );
        assert_eq!(filename_from_disposition(b"Content-Disposition: form-data"), None);
        assert_eq!(filename_from_disposition(b"filename=\"\""), None);
    }

    #[tokio::test]
    async fn test_read_boundary_across_reads() {
        let head = upload_head();
        let (first, second) = head.as_bytes().split_at(70);
        let mut conn = conn_over(Builder::new().read(first).read(second).build());

        let boundary = read_boundary(&mut conn).await.unwrap();
        assert_eq!(boundary.as_str(), format!("--{TOKEN}"));
        assert!(conn.window().as_slice().starts_with(BOUNDARY_HEADER));

        let filename = read_filename(&mut conn, &boundary).await.unwrap();
        assert_eq!(filename, "cat.bmp");
    }

    #[tokio::test]
    async fn test_read_boundary_missing() {
        let mut conn = conn_over(
            Builder::new()
                .read(b"POST /upload HTTP/1.1\r\nHost: x\r\n\r\n")
                .build(),
        );
        let err = read_boundary(&mut conn).await.unwrap_err();
        assert!(matches!(err, IngestError::BoundaryNotFound));
    }

    #[tokio::test]
    async fn test_read_boundary_read_error() {
        let mut conn = conn_over(
            Builder::new()
                .read(b"POST /upload HTTP/1.1\r\nHo")
                .read_error(std::io::Error::other("reset"))
                .build(),
        );
        let err = read_boundary(&mut conn).await.unwrap_err();
        assert!(matches!(err, IngestError::BoundaryNotFound));
    }

    #[tokio::test]
    async fn test_read_filename_missing() {
        let head = format!("Content-Type: multipart/form-data; boundary={TOKEN}\r\n\r\n--{TOKEN}\r\n");
        let mut conn = conn_over(Builder::new().read(head.as_bytes()).build());
        let boundary = read_boundary(&mut conn).await.unwrap();
        let err = read_filename(&mut conn, &boundary).await.unwrap_err();
        assert!(matches!(err, IngestError::FilenameNotFound));
    }

    #[tokio::test]
    async fn test_stream_single_read() {
        let body = payload(1000);
        let mut wire = upload_head().into_bytes();
        wire.extend_from_slice(&body);
        wire.extend_from_slice(terminator().as_bytes());

        let mut conn = conn_over(Builder::new().read(&wire).build());
        let boundary = read_boundary(&mut conn).await.unwrap();
        read_filename(&mut conn, &boundary).await.unwrap();

        let mut sink = Vec::new();
        let written = stream_file(&mut conn, &boundary, &mut sink).await.unwrap();
        assert_eq!(written, 1000);
        assert_eq!(sink, body);
        assert!(conn.window().is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_identical_at_every_split_point() {
        let body = payload(300);
        let mut tail = body.clone();
        tail.extend_from_slice(terminator().as_bytes());

        for split in 0..=tail.len() {
            let (first, second) = tail.split_at(split);
            let mut script = Builder::new();
            script.read(upload_head().as_bytes());
            if !first.is_empty() {
                script.read(first);
            }
            if !second.is_empty() {
                script.read(second);
            }
            let mut conn = conn_over(script.build());

            let boundary = read_boundary(&mut conn).await.unwrap();
            read_filename(&mut conn, &boundary).await.unwrap();
            let mut sink = Vec::new();
            let written = stream_file(&mut conn, &boundary, &mut sink)
                .await
                .unwrap();

            assert_eq!(written, body.len() as u64, "split at {split}");
            assert_eq!(sink, body, "split at {split}");
        }
    }

    #[tokio::test]
    async fn test_stream_byte_at_a_time_with_small_window() {
        let body = payload(700);
        let mut wire = upload_head().into_bytes();
        wire.extend_from_slice(&body);
        wire.extend_from_slice(terminator().as_bytes());

        let mut script = Builder::new();
        for byte in &wire {
            script.read(std::slice::from_ref(byte));
        }
        let config = IngestConfig {
            buffer_capacity: 256,
            ..Default::default()
        };
        let mut conn = ConnectionState::new(script.build(), None, &config);

        let upload = conn.extract_upload(&mut Vec::new()).await.unwrap();
        assert_eq!(upload.filename, "cat.bmp");
        assert_eq!(upload.bytes_written, 700);
    }

    #[tokio::test]
    async fn test_stream_keeps_bytes_after_terminator() {
        let mut wire = upload_head().into_bytes();
        wire.extend_from_slice(b"abc");
        wire.extend_from_slice(terminator().as_bytes());
        wire.extend_from_slice(b"epilogue");

        let mut conn = conn_over(Builder::new().read(&wire).build());
        let mut sink = Vec::new();
        let upload = conn.extract_upload(&mut sink).await.unwrap();
        assert_eq!(upload.bytes_written, 3);
        assert_eq!(sink, b"abc");
        assert_eq!(conn.window().as_slice(), b"epilogue");
    }

    #[tokio::test]
    async fn test_stream_incomplete_body() {
        let mut wire = upload_head().into_bytes();
        wire.extend_from_slice(&payload(100));
        wire.extend_from_slice(format!("\r\n--{TOKEN}-").as_bytes());

        let mut conn = conn_over(Builder::new().read(&wire).build());
        let err = conn.extract_upload(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::IncompleteBody));
    }

    #[tokio::test]
    async fn test_boundary_too_long_for_window() {
        let boundary = Boundary::from_token("y".repeat(300).as_bytes()).unwrap();
        let config = IngestConfig {
            buffer_capacity: 256,
            ..Default::default()
        };
        let reader = Builder::new().read(b"Content-Type: text/plain\r\n\r\n").build();
        let mut conn = ConnectionState::new(reader, None, &config);

        let err = stream_file(&mut conn, &boundary, &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::BoundaryTooLong {
                len: 308,
                capacity: 256
            }
        ));
    }
}
