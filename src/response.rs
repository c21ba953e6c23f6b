use serde::Serialize;

use crate::connection::Upload;

/// Complete HTTP response: status line + headers + \r\n\r\n + body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBuffer {
    pub buffer: Vec<u8>,
}

#[derive(Serialize)]
struct UploadReceipt<'a> {
    filename: &'a str,
    bytes: u64,
}

impl ResponseBuffer {
    /// Build a complete HTTP/1.1 response. `Content-Length` and
    /// `Connection: close` are always added.
    pub fn new(status_code: u16, status_text: &str, headers: &[(&str, &str)], body: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(256 + body.len());

        // Status line
        buffer.extend_from_slice(b"HTTP/1.1 ");
        buffer.extend_from_slice(status_code.to_string().as_bytes());
        buffer.extend_from_slice(b" ");
        buffer.extend_from_slice(status_text.as_bytes());
        buffer.extend_from_slice(b"\r\n");

        for (key, value) in headers {
            buffer.extend_from_slice(key.as_bytes());
            buffer.extend_from_slice(b": ");
            buffer.extend_from_slice(value.as_bytes());
            buffer.extend_from_slice(b"\r\n");
        }

        buffer.extend_from_slice(b"Content-Length: ");
        buffer.extend_from_slice(body.len().to_string().as_bytes());
        buffer.extend_from_slice(b"\r\n");
        // One request per connection
        buffer.extend_from_slice(b"Connection: close\r\n");

        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(body);

        Self { buffer }
    }

    /// Plain-text response whose body is the reason phrase
    pub fn status(status_code: u16, status_text: &str) -> Self {
        Self::new(
            status_code,
            status_text,
            &[("Content-Type", "text/plain"), ("Cache-Control", "no-cache")],
            status_text.as_bytes(),
        )
    }

    pub fn text(body: &str) -> Self {
        Self::new(200, "OK", &[("Content-Type", "text/plain")], body.as_bytes())
    }

    /// 201 with a JSON receipt for a stored upload
    pub fn created(upload: &Upload) -> Self {
        let receipt = UploadReceipt {
            filename: &upload.filename,
            bytes: upload.bytes_written,
        };
        match serde_json::to_vec(&receipt) {
            Ok(body) => Self::new(201, "Created", &[("Content-Type", "application/json")], &body),
            Err(_) => Self::internal_error(),
        }
    }

    pub fn bad_request() -> Self {
        Self::status(400, "Bad Request")
    }

    pub fn internal_error() -> Self {
        Self::status(500, "Internal Server Error")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}
