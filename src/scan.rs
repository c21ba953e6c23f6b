// Delimiter scanning over raw socket bytes.
// Every search is bounded by the slice it is given; nothing here assumes a
// terminating NUL or a complete stream.

use memchr::memmem;

/// Network newline
pub const CRLF: &[u8] = b"\r\n";

/// Find the first CRLF in `buf`.
///
/// Returns the index immediately after the `\n`, or `None` if no complete
/// CRLF is present. A `\r` at the very end of `buf` is not a match: its `\n`
/// has not arrived yet.
#[inline]
pub fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF).map(|idx| idx + 2)
}

/// Find the first occurrence of `needle` in `haystack`
#[inline]
pub fn find_terminator(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memmem::find(haystack, needle)
}
