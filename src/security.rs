use anyhow::{bail, Result};

/// Longest filename accepted for a stored upload
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Validate a client-supplied upload filename before it touches the disk.
///
/// Only a single plain path component is allowed: no separators, no
/// traversal, no hidden files, no control characters.
pub fn sanitize_filename(name: &str) -> Result<String> {
    // Decode URL encoding safely
    let decoded = match urlencoding::decode(name) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => bail!("Invalid URL encoding"),
    };

    if decoded.is_empty() {
        bail!("Empty filename");
    }

    if decoded.len() > MAX_FILENAME_LENGTH {
        bail!("Filename too long");
    }

    if decoded == ".." || decoded == "." {
        bail!("Path traversal attempt detected");
    }

    if decoded.contains(['/', '\\', '\0', '<', '>', '|', '?', '*', ':', '"']) {
        bail!("Invalid characters in filename");
    }

    if decoded.chars().any(char::is_control) {
        bail!("Control characters in filename");
    }

    // Also covers partial uploads, which are written as hidden temp files
    if decoded.starts_with('.') {
        bail!("Hidden filenames are not allowed");
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_validation() {
        // Valid names
        assert_eq!(sanitize_filename("cat.bmp").unwrap(), "cat.bmp");
        assert_eq!(sanitize_filename("my%20photo.png").unwrap(), "my photo.png");
        assert!(sanitize_filename("report-2024_final.pdf").is_ok());

        // Invalid names
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("..%2Fetc%2Fpasswd").is_err());
        assert!(sanitize_filename("dir\\file").is_err());
        assert!(sanitize_filename(".env").is_err());
        assert!(sanitize_filename("nul\0byte").is_err());
        assert!(sanitize_filename("line\nbreak").is_err());
        assert!(sanitize_filename(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_name_is_decoded_once() {
        assert_eq!(sanitize_filename("100%25.txt").unwrap(), "100%.txt");
        assert_eq!(sanitize_filename("a%2520b").unwrap(), "a%20b");
    }
}
