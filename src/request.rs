// Request-line and query-string parsing.
// Works on the raw window bytes; the line is inspected, never consumed.

use std::fmt;

use crate::error::IngestError;
use crate::scan::find_newline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    /// Match a supported method at the very start of a request line.
    /// Returns the method and the offset just past it and its space.
    fn from_line(line: &[u8]) -> Option<(Self, usize)> {
        if line.starts_with(b"GET ") {
            Some((Self::Get, 4))
        } else if line.starts_with(b"POST ") {
            Some((Self::Post, 5))
        } else {
            None
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub name: String,
    pub value: String,
}

/// Parsed request line: method, path and a fixed number of query slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Request target up to the first `?` or space
    pub path: String,
    /// Always exactly `max_params` slots; unused trailing slots are `None`
    pub params: Vec<Option<QueryParam>>,
    /// The query string held more than could be kept, or was malformed
    pub query_truncated: bool,
}

impl RequestDescriptor {
    /// Iterate over the populated parameters, in order
    pub fn query(&self) -> impl Iterator<Item = &QueryParam> {
        self.params.iter().map_while(Option::as_ref)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Parse the first buffered line as a request line.
///
/// Returns `Ok(None)` while no complete line is buffered.
pub fn parse_request_line(
    buf: &[u8],
    max_params: usize,
) -> Result<Option<RequestDescriptor>, IngestError> {
    let Some(end) = find_newline(buf) else {
        return Ok(None);
    };
    let line = &buf[..end - 2];

    let (method, after_method) = Method::from_line(line).ok_or_else(|| {
        let token = line.split(|&b| b == b' ').next().unwrap_or_default();
        IngestError::MalformedMethod(String::from_utf8_lossy(token).into_owned())
    })?;

    let rest = &line[after_method..];
    let skip = rest.iter().take_while(|&&b| b == b' ').count();
    let rest = &rest[skip..];
    let token = match rest.iter().position(|&b| b == b' ') {
        Some(space) => &rest[..space],
        None => rest,
    };
    let target_start = token
        .iter()
        .position(|&b| b == b'/')
        .ok_or(IngestError::MissingTarget)?;
    let target = &token[target_start..];

    let (path, query) = match target.iter().position(|&b| b == b'?') {
        Some(mark) => (&target[..mark], Some(&target[mark + 1..])),
        None => (target, None),
    };

    let (params, query_truncated) = match query {
        Some(raw) => parse_query(raw, max_params),
        None => (vec![None; max_params], false),
    };

    Ok(Some(RequestDescriptor {
        method,
        path: String::from_utf8_lossy(path).into_owned(),
        params,
        query_truncated,
    }))
}

/// Decode `name=value&name=value` into exactly `max_params` slots.
///
/// Stops at the first segment without a name or a value, or once every slot
/// is filled; the second element reports whether anything was dropped.
pub fn parse_query(raw: &[u8], max_params: usize) -> (Vec<Option<QueryParam>>, bool) {
    if raw.is_empty() {
        return (vec![None; max_params], false);
    }
    let mut params = Vec::with_capacity(max_params);
    let mut truncated = false;

    for segment in raw.split(|&b| b == b'&') {
        if params.len() == max_params {
            truncated = true;
            break;
        }
        let Some(eq) = segment.iter().position(|&b| b == b'=') else {
            truncated = true;
            break;
        };
        let (name, value) = (&segment[..eq], &segment[eq + 1..]);
        if name.is_empty() || value.is_empty() {
            truncated = true;
            break;
        }
        params.push(Some(QueryParam {
            name: decode_component(name),
            value: decode_component(value),
        }));
    }

    params.resize(max_params, None);
    (params, truncated)
}

fn decode_component(raw: &[u8]) -> String {
    let decoded = urlencoding::decode_binary(raw).into_owned();
    String::from_utf8(decoded).unwrap_or_else(|_| String::from_utf8_lossy(raw).into_owned())
}
