//! HTTP/1.x request line and `Host` header.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error_handling::types::ExtractionError;

const METHODS: [&str; 9] = [
    "GET", "POST", "HEAD", "PUT", "DELETE", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpRequest {
    pub method: String,
    pub host: String,
    pub path: String,
}

fn request_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Z]+) (\S+) HTTP/\d\.\d$").expect("static regex"))
}

/// True when `payload` opens like an HTTP request.
pub fn looks_like_request(payload: &[u8]) -> bool {
    METHODS.iter().any(|m| {
        payload.len() > m.len() && payload.starts_with(m.as_bytes()) && payload[m.len()] == b' '
    })
}

/// Parses the head of a request. `Ok(None)` when the payload is not a request.
pub fn parse_request(payload: &[u8]) -> Result<Option<HttpRequest>, ExtractionError> {
    if !looks_like_request(payload) {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(payload);
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));
    let first = lines.next().unwrap_or_default();
    let caps = request_line()
        .captures(first)
        .ok_or_else(|| ExtractionError::Malformed(format!("http: bad request line {:?}", first)))?;

    let host = lines
        .take_while(|l| !l.is_empty())
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("host")
                .then(|| value.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ExtractionError::Malformed("http: missing Host header".to_string()))?;

    Ok(Some(HttpRequest {
        method: caps[1].to_string(),
        host,
        path: caps[2].to_string(),
    }))
}
