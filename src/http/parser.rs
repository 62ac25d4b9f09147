//! HTTP/1.x request head parser.
//!
//! Reads a request line and as much of the header block as arrives
//! opportunistically in the same read burst, into a single bounded buffer.
//! Ported from the teacher's hand-rolled, allocation-conscious byte
//! scanning style (`router-core::app::proxy_host::extract_http_host`)
//! rather than pulled from a parsing crate — the teacher never reaches for
//! `httparse` anywhere in the workspace, and our contract (exposing the raw
//! buffer plus line/header offsets for verbatim re-emission) doesn't map
//! cleanly onto `httparse`'s owned-header-array API anyway.

use std::collections::HashMap;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;

use crate::error::HeadParseError;

/// Default bound on the single-shot head buffer (see `spec.md` §9: "HTTP
/// head buffer is single-shot 8 KiB").
pub const DEFAULT_HEAD_BUFFER: usize = 8192;

/// The parsed request head plus enough positional metadata for a caller to
/// re-emit the original bytes verbatim, or to keep streaming more of the
/// body from the same connection.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Lowercased header names, last value wins on duplicates.
    pub headers: HashMap<String, String>,
    /// Every byte read while parsing, including any bytes that happened to
    /// arrive past the header block.
    pub raw_buffer: BytesMut,
    /// Offset of the byte right after the `\r\n` terminating the request
    /// line.
    pub first_line_end: usize,
    /// Offset of the byte right after the header block's terminating
    /// `\r\n\r\n`, or `None` if `raw_buffer` doesn't contain it yet.
    pub header_end: Option<usize>,
}

/// Reads and parses a request head from `stream`, up to `max_len` bytes.
pub async fn parse_head<R>(stream: &mut R, max_len: usize) -> Result<ParseResult, HeadParseError>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = BytesMut::with_capacity(max_len.min(DEFAULT_HEAD_BUFFER));
    let mut first_line_end = None;

    loop {
        if first_line_end.is_none() {
            if let Some(pos) = find(&buf, b"\r\n") {
                first_line_end = Some(pos + 2);
            }
        }

        let header_end = first_line_end.and_then(|_| find(&buf, b"\r\n\r\n").map(|p| p + 4));

        if header_end.is_some() {
            break;
        }
        if first_line_end.is_none() && buf.len() >= max_len {
            return Err(HeadParseError::BufferFull(max_len));
        }
        if buf.len() >= max_len {
            // Request line fits, but headers don't — stop here and let the
            // caller keep streaming from the raw socket if it needs more.
            break;
        }

        let mut chunk = [0u8; 1024];
        let want = chunk.len().min(max_len - buf.len());
        let n = stream
            .read(&mut chunk[..want])
            .await
            .map_err(|_| HeadParseError::Eof)?;
        if n == 0 {
            if first_line_end.is_none() {
                return Err(HeadParseError::Eof);
            }
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let first_line_end = first_line_end.ok_or(HeadParseError::Eof)?;
    let line = std::str::from_utf8(&buf[..first_line_end - 2]).map_err(|_| HeadParseError::NotUtf8)?;
    let mut parts = line.split(' ');
    let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v), None) if !m.is_empty() && !p.is_empty() && !v.is_empty() => {
            (m.to_string(), p.to_string(), v.to_string())
        }
        _ => return Err(HeadParseError::MalformedRequestLine),
    };

    let header_end = find(&buf, b"\r\n\r\n").map(|p| p + 4);
    let headers = header_end
        .map(|end| parse_headers(&buf[first_line_end..end - 2]))
        .unwrap_or_default();

    Ok(ParseResult {
        method,
        path,
        version,
        headers,
        raw_buffer: buf,
        first_line_end,
        header_end,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parses `\r\n`-separated `Name: value` lines into a lowercase-keyed map,
/// last value wins on duplicates.
fn parse_headers(block: &[u8]) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let text = String::from_utf8_lossy(block);
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if let Some(colon) = line.find(':') {
            let name = line[..colon].trim().to_ascii_lowercase();
            let value = line[colon + 1..].trim().to_string();
            headers.insert(name, value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn parses_method_path_version_and_headers() {
        let mut input = Cursor::new(b"GET /api/users HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());
        let result = parse_head(&mut input, DEFAULT_HEAD_BUFFER).await.unwrap();
        assert_eq!(result.method, "GET");
        assert_eq!(result.path, "/api/users");
        assert_eq!(result.version, "HTTP/1.1");
        assert_eq!(result.headers.get("host"), Some(&"x".to_string()));
        assert!(result.header_end.is_some());
    }

    #[tokio::test]
    async fn duplicate_headers_last_wins() {
        let mut input = Cursor::new(b"GET / HTTP/1.1\r\nX-A: first\r\nX-A: second\r\n\r\n".to_vec());
        let result = parse_head(&mut input, DEFAULT_HEAD_BUFFER).await.unwrap();
        assert_eq!(result.headers.get("x-a"), Some(&"second".to_string()));
    }

    #[tokio::test]
    async fn eof_before_request_line_is_an_error() {
        let mut input = Cursor::new(b"GET /incomplete".to_vec());
        let err = parse_head(&mut input, DEFAULT_HEAD_BUFFER).await.unwrap_err();
        assert_eq!(err, HeadParseError::Eof);
    }

    #[tokio::test]
    async fn malformed_request_line_is_rejected() {
        let mut input = Cursor::new(b"NOTAREQUESTLINE\r\nHost: x\r\n\r\n".to_vec());
        let err = parse_head(&mut input, DEFAULT_HEAD_BUFFER).await.unwrap_err();
        assert_eq!(err, HeadParseError::MalformedRequestLine);
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let mut line = b"GET /".to_vec();
        line.extend(std::iter::repeat(b'a').take(64));
        line.extend_from_slice(b" HTTP/1.1");
        let mut input = Cursor::new(line);
        let err = parse_head(&mut input, 16).await.unwrap_err();
        assert_eq!(err, HeadParseError::BufferFull(16));
    }

    #[tokio::test]
    async fn returns_request_line_when_headers_dont_fit_in_buffer() {
        let mut input = Cursor::new(b"GET / HTTP/1.1\r\nHost: something-long\r\n\r\n".to_vec());
        let result = parse_head(&mut input, 20).await.unwrap();
        assert_eq!(result.method, "GET");
        assert_eq!(result.header_end, None);
    }
}
