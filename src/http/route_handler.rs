//! Per-request handling in routing mode: dial the backend, rewrite the
//! head, forward it, then shuffle bytes until either side is done.
//!
//! Grounded in `router-core::app::proxy_host`'s byte-level header
//! scanning style and `router-core::app::proxy`'s duplex-forwarding shape,
//! generalized from SNI/Host-keyed TCP splicing to explicit path-based
//! rewriting.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::parser::ParseResult;
use crate::pipe;
use crate::routing::RoutingRule;
use crate::stats::ConnectionStats;
use crate::tls::dial_backend;

const HOP_BY_HOP_ON_FORCE_CLOSE: [&str; 3] = ["connection", "keep-alive", "proxy-connection"];

/// Forwards `parse_result`'s request, as rewritten by `rule`, to
/// `rule.target_host:rule.target_port`, then shuffles bytes until the
/// connection ends. Any I/O error is terminal for this request only.
pub async fn handle_routed_request<S>(
    data_channel: S,
    parse_result: ParseResult,
    rule: &RoutingRule,
    force_connection_close: bool,
    stats: &ConnectionStats,
    request_id: &str,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let _guard = stats.start(&rule.path_pattern);

    let mut backend = dial_backend(&rule.target_host, rule.target_port, rule.use_ssl)
        .await
        .map_err(|e| {
            log::error!(
                "[route] request {request_id}: failed to dial backend {}:{}: {e}",
                rule.target_host,
                rule.target_port
            );
            e
        })?;

    let head = build_forwarded_head(&parse_result, rule, force_connection_close);
    backend.write_all(&head).await?;

    if let Some(header_end) = parse_result.header_end {
        let body = &parse_result.raw_buffer[header_end..];
        if !body.is_empty() {
            backend.write_all(body).await?;
        }
    }
    backend.flush().await?;

    pipe::shuffle(data_channel, backend).await.map_err(|e| {
        log::error!("[route] request {request_id}: pipe error: {e}");
        e
    })
}

/// Builds the rewritten request line + headers + terminating blank line,
/// per `spec.md` §4.C steps 3-7.
fn build_forwarded_head(parse_result: &ParseResult, rule: &RoutingRule, force_close: bool) -> Vec<u8> {
    let effective_path = rule.rewrite_path(&parse_result.path);
    let mut out = Vec::with_capacity(parse_result.raw_buffer.len());

    out.extend_from_slice(parse_result.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(effective_path.as_bytes());
    out.push(b' ');
    out.extend_from_slice(parse_result.version.as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in original_header_lines(parse_result) {
        let lower = name.to_ascii_lowercase();
        if rule.forward_host && lower == "host" {
            continue;
        }
        if force_close && HOP_BY_HOP_ON_FORCE_CLOSE.contains(&lower.as_str()) {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    if rule.forward_host {
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(rule.target_host.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(original_host) = parse_result.headers.get("host") {
            out.extend_from_slice(b"X-Forwarded-Host: ");
            out.extend_from_slice(original_host.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }

    if force_close {
        out.extend_from_slice(b"Connection: close\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out
}

/// Original `(name, value)` header pairs in the order they appeared on the
/// wire, read straight out of the raw buffer so forwarding can be
/// byte-for-byte verbatim (original casing, original whitespace collapsed
/// only at the colon). Falls back to whatever bytes were captured if the
/// header block's terminating blank line hadn't arrived yet.
fn original_header_lines(parse_result: &ParseResult) -> Vec<(String, String)> {
    let end = match parse_result.header_end {
        Some(header_end) => header_end - 2,
        None => parse_result.raw_buffer.len(),
    };
    if end < parse_result.first_line_end {
        return Vec::new();
    }
    let block = &parse_result.raw_buffer[parse_result.first_line_end..end];
    let text = String::from_utf8_lossy(block);

    text.split("\r\n")
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            line.find(':').map(|colon| {
                let name = line[..colon].to_string();
                let value = line[colon + 1..].trim().to_string();
                (name, value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::parse_head;
    use std::io::Cursor;

    async fn parse(input: &[u8]) -> ParseResult {
        let mut cursor = Cursor::new(input.to_vec());
        parse_head(&mut cursor, 8192).await.unwrap()
    }

    #[tokio::test]
    async fn unmodified_rule_forwards_head_byte_equal_to_input() {
        let input = b"GET /api/users HTTP/1.1\r\nHost: x\r\n\r\n";
        let parse_result = parse(input).await;
        let rule = RoutingRule::new("/api/*", "h1", 8081).unwrap();

        let forwarded = build_forwarded_head(&parse_result, &rule, false);
        assert_eq!(forwarded, input);
    }

    #[tokio::test]
    async fn strip_prefix_rewrites_request_line_only() {
        let input = b"GET /api/users/1 HTTP/1.1\r\nHost: x\r\n\r\n";
        let parse_result = parse(input).await;
        let mut rule = RoutingRule::new("/api/*", "h1", 8081).unwrap();
        rule.strip_prefix = true;

        let forwarded = build_forwarded_head(&parse_result, &rule, false);
        let forwarded = String::from_utf8(forwarded).unwrap();
        assert!(forwarded.starts_with("GET /users/1 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn forward_host_replaces_host_and_adds_x_forwarded_host() {
        let input = b"GET / HTTP/1.1\r\nHost: pub.example\r\n\r\n";
        let parse_result = parse(input).await;
        let mut rule = RoutingRule::new("/*", "backend.internal", 8080).unwrap();
        rule.forward_host = true;

        let forwarded = String::from_utf8(build_forwarded_head(&parse_result, &rule, false)).unwrap();
        assert_eq!(forwarded.matches("\r\nHost:").count(), 1);
        assert!(forwarded.contains("Host: backend.internal\r\n"));
        assert!(forwarded.contains("X-Forwarded-Host: pub.example\r\n"));
    }

    #[tokio::test]
    async fn force_close_strips_hop_by_hop_and_adds_single_connection_close() {
        let input = b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\nKeep-Alive: timeout=5\r\nProxy-Connection: keep-alive\r\n\r\n";
        let parse_result = parse(input).await;
        let rule = RoutingRule::new("/*", "h", 80).unwrap();

        let forwarded = String::from_utf8(build_forwarded_head(&parse_result, &rule, true)).unwrap();
        assert_eq!(forwarded.matches("Connection:").count(), 1);
        assert!(forwarded.contains("Connection: close\r\n"));
        assert!(!forwarded.contains("Keep-Alive:"));
        assert!(!forwarded.contains("Proxy-Connection:"));
    }
}
