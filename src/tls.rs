//! Backend connection dialing: plain TCP or TLS-with-trust-all.
//!
//! `useSSL` is a deliberate per-rule policy (`spec.md` §9): this agent
//! only ever dials local or internal services behind NAT, commonly with
//! self-signed certificates, so certificate verification is switched off
//! rather than offering a verification path that would just get disabled
//! by every user anyway. This mirrors the teacher's own "trust-all is a
//! declared policy" stance in `router-core::app::proxy` (which disables
//! certificate checks on its backend `TransportConnector`s); we reuse the
//! same OpenSSL-backed TLS stack the teacher already depends on
//! (`native-tls` uses OpenSSL on Linux) instead of pulling in a second,
//! independent TLS implementation such as `rustls`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;

/// A backend connection, plain or TLS, behind one `AsyncRead + AsyncWrite`
/// surface so callers (the route handler's pipes) don't need to care which.
pub enum BackendStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_flush(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dials `host:port`, optionally wrapping the connection in a trust-all TLS
/// handshake. The handshake is forced to complete before the stream is
/// handed back, per the route handler's "force handshake before use" step.
pub async fn dial_backend(host: &str, port: u16, use_ssl: bool) -> io::Result<BackendStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    if !use_ssl {
        return Ok(BackendStream::Plain(tcp));
    }

    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let tls = connector
        .connect(host, tcp)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(BackendStream::Tls(Box::new(tls)))
}
