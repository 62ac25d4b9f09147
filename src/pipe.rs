//! Bidirectional byte shuffling between a data-channel socket and a
//! backend connection.
//!
//! `spec.md` §4.C step 9/10 and §5 ask for two independent pipes (not one
//! combinator call) so that bytes are forwarded in arrival order with a
//! flush after every write and bounded 8 KiB buffering, and so that either
//! side finishing immediately tears down the other. Each direction runs as
//! its own task; `shuffle` races the two `JoinHandle`s and `.abort()`s
//! whichever is still running once the other returns, the same
//! abort-based teardown `ResourceTracker::close_all` uses rather than a
//! cooperative cancellation signal — a `Notify` can only wake a task that's
//! already parked on it, so one mid-`write_all`/`flush` on the sibling side
//! would miss the wakeup and block until the remote peer did something on
//! its own.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const COPY_BUFFER: usize = 8 * 1024;

/// Copies `a <-> b` until either side hits EOF or an error, then returns.
/// Logs nothing itself — callers attribute errors to a request id.
pub async fn shuffle<A, B>(a: A, b: B) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let mut upstream = tokio::spawn(copy_one_way(b_read, a_write));
    let mut downstream = tokio::spawn(copy_one_way(a_read, b_write));

    let first = tokio::select! {
        r = &mut upstream => {
            downstream.abort();
            r
        }
        r = &mut downstream => {
            upstream.abort();
            r
        }
    };

    first.unwrap_or(Ok(()))
}

async fn copy_one_way<R, W>(mut reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; COPY_BUFFER];
    let result = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    break Err(e);
                }
                if let Err(e) = writer.flush().await {
                    break Err(e);
                }
            }
            Err(e) => break Err(e),
        }
    };
    let _ = writer.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn shuffles_bytes_both_directions_until_eof() {
        let (client_side, mut client_peer) = duplex(64);
        let (backend_side, mut backend_peer) = duplex(64);

        let handle = tokio::spawn(shuffle(client_side, backend_side));

        client_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        backend_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        backend_peer.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(client_peer);
        drop(backend_peer);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn one_side_closing_unblocks_the_other() {
        let (client_side, client_peer) = duplex(64);
        let (backend_side, backend_peer) = duplex(64);

        let handle = tokio::spawn(shuffle(client_side, backend_side));

        // Only the client side closes. Without abort-based teardown the
        // backend->client copy loop would stay parked on a read that
        // never comes, since `backend_peer` is left open and silent.
        drop(client_peer);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("shuffle should finish once one side closes")
            .unwrap()
            .unwrap();

        drop(backend_peer);
    }
}
