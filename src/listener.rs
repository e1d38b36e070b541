//! Listener: the TCP accept loop. Owns nothing about protocol
//! semantics — it only turns accepted sockets into registered, spawned
//! [`Connection`] tasks and keeps a join handle per connection so shutdown
//! can wait for them to drain.

use crate::charset::Charset;
use crate::connection::Connection;
use crate::index::Index;
use crate::notify::NotificationBus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Bind `addr` and accept connections until a shutdown signal arrives or
/// the listening socket itself fails. Each accepted socket gets a fresh
/// notification subscription and its own task; a transient per-connection
/// accept error (the client reset the connection before we finished
/// accepting it, say) is logged and doesn't bring down the listener, but
/// an error that means the listening socket itself is no longer usable is
/// treated as fatal and ends the accept loop.
pub async fn serve(
    addr: std::net::SocketAddr,
    index: Arc<Index>,
    notify: Arc<NotificationBus>,
    charset: Arc<Charset>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let connection_count = AtomicU64::new(0);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, closing listener");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) if is_transient_accept_error(&e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "listening socket failed, stopping accept loop");
                        break;
                    }
                };

                let subscription = notify.register();
                let id = subscription.id;
                connection_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(id, %peer, "connection accepted");

                let conn = Connection::new(id, index.clone(), notify.clone(), subscription.receiver, charset.clone());
                let handle = tokio::spawn(async move {
                    conn.run(stream).await;
                });

                // Reap finished tasks opportunistically so `handles` doesn't
                // grow without bound over a long-running server's lifetime.
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
        }
    }

    // Best-effort close of every still-live connection: dropping the
    // listener above already stops new accepts, and aborting each tracked
    // task closes its socket, which is enough to unstick a connection
    // blocked on a read.
    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Waits for Ctrl+C (SIGINT) or, on Unix, SIGTERM — whichever arrives
/// first — to trigger a graceful shutdown of the accept loop.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { tracing::info!("received Ctrl+C"); },
        _ = terminate => { tracing::info!("received SIGTERM"); },
    }
}

/// Whether an `accept()` error is worth retrying rather than treating as
/// the listening socket having failed outright.
fn is_transient_accept_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    async fn spawn_server() -> (std::net::SocketAddr, TempDir) {
        let db = TempDir::new().unwrap();
        let notify = Arc::new(NotificationBus::new());
        let index = Arc::new(Index::open(db.path(), notify.clone()).unwrap());
        let charset = Arc::new(Charset::utf8());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (stream, _peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => continue,
                };
                let subscription = notify.register();
                let conn = Connection::new(
                    subscription.id,
                    index.clone(),
                    notify.clone(),
                    subscription.receiver,
                    charset.clone(),
                );
                tokio::spawn(async move { conn.run(stream).await });
            }
        });

        (addr, db)
    }

    #[tokio::test]
    async fn accepts_connection_and_answers_list() {
        let (addr, _db) = spawn_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"L\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "0\n");
    }
}
