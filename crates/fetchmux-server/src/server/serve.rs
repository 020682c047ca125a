//! Connection accept loop.
//!
//! Connections are driven by `hyper-util` directly rather than through
//! `axum::serve`, which cannot bound how long a client takes to send its
//! request head. Every connection runs on a tracked task and is asked to close
//! gracefully once `shutdown` fires.

use axum::Router;
use core::time::Duration;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use tokio::{net::TcpListener, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Connection-level limits.
#[derive(Clone, Copy, Debug)]
pub struct ServeOptions {
    /// Time a client gets to send the complete request head. Idle keep-alive
    /// connections are closed after the same delay.
    pub header_read_timeout: Duration,
    /// Time open connections get to finish once `shutdown` fires.
    pub drain_timeout: Duration,
}

/// Serves `app` on `listener` until `shutdown` is cancelled, then drains open
/// connections for at most [`ServeOptions::drain_timeout`].
pub async fn serve(
    listener: TcpListener,
    app: Router,
    options: ServeOptions,
    shutdown: CancellationToken,
) {
    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(options.header_read_timeout);

    let connections = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {e}");
                    continue;
                }
            },
        };

        let builder = builder.clone();
        let service = TowerToHyperService::new(app.clone());
        let shutdown = shutdown.clone();

        connections.spawn(async move {
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let finished = tokio::select! {
                res = conn.as_mut() => Some(res),
                () = shutdown.cancelled() => None,
            };
            let res = match finished {
                Some(res) => res,
                None => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            if let Err(e) = res {
                tracing::debug!("Connection from {peer} closed with error: {e}");
            }
        });
    }

    drop(listener);
    connections.close();
    tracing::info!("Draining {} open connections", connections.len());

    if timeout(options.drain_timeout, connections.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            "Graceful drain timed out after {:?}, closing remaining connections",
            options.drain_timeout
        );
    }
}
