//! HTTP server lifecycle: bind, serve, and drain on shutdown.

use std::future::IntoFuture;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long in-flight requests may keep running after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct HttpServer {
    addr: String,
    router: Router,
}

impl HttpServer {
    pub fn new(addr: impl Into<String>, router: Router) -> Self {
        Self {
            addr: addr.into(),
            router,
        }
    }

    /// Serve until `shutdown` is cancelled, then drain for up to
    /// [`SHUTDOWN_GRACE`] before abandoning whatever is still in flight.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("binding {}", self.addr))?;
        info!(addr = %listener.local_addr()?, "HTTP server listening");

        let graceful = shutdown.clone();
        let serve = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { graceful.cancelled().await });
        let mut serve = std::pin::pin!(serve.into_future());

        tokio::select! {
            result = &mut serve => {
                result.context("HTTP server failed")?;
                info!("HTTP server stopped");
            }
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                warn!(grace = ?SHUTDOWN_GRACE, "shutdown grace period expired, dropping in-flight requests");
            }
        }
        Ok(())
    }
}
