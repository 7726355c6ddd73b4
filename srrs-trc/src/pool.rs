//! Reusable TRC connection with reconnect back-off.

use crate::connection::Conn;
use crate::error::TrcError;
use crate::liveness::{self, DEFAULT_PING_INTERVAL};
use crate::stream::Endpoint;
use srrs_protocol::ProtocolVersion;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Upper bound on dialing plus handshake.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default minimum time between connection attempts after a failure.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

type ConnFuture = Pin<Box<dyn Future<Output = Result<Arc<Conn>, TrcError>> + Send>>;
type Factory = Box<dyn Fn() -> ConnFuture + Send + Sync>;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum time between a failed attempt and the next one.
    pub retry_interval: Duration,
    /// Liveness ping interval for pooled connections.
    pub ping_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

impl PoolConfig {
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

#[derive(Default)]
struct PoolState {
    conn: Option<Arc<Conn>>,
    last_failure: Option<(Instant, String)>,
}

/// Holds at most one live connection, recreating it on demand.
pub struct Pool {
    config: PoolConfig,
    factory: Factory,
    state: Mutex<PoolState>,
}

impl Pool {
    /// Creates a pool that builds connections with `factory`.
    pub fn new<F, Fut>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<Conn>, TrcError>> + Send + 'static,
    {
        Self {
            config,
            factory: Box::new(move || Box::pin(factory())),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Creates a pool dialing `endpoint`.
    pub fn for_endpoint(config: PoolConfig, endpoint: Endpoint, version: ProtocolVersion) -> Self {
        let endpoint = Arc::new(endpoint);
        Self::new(config, move || {
            let endpoint = endpoint.clone();
            async move { dial(&endpoint, version).await }
        })
    }

    /// Returns the live connection, creating one if there is none.
    ///
    /// Within `retry_interval` of a failed attempt this fails with
    /// [`TrcError::Unavailable`] without trying again.
    pub async fn get(&self) -> Result<Arc<Conn>, TrcError> {
        let mut state = self.state.lock().await;

        if let Some(conn) = &state.conn {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
            tracing::debug!("Pooled connection is closed, discarding");
            state.conn = None;
        }

        if let Some((at, reason)) = &state.last_failure {
            if at.elapsed() < self.config.retry_interval {
                return Err(TrcError::Unavailable(reason.clone()));
            }
        }

        tracing::debug!("Creating TRC connection...");
        match (self.factory)().await {
            Ok(conn) => {
                tracing::info!(version = %conn.version(), "TRC connection established");
                supervise(&conn, self.config.ping_interval);
                state.last_failure = None;
                state.conn = Some(conn.clone());
                Ok(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to create TRC connection");
                state.last_failure = Some((Instant::now(), e.to_string()));
                Err(e)
            }
        }
    }

    /// Closes the pooled connection, if any.
    pub async fn close(&self) -> Result<(), TrcError> {
        let conn = self.state.lock().await.conn.take();
        if let Some(conn) = conn {
            conn.close().await?;
        }
        Ok(())
    }
}

/// Dials `endpoint` and performs the handshake.
pub async fn dial(endpoint: &Endpoint, version: ProtocolVersion) -> Result<Arc<Conn>, TrcError> {
    tokio::time::timeout(DIAL_TIMEOUT, async {
        let stream = endpoint.connect().await?;
        Conn::establish(version, stream).await
    })
    .await
    .map_err(|_| {
        tracing::debug!(endpoint = %endpoint, "Dial timeout");
        TrcError::Timeout
    })?
}

/// Starts the liveness monitor and the error watcher for `conn`.
fn supervise(conn: &Arc<Conn>, ping_interval: Duration) {
    liveness::spawn(conn.clone(), ping_interval);

    let Some(mut errors) = conn.errors() else {
        return;
    };
    let conn = conn.clone();
    tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            if err.is_fatal() {
                tracing::error!(error = %err, "TRC connection failed, closing");
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Close failed");
                }
            } else {
                tracing::warn!(error = %err, "TRC connection error");
            }
        }
    });
}
