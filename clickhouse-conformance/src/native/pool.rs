//! `bb8` connection manager with ordered failover across the configured addresses.
use std::sync::Arc;

use bb8::{ErrorSink, ManageConnection};
use tracing::{debug, warn};

use super::connection::Connection;
use crate::config::ClientConfig;
use crate::contract::Stats;
use crate::{Error, Result};

pub(crate) type ConnectionPool = bb8::Pool<ConnectionManager>;

#[derive(Debug, Clone)]
pub(crate) struct ConnectionManager {
    config: Arc<ClientConfig>,
}

impl ConnectionManager {
    pub(crate) fn new(config: Arc<ClientConfig>) -> Self { Self { config } }

    /// Build a pool over this manager. Connections are established on demand; `open` seeds the
    /// first one itself so connection errors surface directly.
    pub(crate) fn build_pool(self) -> ConnectionPool {
        let config = Arc::clone(&self.config);
        bb8::Pool::builder()
            .max_size(config.max_open_conns)
            .idle_timeout(config.conn_max_idle)
            .max_lifetime(config.conn_max_lifetime)
            .connection_timeout(config.dial_timeout)
            .retry_connection(false)
            .test_on_check_out(false)
            .error_sink(Box::new(TracingErrorSink))
            .build_unchecked(self)
    }
}

impl ManageConnection for ConnectionManager {
    type Connection = Connection;
    type Error = Error;

    /// Try each address in order and return the first connection that completes the handshake.
    async fn connect(&self) -> Result<Self::Connection> {
        let mut failures = Vec::with_capacity(self.config.addresses.len());
        for address in &self.config.addresses {
            match Connection::connect(address, &self.config).await {
                Ok(conn) => {
                    debug!(%address, skipped = failures.len(), "connected");
                    return Ok(conn);
                }
                // Server-side rejections (e.g. bad credentials) are not a reason to fail over.
                Err(error @ Error::Server(_)) => return Err(error),
                Err(error) => {
                    warn!(%address, %error, "address unreachable, trying next");
                    failures.push(format!("{address}: {error}"));
                }
            }
        }
        Err(Error::Connect(format!("no address accepted a connection ({})", failures.join("; "))))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<()> { conn.ping().await }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool { conn.is_broken() }
}

#[derive(Debug, Clone, Copy)]
struct TracingErrorSink;

impl ErrorSink<Error> for TracingErrorSink {
    fn sink(&self, error: Error) {
        warn!(%error, "pooled connection error");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<Error>> { Box::new(*self) }
}

/// Pool counters in the shape of the client contract.
pub(crate) fn stats(pool: &ConnectionPool) -> Stats {
    let state = pool.state();
    let statistics = state.statistics;
    Stats {
        open:              state.connections,
        idle:              state.idle_connections,
        in_use:            state.connections.saturating_sub(state.idle_connections),
        created:           statistics.connections_created,
        checkouts:         statistics.get_direct + statistics.get_waited,
        checkout_timeouts: statistics.get_timed_out,
    }
}
