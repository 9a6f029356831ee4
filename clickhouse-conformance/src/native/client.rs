//! Reference [`Client`] over the ClickHouse native TCP protocol.
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bb8::{ManageConnection, RunError};
use opentelemetry_semantic_conventions::attribute::{DB_QUERY_TEXT, SERVER_ADDRESS, SERVER_PORT};
use parking_lot::Mutex;
use tracing::{Span, debug, info, instrument};
use uuid::Uuid;

use super::connection::Packet;
use super::pool::{self, ConnectionManager, ConnectionPool};
use super::protocol::Query;
use super::rows::{NativeRows, PooledConn, ProgressTracker};
use crate::bind::{bind, leading_keyword};
use crate::config::{ClientConfig, CompressionMethod, parse_address};
use crate::context::{CallContext, Settings};
use crate::contract::{Client, ServerVersion, Stats};
use crate::value::Value;
use crate::{Error, Result};

const ATT_QUERY_ID: &str = "clickhouse.query.id";

/// Native-protocol client handle. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct NativeClient {
    inner: Arc<Inner>,
}

struct Inner {
    config:       Arc<ClientConfig>,
    pool:         ArcSwapOption<ConnectionPool>,
    server:       ServerVersion,
    closed_stats: Mutex<Option<Stats>>,
}

impl std::fmt::Debug for NativeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeClient")
            .field("addresses", &self.inner.config.addresses)
            .field("server", &self.inner.server)
            .field("closed", &self.inner.pool.load().is_none())
            .finish()
    }
}

impl NativeClient {
    pub fn config(&self) -> &ClientConfig { &self.inner.config }

    fn pool(&self) -> Result<Arc<ConnectionPool>> {
        self.inner.pool.load_full().ok_or(Error::Closed)
    }

    async fn checkout(&self) -> Result<PooledConn> {
        self.pool()?.get_owned().await.map_err(|error| match error {
            RunError::User(error) => error,
            RunError::TimedOut => {
                Error::Connect("timed out waiting for a pooled connection".into())
            }
        })
    }

    /// Query settings for a call: the context's settings plus the response codec when it is
    /// not the server default.
    fn settings(&self, ctx: &CallContext) -> Settings {
        let mut settings = ctx.settings().clone();
        if self.inner.config.compression_method() == CompressionMethod::ZSTD
            && settings.get("network_compression_method").is_none()
        {
            settings.set("network_compression_method", "ZSTD");
        }
        settings
    }

    async fn start_query(&self, conn: &mut PooledConn, ctx: &CallContext, sql: &str) -> Result<()> {
        let query_id = Uuid::new_v4().to_string();
        let _ = Span::current().record(ATT_QUERY_ID, query_id.as_str());
        let settings = self.settings(ctx);
        let config = &self.inner.config;
        let query = Query {
            query_id:    &query_id,
            client_name: &config.client_name,
            username:    &config.auth.username,
            settings:    &settings,
            compression: conn.compression() != CompressionMethod::None,
            sql,
        };
        conn.send_query(&query, ctx.external_tables()).await
    }
}

/// Whether the server will wait for client data blocks after sending its header block.
fn is_insert(sql: &str) -> bool {
    leading_keyword(sql).eq_ignore_ascii_case("insert")
}

impl Client for NativeClient {
    type Rows = NativeRows;

    #[instrument(
        level = "trace",
        name = "clickhouse.open",
        skip_all,
        fields(db.system = "clickhouse", server.address, server.port)
    )]
    async fn open(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let manager = ConnectionManager::new(Arc::clone(&config));

        let conn = manager.connect().await?;
        let server = conn.server_version().clone();
        let address = conn.address().to_string();
        let (host, port) = parse_address(&address)?;
        let span = Span::current();
        let _ = span.record(SERVER_ADDRESS, host.as_str());
        let _ = span.record(SERVER_PORT, port);

        let pool = manager.build_pool();
        if pool.add(conn).is_err() {
            debug!("pool refused the initial connection");
        }
        info!(%server, %address, "client opened");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                pool: ArcSwapOption::from_pointee(pool),
                server,
                closed_stats: Mutex::new(None),
            }),
        })
    }

    #[instrument(
        level = "trace",
        name = "clickhouse.ping",
        skip_all,
        fields(db.system = "clickhouse")
    )]
    async fn ping(&self, ctx: &CallContext) -> Result<()> {
        ctx.run(async {
            let mut conn = self.checkout().await?;
            conn.ping().await
        })
        .await
    }

    #[instrument(
        level = "trace",
        name = "clickhouse.exec",
        skip_all,
        fields(db.system = "clickhouse", db.query.text, clickhouse.query.id)
    )]
    async fn exec(&self, ctx: &CallContext, sql: &str, args: &[Value]) -> Result<()> {
        let sql = bind(sql, args)?;
        let _ = Span::current().record(DB_QUERY_TEXT, sql.as_str());
        ctx.run(async {
            let mut conn = self.checkout().await?;
            self.start_query(&mut conn, ctx, &sql).await?;

            let insert = is_insert(&sql);
            let mut data_sent = false;
            let mut progress = ProgressTracker::new(ctx);
            loop {
                match conn.read_packet().await? {
                    Packet::Data(_) if insert && !data_sent => {
                        conn.send_end_of_data().await?;
                        data_sent = true;
                    }
                    Packet::Progress(delta) => progress.update(&delta),
                    Packet::Exception(error) => return Err(Error::Server(error)),
                    Packet::EndOfStream => return Ok(()),
                    _ => {}
                }
            }
        })
        .await
    }

    #[instrument(
        level = "trace",
        name = "clickhouse.query",
        skip_all,
        fields(db.system = "clickhouse", db.query.text, clickhouse.query.id)
    )]
    async fn query(&self, ctx: &CallContext, sql: &str, args: &[Value]) -> Result<NativeRows> {
        let sql = bind(sql, args)?;
        let _ = Span::current().record(DB_QUERY_TEXT, sql.as_str());
        ctx.run(async {
            let mut conn = self.checkout().await?;
            self.start_query(&mut conn, ctx, &sql).await?;
            NativeRows::start(conn, ctx.clone()).await
        })
        .await
    }

    #[instrument(
        level = "trace",
        name = "clickhouse.close",
        skip_all,
        fields(db.system = "clickhouse")
    )]
    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.inner.pool.swap(None) {
            let stats = pool::stats(&pool);
            *self.inner.closed_stats.lock() = Some(stats);
            info!(?stats, "client closed");
        }
        Ok(())
    }

    fn stats(&self) -> Stats {
        match self.inner.pool.load().as_deref() {
            Some(pool) => pool::stats(pool),
            None => self.inner.closed_stats.lock().unwrap_or_default(),
        }
    }

    fn server_version(&self) -> Result<ServerVersion> { Ok(self.inner.server.clone()) }
}

