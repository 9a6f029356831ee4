//! The client surface exercised by the conformance scenarios.
//!
//! Any ClickHouse client can be run through the suite by implementing [`Client`] and
//! [`RowSet`]. The bundled [`crate::native::NativeClient`] is the reference implementation.
use std::fmt;
use std::future::Future;

use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::scan::{FromRow, RowRef};
use crate::types::Type;
use crate::value::Value;
use crate::{Error, Result};

/// Snapshot of the connection pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Connections currently held by the pool, idle or checked out.
    pub open:              u32,
    pub idle:              u32,
    pub in_use:            u32,
    /// Connections established over the lifetime of the handle.
    pub created:           u64,
    pub checkouts:         u64,
    pub checkout_timeouts: u64,
}

/// Server identity captured during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerVersion {
    pub name:         String,
    pub display_name: String,
    pub timezone:     Option<String>,
    pub major:        u64,
    pub minor:        u64,
    pub patch:        u64,
    pub revision:     u64,
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A handle over a pool of connections to one of the configured addresses.
///
/// Every operation observes the deadline and cancellation of the [`CallContext`] it is given:
/// a context that is already done fails with [`Error::DeadlineExceeded`] or
/// [`Error::Cancelled`] before any I/O is attempted.
pub trait Client: Sized + Send + Sync + 'static {
    type Rows: RowSet + 'static;

    /// Validate `config` and connect to the first reachable address.
    ///
    /// # Errors
    /// [`Error::Configuration`] before any network I/O, [`Error::Connect`] if no address accepts.
    fn open(config: ClientConfig) -> impl Future<Output = Result<Self>> + Send;

    fn ping(&self, ctx: &CallContext) -> impl Future<Output = Result<()>> + Send;

    /// Run a statement that returns no rows. `$N` placeholders bind to `args[N - 1]`.
    fn exec(
        &self,
        ctx: &CallContext,
        sql: &str,
        args: &[Value],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Start a query and return its lazily streamed rows.
    fn query(
        &self,
        ctx: &CallContext,
        sql: &str,
        args: &[Value],
    ) -> impl Future<Output = Result<Self::Rows>> + Send;

    /// Prepare a single-row query. Nothing is sent until [`SingleRow::scan`].
    fn query_row(&self, ctx: &CallContext, sql: &str, args: &[Value]) -> SingleRow<'_, Self> {
        SingleRow { client: self, ctx: ctx.clone(), sql: sql.to_string(), args: args.to_vec() }
    }

    /// Close the pool. Later operations fail with [`Error::Closed`]; calling it again is a no-op.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    /// Pool counters; a snapshot taken at close once the handle is closed.
    fn stats(&self) -> Stats;

    /// Version reported by the server at open time.
    ///
    /// # Errors
    /// Implementations without a cached version may fail; the reference client never does.
    fn server_version(&self) -> Result<ServerVersion>;
}

/// Forward-only cursor over a query result.
///
/// `next` returns `false` once the stream is exhausted or has failed; `err` then reports the
/// terminal error, if any. Scan errors are per row and leave the cursor usable.
pub trait RowSet: Send {
    /// Column names in result order, available before the first `next`.
    fn columns(&self) -> &[String];

    fn column_types(&self) -> &[Type];

    /// Advance to the next row.
    fn next(&mut self) -> impl Future<Output = bool> + Send;

    /// The current row, `None` before the first `next` or after the end.
    fn row(&self) -> Option<RowRef<'_>>;

    /// Scan the current row into positional destinations.
    ///
    /// # Errors
    /// [`Error::ArityMismatch`] or [`Error::TypeMismatch`] for the row,
    /// [`Error::InvalidArgument`] if there is no current row.
    fn scan<T: FromRow>(&self) -> Result<T> {
        let row = self
            .row()
            .ok_or_else(|| Error::InvalidArgument("scan called without a current row".into()))?;
        T::from_row(row)
    }

    /// Release the underlying connection. Idempotent.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// The first fatal error met while streaming.
    fn err(&self) -> Option<&Error>;

    /// Move the terminal error out of the cursor.
    fn take_err(&mut self) -> Option<Error>;
}

/// A query expected to yield at most one interesting row.
#[must_use = "a single-row query does nothing until scanned"]
pub struct SingleRow<'a, C: Client> {
    client: &'a C,
    ctx:    CallContext,
    sql:    String,
    args:   Vec<Value>,
}

impl<C: Client> fmt::Debug for SingleRow<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleRow").field("sql", &self.sql).field("args", &self.args).finish()
    }
}

impl<C: Client> SingleRow<'_, C> {
    /// Run the query and scan its first row. Remaining rows are discarded.
    ///
    /// # Errors
    /// [`Error::NoRows`] on an empty result, otherwise any query or scan error.
    pub async fn scan<T: FromRow>(self) -> Result<T> {
        let mut rows = self.client.query(&self.ctx, &self.sql, &self.args).await?;
        let scanned = if rows.next().await { Some(rows.scan::<T>()) } else { None };
        let closed = rows.close().await;
        if let Some(err) = rows.take_err() {
            return Err(err);
        }
        let value = scanned.ok_or(Error::NoRows)??;
        closed.map(|()| value)
    }
}
