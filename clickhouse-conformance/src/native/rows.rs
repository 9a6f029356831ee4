//! Streaming row set over a checked-out connection.
use std::time::Instant;

use bb8::PooledConnection;
use tracing::{debug, trace};

use super::block::Block;
use super::connection::Packet;
use super::pool::ConnectionManager;
use crate::context::{CallContext, Progress, ProgressFn};
use crate::contract::RowSet;
use crate::scan::RowRef;
use crate::types::Type;
use crate::{Error, Result};

pub(crate) type PooledConn = PooledConnection<'static, ConnectionManager>;

/// Folds progress increments into running totals and reports them to the context's callback.
pub(crate) struct ProgressTracker {
    callback: Option<ProgressFn>,
    total:    Progress,
    started:  Instant,
}

impl ProgressTracker {
    pub(crate) fn new(ctx: &CallContext) -> Self {
        Self {
            callback: ctx.progress().cloned(),
            total:    Progress::default(),
            started:  Instant::now(),
        }
    }

    pub(crate) fn update(&mut self, delta: &Progress) {
        self.total.accumulate(delta, self.started.elapsed());
        trace!(rows = self.total.rows, bytes = self.total.bytes, "progress");
        if let Some(callback) = &self.callback {
            callback(&self.total);
        }
    }
}

/// Result rows of a native query, streamed one block at a time.
///
/// The connection is held until the stream ends, fails, or the row set is closed. Dropping an
/// unfinished row set discards its connection instead of returning it to the pool.
pub struct NativeRows {
    conn:     Option<PooledConn>,
    ctx:      CallContext,
    names:    Vec<String>,
    types:    Vec<Type>,
    block:    Block,
    next_row: usize,
    current:  Option<usize>,
    progress: ProgressTracker,
    err:      Option<Error>,
}

impl std::fmt::Debug for NativeRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRows")
            .field("columns", &self.names)
            .field("open", &self.conn.is_some())
            .field("err", &self.err)
            .finish_non_exhaustive()
    }
}

impl NativeRows {
    /// Read up to the header block so column metadata is known before the first row.
    pub(crate) async fn start(mut conn: PooledConn, ctx: CallContext) -> Result<Self> {
        let mut progress = ProgressTracker::new(&ctx);
        loop {
            match conn.read_packet().await? {
                Packet::Data(block) => {
                    return Ok(Self {
                        names: block.names.clone(),
                        types: block.types.clone(),
                        conn: Some(conn),
                        ctx,
                        block,
                        next_row: 0,
                        current: None,
                        progress,
                        err: None,
                    });
                }
                Packet::Progress(delta) => progress.update(&delta),
                Packet::Exception(error) => return Err(Error::Server(error)),
                Packet::EndOfStream => {
                    // Statement without a result, e.g. DDL sent through `query`.
                    return Ok(Self {
                        conn: None,
                        ctx,
                        names: Vec::new(),
                        types: Vec::new(),
                        block: Block::default(),
                        next_row: 0,
                        current: None,
                        progress,
                        err: None,
                    });
                }
                _ => {}
            }
        }
    }

    fn fail(&mut self, error: Error) {
        debug!(%error, "row stream failed");
        drop(self.conn.take());
        if self.err.is_none() {
            self.err = Some(error);
        }
    }
}

impl RowSet for NativeRows {
    fn columns(&self) -> &[String] { &self.names }

    fn column_types(&self) -> &[Type] { &self.types }

    async fn next(&mut self) -> bool {
        loop {
            if self.next_row < self.block.rows {
                self.current = Some(self.next_row);
                self.next_row += 1;
                return true;
            }
            self.current = None;

            let Some(conn) = self.conn.as_mut() else {
                return false;
            };
            match self.ctx.run(conn.read_packet()).await {
                Ok(Packet::Data(block)) => {
                    self.block = block;
                    self.next_row = 0;
                }
                Ok(Packet::Progress(delta)) => self.progress.update(&delta),
                Ok(Packet::Exception(error)) => {
                    self.fail(Error::Server(error));
                    return false;
                }
                Ok(Packet::EndOfStream) => {
                    drop(self.conn.take());
                    return false;
                }
                Ok(_) => {}
                Err(error) => {
                    self.fail(error);
                    return false;
                }
            }
        }
    }

    fn row(&self) -> Option<RowRef<'_>> {
        let values = self.block.row(self.current?)?;
        Some(RowRef { values, names: &self.names, types: &self.types })
    }

    async fn close(&mut self) -> Result<()> {
        self.current = None;
        self.block = Block::default();
        self.next_row = 0;
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        // Unfinished stream: ask the server to stop and drain up to the end of the query.
        debug!("closing unfinished row stream");
        self.ctx
            .run(async {
                conn.send_cancel().await?;
                loop {
                    match conn.read_packet().await? {
                        Packet::EndOfStream | Packet::Exception(_) => return Ok(()),
                        _ => {}
                    }
                }
            })
            .await
    }

    fn err(&self) -> Option<&Error> { self.err.as_ref() }

    fn take_err(&mut self) -> Option<Error> { self.err.take() }
}
