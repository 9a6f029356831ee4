//! Call context: cancellation, deadline and per-query data threaded through every operation.
//!
//! Contexts are immutable. Decorators return a new context that shares the parent's
//! cancellation and keeps the earliest deadline, so cancelling a parent ends every operation
//! running under any of its descendants.
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::external::ExternalTable;
use crate::{Error, Result};

/// Callback receiving cumulative progress for the running query.
pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Cumulative counters reported by the server while a query runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub rows:          u64,
    pub bytes:         u64,
    pub total_rows:    u64,
    pub written_rows:  u64,
    pub written_bytes: u64,
    pub elapsed:       Duration,
}

impl Progress {
    /// Fold a server progress packet (which carries increments) into the running totals.
    pub(crate) fn accumulate(&mut self, delta: &Progress, elapsed: Duration) {
        self.rows += delta.rows;
        self.bytes += delta.bytes;
        self.total_rows += delta.total_rows;
        self.written_rows += delta.written_rows;
        self.written_bytes += delta.written_bytes;
        self.elapsed = self.elapsed.max(elapsed);
    }
}

/// A query setting value. Settings travel to the server in their string form.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::UInt(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
            SettingValue::Bool(v) => write!(f, "{}", u8::from(*v)),
            SettingValue::String(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! setting_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for SettingValue {
                fn from(v: $t) -> Self { SettingValue::$variant(v.into()) }
            }
        )*
    };
}

setting_from!(
    i32 => Int,
    i64 => Int,
    u32 => UInt,
    u64 => UInt,
    f64 => Float,
    bool => Bool,
    String => String,
    &str => String,
);

/// Insertion-ordered query settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings(IndexMap<String, SettingValue>);

impl Settings {
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a setting, replacing any previous value of the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SettingValue>) {
        drop(self.0.insert(name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> { self.0.get(name) }

    /// Merge `other` into `self`; keys of `other` win.
    pub fn merge(&mut self, other: &Settings) {
        for (name, value) in other.iter() {
            self.set(name, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<K: Into<String>, V: Into<SettingValue>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Settings::new();
        for (k, v) in iter {
            settings.set(k, v);
        }
        settings
    }
}

impl<K: Into<String>, V: Into<SettingValue>, const N: usize> From<[(K, V); N]> for Settings {
    fn from(pairs: [(K, V); N]) -> Self { pairs.into_iter().collect() }
}

struct CancelToken {
    tx:     watch::Sender<bool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    fn new(parent: Option<Arc<CancelToken>>) -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self { tx, parent })
    }

    fn is_cancelled(&self) -> bool {
        *self.tx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    fn cancel(&self) { let _ = self.tx.send_replace(true); }

    fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.tx.subscribe();
            let own = async move {
                drop(rx.wait_for(|cancelled| *cancelled).await);
            };
            match &self.parent {
                Some(parent) => tokio::select! {
                    () = own => {}
                    () = parent.cancelled() => {}
                },
                None => own.await,
            }
        })
    }
}

/// Cancels the context returned alongside it by [`CallContext::with_cancel`].
#[derive(Clone)]
pub struct CancelHandle(Arc<CancelToken>);

impl CancelHandle {
    pub fn cancel(&self) { self.0.cancel(); }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").field("cancelled", &self.0.is_cancelled()).finish()
    }
}

/// Cancellation token with optional deadline plus the query settings, progress callback and
/// external tables for operations issued under it.
#[derive(Clone)]
pub struct CallContext {
    token:           Arc<CancelToken>,
    deadline:        Option<Instant>,
    settings:        Arc<Settings>,
    progress:        Option<ProgressFn>,
    external_tables: Vec<Arc<ExternalTable>>,
}

impl Default for CallContext {
    fn default() -> Self { Self::background() }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("settings", &self.settings)
            .field("progress", &self.progress.is_some())
            .field(
                "external_tables",
                &self.external_tables.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CallContext {
    /// Root context: never cancelled, no deadline, no data.
    pub fn background() -> Self {
        Self {
            token:           CancelToken::new(None),
            deadline:        None,
            settings:        Arc::new(Settings::new()),
            progress:        None,
            external_tables: Vec::new(),
        }
    }

    /// Derive a context that expires at `deadline` (or earlier if the parent does).
    #[must_use]
    pub fn with_deadline(&self, deadline: std::time::Instant) -> Self {
        let deadline = Instant::from_std(deadline);
        let mut ctx = self.clone();
        ctx.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        ctx
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(std::time::Instant::now() + timeout)
    }

    /// Derive a cancellable context. Cancelling the parent also cancels the child.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = CancelToken::new(Some(Arc::clone(&self.token)));
        let mut ctx = self.clone();
        ctx.token = Arc::clone(&token);
        (ctx, CancelHandle(token))
    }

    /// Merge query settings; later values override earlier ones of the same name.
    #[must_use]
    pub fn with_settings(&self, settings: impl Into<Settings>) -> Self {
        let mut merged = Settings::clone(&self.settings);
        merged.merge(&settings.into());
        let mut ctx = self.clone();
        ctx.settings = Arc::new(merged);
        ctx
    }

    /// Install the progress handler, replacing any earlier one.
    #[must_use]
    pub fn with_progress(&self, callback: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        let mut ctx = self.clone();
        ctx.progress = Some(Arc::new(callback));
        ctx
    }

    /// Append tables to the attached table list.
    #[must_use]
    pub fn with_external_tables<I, T>(&self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Arc<ExternalTable>>,
    {
        let mut ctx = self.clone();
        ctx.external_tables.extend(tables.into_iter().map(Into::into));
        ctx
    }

    /// Apply decorators in order.
    #[must_use]
    pub fn with(&self, options: impl IntoIterator<Item = ContextOption>) -> Self {
        options.into_iter().fold(self.clone(), |ctx, option| match option {
            ContextOption::Settings(settings) => ctx.with_settings(settings),
            ContextOption::Progress(callback) => {
                let mut ctx = ctx;
                ctx.progress = Some(callback);
                ctx
            }
            ContextOption::ExternalTables(tables) => ctx.with_external_tables(tables),
        })
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn progress(&self) -> Option<&ProgressFn> { self.progress.as_ref() }

    pub fn external_tables(&self) -> &[Arc<ExternalTable>] { &self.external_tables }

    pub fn deadline(&self) -> Option<std::time::Instant> { self.deadline.map(Instant::into_std) }

    /// Time left before the deadline, `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            Some(Error::Cancelled)
        } else if self.deadline.is_some_and(|d| d <= Instant::now()) {
            Some(Error::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Error {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => Error::Cancelled,
            () = deadline => Error::DeadlineExceeded,
        }
    }

    /// Run `fut` unless the context ends first, in which case `fut` is dropped.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`] if the context ends first,
    /// otherwise whatever `fut` returns.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}

/// A decorator applied by [`CallContext::with`] or [`context`].
pub enum ContextOption {
    Settings(Settings),
    Progress(ProgressFn),
    ExternalTables(Vec<Arc<ExternalTable>>),
}

impl fmt::Debug for ContextOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextOption::Settings(s) => f.debug_tuple("Settings").field(s).finish(),
            ContextOption::Progress(_) => f.write_str("Progress(..)"),
            ContextOption::ExternalTables(t) => f.debug_tuple("ExternalTables").field(t).finish(),
        }
    }
}

pub fn with_settings(settings: impl Into<Settings>) -> ContextOption {
    ContextOption::Settings(settings.into())
}

pub fn with_progress(callback: impl Fn(&Progress) + Send + Sync + 'static) -> ContextOption {
    ContextOption::Progress(Arc::new(callback))
}

pub fn with_external_table<I, T>(tables: I) -> ContextOption
where
    I: IntoIterator<Item = T>,
    T: Into<Arc<ExternalTable>>,
{
    ContextOption::ExternalTables(tables.into_iter().map(Into::into).collect())
}

/// Decorate `parent` with `options`, e.g.
/// `context(&root, [with_progress(|_| {}), with_settings([("max_execution_time", 256)])])`.
pub fn context(
    parent: &CallContext,
    options: impl IntoIterator<Item = ContextOption>,
) -> CallContext {
    parent.with(options)
}
