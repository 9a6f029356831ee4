//! # clickhouse-conformance
//!
//! A black-box conformance suite for ClickHouse clients.
//!
//! The suite validates a client's observable contract against a live server: opening over a
//! failover list, pings under expired deadlines, statement execution, streamed queries with
//! per-query settings and nullable columns, positional parameter binding, external tables and
//! composed call contexts.
//!
//! Any client can be checked by implementing [`Client`] and [`RowSet`]. The crate ships
//! [`NativeClient`], a reference implementation over the native TCP protocol.
//!
//! ```rust,ignore
//! use clickhouse_conformance::prelude::*;
//!
//! let report = run_suite::<NativeClient>(&ServerContract::default()).await;
//! assert!(report.passed(), "{report}");
//! ```
pub mod assert;
pub mod bind;
pub mod config;
pub mod context;
pub mod contract;
mod errors;
pub mod external;
pub mod native;
pub mod scan;
pub mod scenarios;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod types;
pub mod value;

pub use assert::{Checker, Failure, ScenarioOutcome};
pub use config::{Auth, ClientConfig, ClientConfigBuilder, CompressionMethod};
pub use context::{CallContext, CancelHandle, Progress, SettingValue, Settings};
pub use contract::{Client, RowSet, ServerVersion, SingleRow, Stats};
pub use errors::{Error, ErrorKind, Result};
pub use external::ExternalTable;
pub use native::NativeClient;
pub use scenarios::{Scenario, ServerContract, SuiteReport, run_suite};
pub use types::Type;
pub use value::Value;

pub mod prelude {
    pub use crate::assert::{Checker, ScenarioOutcome};
    pub use crate::config::{Auth, ClientConfig, CompressionMethod};
    pub use crate::context::{
        CallContext, ContextOption, Progress, SettingValue, Settings, context, with_external_table,
        with_progress, with_settings,
    };
    pub use crate::contract::{Client, RowSet, ServerVersion, Stats};
    pub use crate::external::{ExternalTable, column};
    pub use crate::native::NativeClient;
    pub use crate::scan::{FromRow, FromValue, RowRef};
    pub use crate::scenarios::{Scenario, ServerContract, SuiteReport, run_suite};
    pub use crate::value::Value;
    pub use crate::{Error, ErrorKind, Result};
}
