//! The conformance scenarios, generic over any [`Client`] implementation.
//!
//! Every scenario opens its own client, guards against leftover server state and records its
//! assertions on a [`Checker`]. Failed steps that later steps depend on end the scenario with an
//! early return; independent checks keep running.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, Utc};
use futures_util::future::join_all;
use strum::{AsRefStr, Display};
use tracing::{debug, info};

use crate::assert::{Checker, Failure, ScenarioOutcome};
use crate::config::{Auth, ClientConfig, ClientConfigBuilder, CompressionMethod, DEFAULT_ADDRESS};
use crate::context::{CallContext, SettingValue, Settings, context, with_progress, with_settings};
use crate::contract::{Client, RowSet};
use crate::external::{ExternalTable, column};
use crate::value::Value;
use crate::{Error, ErrorKind, Result};

/// Where the live server listens and which addresses are known not to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerContract {
    pub address:     String,
    /// Leading failover entries that must refuse connections.
    pub unreachable: Vec<String>,
}

impl Default for ServerContract {
    fn default() -> Self {
        Self {
            address:     DEFAULT_ADDRESS.to_string(),
            unreachable: vec!["127.0.0.1:9001".to_string(), "127.0.0.1:9002".to_string()],
        }
    }
}

impl ServerContract {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), ..Self::default() }
    }

    /// Builder for a config pointed at the live server, with default credentials, LZ4 and
    /// debug logging enabled.
    pub fn config(&self) -> ClientConfigBuilder { Self::builder([&self.address]) }

    /// Like [`ServerContract::config`] but listing the unreachable addresses first.
    pub fn failover_config(&self) -> ClientConfigBuilder {
        Self::builder(self.unreachable.iter().chain(std::iter::once(&self.address)))
    }

    fn builder<'a>(addresses: impl IntoIterator<Item = &'a String>) -> ClientConfigBuilder {
        ClientConfig::builder()
            .with_addresses(addresses.into_iter().cloned())
            .with_auth(Auth::default())
            .with_compression(CompressionMethod::LZ4)
            .with_debug(true)
    }
}

/// The eight scenarios of the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum Scenario {
    #[strum(serialize = "S1 open/ping/close")]
    OpenPingClose,
    #[strum(serialize = "S2 failover")]
    Failover,
    #[strum(serialize = "S3 past-deadline ping")]
    PastDeadlinePing,
    #[strum(serialize = "S4 exec lifecycle")]
    ExecLifecycle,
    #[strum(serialize = "S5 query with settings")]
    QuerySettings,
    #[strum(serialize = "S6 positional binding")]
    PositionalBinding,
    #[strum(serialize = "S7 external tables")]
    ExternalTables,
    #[strum(serialize = "S8 context decorators")]
    ContextDecorators,
}

impl Scenario {
    pub const ALL: [Scenario; 8] = [
        Scenario::OpenPingClose,
        Scenario::Failover,
        Scenario::PastDeadlinePing,
        Scenario::ExecLifecycle,
        Scenario::QuerySettings,
        Scenario::PositionalBinding,
        Scenario::ExternalTables,
        Scenario::ContextDecorators,
    ];

    /// Run the scenario against client implementation `C`.
    pub async fn run<C: Client>(self, contract: &ServerContract) -> ScenarioOutcome {
        let check = Checker::new(self.as_ref());
        let started = Instant::now();
        info!(scenario = %self, address = %contract.address, "scenario started");

        match self {
            Scenario::OpenPingClose => open_ping_close::<C>(&check, contract).await,
            Scenario::Failover => failover::<C>(&check, contract).await,
            Scenario::PastDeadlinePing => past_deadline_ping::<C>(&check, contract).await,
            Scenario::ExecLifecycle => exec_lifecycle::<C>(&check, contract).await,
            Scenario::QuerySettings => query_settings::<C>(&check, contract).await,
            Scenario::PositionalBinding => positional_binding::<C>(&check, contract).await,
            Scenario::ExternalTables => external_tables::<C>(&check, contract).await,
            Scenario::ContextDecorators => context_decorators::<C>(&check, contract).await,
        }

        let outcome = check.finish(started.elapsed());
        info!(
            scenario = %self,
            passed = outcome.passed(),
            failures = outcome.failures.len(),
            elapsed_ms = outcome.elapsed.as_millis(),
            "scenario finished"
        );
        outcome
    }
}

/// Outcomes of a suite run, in scenario order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SuiteReport {
    pub outcomes: Vec<ScenarioOutcome>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool { self.outcomes.iter().all(ScenarioOutcome::passed) }

    /// Every recorded failure paired with its scenario name.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Failure)> {
        self.outcomes
            .iter()
            .flat_map(|o| o.failures.iter().map(move |f| (o.name.as_str(), f)))
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            let status = if outcome.passed() { "ok" } else { "FAILED" };
            writeln!(f, "{} ... {status} ({:?})", outcome.name, outcome.elapsed)?;
            for failure in &outcome.failures {
                writeln!(f, "    {failure}")?;
            }
        }
        let passed = self.outcomes.iter().filter(|o| o.passed()).count();
        write!(
            f,
            "{} scenarios, {passed} passed, {} failed",
            self.outcomes.len(),
            self.outcomes.len() - passed
        )
    }
}

/// Run every scenario concurrently against client implementation `C`.
pub async fn run_suite<C: Client>(contract: &ServerContract) -> SuiteReport {
    let outcomes = join_all(Scenario::ALL.into_iter().map(|s| s.run::<C>(contract))).await;
    let report = SuiteReport { outcomes };
    info!(passed = report.passed(), "suite finished");
    report
}

async fn open<C: Client>(check: &Checker, config: Result<ClientConfig>) -> Option<C> {
    let config = check.ok(config)?;
    check.ok(C::open(config).await)
}

/// Open, ping and close, then poke the closed handle.
pub async fn open_ping_close<C: Client>(check: &Checker, contract: &ServerContract) {
    let Some(client) = open::<C>(check, contract.config().build()).await else {
        return;
    };
    let ctx = CallContext::background();
    if !check.no_error(&client.ping(&ctx).await) {
        return;
    }
    if !check.no_error(&client.close().await) {
        return;
    }

    // Observable after close; only the ping is required to fail.
    let stats = client.stats();
    let version = client.server_version();
    debug!(?stats, ?version, "closed client state");
    let _ = check.error(&client.ping(&ctx).await);
}

/// Open through a failover list whose leading entries refuse connections.
pub async fn failover<C: Client>(check: &Checker, contract: &ServerContract) {
    let Some(client) = open::<C>(check, contract.failover_config().build()).await else {
        return;
    };
    let ctx = CallContext::background();
    if check.no_error(&client.ping(&ctx).await)
        && let Some(version) = check.ok(client.server_version())
    {
        debug!(%version, "server version");
        let _ = check.is_true(!version.name.is_empty(), "the server reports its name");
        let _ = check.is_true(version.revision > 0, "the server reports a protocol revision");
    }
    let _ = check.no_error(&client.close().await);
}

/// A ping whose deadline already passed fails with the deadline sentinel itself.
pub async fn past_deadline_ping<C: Client>(check: &Checker, contract: &ServerContract) {
    let Some(client) = open::<C>(check, contract.config().build()).await else {
        return;
    };
    let past = Instant::now().checked_sub(Duration::from_secs(1)).unwrap_or_else(Instant::now);
    let ctx = CallContext::background().with_deadline(past);

    let result = client.ping(&ctx).await;
    if check.error_kind(&result, ErrorKind::DeadlineExceeded) {
        let _ = check.is_true(
            matches!(result, Err(Error::DeadlineExceeded)),
            "the unwrapped DeadlineExceeded sentinel",
        );
    }
    let _ = check.no_error(&client.close().await);
}

/// Drop, create and fill a memory table.
pub async fn exec_lifecycle<C: Client>(check: &Checker, contract: &ServerContract) {
    let Some(client) = open::<C>(check, contract.config().build()).await else {
        return;
    };
    let ctx = CallContext::background();
    let statements = [
        "DROP TABLE IF EXISTS test_exec",
        "CREATE TABLE test_exec (Column1 UInt8) ENGINE = Memory",
        "INSERT INTO test_exec (Column1) SELECT 1 FROM system.numbers LIMIT 200",
    ];
    for sql in statements {
        if !check.no_error(&client.exec(&ctx, sql, &[]).await) {
            break;
        }
    }
    let _ = check.no_error(&client.close().await);
}

/// Stream a nullable column in small blocks under a deadline.
pub async fn query_settings<C: Client>(check: &Checker, contract: &ServerContract) {
    let Some(client) = open::<C>(check, contract.config().build()).await else {
        return;
    };
    let ctx = CallContext::background()
        .with_timeout(Duration::from_secs(1))
        .with_settings(Settings::new().with("max_block_size", 3));
    let sql = "SELECT number AS int, number::Nullable(UInt64) AS nullable \
               FROM system.numbers LIMIT 20";

    if let Some(mut rows) = check.ok(client.query(&ctx, sql, &[]).await) {
        let _ = check.equal(rows.columns(), ["int", "nullable"].as_slice());
        let mut count = 0_u64;
        while rows.next().await {
            if let Some((int, nullable)) = check.ok(rows.scan::<(u64, Option<u64>)>()) {
                let _ = check.equal((int, nullable), (count, Some(count)));
            }
            count += 1;
        }
        let _ = check.equal(count, 20_u64);
        let _ = check.no_error(&rows.close().await);
        if let Some(err) = rows.err() {
            check.fail(format_args!("row set reported a terminal error: {err}"));
        }
    }
    let _ = check.no_error(&client.close().await);
}

/// The same placeholder bound twice under different casts.
pub async fn positional_binding<C: Client>(check: &Checker, contract: &ServerContract) {
    let Some(client) = open::<C>(check, contract.config().build()).await else {
        return;
    };
    let ctx = CallContext::background();
    let args = [Value::from(10_i64), Value::from(1000_i64)];
    let row = client
        .query_row(&ctx, "SELECT $1::Int8, $2::Int64, $1::UInt8, $2::UInt64", &args)
        .scan::<(i8, i64, u8, u64)>()
        .await;
    if let Some(row) = check.ok(row) {
        let _ = check.equal(row, (10, 1000, 10, 1000));
    }
    let _ = check.no_error(&client.close().await);
}

fn external_table(name: &str, now: DateTime<Utc>) -> Result<ExternalTable> {
    let mut table = ExternalTable::new(name, [
        column("col1", "UInt8"),
        column("col2", "String"),
        column("col3", "DateTime"),
    ])?;
    for i in 0..10_u8 {
        table.append([Value::from(i), Value::from(format!("value_{i}")), Value::from(now)])?;
    }
    Ok(table)
}

/// Ship two tables with a query and count them from the server side.
pub async fn external_tables<C: Client>(check: &Checker, contract: &ServerContract) {
    let now = Utc::now().trunc_subsecs(0);
    let Some(table_1) = check.ok(external_table("external_table_1", now)) else {
        return;
    };
    let Some(table_2) = check.ok(external_table("external_table_2", now)) else {
        return;
    };
    let Some(client) = open::<C>(check, contract.config().build()).await else {
        return;
    };
    let ctx = CallContext::background().with_external_tables([table_1, table_2]);

    let rows = client.query(&ctx, "SELECT * FROM external_table_1", &[]).await;
    if let Some(mut rows) = check.ok(rows) {
        let _ = check.equal(rows.columns(), ["col1", "col2", "col3"].as_slice());
        let mut count = 0_u8;
        while rows.next().await {
            if let Some((col1, col2, col3)) = check.ok(rows.scan::<(u8, String, DateTime<Utc>)>())
            {
                let _ = check.equal(col1, count);
                let _ = check.equal(col2, format!("value_{col1}"));
                let _ = check.equal(col3, now);
            }
            count += 1;
        }
        let _ = check.equal(count, 10_u8);
        let _ = check.no_error(&rows.close().await);
        if let Some(err) = rows.err() {
            check.fail(format_args!("row set reported a terminal error: {err}"));
        }
    }

    let counts = [
        ("SELECT COUNT(*) FROM external_table_1", 10_u64),
        ("SELECT COUNT(*) FROM external_table_2", 10),
        (
            "SELECT COUNT(*) FROM (SELECT * FROM external_table_1 \
             UNION ALL SELECT * FROM external_table_2)",
            20,
        ),
    ];
    for (sql, expected) in counts {
        let scanned = client.query_row(&ctx, sql, &[]).scan::<(u64,)>().await;
        if let Some((count,)) = check.ok(scanned) {
            let _ = check.equal(count, expected);
        }
    }
    let _ = check.no_error(&client.close().await);
}

/// Settings and a progress handler attached through `context` both reach the server round trip.
pub async fn context_decorators<C: Client>(check: &Checker, contract: &ServerContract) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let ctx = context(&CallContext::background(), [
        with_progress(move |_| {
            let _ = counter.fetch_add(1, Ordering::Relaxed);
        }),
        with_settings([("max_execution_time", 256)]),
    ]);
    let _ = check.equal(ctx.settings().get("max_execution_time"), Some(&SettingValue::Int(256)));
    let _ = check.is_true(ctx.progress().is_some(), "a progress handler on the context");

    let Some(client) = open::<C>(check, contract.config().build()).await else {
        return;
    };
    let setting = client
        .query_row(&ctx, "SELECT value FROM system.settings WHERE name = 'max_execution_time'", &[])
        .scan::<(String,)>()
        .await;
    if let Some((value,)) = check.ok(setting) {
        let _ = check.equal(value, "256");
    }

    if let Some(mut rows) =
        check.ok(client.query(&ctx, "SELECT number FROM system.numbers LIMIT 1000", &[]).await)
    {
        while rows.next().await {}
        let _ = check.no_error(&rows.close().await);
        let _ = check.is_true(rows.err().is_none(), "no terminal row set error");
    }
    let _ = check.is_true(calls.load(Ordering::Relaxed) > 0, "progress callbacks for the query");
    let _ = check.no_error(&client.close().await);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_contract() {
        let contract = ServerContract::default();
        assert_eq!(contract.address, "127.0.0.1:9000");
        let config = contract.failover_config().build().unwrap();
        assert_eq!(config.addresses, ["127.0.0.1:9001", "127.0.0.1:9002", "127.0.0.1:9000"]);
        assert_eq!(config.compression, Some(CompressionMethod::LZ4));
        assert!(config.debug);
        assert_eq!(config.auth, Auth::default());
    }

    #[test]
    fn test_external_table_fixture() {
        let table = external_table("external_table_1", Utc::now()).unwrap();
        assert_eq!(table.len(), 10);
        assert_eq!(table.columns().count(), 3);
    }

    #[test]
    fn test_scenario_names() {
        assert_eq!(Scenario::ALL.len(), 8);
        assert_eq!(Scenario::OpenPingClose.to_string(), "S1 open/ping/close");
        assert_eq!(Scenario::ContextDecorators.as_ref(), "S8 context decorators");
    }

    #[test]
    fn test_report_display() {
        let report = SuiteReport {
            outcomes: vec![
                ScenarioOutcome {
                    name:     "S1 open/ping/close".into(),
                    failures: Vec::new(),
                    elapsed:  Duration::from_millis(3),
                },
                ScenarioOutcome {
                    name:     "S2 failover".into(),
                    failures: vec![Failure {
                        location: "src/scenarios.rs:1:1".into(),
                        message:  "unexpected error: client is closed".into(),
                    }],
                    elapsed:  Duration::from_millis(5),
                },
            ],
        };
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        let rendered = report.to_string();
        assert!(rendered.contains("S1 open/ping/close ... ok"));
        assert!(rendered.contains("S2 failover ... FAILED"));
        assert!(rendered.ends_with("2 scenarios, 1 passed, 1 failed"));
    }
}
