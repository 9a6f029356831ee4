//! Conformance scenarios against a live server.
//!
//! Expects ClickHouse on 127.0.0.1:9000 with a passwordless `default` user, and nothing
//! listening on 127.0.0.1:9001 or :9002.
//!
//! Run with `cargo test --features test-utils --test e2e_conformance`.

use clickhouse_conformance::prelude::*;
use clickhouse_conformance::test_utils::{init_tracing, server_contract};

async fn run_scenario(scenario: Scenario) {
    init_tracing(None);
    let outcome = scenario.run::<NativeClient>(&server_contract()).await;
    assert!(
        outcome.passed(),
        "{scenario} failed:\n{}",
        outcome.failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
    );
}

#[tokio::test]
async fn test_open_ping_close() { run_scenario(Scenario::OpenPingClose).await; }

#[tokio::test]
async fn test_failover() { run_scenario(Scenario::Failover).await; }

#[tokio::test]
async fn test_past_deadline_ping() { run_scenario(Scenario::PastDeadlinePing).await; }

#[tokio::test]
async fn test_exec_lifecycle() { run_scenario(Scenario::ExecLifecycle).await; }

#[tokio::test]
async fn test_query_settings() { run_scenario(Scenario::QuerySettings).await; }

#[tokio::test]
async fn test_positional_binding() { run_scenario(Scenario::PositionalBinding).await; }

#[tokio::test]
async fn test_external_tables() { run_scenario(Scenario::ExternalTables).await; }

#[tokio::test]
async fn test_context_decorators() { run_scenario(Scenario::ContextDecorators).await; }

#[tokio::test]
async fn test_full_suite() {
    init_tracing(None);
    let report = run_suite::<NativeClient>(&server_contract()).await;
    eprintln!("{report}");
    eprintln!("{}", serde_json::to_string_pretty(&report).expect("report serializes"));
    assert_eq!(report.outcomes.len(), Scenario::ALL.len());
    assert!(report.passed(), "{report}");
}

#[tokio::test]
async fn test_rows_after_exhaustion() {
    init_tracing(None);
    let config = server_contract().config().build().expect("Failed to build config");
    let client = NativeClient::open(config).await.expect("Failed to open client");
    let ctx = CallContext::background();

    let mut rows = client
        .query(&ctx, "SELECT number FROM system.numbers LIMIT 5", &[])
        .await
        .expect("Failed to query");
    assert_eq!(rows.column_types().len(), 1);
    let mut seen = Vec::new();
    while rows.next().await {
        let (n,) = rows.scan::<(u64,)>().expect("Failed to scan");
        seen.push(n);
    }
    assert_eq!(seen, [0, 1, 2, 3, 4]);
    assert!(!rows.next().await);
    assert!(rows.err().is_none());
    rows.close().await.expect("Failed to close rows");
    rows.close().await.expect("Close is idempotent");

    let err = client
        .query_row(&ctx, "SELECT number FROM system.numbers LIMIT 0", &[])
        .scan::<(u64,)>()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoRows);

    let err = client.exec(&ctx, "SELECT throwIf(1)", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    client.ping(&ctx).await.expect("Connection usable after a server error");

    let stats = client.stats();
    assert!(stats.open >= 1);
    client.close().await.expect("Failed to close client");
    client.close().await.expect("Close is idempotent");
    assert_eq!(client.ping(&ctx).await.unwrap_err().kind(), ErrorKind::Closed);
    assert!(!client.server_version().expect("cached version").to_string().is_empty());
}

#[tokio::test]
async fn test_cancel_interrupts_query() {
    init_tracing(None);
    let config = server_contract().config().build().expect("Failed to build config");
    let client = NativeClient::open(config).await.expect("Failed to open client");
    let (ctx, cancel) = CallContext::background().with_cancel();

    let mut rows = client
        .query(&ctx, "SELECT number FROM system.numbers", &[])
        .await
        .expect("Failed to query");
    assert!(rows.next().await);
    cancel.cancel();
    while rows.next().await {}
    assert!(matches!(rows.err(), Some(Error::Cancelled)));
    rows.close().await.expect("Failed to close rows");

    let fresh = CallContext::background();
    client.ping(&fresh).await.expect("Pool recovers after a cancelled stream");
    client.close().await.expect("Failed to close client");
}
