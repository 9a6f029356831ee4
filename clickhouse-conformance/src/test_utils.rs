//! Helpers for suites that run against a live server.
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{Directive, LevelFilter};

use crate::scenarios::ServerContract;

const DEFAULT_DIRECTIVES: &[(&str, &str)] = &[("clickhouse_conformance", "debug")];

/// Install a `fmt` subscriber writing through the test harness.
///
/// `RUST_LOG` sets the base filter; `directives` are `(target, level)` pairs layered on top and
/// default to debug output for this crate. Safe to call from every test.
pub fn init_tracing(directives: Option<&[(&str, &str)]>) {
    let mut filter =
        EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();
    for (target, level) in directives.unwrap_or(DEFAULT_DIRECTIVES) {
        if let Ok(directive) = format!("{target}={level}").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    // A subscriber installed by an earlier test is kept.
    drop(tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init());
}

/// The live server the end-to-end suite expects: `127.0.0.1:9000`, with `:9001` and `:9002`
/// refusing connections.
pub fn server_contract() -> ServerContract { ServerContract::default() }
