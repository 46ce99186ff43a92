pub mod builders;
pub mod fake_tool;

use std::sync::Once;
use std::time::Duration;

use stagehand::retry::RetryPolicy;
use stagehand::store::{Store, WorkerInfo};
use stagehand::worker::WorkerOptions;
use tempfile::TempDir;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=stagehand=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 10-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// Fresh migrated store in a temporary directory.
///
/// Keep the `TempDir` alive for as long as the store is used.
pub fn temp_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = Store::open(&dir.path().join("stagehand.db").display().to_string())
        .expect("open temp store");
    (dir, store)
}

/// Register a worker row named `name` and return its id.
pub fn register(store: &Store, name: &str) -> i64 {
    store
        .register_worker(&WorkerInfo::current(name, Some("test-host".to_string())))
        .expect("register worker")
}

/// Worker options with short timings, suitable for in-process tests.
pub fn fast_worker_options() -> WorkerOptions {
    WorkerOptions {
        name: "test-worker".to_string(),
        machine: Some("test-host".to_string()),
        idle_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        heartbeat_interval: Duration::from_millis(50),
        retry: RetryPolicy::immediate(5),
        ..WorkerOptions::default()
    }
}
