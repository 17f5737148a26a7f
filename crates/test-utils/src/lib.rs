pub mod builders;
pub mod recorder;
pub mod test_worker;

use std::sync::Once;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, EnvFilter};

pub use recorder::Recorder;
pub use test_worker::{Behaviour, Execution, TestWorker, TestWorkerFactory};

static INIT: Once = Once::new();

/// Generous upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .with_thread_names(true)
            .init();
    });
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
