//! Test setup shared by unit and integration tests across the workspace.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a test-scoped tracing subscriber exactly once per process.
///
/// Call at the top of every `#[tokio::test]`; cheap to call repeatedly.
pub fn setup_test() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}
