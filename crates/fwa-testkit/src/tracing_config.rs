//! Tracing configuration for test output.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing for tests.
///
/// Safe to call from every test; only the first call installs a subscriber.
/// Uses `RUST_LOG` if set, otherwise `info` with debug output for the agent
/// crates.
pub fn init_test_tracing() {
    init_test_tracing_with_filter(
        "info,fwa_core=debug,fwa_backend=debug,fwa_engine=debug",
    );
}

/// Initialize tracing with a specific default filter.
///
/// `RUST_LOG` still takes precedence when set.
pub fn init_test_tracing_with_filter(default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        // Another harness may already own the global subscriber.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .compact(),
            )
            .try_init();
    });
}
