//! Trellis Testing Framework
//!
//! Provides utilities for testing workflows, units of work, and engine
//! behavior without wiring up real services or live infrastructure.

pub mod events;
pub mod units;

pub use events::EventLog;
pub use units::MockUnit;

/// Install a tracing subscriber that routes logs through the test harness.
///
/// Later calls are no-ops, so every test can call it unconditionally.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
