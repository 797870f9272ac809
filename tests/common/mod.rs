#![allow(dead_code)]

pub mod entities;
pub mod memory;

/// Route crate logs to the test harness; set RUST_LOG to see them.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
