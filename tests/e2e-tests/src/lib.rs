// E2E test support for the server harness

pub mod assertions;
pub mod client;

pub use client::fetch;

use std::path::Path;
use std::time::Duration;

use harness_server::ServerConfig;

/// Default model name handed to the fake server.
pub const FAKE_MODEL: &str = "fake-org/fake-model";

/// Config that launches the fake server at `binary` with test-friendly
/// timeouts.
pub fn fake_server_config(binary: &Path) -> ServerConfig {
    ServerConfig::new(FAKE_MODEL)
        .binary(binary.display().to_string())
        .startup_timeout(Duration::from_secs(20))
        .poll_interval(Duration::from_millis(100))
        .shutdown_timeout(Duration::from_secs(3))
}

/// Print a test banner in the same format across all e2e tests.
pub fn banner(title: &str) {
    println!("\n========================================");
    println!("TEST: {}", title);
    println!("========================================\n");
}
