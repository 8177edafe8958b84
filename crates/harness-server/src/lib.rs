//! # Harness Server
//!
//! Launches a model server (`<binary> serve <model> <args...>`) for the
//! duration of a test, waits for `GET /health` to answer 200, and tears the
//! process down when the handle is dropped.
//!
//! ```rust,no_run
//! use harness_server::{RemoteServer, ServerConfig};
//!
//! let server = RemoteServer::start(
//!     ServerConfig::new("facebook/opt-125m").args(["--max-model-len", "2048"]),
//! )?;
//! let models_url = server.url_for(&["v1", "models"]);
//! # let _ = models_url;
//! // SIGTERM, bounded wait, SIGKILL when `server` goes out of scope.
//! # Ok::<(), harness_common::HarnessError>(())
//! ```

pub mod args;
pub mod compare;
pub mod config;
pub mod server;

pub use args::{has_port_flag, parse_host, parse_port, DEFAULT_HOST, DEFAULT_PORT};
pub use compare::{compare_settings, ServerSetting};
pub use config::{ServerConfig, DEFAULT_SERVER_BINARY, SERVER_BINARY_ENV};
pub use server::{RemoteServer, DUMMY_API_KEY, WORKER_MULTIPROC_METHOD_ENV};
