//! Single-agent console wrapper
//!
//! Runs the game server as a child process, keeps a rolling history of its console
//! output and serves that console over an authenticated WebSocket at `/ws`. The
//! center dials this endpoint to relay the console to the dashboard.

pub mod hub;
pub mod runner;
pub mod server;

pub use hub::{ConsoleHub, DEFAULT_HISTORY_LINES};
pub use runner::{ProcessRunner, RunnerConfig, RunnerError, STDERR_PREFIX};
pub use server::{WrapperServer, WrapperServerConfig};
