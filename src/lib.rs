//! webui-probe library
//!
//! Exposes the probe, its configuration and the session runner so the
//! binary and integration tests share one code path.

pub mod config;
pub mod errors;
pub mod poll;
pub mod probe;
pub mod report;
pub mod runner;
pub mod scoring;

// Re-export commonly used types for external use
pub use config::{load_config, ProbeConfig};
pub use errors::{ProbeError, ProbeResult};
pub use poll::await_condition;
pub use probe::{Probe, ProbeOutcome};
pub use report::{RunReport, RunResult};
pub use runner::{run_in_session, run_probe, run_with_driver, SessionHandle};
