//! Error handling module
//!
//! Only the steps that can abort a run produce a [`ProbeError`]. Steps that
//! degrade (polling, extraction, scoring, the interaction and end-signal
//! checks) log a warning and substitute a default instead.

use cdp_adapter::AdapterError;
use thiserror::Error;

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("navigation to {url} did not settle: {source}")]
    NavigationTimeout {
        url: String,
        #[source]
        source: AdapterError,
    },

    #[error("{what} not found: {source}")]
    ElementNotFound {
        what: String,
        #[source]
        source: AdapterError,
    },

    #[error("no step cards appeared within {waited_ms}ms: {source}")]
    StepsNotAppeared {
        waited_ms: u64,
        #[source]
        source: AdapterError,
    },

    #[error("browser launch failed: {0}")]
    Launch(#[source] AdapterError),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Short stable name for logs and the JSON report.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::NavigationTimeout { .. } => "navigation_timeout",
            ProbeError::ElementNotFound { .. } => "element_not_found",
            ProbeError::StepsNotAppeared { .. } => "steps_not_appeared",
            ProbeError::Launch(_) => "launch",
            ProbeError::Screenshot(_) => "screenshot",
            ProbeError::Config(_) => "config",
            ProbeError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::AdapterErrorKind;
    use std::error::Error as _;

    #[test]
    fn fatal_errors_keep_the_adapter_cause() {
        let err = ProbeError::StepsNotAppeared {
            waited_ms: 20_000,
            source: AdapterError::new(AdapterErrorKind::WaitTimeout).with_hint("css=.trace-card"),
        };
        assert_eq!(err.kind(), "steps_not_appeared");
        assert!(err.to_string().contains("20000ms"));
        let cause = err.source().map(|source| source.to_string()).unwrap_or_default();
        assert_eq!(cause, "wait timed out: css=.trace-card");
    }
}
