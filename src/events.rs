//! Event definitions for the update pipeline.
//!
//! Events are created by rules, live only in transit through the bus
//! channels, and are never persisted: durability of data belongs to the
//! repository, durability of delivery across restarts is an explicit
//! non-goal. Each variant is identifiable by its `Version`.

use crate::domain::Version;

/// Errors attached to `Event::ErrorOccurred`.
///
/// Per-unit failures travel through the bus like any other event so a
/// central error rule can observe them; infrastructure failures do not —
/// they surface through module lifecycle calls instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    #[error("selector failed: {0}")]
    Selection(String),

    #[error("gateway fetch failed: {0}")]
    Fetch(String),

    #[error("new rows validation failed: {0}")]
    Validation(String),

    #[error("repository failure: {0}")]
    Persistence(String),

    #[error("update deadline exceeded after {seconds}s")]
    DeadlineExceeded { seconds: u64 },
}

impl UpdateError {
    /// Failures after which continuing could leave half-written state
    /// behind a completion the rest of the pipeline trusts. The errors
    /// rule escalates these into an application shutdown.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpdateError::Persistence(_))
    }
}

/// The closed set of events routed through the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A version must be (re)checked. Emitted by the timer rule with the
    /// day-ended marker id whenever a new trading day may have results.
    UpdateRequired(Version),

    /// A version was brought up to date. Only emitted after new rows were
    /// confirmed and persisted, so downstream rules never observe a
    /// completion for data that is not yet durably stored.
    UpdateCompleted(Version),

    /// A single unit of work failed; carries the cause.
    ErrorOccurred { version: Version, error: UpdateError },
}

impl Event {
    pub fn version(&self) -> &Version {
        match self {
            Event::UpdateRequired(version) => version,
            Event::UpdateCompleted(version) => version,
            Event::ErrorOccurred { version, .. } => version,
        }
    }

    /// Short variant label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::UpdateRequired(_) => "UpdateRequired",
            Event::UpdateCompleted(_) => "UpdateCompleted",
            Event::ErrorOccurred { .. } => "ErrorOccurred",
        }
    }
}
