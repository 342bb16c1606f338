//! Saga status machine.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// Status transitions:
/// ```text
/// Started ──┬──► Completed
///           └──► Compensating ──┬──► Failed
///                               └──► CompensationFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Steps are being executed.
    #[default]
    Started,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed and completed steps are being unwound.
    Compensating,

    /// Compensation finished after a failure (terminal state).
    Failed,

    /// Compensation gave up; an operator must intervene (terminal state).
    CompensationFailed,
}

impl SagaStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::CompensationFailed
        )
    }

    /// Returns the stored name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Failed => "FAILED",
            SagaStatus::CompensationFailed => "COMPENSATION_FAILED",
        }
    }

    /// Parses a stored status name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STARTED" => Some(SagaStatus::Started),
            "COMPLETED" => Some(SagaStatus::Completed),
            "COMPENSATING" => Some(SagaStatus::Compensating),
            "FAILED" => Some(SagaStatus::Failed),
            "COMPENSATION_FAILED" => Some(SagaStatus::CompensationFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SagaStatus::parse(&s.to_ascii_uppercase()).ok_or_else(|| format!("unknown saga status {s}"))
    }
}
