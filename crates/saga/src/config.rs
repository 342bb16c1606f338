/// Failed compensation runs allowed before a saga is handed to an operator.
pub const MAX_COMPENSATION_ATTEMPTS: u32 = 3;

/// Actor recorded on ledger entries written by compensation.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub max_compensation_attempts: u32,
    pub system_actor: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_compensation_attempts: MAX_COMPENSATION_ATTEMPTS,
            system_actor: SYSTEM_ACTOR.to_string(),
        }
    }
}

/// Ledger reference type for order reservations and deductions.
pub const ORDER_REFERENCE: &str = "ORDER";

/// Ledger reference type for releases on cancellation or compensation.
pub const CANCEL_REFERENCE: &str = "ORDER_CANCEL";
