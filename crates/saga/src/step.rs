//! Saga steps and their ordering.

use serde::{Deserialize, Serialize};

/// One step of the order fulfillment saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    ReserveInventory,
    ProcessPayment,
    DeductInventory,
    CreateDelivery,
    ConfirmOrder,
}

/// Execution order of the saga. Position in this table defines sequence,
/// next and previous.
pub const STEP_ORDER: [SagaStep; 5] = [
    SagaStep::ReserveInventory,
    SagaStep::ProcessPayment,
    SagaStep::DeductInventory,
    SagaStep::CreateDelivery,
    SagaStep::ConfirmOrder,
];

impl SagaStep {
    /// Returns the first step of the saga.
    pub fn first() -> Self {
        STEP_ORDER[0]
    }

    /// Returns the 1-based position of the step.
    pub fn sequence(&self) -> usize {
        self.index() + 1
    }

    /// Returns the step that follows this one, if any.
    pub fn next(&self) -> Option<SagaStep> {
        STEP_ORDER.get(self.index() + 1).copied()
    }

    /// Returns the step that precedes this one, if any.
    pub fn previous(&self) -> Option<SagaStep> {
        self.index().checked_sub(1).map(|i| STEP_ORDER[i])
    }

    /// Returns true if the step has a compensating action.
    ///
    /// Once CONFIRM_ORDER is reached the saga is irreversible.
    pub fn is_compensatable(&self) -> bool {
        !matches!(self, SagaStep::ConfirmOrder)
    }

    /// Returns a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            SagaStep::ReserveInventory => "Reserve inventory",
            SagaStep::ProcessPayment => "Process payment",
            SagaStep::DeductInventory => "Deduct inventory",
            SagaStep::CreateDelivery => "Create delivery",
            SagaStep::ConfirmOrder => "Confirm order",
        }
    }

    /// Returns the stored name of the step.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::ReserveInventory => "RESERVE_INVENTORY",
            SagaStep::ProcessPayment => "PROCESS_PAYMENT",
            SagaStep::DeductInventory => "DEDUCT_INVENTORY",
            SagaStep::CreateDelivery => "CREATE_DELIVERY",
            SagaStep::ConfirmOrder => "CONFIRM_ORDER",
        }
    }

    /// Parses a stored step name.
    pub fn parse(value: &str) -> Option<Self> {
        STEP_ORDER.iter().copied().find(|s| s.as_str() == value)
    }

    fn index(&self) -> usize {
        match self {
            SagaStep::ReserveInventory => 0,
            SagaStep::ProcessPayment => 1,
            SagaStep::DeductInventory => 2,
            SagaStep::CreateDelivery => 3,
            SagaStep::ConfirmOrder => 4,
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
