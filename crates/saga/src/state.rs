//! Persisted saga state for one order.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SagaStatus, SagaStep};

/// Progress record of the fulfillment saga for a single order.
///
/// Created once per order, mutated as steps complete or fail and never
/// deleted. `completed_steps` keeps execution order and holds each step at
/// most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaState {
    pub(crate) saga_id: String,
    pub(crate) order_id: OrderId,
    pub(crate) order_number: String,
    pub(crate) current_step: SagaStep,
    pub(crate) status: SagaStatus,
    pub(crate) completed_steps: Vec<SagaStep>,
    pub(crate) last_error_message: Option<String>,
    pub(crate) compensation_attempts: u32,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl SagaState {
    /// Creates a STARTED saga positioned at the first step.
    pub fn new(order_id: OrderId, order_number: impl Into<String>) -> Self {
        Self {
            saga_id: generate_saga_id(),
            order_id,
            order_number: order_number.into(),
            current_step: SagaStep::first(),
            status: SagaStatus::Started,
            completed_steps: Vec::new(),
            last_error_message: None,
            compensation_attempts: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn current_step(&self) -> SagaStep {
        self.current_step
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn completed_steps(&self) -> &[SagaStep] {
        &self.completed_steps
    }

    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error_message.as_deref()
    }

    pub fn compensation_attempts(&self) -> u32 {
        self.compensation_attempts
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Records the current step as completed and moves to the next one.
    ///
    /// The last step stays current; use [`SagaState::complete`] to finish.
    pub fn proceed_to_next_step(&mut self) {
        self.record(self.current_step);
        if let Some(next) = self.current_step.next() {
            self.current_step = next;
        }
    }

    /// Records the current step and marks the saga COMPLETED.
    pub fn complete(&mut self) {
        self.record(self.current_step);
        self.status = SagaStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Switches to COMPENSATING, remembering the triggering error.
    pub fn start_compensation(&mut self, error_message: impl Into<String>) {
        self.status = SagaStatus::Compensating;
        self.last_error_message = Some(error_message.into());
    }

    /// Marks the saga FAILED after compensation.
    pub fn mark_as_failed(&mut self, error_message: impl Into<String>) {
        self.finish(SagaStatus::Failed, error_message.into());
    }

    /// Marks the saga COMPENSATION_FAILED; an operator must take over.
    pub fn mark_as_compensation_failed(&mut self, error_message: impl Into<String>) {
        self.finish(SagaStatus::CompensationFailed, error_message.into());
    }

    /// Counts one failed compensation attempt and returns the new total.
    pub fn increment_compensation_attempts(&mut self) -> u32 {
        self.compensation_attempts += 1;
        self.compensation_attempts
    }

    /// Returns true if the step is in the completed list.
    pub fn is_step_completed(&self, step: SagaStep) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Returns true once the saga can no longer change.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn record(&mut self, step: SagaStep) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
    }

    fn finish(&mut self, status: SagaStatus, error_message: String) {
        self.status = status;
        self.last_error_message = Some(error_message);
        self.completed_at = Some(Utc::now());
    }
}

/// Generates a saga ID of the form `SAGA-XXXXXXXX`.
fn generate_saga_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("SAGA-{}", simple[..8].to_ascii_uppercase())
}
