//! Run tracker: the ingestion run lifecycle.
//!
//! ```text
//! INITIALIZED ──start──▶ RUNNING ──complete──────▶ COMPLETED
//!      │                    ├──────partially_fail─▶ PARTIALLY_FAILED
//!      └────────fail────────┴──────fail───────────▶ FAILED
//! ```
//!
//! Transitions are checked against the state machine before anything is
//! persisted, so a terminal status is written exactly once.

use std::sync::Arc;

use state_machines::state_machine;

use crate::error::{IngestError, Result};
use crate::executor::RunOutcome;
use crate::models::{ErrorRecord, IngestionRun, RunStatus};
use crate::run_store::RunStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Start,
    Complete,
    Fail,
    PartiallyFail,
}

impl RunEvent {
    fn as_str(&self) -> &'static str {
        match self {
            RunEvent::Start => "start",
            RunEvent::Complete => "complete",
            RunEvent::Fail => "fail",
            RunEvent::PartiallyFail => "partially_fail",
        }
    }

    /// Event that ends a run in `status`.
    pub fn finishing(status: RunStatus) -> Option<Self> {
        match status {
            RunStatus::Completed => Some(RunEvent::Complete),
            RunStatus::Failed => Some(RunEvent::Fail),
            RunStatus::PartiallyFailed => Some(RunEvent::PartiallyFail),
            RunStatus::Initialized | RunStatus::Running => None,
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: RunLifecycleMachine,
        initial: Initialized,
        states: [Initialized, Running, Completed, Failed, PartiallyFailed],
        events {
            start {
                transition: { from: Initialized, to: Running }
            }
            complete {
                transition: { from: Running, to: Completed }
            }
            fail {
                transition: { from: Initialized, to: Failed }
                transition: { from: Running, to: Failed }
            }
            partially_fail {
                transition: { from: Running, to: PartiallyFailed }
            }
        }
    }

    pub(super) fn initialized() -> RunLifecycleMachine<(), Initialized> {
        RunLifecycleMachine::new(())
    }
}

fn invalid_transition(state: RunStatus, event: RunEvent) -> IngestError {
    IngestError::InvalidTransition {
        from: state.as_str().to_string(),
        event: event.as_str(),
    }
}

pub fn compute_next_state(state: RunStatus, event: RunEvent) -> Result<RunStatus> {
    use lifecycle::initialized;
    match (state, event) {
        (RunStatus::Initialized, RunEvent::Start) => initialized()
            .start()
            .map(|_| RunStatus::Running)
            .map_err(|_| invalid_transition(state, event)),
        (RunStatus::Initialized, RunEvent::Fail) => initialized()
            .fail()
            .map(|_| RunStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (RunStatus::Running, RunEvent::Complete) => initialized()
            .start()
            .map_err(|_| invalid_transition(state, event))?
            .complete()
            .map(|_| RunStatus::Completed)
            .map_err(|_| invalid_transition(state, event)),
        (RunStatus::Running, RunEvent::Fail) => initialized()
            .start()
            .map_err(|_| invalid_transition(state, event))?
            .fail()
            .map(|_| RunStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (RunStatus::Running, RunEvent::PartiallyFail) => initialized()
            .start()
            .map_err(|_| invalid_transition(state, event))?
            .partially_fail()
            .map(|_| RunStatus::PartiallyFailed)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

/// Final status from the merged batch outcome.
///
/// `document_failures` counts documents skipped for source or parser
/// errors. With `raise_error_on_failure` any failure fails the run; without
/// it, a run fails only when batches failed and none succeeded. A
/// cancelled run always fails.
pub fn aggregate_status(
    outcome: &RunOutcome,
    document_failures: usize,
    raise_error_on_failure: bool,
) -> RunStatus {
    let failed_units = outcome.failed_batches + document_failures;
    let cancelled = outcome.skipped_batches > 0 || outcome.completed_after_cancel > 0;
    if failed_units == 0 && !cancelled {
        RunStatus::Completed
    } else if raise_error_on_failure || cancelled {
        RunStatus::Failed
    } else if outcome.failed_batches > 0 && outcome.succeeded_batches == 0 {
        RunStatus::Failed
    } else {
        RunStatus::PartiallyFailed
    }
}

/// Drives one run record through its lifecycle.
pub struct RunTracker {
    store: Arc<dyn RunStore>,
    run_name: String,
    status: RunStatus,
}

impl RunTracker {
    pub fn new(store: Arc<dyn RunStore>, run: &IngestionRun) -> Self {
        Self {
            store,
            run_name: run.name.clone(),
            status: run.status,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Persist the transition only if the stored status is still the one
    /// this tracker last saw.
    async fn apply(&mut self, event: RunEvent) -> Result<RunStatus> {
        let next = compute_next_state(self.status, event)?;
        self.store
            .update_status(&self.run_name, self.status, next)
            .await?;
        tracing::info!(run = %self.run_name, from = %self.status, to = %next, "run status changed");
        self.status = next;
        Ok(next)
    }

    pub async fn start(&mut self) -> Result<()> {
        self.apply(RunEvent::Start).await.map(|_| ())
    }

    /// Move to a terminal status.
    pub async fn finish(&mut self, status: RunStatus) -> Result<()> {
        let event = RunEvent::finishing(status).ok_or_else(|| IngestError::InvalidTransition {
            from: self.status.as_str().to_string(),
            event: "finish",
        })?;
        self.apply(event).await.map(|_| ())
    }

    pub async fn record_errors(&self, errors: &[ErrorRecord]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        self.store.append_errors(&self.run_name, errors).await
    }
}
