//! Supervised routine slot.
//!
//! A routine is a list of motion commands run one after another with a dwell
//! between them.  At most one runs per session: the slot is occupied from
//! [`RoutineSlot::try_start`] until the returned [`RoutineGuard`] drops, and a
//! second request in that window is answered with "already running".  A
//! `stop` command or session draining cancels the active routine at its next
//! step boundary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use stagelink_hal::lock;
use stagelink_kernel::{Activity, error_result};
use stagelink_types::{CommandError, CommandResult, FaultCategory, MotionCommand, OutboundMessage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::{SessionState, Station};

#[derive(Debug, Clone, Default)]
pub struct RoutineSlot {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

/// Holds the slot while a routine runs.
#[derive(Debug)]
pub struct RoutineGuard {
    active: Arc<Mutex<Option<CancellationToken>>>,
    token: CancellationToken,
}

impl RoutineGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RoutineGuard {
    fn drop(&mut self) {
        lock(&self.active).take();
    }
}

impl RoutineSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Claim the slot.  The routine token is a child of `parent`, so
    /// cancelling the session cancels the routine too.
    ///
    /// # Errors
    ///
    /// [`CommandError::AlreadyRunning`] while another routine holds the slot.
    pub fn try_start(&self, parent: &CancellationToken) -> Result<RoutineGuard, CommandError> {
        let mut active = lock(&self.active);
        if active.is_some() {
            return Err(CommandError::AlreadyRunning);
        }
        let token = parent.child_token();
        *active = Some(token.clone());
        Ok(RoutineGuard {
            active: Arc::clone(&self.active),
            token,
        })
    }

    /// Cancel the active routine, if any.  Returns `true` if one was running.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// One validated routine request.
#[derive(Debug, Clone)]
pub struct RoutinePlan {
    pub id: Option<String>,
    pub steps: Vec<MotionCommand>,
    pub dwell: Duration,
}

enum Ending {
    Completed,
    Failed(usize, CommandError),
    Cancelled(usize),
}

/// Run `plan` to completion, failure or cancellation, then send exactly one
/// command result.
pub async fn run_routine(
    station: Arc<Station>,
    session: Arc<SessionState>,
    guard: RoutineGuard,
    plan: RoutinePlan,
) {
    let total = plan.steps.len();
    info!(routine = ?plan.id, steps = total, "routine started");

    let mut ending = Ending::Completed;
    for (index, step) in plan.steps.into_iter().enumerate() {
        if guard.token().is_cancelled() {
            ending = Ending::Cancelled(index);
            break;
        }
        let executor = Arc::clone(&station.executor);
        let outcome = match station.pool.run(move || executor.execute_motion(&step)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "routine step could not be dispatched");
                Err(CommandError::HardwareFault {
                    category: FaultCategory::Other,
                    details: e.to_string(),
                })
            }
        };
        if let Err(e) = outcome {
            ending = Ending::Failed(index, e);
            break;
        }
        session.record(Activity::Command);

        if index + 1 < total && !plan.dwell.is_zero() {
            tokio::select! {
                _ = guard.token().cancelled() => {
                    ending = Ending::Cancelled(index + 1);
                    break;
                }
                _ = tokio::time::sleep(plan.dwell) => {}
            }
        }
    }

    let station_id = station.station_id();
    let result = match ending {
        Ending::Completed => {
            info!(routine = ?plan.id, steps = total, "routine completed");
            CommandResult::success(station_id, plan.id, format!("routine completed: {total} steps"))
                .with_details(json!({ "completedSteps": total, "totalSteps": total }))
        }
        Ending::Failed(index, err) => {
            warn!(routine = ?plan.id, step = index, error = %err, "routine failed");
            let mut result = error_result(station_id, plan.id, &err);
            result.message = format!("step {}: {}", index + 1, result.message);
            let mut details = result.details.take().unwrap_or_else(|| json!({}));
            details["completedSteps"] = json!(index);
            details["totalSteps"] = json!(total);
            result.with_details(details)
        }
        Ending::Cancelled(done) => {
            info!(routine = ?plan.id, completed = done, "routine cancelled");
            CommandResult::failure(station_id, plan.id, "cancelled", "routine cancelled")
                .with_details(json!({ "completedSteps": done, "totalSteps": total }))
        }
    };

    // Release the slot before reporting, so the operator may start the next
    // routine as soon as it sees this result.
    drop(guard);
    if let Err(e) = session.link.send(&OutboundMessage::CommandResult(result)).await {
        warn!(error = %e, "routine result not delivered");
    }
}
