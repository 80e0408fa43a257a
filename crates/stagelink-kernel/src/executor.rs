//! [`CommandExecutor`] – the single path from a decoded [`Command`] to the
//! stage controller.
//!
//! Every motion command passes through, in order:
//!
//! 1. **Readiness**: no stage attached ⇒ `not initialized`, unless the
//!    executor runs in simulated mode, in which case bookkeeping is updated
//!    and success is reported without touching hardware.
//! 2. **Tuning**: optional acceleration/deceleration, clamped to the
//!    controller's [`MotionLimits`][stagelink_hal::MotionLimits].
//! 3. **Safety**: relative steps and scan ranges are checked against the
//!    [`SafetyEnvelope`] under the configured [`LimitPolicy`].
//! 4. **Dispatch**: the directive is issued and the call returns as soon as
//!    the controller accepts it.  Motion completion is never awaited.
//! 5. **Fault check**: latched faults are classified into [`FaultCounters`],
//!    cleared once, and reported as a hardware-fault error.
//!
//! All methods block on the stage mutex and on controller I/O; callers on an
//! async runtime must run them on a blocking worker.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use stagelink_hal::{MotionController, SharedStage, lock};
use stagelink_types::{
    Command, CommandError, CommandResult, FaultCategory, LinkError, MotionAction, MotionCommand,
    OutboundMessage,
};
use tracing::{debug, info, warn};

use crate::envelope::{LimitPolicy, SafetyEnvelope};
use crate::faults::FaultCounters;
use crate::position::SharedPosition;

/// Readings closer than this are the same position.
const SETTLE_TOLERANCE_MM: f64 = 1e-6;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Static executor settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorSettings {
    pub envelope: SafetyEnvelope,
    pub policy: LimitPolicy,
    /// Absolute position of the reference (home) switch.
    pub reference_mm: f64,
    /// Report simulated success when no stage is attached.
    pub simulate_without_stage: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            envelope: SafetyEnvelope::default(),
            policy: LimitPolicy::default(),
            reference_mm: 0.0,
            simulate_without_stage: false,
        }
    }
}

/// A successful command outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl Outcome {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// What the executor produced for one [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer to an inbound ping.
    Pong { echoed_timestamp: f64 },
    Done(Result<Outcome, CommandError>),
}

impl Reply {
    /// `true` when the command succeeded (pongs always do).
    pub fn is_success(&self) -> bool {
        !matches!(self, Reply::Done(Err(_)))
    }

    /// Build the outbound message answering this reply.
    pub fn into_message(self, station_id: &str, command_id: Option<String>) -> OutboundMessage {
        match self {
            Reply::Pong { echoed_timestamp } => OutboundMessage::Pong {
                station_id: station_id.to_string(),
                echoed_timestamp,
                timestamp: Utc::now(),
            },
            Reply::Done(Ok(outcome)) => {
                let result = CommandResult::success(station_id, command_id, outcome.message);
                OutboundMessage::CommandResult(match outcome.details {
                    Some(details) => result.with_details(details),
                    None => result,
                })
            }
            Reply::Done(Err(err)) => OutboundMessage::CommandResult(
                error_result(station_id, command_id, &err),
            ),
        }
    }
}

/// `CommandResult` for `err`, with the fault category attached for
/// hardware faults.
pub fn error_result(station_id: &str, command_id: Option<String>, err: &CommandError) -> CommandResult {
    let result = CommandResult::from_error(station_id, command_id, err);
    match err {
        CommandError::HardwareFault { category, .. } => {
            result.with_details(json!({ "faultCategory": category }))
        }
        _ => result,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CommandExecutor
// ────────────────────────────────────────────────────────────────────────────

/// Validates and dispatches commands to the stage.
///
/// Shared between the inbound loop and the routine slot behind an `Arc`.
pub struct CommandExecutor {
    stage: Option<SharedStage>,
    position: SharedPosition,
    faults: Arc<FaultCounters>,
    settings: ExecutorSettings,
    /// The move or homing directive still in flight, if any.
    commanded: Mutex<Option<PendingMove>>,
}

/// A dispatched move that telemetry has not yet seen come to rest.
#[derive(Debug, Clone, Copy)]
struct PendingMove {
    target_mm: f64,
    origin_mm: f64,
    last_seen: Option<f64>,
}

impl PendingMove {
    fn new(origin_mm: f64, target_mm: f64) -> Self {
        Self {
            target_mm,
            origin_mm,
            last_seen: None,
        }
    }
}

impl CommandExecutor {
    pub fn new(
        stage: Option<SharedStage>,
        position: SharedPosition,
        faults: Arc<FaultCounters>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            stage,
            position,
            faults,
            settings,
            commanded: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn position(&self) -> &SharedPosition {
        &self.position
    }

    /// Execute one decoded command.  Blocking.
    pub fn execute(&self, command: &Command) -> Reply {
        match command {
            Command::Ping { timestamp } => Reply::Pong {
                echoed_timestamp: *timestamp,
            },
            Command::Heartbeat => Reply::Done(Ok(Outcome::new("heartbeat acknowledged"))),
            Command::Motion(motion) => Reply::Done(self.execute_motion(motion)),
        }
    }

    /// Execute one motion command.  Blocking.
    ///
    /// # Errors
    ///
    /// - [`CommandError::NotReady`] – no initialised stage (and not simulating).
    /// - [`CommandError::SafetyLimit`] – rejected by the envelope.
    /// - [`CommandError::HardwareFault`] – the controller refused the
    ///   directive or latched a fault.
    pub fn execute_motion(&self, cmd: &MotionCommand) -> Result<Outcome, CommandError> {
        let verb = cmd.action.verb();
        let Some(stage) = &self.stage else {
            if self.settings.simulate_without_stage {
                return self.simulate(cmd);
            }
            return Err(CommandError::NotReady);
        };

        let mut stage = lock(stage);
        if !stage.is_ready() {
            return Err(CommandError::NotReady);
        }

        let outcome = match self.dispatch(&mut **stage, cmd) {
            Ok(outcome) => outcome,
            Err(Failure::Command(err)) => return Err(err),
            Err(Failure::Link(err)) => return Err(self.directive_failed(&mut **stage, verb, err)),
        };
        self.check_faults(&mut **stage, verb)?;
        debug!(verb, message = %outcome.message, "command accepted");
        Ok(outcome)
    }

    /// Feed one telemetry reading.
    ///
    /// A pending move ends when a reading reaches its target, or when two
    /// consecutive readings agree away from where the move started (the
    /// stage stopped short or overshot).  From then on relative steps are
    /// measured from the shared position again.
    pub fn observe(&self, observed_mm: f64) {
        let mut commanded = lock(&self.commanded);
        let Some(pending) = commanded.as_mut() else {
            return;
        };
        let same = |a: f64, b: f64| (a - b).abs() <= SETTLE_TOLERANCE_MM;
        let reached = same(observed_mm, pending.target_mm);
        let at_rest = pending.last_seen.is_some_and(|last| same(last, observed_mm))
            && !same(observed_mm, pending.origin_mm);
        if reached || at_rest {
            if !reached {
                info!(target_mm = pending.target_mm, observed_mm, "stage settled away from commanded target");
            }
            *commanded = None;
        } else {
            pending.last_seen = Some(observed_mm);
        }
    }

    /// `true` while a dispatched move has not been seen to settle.
    pub fn has_pending_move(&self) -> bool {
        lock(&self.commanded).is_some()
    }

    /// Position a new relative step is measured from: the pending target
    /// while a move is in flight, else the shared position.
    fn predicted_position(&self) -> f64 {
        lock(&self.commanded).map_or_else(|| self.position.value(), |pending| pending.target_mm)
    }

    fn dispatch(
        &self,
        stage: &mut dyn MotionController,
        cmd: &MotionCommand,
    ) -> Result<Outcome, Failure> {
        let limits = stage.limits();
        if let Some(accel) = cmd.acceleration {
            stage.set_acceleration(limits.acceleration.clamp(accel))?;
        }
        if let Some(decel) = cmd.deceleration {
            stage.set_deceleration(limits.deceleration.clamp(decel))?;
        }

        match &cmd.action {
            MotionAction::Move { step_mm } => {
                let from = self.predicted_position();
                let decision = self
                    .settings
                    .envelope
                    .check_step(from, *step_mm, self.settings.policy)
                    .inspect_err(|e| warn!(step_mm, from, error = %e, "move rejected by safety envelope"))?;
                if decision.clamped {
                    warn!(
                        requested_mm = decision.requested_mm,
                        applied_mm = decision.applied_mm,
                        "move clamped to safety envelope"
                    );
                }
                stage.step(decision.applied_mm)?;
                *lock(&self.commanded) = Some(PendingMove::new(from, decision.target_mm));
                if let Ok(actual) = stage.position() {
                    self.position.set(actual);
                }
                let outcome = Outcome::new(format!("moved {:+.6} mm", decision.applied_mm));
                Ok(if decision.clamped {
                    outcome.with_details(json!({
                        "clamped": true,
                        "requestedMm": decision.requested_mm,
                        "appliedMm": decision.applied_mm,
                        "targetMm": decision.target_mm,
                    }))
                } else {
                    outcome
                })
            }
            MotionAction::Home => {
                let origin = self.predicted_position();
                stage.move_to_reference()?;
                let reference = self.settings.reference_mm;
                *lock(&self.commanded) = Some(PendingMove::new(origin, reference));
                self.position.set(reference);
                Ok(Outcome::new(format!("homing to {reference} mm"))
                    .with_details(json!({ "referenceMm": reference })))
            }
            MotionAction::Stop => {
                stage.stop()?;
                *lock(&self.commanded) = None;
                Ok(Outcome::new("stopped"))
            }
            MotionAction::Scan { span_mm, cycles } => {
                let center = self.predicted_position();
                let (range, clipped) = self
                    .settings
                    .envelope
                    .scan_range(center, *span_mm)
                    .inspect_err(|e| warn!(center, span_mm, error = %e, "scan rejected by safety envelope"))?;
                if clipped {
                    warn!(start_mm = range.start_mm, end_mm = range.end_mm, "scan range clipped to safety envelope");
                }
                stage.start_scan(range, *cycles)?;
                *lock(&self.commanded) = None;
                Ok(Outcome::new(format!(
                    "scanning [{:.6}, {:.6}] mm x{cycles}",
                    range.start_mm, range.end_mm
                ))
                .with_details(json!({
                    "startMm": range.start_mm,
                    "endMm": range.end_mm,
                    "cycles": cycles,
                    "clamped": clipped,
                })))
            }
            MotionAction::SetSpeed(v) => {
                let applied = limits.speed.clamp(*v);
                stage.set_speed(applied)?;
                Ok(tuning_outcome("speed", *v, applied))
            }
            MotionAction::SetAccel(v) => {
                let applied = limits.acceleration.clamp(*v);
                stage.set_acceleration(applied)?;
                Ok(tuning_outcome("acceleration", *v, applied))
            }
            MotionAction::SetDecel(v) => {
                let applied = limits.deceleration.clamp(*v);
                stage.set_deceleration(applied)?;
                Ok(tuning_outcome("deceleration", *v, applied))
            }
        }
    }

    /// Bookkeeping-only execution for a station without a stage.
    fn simulate(&self, cmd: &MotionCommand) -> Result<Outcome, CommandError> {
        let verb = cmd.action.verb();
        match &cmd.action {
            MotionAction::Move { step_mm } => {
                let decision = self.settings.envelope.check_step(
                    self.predicted_position(),
                    *step_mm,
                    self.settings.policy,
                )?;
                self.position.set(decision.target_mm);
            }
            MotionAction::Home => self.position.set(self.settings.reference_mm),
            MotionAction::Scan { span_mm, .. } => {
                self.settings
                    .envelope
                    .scan_range(self.predicted_position(), *span_mm)?;
            }
            _ => {}
        }
        *lock(&self.commanded) = None;
        Ok(Outcome::new(format!("simulated {verb}")).with_details(json!({ "simulated": true })))
    }

    /// Poll latched faults after a directive; count, clear once and report.
    fn check_faults(&self, stage: &mut dyn MotionController, verb: &str) -> Result<(), CommandError> {
        let flags = match stage.fault_status() {
            Ok(flags) => flags,
            Err(err) => {
                warn!(verb, error = %err, "fault status read failed");
                return Ok(());
            }
        };
        if flags.is_empty() {
            return Ok(());
        }
        let categories = self.faults.record_flags(&flags);
        let details = flags
            .iter()
            .map(|f| format!("{}: {}", f.code, f.description))
            .collect::<Vec<_>>()
            .join("; ");
        let category = categories.first().copied().unwrap_or(FaultCategory::Other);
        warn!(verb, %category, %details, "controller latched fault");
        self.recover(stage);
        Err(CommandError::HardwareFault { category, details })
    }

    fn directive_failed(
        &self,
        stage: &mut dyn MotionController,
        verb: &str,
        err: LinkError,
    ) -> CommandError {
        let (category, details) = match err {
            LinkError::NotReady(_) => return CommandError::NotReady,
            LinkError::Transport(_)
            | LinkError::Refused(_)
            | LinkError::Timeout { .. }
            | LinkError::ChannelClosed => {
                (FaultCategory::Transport, err.to_string())
            }
            LinkError::HardwareFault { details, .. } => (FaultCategory::classify(&details), details),
            other => {
                let details = other.to_string();
                (FaultCategory::classify(&details), details)
            }
        };
        self.faults.record(category);
        warn!(verb, %category, %details, "directive refused by controller");
        self.recover(stage);
        CommandError::HardwareFault { category, details }
    }

    /// One-shot clear-fault attempt; the outcome is logged, never retried.
    fn recover(&self, stage: &mut dyn MotionController) {
        *lock(&self.commanded) = None;
        match stage.clear_faults() {
            Ok(()) => info!(stage = stage.id(), "faults cleared"),
            Err(e) => warn!(stage = stage.id(), error = %e, "clear faults failed"),
        }
    }
}

fn tuning_outcome(parameter: &str, requested: f64, applied: f64) -> Outcome {
    let outcome = Outcome::new(format!("{parameter} set to {applied}"));
    if requested == applied {
        outcome
    } else {
        outcome.with_details(json!({
            "clamped": true,
            "requested": requested,
            "applied": applied,
        }))
    }
}

/// Internal split between command-level refusals and controller errors.
enum Failure {
    Command(CommandError),
    Link(LinkError),
}

impl From<CommandError> for Failure {
    fn from(err: CommandError) -> Self {
        Failure::Command(err)
    }
}

impl From<LinkError> for Failure {
    fn from(err: LinkError) -> Self {
        Failure::Link(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagelink_hal::sim::{SimStage, SimStageHandle, StageCall};
    use stagelink_hal::{FaultFlag, MotionController};
    use stagelink_types::MotionRequest;

    fn executor_with(settings: ExecutorSettings) -> (CommandExecutor, SimStageHandle) {
        let mut stage = SimStage::new("x_stage");
        let handle = stage.handle();
        stage.initialize().unwrap();
        let shared: SharedStage = Arc::new(Mutex::new(Box::new(stage)));
        let exec = CommandExecutor::new(
            Some(shared),
            SharedPosition::default(),
            Arc::new(FaultCounters::new()),
            settings,
        );
        (exec, handle)
    }

    fn executor() -> (CommandExecutor, SimStageHandle) {
        executor_with(ExecutorSettings::default())
    }

    fn motion(req: MotionRequest) -> MotionCommand {
        MotionCommand::from_request(&req).unwrap()
    }

    fn mv(direction: &str, magnitude: f64, unit: &str) -> MotionCommand {
        motion(MotionRequest {
            verb: "move".into(),
            direction: Some(direction.into()),
            magnitude: Some(magnitude),
            unit: Some(unit.into()),
            ..Default::default()
        })
    }

    fn verb(v: &str) -> MotionCommand {
        motion(MotionRequest {
            verb: v.into(),
            ..Default::default()
        })
    }

    #[test]
    fn ping_is_answered_without_hardware() {
        let exec = CommandExecutor::new(
            None,
            SharedPosition::default(),
            Arc::new(FaultCounters::new()),
            ExecutorSettings::default(),
        );
        assert_eq!(
            exec.execute(&Command::Ping { timestamp: 12.5 }),
            Reply::Pong {
                echoed_timestamp: 12.5
            }
        );
        assert!(exec.execute(&Command::Heartbeat).is_success());
    }

    #[test]
    fn no_stage_is_not_ready() {
        let exec = CommandExecutor::new(
            None,
            SharedPosition::default(),
            Arc::new(FaultCounters::new()),
            ExecutorSettings::default(),
        );
        let err = exec.execute_motion(&verb("home")).unwrap_err();
        assert_eq!(err, CommandError::NotReady);
        assert_eq!(err.to_string(), "not initialized");
    }

    #[test]
    fn no_stage_simulated_mode_succeeds() {
        let exec = CommandExecutor::new(
            None,
            SharedPosition::default(),
            Arc::new(FaultCounters::new()),
            ExecutorSettings {
                simulate_without_stage: true,
                ..Default::default()
            },
        );
        let out = exec.execute_motion(&mv("right", 2.0, "mm")).unwrap();
        assert!(out.message.contains("simulated"));
        assert_eq!(exec.position().value(), 2.0);
        // The envelope still applies.
        assert!(exec.execute_motion(&mv("right", 100.0, "mm")).is_err());
    }

    #[test]
    fn uninitialized_stage_is_not_ready() {
        let stage: SharedStage = Arc::new(Mutex::new(Box::new(SimStage::new("x"))));
        let exec = CommandExecutor::new(
            Some(stage),
            SharedPosition::default(),
            Arc::new(FaultCounters::new()),
            ExecutorSettings::default(),
        );
        assert_eq!(
            exec.execute_motion(&verb("stop")).unwrap_err(),
            CommandError::NotReady
        );
    }

    #[test]
    fn micrometre_move_issues_canonical_step() {
        let (exec, handle) = executor();
        let out = exec.execute_motion(&mv("right", 5.0, "µm")).unwrap();
        assert!(out.details.is_none());
        match handle.motion_calls().as_slice() {
            [StageCall::Step(step)] => assert!((step - 0.005).abs() < 1e-12),
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[test]
    fn nanometre_move_near_edge_is_accepted_unmodified() {
        let (exec, handle) = executor();
        handle.set_position(29.5);
        exec.position().set(29.5);
        exec.execute_motion(&mv("left", 1_000_000.0, "nm")).unwrap();
        match handle.motion_calls().as_slice() {
            [StageCall::Step(step)] => assert!((step + 1.0).abs() < 1e-12),
            other => panic!("unexpected calls {other:?}"),
        }
        assert!((exec.position().value() - 28.5).abs() < 1e-12);
    }

    #[test]
    fn reject_policy_never_touches_hardware() {
        let (exec, handle) = executor();
        exec.position().set(29.5);
        let err = exec.execute_motion(&mv("right", 1.0, "mm")).unwrap_err();
        assert_eq!(err.kind(), "safety-limit");
        assert!(handle.motion_calls().is_empty());
    }

    #[test]
    fn clamp_policy_reports_clamped_step() {
        let (exec, handle) = executor_with(ExecutorSettings {
            policy: LimitPolicy::Clamp,
            ..Default::default()
        });
        handle.set_position(29.5);
        exec.position().set(29.5);
        let out = exec.execute_motion(&mv("right", 2.0, "mm")).unwrap();
        let details = out.details.unwrap();
        assert_eq!(details["clamped"], true);
        assert_eq!(details["requestedMm"], 2.0);
        assert_eq!(details["appliedMm"], 0.5);
        assert_eq!(handle.motion_calls(), vec![StageCall::Step(0.5)]);
    }

    #[test]
    fn consecutive_moves_accumulate_against_envelope() {
        let (exec, handle) = executor();
        for _ in 0..3 {
            exec.execute_motion(&mv("right", 10.0, "mm")).unwrap();
        }
        // 30 mm reached; the next step would exceed the envelope.
        assert!(exec.execute_motion(&mv("right", 0.1, "mm")).is_err());
        assert_eq!(handle.motion_calls().len(), 3);
    }

    #[test]
    fn no_directive_exceeds_envelope() {
        for policy in [LimitPolicy::Reject, LimitPolicy::Clamp] {
            let (exec, handle) = executor_with(ExecutorSettings {
                policy,
                ..Default::default()
            });
            let moves = [
                ("right", 25.0),
                ("right", 10.0),
                ("left", 70.0),
                ("left", 3.0),
                ("right", 0.25),
            ];
            for (dir, mag) in moves {
                let _ = exec.execute_motion(&mv(dir, mag, "mm"));
                assert!(
                    exec.settings().envelope.contains(handle.position()),
                    "{policy:?} drove stage to {}",
                    handle.position()
                );
            }
        }
    }

    #[test]
    fn home_twice_reports_same_reference() {
        let (exec, handle) = executor_with(ExecutorSettings {
            reference_mm: 1.25,
            ..Default::default()
        });
        exec.execute_motion(&mv("right", 4.0, "mm")).unwrap();
        let first = exec.execute_motion(&verb("home")).unwrap();
        let p1 = exec.position().value();
        let second = exec.execute_motion(&verb("home")).unwrap();
        let p2 = exec.position().value();
        assert_eq!(p1, 1.25);
        assert_eq!(p1, p2);
        assert_eq!(first.details, second.details);
        assert_eq!(
            handle
                .motion_calls()
                .iter()
                .filter(|c| **c == StageCall::MoveToReference)
                .count(),
            2
        );
    }

    #[test]
    fn stop_resets_commanded_target() {
        let (exec, handle) = executor();
        exec.execute_motion(&mv("right", 20.0, "mm")).unwrap();
        exec.execute_motion(&verb("stop")).unwrap();
        // The stage really stopped at 5 mm.
        handle.set_position(5.0);
        exec.position().set(5.0);
        exec.execute_motion(&mv("right", 20.0, "mm")).unwrap();
        assert!(handle.calls().contains(&StageCall::Stop));
    }

    #[test]
    fn pending_move_predicts_from_commanded_target() {
        let (exec, handle) = executor();
        exec.execute_motion(&mv("right", 20.0, "mm")).unwrap();
        // Still travelling: one reading on the way.
        handle.set_position(5.0);
        exec.position().set(5.0);
        exec.observe(5.0);
        assert!(exec.has_pending_move());
        // 20 + 15 leaves the envelope.
        let err = exec.execute_motion(&mv("right", 15.0, "mm")).unwrap_err();
        assert_eq!(err.kind(), "safety-limit");
    }

    #[test]
    fn settled_move_predicts_from_observed_position() {
        let (exec, handle) = executor();
        exec.execute_motion(&mv("right", 20.0, "mm")).unwrap();
        // The stage stalls at 10 mm and telemetry sees it stay there.
        handle.set_position(10.0);
        for _ in 0..2 {
            exec.position().set(10.0);
            exec.observe(10.0);
        }
        assert!(!exec.has_pending_move());
        exec.execute_motion(&mv("right", 15.0, "mm")).unwrap();
        assert!((handle.position() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn reaching_the_target_ends_the_pending_move() {
        let (exec, _handle) = executor();
        exec.execute_motion(&mv("right", 3.0, "mm")).unwrap();
        assert!(exec.has_pending_move());
        exec.observe(3.0);
        assert!(!exec.has_pending_move());
    }

    #[test]
    fn stage_that_has_not_started_stays_pending() {
        let (exec, _handle) = executor();
        exec.execute_motion(&mv("right", 3.0, "mm")).unwrap();
        exec.observe(0.0);
        exec.observe(0.0);
        assert!(exec.has_pending_move());
    }

    #[test]
    fn scan_range_is_centred_and_clipped() {
        let (exec, handle) = executor();
        exec.position().set(29.0);
        let req = MotionRequest {
            verb: "scan".into(),
            span: Some(4.0),
            cycles: Some(3),
            ..Default::default()
        };
        let out = exec.execute_motion(&motion(req)).unwrap();
        assert_eq!(out.details.unwrap()["clamped"], true);
        match handle.motion_calls().as_slice() {
            [StageCall::StartScan(range, 3)] => {
                assert_eq!(range.start_mm, 27.0);
                assert_eq!(range.end_mm, 30.0);
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[test]
    fn tuning_is_clamped_to_limits() {
        let (exec, handle) = executor();
        let req = MotionRequest {
            verb: "set-speed".into(),
            magnitude: Some(1000.0),
            ..Default::default()
        };
        let out = exec.execute_motion(&motion(req)).unwrap();
        assert_eq!(out.details.unwrap()["applied"], 50.0);
        assert!(handle.calls().contains(&StageCall::SetSpeed(50.0)));
    }

    #[test]
    fn accel_and_decel_applied_before_verb() {
        let (exec, handle) = executor();
        let req = MotionRequest {
            verb: "move".into(),
            direction: Some("left".into()),
            magnitude: Some(1.0),
            acceleration: Some(1e9),
            deceleration: Some(5.0),
            ..Default::default()
        };
        exec.execute_motion(&motion(req)).unwrap();
        let calls = handle.calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(
            tail,
            &[
                StageCall::SetAcceleration(500.0),
                StageCall::SetDeceleration(5.0),
                StageCall::Step(-1.0),
            ]
        );
    }

    #[test]
    fn latched_fault_is_counted_cleared_and_reported() {
        let (exec, handle) = executor();
        handle.fault_on_next_motion(FaultFlag::new("OVERTEMP", "motor winding hot"));
        let err = exec.execute_motion(&mv("right", 1.0, "mm")).unwrap_err();
        match &err {
            CommandError::HardwareFault { category, details } => {
                assert_eq!(*category, FaultCategory::Thermal);
                assert!(details.contains("OVERTEMP"));
            }
            other => panic!("expected hardware fault, got {other:?}"),
        }
        assert_eq!(exec.faults.get(FaultCategory::Thermal), 1);
        assert_eq!(
            handle.calls().iter().filter(|c| **c == StageCall::ClearFaults).count(),
            1
        );
        // Cleared: the next command succeeds.
        assert!(exec.execute_motion(&mv("right", 1.0, "mm")).is_ok());
    }

    #[test]
    fn hardware_fault_reply_carries_category() {
        let err = CommandError::HardwareFault {
            category: FaultCategory::Amplifier,
            details: "drive disabled".into(),
        };
        let msg = Reply::Done(Err(err)).into_message("st-1", Some("c7".into()));
        match msg {
            OutboundMessage::CommandResult(result) => {
                assert!(!result.is_success());
                assert_eq!(result.command_id.as_deref(), Some("c7"));
                assert_eq!(result.error_kind.as_deref(), Some("hardware-fault"));
                assert_eq!(result.details.unwrap()["faultCategory"], "amplifier");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pong_reply_becomes_pong_message() {
        let msg = Reply::Pong {
            echoed_timestamp: 3.0,
        }
        .into_message("st-1", None);
        assert!(matches!(msg, OutboundMessage::Pong { echoed_timestamp, .. } if echoed_timestamp == 3.0));
    }
}
