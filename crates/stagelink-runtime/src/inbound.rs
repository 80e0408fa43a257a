//! Inbound loop: the channel's only reader.
//!
//! Decodes each inbound item, runs it through the executor and sends exactly
//! one reply: a `pong` for a ping, a `commandResult` for heartbeats and
//! commands.  Pongs are only recorded.  Malformed input is answered with a
//! validation error.
//! Routines are handed to the session's routine slot and run beside the loop.

use std::sync::Arc;
use std::time::Duration;

use stagelink_kernel::{Activity, Reply, error_result};
use stagelink_middleware::Incoming;
use stagelink_types::{
    Command, CommandError, FaultCategory, InboundMessage, LinkError, MotionAction,
    MotionCommand, MotionRequest, OutboundMessage,
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::link::DrainReason;
use crate::routine::{RoutinePlan, run_routine};
use crate::state::{SessionState, Station};

/// Validate every step up front so a routine never starts half-valid.
pub fn plan_routine(
    id: Option<String>,
    steps: &[MotionRequest],
    dwell_ms: u64,
) -> Result<RoutinePlan, CommandError> {
    if steps.is_empty() {
        return Err(CommandError::Validation("routine has no steps".to_string()));
    }
    let steps = steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            MotionCommand::from_request(step).map_err(|e| match e {
                CommandError::Validation(reason) => {
                    CommandError::Validation(format!("step {}: {reason}", index + 1))
                }
                other => other,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoutinePlan {
        id,
        steps,
        dwell: Duration::from_millis(dwell_ms),
    })
}

struct Inbound {
    station: Arc<Station>,
    session: Arc<SessionState>,
    routines: JoinSet<()>,
}

impl Inbound {
    async fn reply(&self, message: OutboundMessage) -> Result<(), LinkError> {
        match self.session.link.send(&message).await {
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "reply dropped");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn reject(&self, command_id: Option<String>, err: CommandError) -> Result<(), LinkError> {
        let result = error_result(self.station.station_id(), command_id, &err);
        self.reply(OutboundMessage::CommandResult(result)).await
    }

    /// Ping and heartbeat are answered from the message alone, without a
    /// worker hop.
    async fn fast_path(&self, command: Command) -> Result<(), LinkError> {
        self.session.record(Activity::Ping);
        let reply = self.station.executor.execute(&command);
        self.reply(reply.into_message(self.station.station_id(), None))
            .await
    }

    async fn execute(&self, command: Command, command_id: Option<String>) -> Result<(), LinkError> {
        let executor = Arc::clone(&self.station.executor);
        let reply = match self.station.pool.run(move || executor.execute(&command)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "command could not be dispatched");
                Reply::Done(Err(CommandError::HardwareFault {
                    category: FaultCategory::Other,
                    details: e.to_string(),
                }))
            }
        };
        if reply.is_success() {
            self.session.record(Activity::Command);
        }
        self.reply(reply.into_message(self.station.station_id(), command_id))
            .await
    }

    async fn handle(&mut self, incoming: Incoming) -> Result<(), LinkError> {
        let message = match incoming {
            Incoming::Message(message) => message,
            Incoming::Malformed(reason) => {
                warn!(%reason, "malformed inbound message");
                return self
                    .reject(None, CommandError::Validation(format!("malformed message: {reason}")))
                    .await;
            }
        };

        match message {
            InboundMessage::Ping { timestamp } => self.fast_path(Command::Ping { timestamp }).await,
            InboundMessage::Heartbeat => self.fast_path(Command::Heartbeat).await,
            InboundMessage::Pong { echoed_timestamp } => {
                debug!(echoed_timestamp, "pong received");
                self.session.record(Activity::Ping);
                Ok(())
            }
            InboundMessage::Command(request) => {
                let command_id = request.id.clone();
                match MotionCommand::from_request(&request) {
                    Ok(command) => {
                        if matches!(command.action, MotionAction::Stop) && self.session.routine.cancel() {
                            info!("stop received; cancelling routine");
                        }
                        self.execute(Command::Motion(command), command_id).await
                    }
                    Err(e) => {
                        debug!(verb = %request.verb, error = %e, "command rejected");
                        self.reject(command_id, e).await
                    }
                }
            }
            InboundMessage::Routine { id, steps, dwell_ms } => {
                let plan = match plan_routine(id.clone(), &steps, dwell_ms) {
                    Ok(plan) => plan,
                    Err(e) => return self.reject(id, e).await,
                };
                let guard = match self
                    .session
                    .routine
                    .try_start(self.session.link.cancel_token())
                {
                    Ok(guard) => guard,
                    Err(e) => return self.reject(id, e).await,
                };
                self.routines.spawn(run_routine(
                    Arc::clone(&self.station),
                    Arc::clone(&self.session),
                    guard,
                    plan,
                ));
                Ok(())
            }
        }
    }
}

/// Run until the session is cancelled, the peer closes, or the channel
/// fails.
///
/// # Errors
///
/// The transport error that ended the session.
pub async fn run(station: Arc<Station>, session: Arc<SessionState>) -> Result<(), LinkError> {
    let cancel = session.link.cancel_token().clone();
    let mut inbound = Inbound {
        station,
        session: Arc::clone(&session),
        routines: JoinSet::new(),
    };

    let outcome = loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            Some(_) = inbound.routines.join_next(), if !inbound.routines.is_empty() => continue,
            received = session.link.recv() => received,
        };
        match received {
            Ok(Some(incoming)) => {
                if let Err(e) = inbound.handle(incoming).await {
                    break Err(e);
                }
            }
            Ok(None) => {
                info!("operator closed the channel");
                session.link.trip(DrainReason::PeerClosed);
                break Ok(());
            }
            Err(e) => {
                warn!(error = %e, "receive failed");
                session.link.trip(DrainReason::Transport(e.to_string()));
                break Err(e);
            }
        }
    };

    // Give a cancelled routine the chance to exit at its step boundary; the
    // manager's bounded join covers a routine stuck in a hardware call.
    session.routine.cancel();
    while inbound.routines.join_next().await.is_some() {}
    debug!("inbound loop stopped");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(verb: &str) -> MotionRequest {
        MotionRequest {
            verb: verb.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn routine_steps_are_validated_up_front() {
        let bad = MotionRequest {
            verb: "move".to_string(),
            direction: Some("up".to_string()),
            magnitude: Some(1.0),
            ..Default::default()
        };
        let err = plan_routine(None, &[step("home"), bad], 0).unwrap_err();
        match err {
            CommandError::Validation(reason) => assert!(reason.starts_with("step 2:")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_routine_is_rejected() {
        assert!(matches!(
            plan_routine(Some("r".into()), &[], 100),
            Err(CommandError::Validation(_))
        ));
    }

    #[test]
    fn valid_routine_keeps_order_and_dwell() {
        let plan = plan_routine(Some("r-1".into()), &[step("home"), step("stop")], 250).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].action, MotionAction::Home);
        assert_eq!(plan.dwell, Duration::from_millis(250));
    }
}
