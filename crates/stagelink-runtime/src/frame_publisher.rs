//! Frame Publisher: capture, encode and send camera frames.
//!
//! One frame is in flight at a time.  Each iteration:
//!
//! 1. feed the time since the previous capture was dispatched to the
//!    [`RateController`] and sleep whatever it asks for,
//! 2. on a blocking worker: flush stale frames if the backlog is severe,
//!    capture one frame, read the shared position, encode,
//! 3. send it with the link's timeout and record frame activity,
//! 4. yield.
//!
//! Capture and encode errors are logged and retried on the next tick.  A
//! transport error ends the loop; the link has already tripped the session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use stagelink_hal::{FrameEncoder, SharedCamera, lock};
use stagelink_kernel::{Activity, SharedPosition};
use stagelink_types::{FrameMessage, LinkError, OutboundMessage};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::rate_control::RateController;
use crate::state::{SessionState, Station};

/// Result of one trip to the camera.
enum Grab {
    /// Camera present but not ready.
    NotReady,
    Frame {
        bytes: Vec<u8>,
        captured_at: DateTime<Utc>,
        position: f64,
    },
}

fn grab(
    camera: &SharedCamera,
    encoder: &dyn FrameEncoder,
    position: &SharedPosition,
    flush: u32,
    quality: u8,
) -> Result<Grab, LinkError> {
    let mut camera = lock(camera);
    if !camera.is_ready() {
        return Ok(Grab::NotReady);
    }
    for _ in 0..flush {
        if let Err(e) = camera.capture() {
            debug!(error = %e, "flush capture failed");
            break;
        }
    }
    let raw = camera.capture()?;
    let captured_at = Utc::now();
    let position = position.value();
    drop(camera);

    let bytes = encoder.encode(&raw, quality)?;
    Ok(Grab::Frame {
        bytes,
        captured_at,
        position,
    })
}

/// Run until the session is cancelled or the channel fails.
///
/// # Errors
///
/// The transport error that ended the session.
pub async fn run(station: Arc<Station>, session: Arc<SessionState>) -> Result<(), LinkError> {
    let cancel = session.link.cancel_token().clone();
    let Some(camera) = station.rig.camera().cloned() else {
        info!("no camera attached; frame publisher idle");
        session.set_tracked(Activity::Frame, false);
        cancel.cancelled().await;
        return Ok(());
    };

    let frames = &station.config.frames;
    let mut rate = RateController::new(frames);
    let mut sequence: u64 = 0;
    let mut last_capture = Instant::now();

    loop {
        let decision = rate.tick(last_capture.elapsed());
        if !decision.sleep.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(decision.sleep) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        let job = {
            let camera = Arc::clone(&camera);
            let encoder = Arc::clone(station.rig.encoder());
            let position = station.position.clone();
            move || grab(&camera, encoder.as_ref(), &position, decision.flush_frames, decision.quality)
        };
        // Stamped at dispatch so slow capture or encode counts as lateness.
        last_capture = Instant::now();
        let grabbed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = station.pool.run(job) => result.and_then(|r| r),
        };

        match grabbed {
            Ok(Grab::NotReady) => {
                session.set_tracked(Activity::Frame, false);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(frames.max_sleep()) => {}
                }
                continue;
            }
            Ok(Grab::Frame {
                bytes,
                captured_at,
                position,
            }) => {
                session.set_tracked(Activity::Frame, true);
                sequence += 1;
                let message = OutboundMessage::Frame(FrameMessage {
                    station_id: station.station_id().to_string(),
                    sequence_number: sequence,
                    captured_at,
                    image_bytes: bytes,
                    quality: decision.quality,
                    position: Some(position),
                });
                match session.link.send(&message).await {
                    Ok(()) => session.record(Activity::Frame),
                    Err(e) if e.is_transport() => return Err(e),
                    Err(e) => warn!(sequence, error = %e, "frame dropped"),
                }
            }
            Err(e) => {
                warn!(error = %e, backlog = decision.backlog, "frame capture failed");
            }
        }

        tokio::task::yield_now().await;
    }

    debug!(frames_sent = sequence, "frame publisher stopped");
    Ok(())
}
