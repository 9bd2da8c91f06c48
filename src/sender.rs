use std::{io, time::Duration};

use rand::{rngs::SmallRng, SeedableRng};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    configuration::EngineConfig,
    frame::Frame,
    socket::FrameSink,
    stats::Statistics,
    time::{monotonic_now, Timestamp},
};

/// Intervals shorter than this are paced by yielding instead of the timer wheel,
/// whose resolution is one millisecond.
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// Runs the sender loop until `conf.count` probes were attempted or `cancel` fires.
///
/// Each probe gets fresh random link addresses (when configured), is stamped with
/// the monotonic clock right before transmission and is followed by a pause of
/// `conf.interval`. A failed transmit is logged and not counted as sent; it still
/// uses up one of the `conf.count` attempts.
pub async fn run_sender<S: FrameSink>(
    sink: &S,
    conf: &EngineConfig,
    stats: &Statistics,
    cancel: &CancellationToken,
) {
    let start = monotonic_now().unwrap_or_default();
    let mut rng = SmallRng::seed_from_u64(start.secs.rotate_left(32) ^ start.nanos);
    let mut frame = Frame::template(conf, start);

    log::info!(
        "Sending {} probes every {:?} (source {}, destination {})",
        if conf.count == 0 {
            "unlimited".to_string()
        } else {
            conf.count.to_string()
        },
        conf.interval,
        conf.source,
        conf.destination
    );

    let mut attempts: u64 = 0;
    while conf.count == 0 || attempts < conf.count {
        if cancel.is_cancelled() {
            break;
        }
        attempts += 1;

        frame.randomize_addresses(conf, &mut rng);
        match transmit(sink, &mut frame).await {
            Ok(()) => stats.record_sent(),
            Err(e) => log::warn!("Failed to send probe {}: {}", attempts, e),
        }

        if !pace(conf.interval, cancel).await {
            break;
        }
    }

    log::info!(
        "Sender finished after {} attempts, {} sent",
        attempts,
        stats.sent()
    );
}

/// Hands `frame` to the sink, stamping it only once the sink is ready to send.
async fn transmit<S: FrameSink>(sink: &S, frame: &mut Frame) -> io::Result<()> {
    sink.send_frame_with(|| {
        let now: Timestamp = monotonic_now()?;
        frame.stamp(now);
        Ok(frame.to_bytes())
    })
    .await?;
    Ok(())
}

/// Waits for `interval`, returning `false` if cancelled meanwhile.
async fn pace(interval: Duration, cancel: &CancellationToken) -> bool {
    if interval >= TIMER_RESOLUTION {
        return tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(interval) => true,
        };
    }

    // Yield at least once so the receiver is never starved, even at interval 0.
    let deadline = Instant::now() + interval;
    loop {
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return false;
        }
        if Instant::now() >= deadline {
            return true;
        }
    }
}
