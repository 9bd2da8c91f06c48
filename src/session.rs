//! One measurement session: sender and receiver run concurrently over a link,
//! followed by an optional drain and an orderly shutdown.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    configuration::EngineConfig,
    receiver, sender,
    socket::{FrameSink, FrameSource},
    stats::{Report, Statistics},
};

/// Runs a complete session and returns its final counters.
///
/// The receiver is spawned first, then probes are sent until `engine.count` is
/// reached or `interrupt` fires. Late probes are awaited for `drain` unless the
/// session was interrupted. The receiver is always stopped and joined before the
/// counters are read, so the report is final.
pub async fn run_session<S, R>(
    sink: &S,
    source: R,
    engine: &EngineConfig,
    drain: Duration,
    interrupt: &CancellationToken,
) -> Report
where
    S: FrameSink,
    R: FrameSource + 'static,
{
    let stats = Arc::new(Statistics::new());
    let stop_receiving = CancellationToken::new();

    let receiver = receiver::spawn_receiver(
        source,
        Arc::clone(&stats),
        engine.verbose,
        stop_receiving.clone(),
    );

    sender::run_sender(sink, engine, &stats, interrupt).await;

    if !interrupt.is_cancelled() && !drain.is_zero() {
        log::debug!("Waiting {:?} for late probes", drain);
        tokio::select! {
            _ = interrupt.cancelled() => {}
            _ = tokio::time::sleep(drain) => {}
        }
    }

    stop_receiving.cancel();
    if let Err(e) = receiver.await {
        log::error!("Receiver task failed: {}", e);
    }

    let report = stats.report();
    if report.anomalies > 0 {
        log::warn!(
            "{} probes carried a timestamp later than their arrival",
            report.anomalies
        );
    }
    report
}
