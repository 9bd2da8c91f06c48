//! The receiver task: drains the ingress socket and times every probe that arrives.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    frame::{parse_and_validate, FRAME_LEN},
    socket::FrameSource,
    stats::Statistics,
    time::monotonic_now,
};

/// Receive buffer size; anything longer than a probe is rejected by its length
/// anyway, one spare byte is enough to see that.
const RECV_BUF_LEN: usize = FRAME_LEN + 1;

/// What happened to a single received datagram.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Observation {
    /// A probe with its end-to-end delay in nanoseconds.
    Delay(u64),
    /// A probe stamped after it was received.
    Anomaly,
    /// Anything that is not a probe.
    Foreign,
}

/// Validates `datagram` and, for probes, folds the delay into `stats`.
///
/// `len` is the real length of the datagram as reported by the socket and may be
/// larger than `datagram` when the frame was truncated.
pub fn observe(datagram: &[u8], len: usize, stats: &Statistics) -> Observation {
    if len != datagram.len() {
        return Observation::Foreign;
    }
    let Some(frame) = parse_and_validate(datagram) else {
        return Observation::Foreign;
    };

    let elapsed = monotonic_now()
        .ok()
        .and_then(|now| now.nanos_since(&frame.timestamp));

    match elapsed {
        Some(ns) => {
            stats.record_delay(ns);
            Observation::Delay(ns)
        }
        None => {
            stats.record_anomaly();
            Observation::Anomaly
        }
    }
}

/// Receives until `cancel` fires, folding every probe into `stats`.
pub async fn run_receiver<R: FrameSource>(
    source: &mut R,
    stats: &Statistics,
    verbose: bool,
    cancel: &CancellationToken,
) {
    let mut buf = [0u8; RECV_BUF_LEN];

    loop {
        let len = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.recv_frame(&mut buf) => match result {
                Ok(len) => len,
                Err(e) => {
                    log::debug!("Receive error: {}", e);
                    continue;
                }
            },
        };

        let datagram = &buf[..len.min(RECV_BUF_LEN)];
        match observe(datagram, len, stats) {
            Observation::Delay(ns) => {
                if verbose {
                    println!("eed: {} us", ns / 1000);
                }
            }
            Observation::Anomaly => {
                log::debug!("Discarded probe with a timestamp in the future");
            }
            Observation::Foreign => {
                log::trace!("Ignored {} byte frame", len);
            }
        }
    }

    log::debug!("Receiver stopped after {} probes", stats.received());
}

/// Spawns [`run_receiver`] as a background task owning its socket.
///
/// Cancel the token and await the handle before reading the final statistics.
pub fn spawn_receiver<R>(
    mut source: R,
    stats: Arc<Statistics>,
    verbose: bool,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: FrameSource + 'static,
{
    tokio::spawn(async move { run_receiver(&mut source, &stats, verbose, &cancel).await })
}
