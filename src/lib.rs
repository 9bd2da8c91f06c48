//! Bridge end-to-end delay measurement.
//!
//! Timestamped probe frames are injected on one interface and caught on another,
//! so the delay a bridge or switch adds can be measured against a single
//! monotonic clock. The sender and receiver run concurrently and only share the
//! [`stats::Statistics`] record.
//!
//! # Usage
//!
//! Send 1000 probes every millisecond from `veth0` and catch them on `veth1`:
//! ```bash
//! breed -i 1m -c 1k veth0 veth1
//! ```
//!
//! Keep fixed link addresses so the bridge can learn them:
//! ```bash
//! breed -s 02:00:00:00:00:02 -d 02:00:00:00:00:01 eth0 eth1
//! ```

/// Command-line configuration and validation.
pub mod configuration;
/// Probe frame layout and validation.
pub mod frame;
/// Receiver task.
pub mod receiver;
/// Optional realtime scheduling.
pub mod scheduling;
/// Sender loop.
pub mod sender;
/// Measurement session orchestration.
pub mod session;
/// Raw link-layer sockets.
pub mod socket;
/// Delay statistics and reporting.
pub mod stats;
/// Monotonic timestamps.
pub mod time;
