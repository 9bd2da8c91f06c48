//! Delay statistics shared between the sender and receiver, and the final report.
//!
//! Every counter has exactly one writer: `sent` belongs to the sender loop, all
//! delay counters belong to the receiver task. Atomics keep the record `Sync` so
//! it can live in an `Arc`; the report is only taken once both writers are done.

use std::sync::atomic::{AtomicU64, Ordering};

/// Output format for the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The classic two-line summary.
    #[default]
    Text,
    /// A single JSON object for machine consumption.
    Json,
}

/// Running counters of a measurement session.
#[derive(Debug)]
pub struct Statistics {
    sent: AtomicU64,
    received: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
    sum_ns: AtomicU64,
    anomalies: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
        }
    }

    /// Counts one probe handed to the egress socket.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds one end-to-end delay sample into the counters.
    pub fn record_delay(&self, elapsed_ns: u64) {
        self.min_ns.fetch_min(elapsed_ns, Ordering::Relaxed);
        self.max_ns.fetch_max(elapsed_ns, Ordering::Relaxed);
        self.sum_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a valid probe whose timestamp lies in the future.
    pub fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Takes a snapshot of the counters.
    pub fn report(&self) -> Report {
        let received = self.received();
        Report {
            sent: self.sent(),
            received,
            min_ns: if received > 0 {
                self.min_ns.load(Ordering::Relaxed)
            } else {
                0
            },
            max_ns: self.max_ns.load(Ordering::Relaxed),
            sum_ns: self.sum_ns.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay extrema and mean in whole microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySummary {
    pub min_us: u64,
    pub avg_us: u64,
    pub max_us: u64,
}

/// Final counters of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub sent: u64,
    pub received: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub sum_ns: u64,
    pub anomalies: u64,
}

impl Report {
    /// Percentage of sent probes that never arrived, 100 when nothing was sent.
    pub fn loss_percent(&self) -> u64 {
        if self.sent == 0 {
            return 100;
        }
        self.sent.saturating_sub(self.received) * 100 / self.sent
    }

    /// Delay summary, or `None` when no probe was received.
    pub fn delay(&self) -> Option<DelaySummary> {
        if self.received == 0 {
            return None;
        }
        Some(DelaySummary {
            min_us: self.min_ns / 1000,
            avg_us: self.sum_ns / (self.received * 1000),
            max_us: self.max_ns / 1000,
        })
    }

    /// The text report, one entry per output line.
    pub fn text_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} packets transmitted, {} received, {}% packet loss",
            self.sent,
            self.received,
            self.loss_percent()
        )];
        if let Some(d) = self.delay() {
            lines.push(format!(
                "eed min/avg/max = {}/{}/{} us",
                d.min_us, d.avg_us, d.max_us
            ));
        }
        lines
    }

    /// The report as a single JSON object; delay fields are `null` when nothing
    /// was received.
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(serde::Serialize)]
        struct JsonOutput {
            transmitted: u64,
            received: u64,
            loss_percent: u64,
            anomalies: u64,
            min_us: Option<u64>,
            avg_us: Option<u64>,
            max_us: Option<u64>,
        }

        let delay = self.delay();
        serde_json::to_string(&JsonOutput {
            transmitted: self.sent,
            received: self.received,
            loss_percent: self.loss_percent(),
            anomalies: self.anomalies,
            min_us: delay.map(|d| d.min_us),
            avg_us: delay.map(|d| d.avg_us),
            max_us: delay.map(|d| d.max_us),
        })
    }

    /// Prints the report in the given format.
    pub fn print(&self, format: OutputFormat) {
        match format {
            OutputFormat::Text => {
                for line in self.text_lines() {
                    println!("{}", line);
                }
            }
            OutputFormat::Json => match self.to_json() {
                Ok(json) => println!("{}", json),
                Err(e) => log::error!("Cannot serialize report: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_statistics() {
        let stats = Statistics::new();
        let report = stats.report();
        assert_eq!(report.sent, 0);
        assert_eq!(report.received, 0);
        assert_eq!(report.loss_percent(), 100);
        assert!(report.delay().is_none());
    }

    #[test]
    fn test_loss_accounting() {
        let stats = Statistics::new();
        for _ in 0..10 {
            stats.record_sent();
        }
        for _ in 0..7 {
            stats.record_delay(1_000);
        }
        assert_eq!(stats.report().loss_percent(), 30);
    }

    #[test]
    fn test_loss_never_underflows() {
        let report = Report {
            sent: 2,
            received: 3,
            min_ns: 0,
            max_ns: 0,
            sum_ns: 0,
            anomalies: 0,
        };
        assert_eq!(report.loss_percent(), 0);
    }

    #[test]
    fn test_delay_aggregation() {
        let stats = Statistics::new();
        for us in [50u64, 10, 999, 10] {
            stats.record_delay(us * 1000);
        }

        let report = stats.report();
        assert_eq!(report.received, 4);
        assert_eq!(report.min_ns, 10_000);
        assert_eq!(report.max_ns, 999_000);
        assert_eq!(report.sum_ns, 1_069_000);
        assert_eq!(
            report.delay(),
            Some(DelaySummary {
                min_us: 10,
                avg_us: 267,
                max_us: 999
            })
        );
    }

    #[test]
    fn test_text_report_lines() {
        let stats = Statistics::new();
        for _ in 0..4 {
            stats.record_sent();
        }
        for us in [50u64, 10, 999, 10] {
            stats.record_delay(us * 1000);
        }

        assert_eq!(
            stats.report().text_lines(),
            vec![
                "4 packets transmitted, 4 received, 0% packet loss".to_string(),
                "eed min/avg/max = 10/267/999 us".to_string(),
            ]
        );
    }

    #[test]
    fn test_text_report_omits_delay_without_receipts() {
        let stats = Statistics::new();
        for _ in 0..5 {
            stats.record_sent();
        }

        let lines = stats.report().text_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], "5 packets transmitted, 0 received, 100% packet loss");
    }

    #[test]
    fn test_json_report() {
        let stats = Statistics::new();
        stats.record_sent();
        stats.record_sent();
        stats.record_delay(2_000);
        stats.record_anomaly();

        let json = stats.report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["transmitted"], 2);
        assert_eq!(value["received"], 1);
        assert_eq!(value["loss_percent"], 50);
        assert_eq!(value["anomalies"], 1);
        assert_eq!(value["min_us"], 2);
        assert_eq!(value["avg_us"], 2);
        assert_eq!(value["max_us"], 2);
    }

    #[test]
    fn test_json_report_without_receipts() {
        let stats = Statistics::new();
        let json = stats.report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["loss_percent"], 100);
        for key in ["min_us", "avg_us", "max_us"] {
            assert!(value[key].is_null(), "{} should be null", key);
            assert!(value.get(key).is_some(), "{} should be present", key);
        }
    }

    #[test]
    fn test_anomalies_do_not_touch_delay() {
        let stats = Statistics::new();
        stats.record_anomaly();
        let report = stats.report();
        assert_eq!(report.anomalies, 1);
        assert_eq!(report.received, 0);
        assert!(report.delay().is_none());
    }
}
