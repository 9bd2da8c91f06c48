use std::{fmt, str::FromStr, time::Duration};

pub use clap::Parser;
use pnet::util::MacAddr;
use thiserror::Error;

use crate::stats::OutputFormat;

/// Longest interface name the kernel accepts (IFNAMSIZ minus the terminator).
const MAX_IFNAME_LEN: usize = 15;

/// Errors produced while turning command-line input into an [`EngineConfig`].
#[derive(Error, Debug, PartialEq)]
pub enum ConfigurationError {
    #[error("invalid number in '{0}'")]
    InvalidNumber(String),
    #[error("unrecognized suffix '{suffix}' in '{value}'")]
    UnknownSuffix { value: String, suffix: String },
    #[error("value '{0}' is too large")]
    Overflow(String),
    #[error("invalid link address '{0}', expected 'rand' or aa:bb:cc:dd:ee:ff")]
    InvalidLinkAddress(String),
    #[error("interface name '{0}' is empty or longer than 15 bytes")]
    InvalidInterface(String),
}

/// How a link-layer address of the probe is chosen.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LinkAddress {
    /// A fresh pseudo-random unicast address for every probe.
    Random,
    /// The same address on every probe.
    Fixed(MacAddr),
}

impl LinkAddress {
    pub fn is_random(&self) -> bool {
        matches!(self, LinkAddress::Random)
    }
}

impl FromStr for LinkAddress {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "rand" {
            return Ok(LinkAddress::Random);
        }
        MacAddr::from_str(s)
            .map(LinkAddress::Fixed)
            .map_err(|_| ConfigurationError::InvalidLinkAddress(s.to_string()))
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LinkAddress::Random => write!(f, "rand"),
            LinkAddress::Fixed(mac) => write!(f, "{}", mac),
        }
    }
}

/// Splits `value` into its leading decimal digits and whatever follows.
fn split_suffix(value: &str) -> Result<(u64, &str), ConfigurationError> {
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(digits_end);

    let number = digits
        .parse::<u64>()
        .map_err(|_| ConfigurationError::InvalidNumber(value.to_string()))?;

    Ok((number, suffix))
}

/// Parses a duration given as `<n>[u|m|s]`.
///
/// A bare number or `u` means microseconds, `m` milliseconds and `s` seconds.
///
/// ```
/// use std::time::Duration;
/// use bridge_eed::configuration::parse_interval;
/// assert_eq!(parse_interval("250").unwrap(), Duration::from_micros(250));
/// assert_eq!(parse_interval("10m").unwrap(), Duration::from_millis(10));
/// assert_eq!(parse_interval("2s").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_interval(value: &str) -> Result<Duration, ConfigurationError> {
    let (number, suffix) = split_suffix(value)?;

    let multiplier: u64 = match suffix {
        "" | "u" => 1,
        "m" => 1_000,
        "s" => 1_000_000,
        _ => {
            return Err(ConfigurationError::UnknownSuffix {
                value: value.to_string(),
                suffix: suffix.to_string(),
            })
        }
    };

    number
        .checked_mul(multiplier)
        .map(Duration::from_micros)
        .ok_or_else(|| ConfigurationError::Overflow(value.to_string()))
}

/// Parses a count given as `<n>[k|m|g]` (decimal SI multipliers).
pub fn parse_count(value: &str) -> Result<u64, ConfigurationError> {
    let (number, suffix) = split_suffix(value)?;

    let multiplier: u64 = match suffix {
        "" => 1,
        "k" => 1_000,
        "m" => 1_000_000,
        "g" => 1_000_000_000,
        _ => {
            return Err(ConfigurationError::UnknownSuffix {
                value: value.to_string(),
                suffix: suffix.to_string(),
            })
        }
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| ConfigurationError::Overflow(value.to_string()))
}

/// Measure the end-to-end delay of a bridge by sending timestamped probes out of
/// one interface and catching them on another.
#[derive(Parser, Debug)]
#[command(name = "breed", version, about, long_about = None)]
pub struct Configuration {
    /// Interface the probes are sent from
    pub ifout: String,
    /// Interface the probes are expected to arrive on
    pub ifin: String,
    /// Print the delay of every received probe
    #[arg(short, long)]
    pub verbose: bool,
    /// Interval between probes: <n> or <n>u for microseconds, <n>m for milliseconds, <n>s for seconds
    #[arg(short, long, default_value = "1s", value_parser = parse_interval)]
    pub interval: Duration,
    /// Number of probes to send, 0 for no limit; accepts k, m and g suffixes
    #[arg(short, long, default_value = "0", value_parser = parse_count)]
    pub count: u64,
    /// Source link address: 'rand' for a new random address per probe, or a fixed MAC
    #[arg(short, long, default_value = "rand")]
    pub source: LinkAddress,
    /// Destination link address: 'rand' for a new random address per probe, or a fixed MAC
    #[arg(short, long, default_value = "rand")]
    pub destination: LinkAddress,
    /// Time to keep listening for late probes after the last one is sent
    #[arg(long, default_value = "0", value_parser = parse_interval)]
    pub drain: Duration,
    /// Request SCHED_FIFO at maximum priority and nice -19 before measuring
    #[arg(long)]
    pub realtime: bool,
    /// Output format for the final report
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,
}

impl Configuration {
    /// Checks what the argument parsers cannot see on their own.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for name in [&self.ifout, &self.ifin] {
            if name.is_empty() || name.len() > MAX_IFNAME_LEN {
                return Err(ConfigurationError::InvalidInterface(name.clone()));
            }
        }
        Ok(())
    }

    /// Extracts the settings the measurement engine runs with.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            interval: self.interval,
            count: self.count,
            source: self.source,
            destination: self.destination,
            verbose: self.verbose,
        }
    }
}

/// Settings shared by the sender and receiver, fixed for the whole run.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Pause between two consecutive probes.
    pub interval: Duration,
    /// Number of transmission attempts, 0 for unbounded.
    pub count: u64,
    pub source: LinkAddress,
    pub destination: LinkAddress,
    /// Report every received probe as it arrives.
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval_suffixes() {
        assert_eq!(parse_interval("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_interval("100").unwrap(), Duration::from_micros(100));
        assert_eq!(parse_interval("100u").unwrap(), Duration::from_micros(100));
        assert_eq!(parse_interval("5m").unwrap(), Duration::from_micros(5_000));
        assert_eq!(parse_interval("3s").unwrap(), Duration::from_micros(3_000_000));
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert!(matches!(
            parse_interval("10h"),
            Err(ConfigurationError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            parse_interval("ms"),
            Err(ConfigurationError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_interval("10ms"),
            Err(ConfigurationError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            parse_interval("-1"),
            Err(ConfigurationError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_parse_count_suffixes() {
        assert_eq!(parse_count("0").unwrap(), 0);
        assert_eq!(parse_count("7").unwrap(), 7);
        assert_eq!(parse_count("2k").unwrap(), 2_000);
        assert_eq!(parse_count("3m").unwrap(), 3_000_000);
        assert_eq!(parse_count("1g").unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_parse_count_errors() {
        assert!(matches!(
            parse_count("5x"),
            Err(ConfigurationError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            parse_count("18446744073709551615k"),
            Err(ConfigurationError::Overflow(_))
        ));
        assert!(matches!(parse_count(""), Err(ConfigurationError::InvalidNumber(_))));
    }

    #[test]
    fn test_link_address_parse() {
        assert_eq!("rand".parse::<LinkAddress>().unwrap(), LinkAddress::Random);
        assert_eq!(
            "02:00:00:00:00:0a".parse::<LinkAddress>().unwrap(),
            LinkAddress::Fixed(MacAddr::new(2, 0, 0, 0, 0, 0x0a))
        );
        assert!(matches!(
            "02:00:00".parse::<LinkAddress>(),
            Err(ConfigurationError::InvalidLinkAddress(_))
        ));
        assert!(matches!(
            "random".parse::<LinkAddress>(),
            Err(ConfigurationError::InvalidLinkAddress(_))
        ));
    }

    #[test]
    fn test_cli_defaults() {
        let conf = Configuration::try_parse_from(["breed", "eth0", "eth1"]).unwrap();
        assert_eq!(conf.ifout, "eth0");
        assert_eq!(conf.ifin, "eth1");
        assert_eq!(conf.interval, Duration::from_secs(1));
        assert_eq!(conf.count, 0);
        assert!(conf.source.is_random());
        assert!(conf.destination.is_random());
        assert_eq!(conf.drain, Duration::ZERO);
        assert!(!conf.verbose);
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_cli_full() {
        let conf = Configuration::try_parse_from([
            "breed",
            "-v",
            "-i",
            "500u",
            "-c",
            "10k",
            "-s",
            "02:00:00:00:00:02",
            "-d",
            "rand",
            "--drain",
            "1s",
            "eth0",
            "eth1",
        ])
        .unwrap();

        let engine = conf.engine_config();
        assert_eq!(engine.interval, Duration::from_micros(500));
        assert_eq!(engine.count, 10_000);
        assert_eq!(
            engine.source,
            LinkAddress::Fixed(MacAddr::new(2, 0, 0, 0, 0, 2))
        );
        assert_eq!(engine.destination, LinkAddress::Random);
        assert!(engine.verbose);
        assert_eq!(conf.drain, Duration::from_secs(1));
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        assert!(Configuration::try_parse_from(["breed", "-i", "5x", "a", "b"]).is_err());
        assert!(Configuration::try_parse_from(["breed", "-s", "zz", "a", "b"]).is_err());
        assert!(Configuration::try_parse_from(["breed", "only-one"]).is_err());
    }

    #[test]
    fn test_validate_interface_names() {
        let conf =
            Configuration::try_parse_from(["breed", "a-very-long-interface-name", "eth1"]).unwrap();
        assert_eq!(
            conf.validate(),
            Err(ConfigurationError::InvalidInterface(
                "a-very-long-interface-name".to_string()
            ))
        );
    }
}
