use bully_api::{NodeId, PeerDirectory};
use bullyd::{ConfigError, Parameters, Timeouts};
use clap::Parser;
use std::net::IpAddr;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug, Clone)]
pub struct Opts {
    /// Identity of this process, in `1..=max-id`
    #[clap(env = "BULLY_ID")]
    pub id: u8,

    /// Highest identity in the cluster
    #[clap(long = "max-id", env = "BULLY_MAX_ID", default_value = "5")]
    pub max_id: u8,

    /// Process `i` listens on `base-port + i`
    #[clap(long = "base-port", env = "BULLY_BASE_PORT", default_value = "5000")]
    pub base_port: u16,

    #[clap(long = "host", env = "BULLY_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Unit all protocol timeouts are multiples of
    #[clap(long = "time-unit", env = "BULLY_TIME_UNIT", default_value = "1s", value_parser = parse_duration)]
    pub time_unit: Duration,
}

impl Opts {
    pub fn from_args() -> Self {
        Opts::parse()
    }

    pub fn params(&self) -> Result<Parameters, ConfigError> {
        Ok(Parameters::builder()
            .id(NodeId(self.id))
            .peers(PeerDirectory::new(
                self.host,
                self.base_port,
                NodeId(self.max_id),
            ))
            .timeouts(Timeouts::from_time_unit(self.time_unit)?)
            .build())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("invalid number: {0}")]
    Int(#[from] ParseIntError),
    #[error("duration too long")]
    Overflow,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, DurationParseError> {
    let s = s.trim().to_lowercase();

    Ok(if let Some(num) = s.strip_suffix("ms") {
        Duration::from_millis(u64::from_str(num)?)
    } else if let Some(num) = s.strip_suffix('s') {
        Duration::from_secs(u64::from_str(num)?)
    } else if let Some(num) = s.strip_suffix('m') {
        Duration::from_secs(
            u64::from_str(num)?
                .checked_mul(60)
                .ok_or(DurationParseError::Overflow)?,
        )
    } else {
        Duration::from_millis(u64::from_str(&s)?)
    })
}

#[test]
fn parse_duration_test() {
    assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
    assert_eq!(parse_duration("250"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration("1s"), Ok(Duration::from_secs(1)));
    assert_eq!(parse_duration(" 2S "), Ok(Duration::from_secs(2)));
    assert_eq!(parse_duration("3m"), Ok(Duration::from_secs(180)));
    assert!(parse_duration("s").is_err());
    assert!(parse_duration("ms").is_err());
    assert!(parse_duration("1h").is_err());
    assert!(parse_duration("-1s").is_err());
    assert_eq!(
        parse_duration(&format!("{}m", u64::MAX)),
        Err(DurationParseError::Overflow)
    );
}

#[test]
fn opts_to_params() {
    let opts = Opts::parse_from(["bullyd", "3", "--max-id", "4", "--base-port", "6000"]);
    let params = opts.params().unwrap();

    assert_eq!(params.id, NodeId(3));
    assert_eq!(params.peers.max_id(), NodeId(4));
    assert_eq!(params.peers.base_port(), 6000);
    assert_eq!(params.timeouts, Timeouts::default());
    assert!(params.validate().is_ok());
}

#[test]
fn opts_reject_unusable_time_unit() {
    let zero = Opts::parse_from(["bullyd", "1", "--time-unit", "0"]);
    assert_eq!(
        zero.params().err(),
        Some(ConfigError::InvalidTimeUnit(Duration::ZERO))
    );

    let huge = Opts::parse_from(["bullyd", "1", "--time-unit", "18446744073709551615s"]);
    assert!(matches!(
        huge.params(),
        Err(ConfigError::InvalidTimeUnit(_))
    ));

    assert!(Opts::try_parse_from(["bullyd", "1", "--time-unit", "18446744073709551615m"]).is_err());
}
