use crate::{
    ConfigurationError, Stage, StagePlan, DEFAULT_GRACE_PERIOD, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_TICK_INTERVAL,
};
use rand::Rng;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[doc(hidden)]
#[derive(Clone, Debug)]
pub struct LoadTestConfig {
    pub name: String,
    pub stages: Vec<Stage>,
    pub base_url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub think_time: ThinkTime,
    pub grace_period: Duration,
    pub tick_interval: Duration,
    pub max_rps: Option<NonZeroU32>,
    pub thresholds: Vec<Threshold>,
}

impl LoadTestConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stages: vec![],
            base_url: None,
            headers: vec![],
            timeout: DEFAULT_REQUEST_TIMEOUT,
            think_time: ThinkTime::None,
            grace_period: DEFAULT_GRACE_PERIOD,
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_rps: None,
            thresholds: vec![],
        }
    }

    /// Checks everything that can be checked without a network, returning the stage plan.
    pub fn validate(&self) -> Result<StagePlan, ConfigurationError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigurationError::ZeroInterval("tick interval"));
        }

        if self.timeout.is_zero() {
            return Err(ConfigurationError::ZeroInterval("request timeout"));
        }

        if let ThinkTime::Uniform { min, max } = self.think_time {
            if min > max {
                return Err(ConfigurationError::InvalidThinkTime { min, max });
            }
        }

        for threshold in &self.thresholds {
            threshold.validate()?;
        }

        self.parsed_base_url()?;

        StagePlan::new(self.stages.clone())
    }

    pub fn parsed_base_url(&self) -> Result<Option<Url>, ConfigurationError> {
        self.base_url.as_deref().map(parse_base_url).transpose()
    }
}

/// Parses a base URL that relative request paths are joined onto.
pub fn parse_base_url(base_url: &str) -> Result<Url, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidBaseUrl {
        url: base_url.to_string(),
        reason,
    };

    let url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(invalid(format!("unsupported scheme `{scheme}`"))),
    }

    if url.cannot_be_a_base() {
        return Err(invalid("url cannot be used as a base".to_string()));
    }

    Ok(url)
}

/// Pause between a virtual user's iterations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThinkTime {
    #[default]
    None,
    Fixed(Duration),
    /// Uniformly random between `min` and `max`, inclusive.
    Uniform { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Duration> {
        match *self {
            ThinkTime::None => None,
            ThinkTime::Fixed(dur) if dur.is_zero() => None,
            ThinkTime::Fixed(dur) => Some(dur),
            ThinkTime::Uniform { min, max } if min >= max => Some(min),
            ThinkTime::Uniform { min, max } => Some(rng.gen_range(min..=max)),
        }
    }
}

impl From<Duration> for ThinkTime {
    fn from(dur: Duration) -> Self {
        ThinkTime::Fixed(dur)
    }
}

/// Minimum pass rate for one named check, or for all checks combined when `check` is `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct Threshold {
    pub check: Option<String>,
    pub min_pass_rate: f64,
}

impl Threshold {
    pub fn all_checks(min_pass_rate: f64) -> Self {
        Self {
            check: None,
            min_pass_rate,
        }
    }

    pub fn check(name: &str, min_pass_rate: f64) -> Self {
        Self {
            check: Some(name.to_string()),
            min_pass_rate,
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if (0. ..=1.).contains(&self.min_pass_rate) {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidThreshold {
                input: self.to_string(),
                reason: "pass rate must be within 0.0..=1.0".to_string(),
            })
        }
    }
}

/// Parses `<rate>` for all checks or `<check name>=<rate>` for a single check.
impl FromStr for Threshold {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (check, rate) = match s.rsplit_once('=') {
            Some((check, rate)) => (Some(check.trim().to_string()), rate),
            None => (None, s),
        };

        let min_pass_rate =
            rate.trim()
                .parse::<f64>()
                .map_err(|e| ConfigurationError::InvalidThreshold {
                    input: s.to_string(),
                    reason: e.to_string(),
                })?;

        let threshold = Threshold {
            check,
            min_pass_rate,
        };
        threshold.validate()?;
        Ok(threshold)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.check {
            Some(check) => write!(f, "{check}={}", self.min_pass_rate),
            None => write!(f, "{}", self.min_pass_rate),
        }
    }
}
