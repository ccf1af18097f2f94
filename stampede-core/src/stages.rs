use crate::{ConfigurationError, MAX_PLAN_DURATION};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Concurrency level every plan ramps up from.
const STARTING_TARGET: usize = 0;

/// A single ramp segment: move linearly from the previous target to `target` over `duration`.
///
/// A zero `duration` is an instantaneous step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Parses the `<duration>:<target>` shorthand, e.g. `10m:3000` or `30s:0`.
impl FromStr for Stage {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigurationError::InvalidStage {
            input: s.to_string(),
            reason,
        };

        let (duration, target) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected `<duration>:<target>`".to_string()))?;

        let duration = humantime::parse_duration(duration.trim())
            .map_err(|e| invalid(format!("bad duration: {e}")))?;

        let target = target
            .trim()
            .parse::<usize>()
            .map_err(|_| invalid("target must be a non-negative integer".to_string()))?;

        Ok(Stage::new(duration, target))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            humantime::format_duration(self.duration),
            self.target
        )
    }
}

/// Validated, immutable ramp plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<Stage>,
    total: Duration,
}

impl StagePlan {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigurationError> {
        if stages.is_empty() {
            return Err(ConfigurationError::EmptyPlan);
        }

        let total = stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
            .filter(|total| *total <= MAX_PLAN_DURATION)
            .ok_or(ConfigurationError::PlanTooLong {
                max: MAX_PLAN_DURATION,
            })?;
        if total.is_zero() {
            return Err(ConfigurationError::ZeroDuration);
        }

        Ok(Self { stages, total })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Highest target the plan ever asks for.
    pub fn peak_target(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(STARTING_TARGET)
    }

    /// Interpolated target at `elapsed`, unrounded.
    ///
    /// Returns the last stage's target at exactly the total duration and `0.` past it.
    pub fn exact_target_at(&self, elapsed: Duration) -> f64 {
        let mut stage_start = Duration::ZERO;
        let mut previous = STARTING_TARGET;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            // NOTE: `elapsed >= stage_start` holds here, so a zero-length stage never divides.
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let diff = stage.target as f64 - previous as f64;
                return previous as f64 + diff * progress;
            }
            stage_start = stage_end;
            previous = stage.target;
        }

        if elapsed == self.total {
            previous as f64
        } else {
            0.
        }
    }

    /// Number of virtual users that should be running at `elapsed`.
    ///
    /// Rounds down so the active count never exceeds the interpolated target.
    pub fn vus_at(&self, elapsed: Duration) -> usize {
        // Absorb float error at exact stage boundaries (e.g. 299.99999 for 300).
        (self.exact_target_at(elapsed) + 1e-9).floor() as usize
    }
}

impl fmt::Display for StagePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self.stages.iter().map(Stage::to_string).collect();
        write!(f, "[{}]", stages.join(", "))
    }
}
