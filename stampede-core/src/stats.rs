use crate::Threshold;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Pass/fail counts for one named check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckCounts {
    pub passes: u64,
    pub failures: u64,
}

impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.passes + self.failures
    }

    /// `None` when the check never ran.
    pub fn pass_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.passes as f64 / total as f64),
        }
    }

    pub fn merge(self, other: CheckCounts) -> CheckCounts {
        CheckCounts {
            passes: self.passes + other.passes,
            failures: self.failures + other.failures,
        }
    }
}

/// Latency statistics and status distribution for every request sharing a label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestSummary {
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub statuses: BTreeMap<u16, u64>,
}

/// A threshold that did not hold at the end of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdBreach {
    pub threshold: Threshold,
    /// `None` when no matching check was ever recorded.
    pub pass_rate: Option<f64>,
}

impl fmt::Display for ThresholdBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let check = self.threshold.check.as_deref().unwrap_or("<all checks>");
        match self.pass_rate {
            Some(rate) => write!(
                f,
                "{check}: pass rate {:.2}% below {:.2}%",
                rate * 100.,
                self.threshold.min_pass_rate * 100.
            ),
            None => write!(f, "{check}: no samples recorded"),
        }
    }
}

/// End-of-test summary for a load test run.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub name: String,
    pub elapsed: Duration,
    pub peak_vus: usize,
    pub iterations: u64,
    pub failed_iterations: u64,
    pub panics: u64,
    pub network_errors: u64,
    pub checks: BTreeMap<String, CheckCounts>,
    pub requests: BTreeMap<String, RequestSummary>,
    pub breaches: Vec<ThresholdBreach>,
}

impl Summary {
    /// Total number of failed check evaluations across every check.
    pub fn assertion_failures(&self) -> u64 {
        self.checks.values().map(|c| c.failures).sum()
    }

    pub fn check_totals(&self) -> CheckCounts {
        self.checks
            .values()
            .fold(CheckCounts::default(), |acc, c| acc.merge(*c))
    }

    /// True when every configured threshold held.
    pub fn passed(&self) -> bool {
        self.breaches.is_empty()
    }

    pub fn evaluate_thresholds(&mut self, thresholds: &[Threshold]) {
        self.breaches = thresholds
            .iter()
            .filter_map(|threshold| {
                let counts = match &threshold.check {
                    Some(name) => self.checks.get(name).copied().unwrap_or_default(),
                    None => self.check_totals(),
                };

                match counts.pass_rate() {
                    Some(rate) if rate >= threshold.min_pass_rate => None,
                    pass_rate => Some(ThresholdBreach {
                        threshold: threshold.clone(),
                        pass_rate,
                    }),
                }
            })
            .collect();
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} finished in {}",
            self.name,
            humantime::format_duration(round_millis(self.elapsed))
        )?;
        writeln!(
            f,
            "  vus_max={} iterations={} failed_iterations={} panics={} network_errors={} assertion_failures={}",
            self.peak_vus,
            self.iterations,
            self.failed_iterations,
            self.panics,
            self.network_errors,
            self.assertion_failures(),
        )?;

        for (name, counts) in &self.checks {
            writeln!(
                f,
                "  check \"{name}\": {} passed, {} failed ({:.2}%)",
                counts.passes,
                counts.failures,
                counts.pass_rate().unwrap_or(0.) * 100.,
            )?;
        }

        for (label, req) in &self.requests {
            writeln!(
                f,
                "  {label}: count={} min={:?} mean={:?} max={:?} p50={:?} p90={:?} p95={:?} p99={:?}",
                req.count,
                req.min,
                req.mean,
                req.max,
                req.p50,
                req.p90,
                req.p95,
                req.p99,
            )?;
            let statuses: Vec<String> = req
                .statuses
                .iter()
                .map(|(status, count)| format!("{status}={count}"))
                .collect();
            writeln!(f, "    statuses: {}", statuses.join(" "))?;
        }

        for breach in &self.breaches {
            writeln!(f, "  threshold breached: {breach}")?;
        }

        Ok(())
    }
}

fn round_millis(dur: Duration) -> Duration {
    Duration::from_millis(dur.as_millis() as u64)
}
