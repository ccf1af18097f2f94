//! Named pass/fail assertions shared by every virtual user.
use stampede_core::CheckCounts;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Outcome of evaluating one check once.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub at: Instant,
}

/// Aggregates check outcomes by name.
///
/// Cloning is cheap and every clone feeds the same counters. Counts only ever grow, so the
/// final tallies do not depend on the order in which virtual users record them.
#[derive(Clone, Default)]
pub struct CheckRecorder {
    counters: Arc<RwLock<HashMap<String, Arc<CheckCounter>>>>,
}

#[derive(Default)]
struct CheckCounter {
    passes: AtomicU64,
    failures: AtomicU64,
}

impl CheckRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates `predicate` exactly once and records the outcome under `name`.
    ///
    /// A panicking predicate counts as a failure; the panic never reaches the caller.
    pub fn record<P>(&self, name: &str, predicate: P) -> bool
    where
        P: FnOnce() -> bool,
    {
        let passed = match panic::catch_unwind(AssertUnwindSafe(predicate)) {
            Ok(passed) => passed,
            Err(_) => {
                warn!(check = name, "Check predicate panicked; counting as failed.");
                false
            }
        };

        self.apply(&CheckResult {
            name: name.to_string(),
            passed,
            at: Instant::now(),
        });

        passed
    }

    pub fn apply(&self, result: &CheckResult) {
        let counter = self.counter(&result.name);
        if result.passed {
            counter.passes.fetch_add(1, Ordering::Relaxed);
        } else {
            counter.failures.fetch_add(1, Ordering::Relaxed);
            trace!(check = %result.name, at = ?result.at, "Check failed");
        }

        #[cfg(feature = "metrics")]
        {
            let outcome = if result.passed { "pass" } else { "fail" };
            metrics::counter!("stampede_checks", "check" => result.name.clone(), "outcome" => outcome)
                .increment(1);
        }
    }

    pub fn counts(&self, name: &str) -> CheckCounts {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|c| c.load())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, CheckCounts> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, counter)| (name.clone(), counter.load()))
            .collect()
    }

    fn counter(&self, name: &str) -> Arc<CheckCounter> {
        {
            let read = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = read.get(name) {
                return counter.clone();
            }
        }

        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl CheckCounter {
    fn load(&self) -> CheckCounts {
        CheckCounts {
            passes: self.passes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(passes: u64, failures: u64) -> CheckCounts {
        CheckCounts { passes, failures }
    }

    #[test]
    fn order_independent() {
        let orders = [
            [true, false, true],
            [false, true, true],
            [true, true, false],
        ];

        for order in orders {
            let recorder = CheckRecorder::new();
            for outcome in order {
                recorder.record("status is 200", || outcome);
            }
            assert_eq!(recorder.counts("status is 200"), counts(2, 1));
        }
    }

    #[test]
    fn evaluates_predicate_once() {
        let recorder = CheckRecorder::new();
        let mut calls = 0;
        let passed = recorder.record("once", || {
            calls += 1;
            true
        });
        assert!(passed);
        assert_eq!(calls, 1);
    }

    #[tracing_test::traced_test]
    #[test]
    fn panicking_predicate_is_a_failure() {
        let recorder = CheckRecorder::new();
        let passed = recorder.record("boom", || panic!("predicate exploded"));
        assert!(!passed);
        assert_eq!(recorder.counts("boom"), counts(0, 1));
        assert!(logs_contain("Check predicate panicked"));
    }

    #[test]
    fn unknown_check_is_empty() {
        let recorder = CheckRecorder::new();
        assert_eq!(recorder.counts("missing"), CheckCounts::default());
        assert!(recorder.snapshot().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates() {
        let recorder = CheckRecorder::new();

        let tasks: Vec<_> = (0..8)
            .map(|task| {
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    for i in 0..1_000 {
                        recorder.record("even", || (task + i) % 2 == 0);
                        recorder.record(&format!("task-{task}"), || true);
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot["even"], counts(4_000, 4_000));
        assert_eq!(snapshot.len(), 9);
        assert_eq!(snapshot["task-3"], counts(1_000, 0));
    }
}
