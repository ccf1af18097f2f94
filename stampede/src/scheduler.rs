//! Control loop that keeps the number of running virtual users on the stage plan.
use crate::runner::{run_vu, RunnerShared};
use crate::scenario::Scenario;
use crate::timer::Timer;
use stampede_core::StagePlan;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

pub(crate) struct SchedulerReport {
    pub elapsed: Duration,
    pub peak_vus: usize,
}

struct VirtualUser {
    id: usize,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

struct Retiring {
    vu: VirtualUser,
    deadline: Instant,
}

pub(crate) struct Scheduler<S> {
    plan: StagePlan,
    shared: Arc<RunnerShared<S>>,
    shutdown: CancellationToken,
    active: Vec<VirtualUser>,
    retiring: Vec<Retiring>,
    started: Option<Instant>,
    next_vu: usize,
    peak: usize,
    grace_period: Duration,
    tick_interval: Duration,
}

impl<S: Scenario> Scheduler<S> {
    /// Cancelling `shutdown` ends the run early; every virtual user's stop signal derives from it.
    pub fn new(
        plan: StagePlan,
        shared: Arc<RunnerShared<S>>,
        shutdown: CancellationToken,
        grace_period: Duration,
        tick_interval: Duration,
    ) -> Self {
        Self {
            plan,
            shared,
            shutdown,
            active: vec![],
            retiring: vec![],
            started: None,
            next_vu: 0,
            peak: 0,
            grace_period,
            tick_interval,
        }
    }

    pub async fn run(mut self) -> SchedulerReport {
        let mut timer = Timer::new(self.tick_interval).await;
        let started = Instant::now();
        self.started = Some(started);
        let deadline = started.checked_add(self.plan.total_duration());

        info!("Scheduler started; ticking every {timer}");

        // NOTE: This loop is time-sensitive. Nothing in it may block or await on a virtual user.
        loop {
            let now = Instant::now();
            let target = self.target_at(now);
            self.adjust(target);
            self.reap(now);
            self.shared.http.stats().flush();
            debug!(
                "elapsed={:?} target={target} active={} retiring={}",
                now.duration_since(started),
                self.active.len(),
                self.retiring.len()
            );

            #[cfg(feature = "metrics")]
            metrics::gauge!("stampede_vus").set(self.active.len() as f64);

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Stop requested; ending load test early");
                    break;
                }
                _ = plan_end(deadline) => break,
                _ = timer.tick() => {}
            }
        }

        let elapsed = started.elapsed();
        self.stop_all().await;

        info!("Scheduler finished after {elapsed:?}; peak of {} virtual users", self.peak);
        SchedulerReport {
            elapsed,
            peak_vus: self.peak,
        }
    }

    /// Target virtual user count at `now`. Zero before the run has started.
    fn target_at(&self, now: Instant) -> usize {
        match self.started {
            Some(started) => self.plan.vus_at(now.saturating_duration_since(started)),
            None => 0,
        }
    }

    /// Spawns or retires virtual users until exactly `target` are active.
    ///
    /// Retirement is graceful and newest-first: the virtual user is signalled to stop and
    /// tracked until it exits or its grace period runs out.
    fn adjust(&mut self, target: usize) {
        while self.active.len() < target {
            let id = self.next_vu;
            self.next_vu += 1;

            let stop = self.shutdown.child_token();
            let handle = tokio::spawn(run_vu(id, self.shared.clone(), stop.clone()));
            self.active.push(VirtualUser { id, stop, handle });
        }

        if self.active.len() > target {
            let deadline = Instant::now() + self.grace_period;
            while self.active.len() > target {
                let Some(vu) = self.active.pop() else {
                    break;
                };
                trace!("Retiring virtual user {}", vu.id);
                vu.stop.cancel();
                self.retiring.push(Retiring { vu, deadline });
            }
        }

        self.peak = self.peak.max(self.active.len());
    }

    /// Drops retired virtual users that have exited and aborts those past their deadline.
    fn reap(&mut self, now: Instant) {
        self.retiring.retain(|retiring| {
            if retiring.vu.handle.is_finished() {
                false
            } else if now >= retiring.deadline {
                warn!(
                    "Virtual user {} did not stop within the grace period; aborting",
                    retiring.vu.id
                );
                retiring.vu.handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Stops every virtual user, waiting up to the grace period before aborting stragglers.
    async fn stop_all(&mut self) {
        self.shutdown.cancel();

        let deadline = Instant::now() + self.grace_period;
        let active = self.active.drain(..).map(|vu| Retiring { vu, deadline });
        let mut pending: Vec<Retiring> = self.retiring.drain(..).chain(active).collect();

        for retiring in &mut pending {
            let deadline = retiring.deadline.min(deadline);
            if timeout_at(deadline, &mut retiring.vu.handle).await.is_err() {
                warn!(
                    "Virtual user {} did not stop within the grace period; aborting",
                    retiring.vu.id
                );
                retiring.vu.handle.abort();
            }
        }
    }
}

/// Resolves at `deadline`, or never when the plan ends past what an `Instant` can hold.
async fn plan_end(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
