use crate::checks::CheckRecorder;
use crate::http::HttpClient;
use crate::scenario::{IterationContext, Scenario};
use futures_util::FutureExt;
use rand::{rngs::SmallRng, SeedableRng};
use stampede_core::ThinkTime;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Run-wide iteration counters shared by every virtual user.
#[derive(Default)]
pub(crate) struct RunCounters {
    iterations: AtomicU64,
    failed_iterations: AtomicU64,
    panics: AtomicU64,
}

impl RunCounters {
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn failed_iterations(&self) -> u64 {
        self.failed_iterations.load(Ordering::Relaxed)
    }

    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}

/// State handed to every virtual user of a run.
pub(crate) struct RunnerShared<S> {
    pub scenario: Arc<S>,
    pub http: HttpClient,
    pub checks: CheckRecorder,
    pub counters: RunCounters,
    pub think_time: ThinkTime,
}

/// Runs iterations of the scenario until `stop` is cancelled.
///
/// `stop` is only observed between iterations and during think time; an iteration in flight
/// always runs to completion unless the task is aborted.
#[instrument(name = "vu", skip(shared, stop))]
pub(crate) async fn run_vu<S: Scenario>(
    vu: usize,
    shared: Arc<RunnerShared<S>>,
    stop: CancellationToken,
) {
    let mut rng = SmallRng::from_entropy();
    let mut iteration = 0;

    trace!("Virtual user started");
    while !stop.is_cancelled() {
        let ctx = IterationContext::new(vu, iteration, shared.http.clone(), shared.checks.clone());

        let outcome = AssertUnwindSafe(shared.scenario.run_iteration(ctx))
            .catch_unwind()
            .await;

        shared.counters.iterations.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                shared
                    .counters
                    .failed_iterations
                    .fetch_add(1, Ordering::Relaxed);
                debug!("Iteration {iteration} failed: {err:#}");
            }
            Err(payload) => {
                shared.counters.panics.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Iteration {iteration} panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("stampede_iterations").increment(1);

        iteration += 1;

        match shared.think_time.sample(&mut rng) {
            Some(pause) => {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            // NOTE: Scenarios which never await would otherwise starve the scheduler.
            None => tokio::task::yield_now().await,
        }
    }
    trace!("Virtual user stopped after {iteration} iterations");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}
