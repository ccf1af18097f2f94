//! Scenario trait and the `LoadTest` future that runs it.
use crate::checks::CheckRecorder;
use crate::http::HttpClient;
use crate::runner::{RunCounters, RunnerShared};
use crate::scheduler::Scheduler;
use stampede_core::{ConfigurationError, LoadTestConfig, Stage, Summary, ThinkTime, Threshold};
use std::{
    future::Future,
    num::NonZeroU32,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Outcome of one scenario iteration. Any error type can be propagated with `?`.
pub type IterationResult = anyhow::Result<()>;

/// One unit of user behavior, run repeatedly by every virtual user.
///
/// Most scenarios are written as an `async fn` with the [`#[scenario]`](crate::scenario)
/// attribute, or adapted from a closure with [`scenario_fn`].
pub trait Scenario: Send + Sync + 'static {
    fn run_iteration(&self, ctx: IterationContext) -> impl Future<Output = IterationResult> + Send;
}

/// Adapts an async closure into a [`Scenario`].
pub struct ScenarioFn<F>(F);

pub fn scenario_fn<F, Fut>(func: F) -> ScenarioFn<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = IterationResult> + Send,
{
    ScenarioFn(func)
}

impl<F, Fut> Scenario for ScenarioFn<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = IterationResult> + Send,
{
    fn run_iteration(&self, ctx: IterationContext) -> impl Future<Output = IterationResult> + Send {
        (self.0)(ctx)
    }
}

/// Everything a single iteration has access to.
#[derive(Clone)]
pub struct IterationContext {
    vu: usize,
    iteration: u64,
    http: HttpClient,
    checks: CheckRecorder,
}

impl IterationContext {
    #[doc(hidden)]
    pub fn new(vu: usize, iteration: u64, http: HttpClient, checks: CheckRecorder) -> Self {
        Self {
            vu,
            iteration,
            http,
            checks,
        }
    }

    /// Id of the virtual user running this iteration. Ids are never reused within a run.
    pub fn vu(&self) -> usize {
        self.vu
    }

    /// Zero-based iteration number for this virtual user.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Records a named check. See [`CheckRecorder::record`].
    pub fn check<P>(&self, name: &str, predicate: P) -> bool
    where
        P: FnOnce() -> bool,
    {
        self.checks.record(name, predicate)
    }

    pub fn checks(&self) -> &CheckRecorder {
        &self.checks
    }
}

/// A configured load test. Awaiting it runs the test to completion.
///
/// Not intended for manual creation; the [`#[scenario]`](crate::scenario) macro generates a
/// function returning one, on which the builder methods below can be chained.
///
/// # Example
/// ```no_run
/// use stampede::prelude::*;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let summary = browse()
///         .base_url("http://localhost:8080")
///         .stage(Duration::from_secs(30), 10)
///         .stage(Duration::from_secs(60), 10)
///         .await
///         .expect("valid configuration");
///
///     println!("{summary}");
/// }
///
/// #[scenario]
/// async fn browse(ctx: IterationContext) -> IterationResult {
///     let res = ctx.http().get("/").await?;
///     ctx.check("status is 200", || res.status == 200);
///     Ok(())
/// }
/// ```
pub struct LoadTest<S> {
    scenario: Arc<S>,
    config: LoadTestConfig,
    stop: CancellationToken,
    runner_fut: Option<Pin<Box<dyn Future<Output = Result<Summary, ConfigurationError>> + Send>>>,
}

impl<S: Scenario> LoadTest<S> {
    /// Creates a load test named `name` running `scenario`. Functions marked with
    /// [`#[scenario]`](crate::scenario) call this for you.
    pub fn new(name: &str, scenario: S) -> Self {
        Self {
            scenario: Arc::new(scenario),
            config: LoadTestConfig::new(name),
            stop: CancellationToken::new(),
            runner_fut: None,
        }
    }

    /// Replaces the stage plan.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.config.stages = stages.into_iter().collect();
        self
    }

    /// Appends a stage ramping linearly to `target` virtual users over `duration`.
    ///
    /// The first stage ramps from zero. A zero `duration` jumps straight to `target`.
    pub fn stage(mut self, duration: Duration, target: usize) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    pub fn think_time(mut self, think_time: impl Into<ThinkTime>) -> Self {
        self.config.think_time = think_time.into();
        self
    }

    /// Base URL that relative request paths are resolved against.
    pub fn base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = Some(base_url.to_string());
        self
    }

    /// Header sent with every request.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.config
            .headers
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Per-request timeout. Defaults to 30s.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// How long a stopped virtual user may take to finish its iteration before being aborted.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    /// How often the virtual user count is re-evaluated against the stage plan.
    pub fn tick(mut self, tick_interval: Duration) -> Self {
        self.config.tick_interval = tick_interval;
        self
    }

    /// Caps total requests per second across every virtual user.
    pub fn max_rps(mut self, max_rps: NonZeroU32) -> Self {
        self.config.max_rps = Some(max_rps);
        self
    }

    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.config.thresholds.push(threshold);
        self
    }

    /// Ends the test early once `token` is cancelled.
    pub fn stop_on(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    #[doc(hidden)]
    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }
}

impl<S: Scenario> Future for LoadTest<S> {
    type Output = Result<Summary, ConfigurationError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let runner = this.runner_fut.get_or_insert_with(|| {
            Box::pin(run_load_test(
                this.scenario.clone(),
                this.config.clone(),
                this.stop.clone(),
            ))
        });
        runner.as_mut().poll(cx)
    }
}

#[instrument(name = "load_test", skip_all, fields(name = %config.name))]
pub(crate) async fn run_load_test<S: Scenario>(
    scenario: Arc<S>,
    config: LoadTestConfig,
    stop: CancellationToken,
) -> Result<Summary, ConfigurationError> {
    let plan = config.validate()?;
    let http = HttpClient::from_config(&config)?;

    info!("Running {} with plan {plan}", config.name);
    debug!("Config: {config:?}");

    let shared = Arc::new(RunnerShared {
        scenario,
        http,
        checks: CheckRecorder::new(),
        counters: RunCounters::default(),
        think_time: config.think_time,
    });

    let scheduler = Scheduler::new(
        plan,
        shared.clone(),
        stop.child_token(),
        config.grace_period,
        config.tick_interval,
    );
    let report = scheduler.run().await;

    let stats = shared.http.stats();
    let mut summary = Summary {
        name: config.name.clone(),
        elapsed: report.elapsed,
        peak_vus: report.peak_vus,
        iterations: shared.counters.iterations(),
        failed_iterations: shared.counters.failed_iterations(),
        panics: shared.counters.panics(),
        network_errors: stats.network_errors(),
        checks: shared.checks.snapshot(),
        requests: stats.summarize(),
        breaches: vec![],
    };
    summary.evaluate_thresholds(&config.thresholds);

    if summary.passed() {
        info!("Load test complete");
    } else {
        for breach in &summary.breaches {
            warn!("Threshold breached: {breach}");
        }
    }

    Ok(summary)
}
