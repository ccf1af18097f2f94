#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod checks;
pub mod http;
pub mod scenario;

pub(crate) mod measurement;
pub(crate) mod runner;
pub(crate) mod scheduler;
pub(crate) mod timer;

pub use checks::{CheckRecorder, CheckResult};
pub use http::{HttpClient, HttpClientBuilder, Method, NetworkError, RequestSpec, ResponseRecord};
pub use scenario::{
    scenario_fn, IterationContext, IterationResult, LoadTest, Scenario, ScenarioFn,
};
pub use stampede_core::{
    CheckCounts, ConfigurationError, RequestSummary, Stage, StagePlan, Summary, ThinkTime,
    Threshold, ThresholdBreach, EXIT_CONFIGURATION_ERROR, EXIT_THRESHOLD_BREACH,
};
pub use stampede_macros::scenario;
pub use tokio_util::sync::CancellationToken;

pub mod prelude {
    pub use crate::http::{Method, RequestSpec, ResponseRecord};
    pub use crate::scenario::{scenario_fn, IterationContext, IterationResult, Scenario};
    pub use stampede_core::{Stage, Summary, ThinkTime, Threshold};
    pub use stampede_macros::scenario;
}
