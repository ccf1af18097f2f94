use std::time::Duration;

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the scheduler re-evaluates the stage plan.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long retired or cancelled virtual users may take to finish their current iteration
/// before they are aborted.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Longest total duration a stage plan may have.
pub const MAX_PLAN_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Process exit code when one or more thresholds were breached.
pub const EXIT_THRESHOLD_BREACH: u8 = 99;

/// Process exit code when the test could not start due to invalid configuration.
pub const EXIT_CONFIGURATION_ERROR: u8 = 104;
