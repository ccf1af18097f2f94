use clap::Parser;
use stampede::prelude::*;
use stampede::{CancellationToken, LoadTest, EXIT_CONFIGURATION_ERROR, EXIT_THRESHOLD_BREACH};
use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const USER_ID_HEADER: &str = "Monew-Request-User-ID";

/// Ramps virtual users listing an article's comments.
#[derive(Parser, Debug)]
#[command(version = "0.1")]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    base_url: String,

    /// Stage as `<duration>:<target>`, e.g. `10m:3000`. Repeat for multiple stages.
    #[arg(short, long = "stage", default_value = "10m:3000")]
    stages: Vec<Stage>,

    #[arg(long, default_value = "11111111-2222-3333-4444-555555555555")]
    user_id: String,

    #[arg(long, default_value = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee")]
    article_id: String,

    /// Cursor to start from. Omitted from the query when empty.
    #[arg(long, default_value = "")]
    after: String,

    #[arg(long, default_value_t = 20)]
    limit: u32,

    /// Pause between iterations. With `--think-time-max`, the lower bound of a uniform pause.
    #[arg(long, value_parser = humantime::parse_duration)]
    think_time: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration, requires = "think_time")]
    think_time_max: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    timeout: Duration,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    grace_period: Duration,

    /// `<rate>` for all checks or `<check>=<rate>`. Repeatable.
    #[arg(long = "threshold")]
    thresholds: Vec<Threshold>,
}

impl Cli {
    fn think_time(&self) -> Option<ThinkTime> {
        match (self.think_time, self.think_time_max) {
            (Some(min), Some(max)) => Some(ThinkTime::Uniform { min, max }),
            (Some(fixed), None) => Some(ThinkTime::Fixed(fixed)),
            _ => None,
        }
    }
}

/// One page of an article's comments, as a fixed user.
struct ListComments {
    user_id: String,
    article_id: String,
    after: Option<String>,
    limit: String,
}

impl Scenario for ListComments {
    fn run_iteration(&self, ctx: IterationContext) -> impl Future<Output = IterationResult> + Send {
        let request = RequestSpec::get("/api/comments")
            .header("Content-Type", "application/json")
            .header(USER_ID_HEADER, self.user_id.as_str())
            .param("articleId", self.article_id.as_str())
            .param("limit", self.limit.as_str())
            .optional_param("after", self.after.as_deref());

        async move {
            let res = ctx.http().send(request).await?;
            ctx.check("status is 200", || res.status == 200);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stampede=info")),
        )
        .init();

    let cli = Cli::parse();
    let think_time = cli.think_time();

    let scenario = ListComments {
        user_id: cli.user_id,
        article_id: cli.article_id,
        after: Some(cli.after).filter(|after| !after.is_empty()),
        limit: cli.limit.to_string(),
    };

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; stopping load test");
                stop.cancel();
            }
        }
    });

    let mut test = LoadTest::new("comments", scenario)
        .base_url(&cli.base_url)
        .stages(cli.stages)
        .timeout(cli.timeout)
        .grace_period(cli.grace_period)
        .stop_on(stop);
    if let Some(think_time) = think_time {
        test = test.think_time(think_time);
    }
    for threshold in cli.thresholds {
        test = test.threshold(threshold);
    }

    match test.await {
        Ok(summary) => {
            println!("{summary}");
            if summary.passed() {
                info!("All thresholds held");
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_THRESHOLD_BREACH)
            }
        }
        Err(e) => {
            error!("Invalid configuration: {e}");
            ExitCode::from(EXIT_CONFIGURATION_ERROR)
        }
    }
}
