mod jobs;

use adsync_core::{DateRange, Level, SchedulerType};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use crate::jobs::Task;

#[derive(Debug, Parser)]
#[command(name = "adsync")]
#[command(about = "Ad platform sync jobs")]
struct Cli {
    /// Task to run, e.g. `meta_insights` or `refresh_tiktok_token`
    task: String,

    /// Reporting level for insight tasks: account, campaign or ad
    #[arg(default_value = "campaign")]
    level: Level,

    /// daily or live
    #[arg(default_value = "daily")]
    scheduler_type: SchedulerType,

    /// First day of the window (defaults to yesterday, or the live window start)
    #[arg(long)]
    date_start: Option<NaiveDate>,

    /// Last day of the window (defaults to today)
    #[arg(long)]
    date_end: Option<NaiveDate>,
}

impl Cli {
    /// The requested window, falling back to the scheduler's default for any
    /// bound that was not given.
    fn range(&self, today: NaiveDate, live_window_days: u32) -> anyhow::Result<DateRange> {
        let default = self.scheduler_type.default_range(today, live_window_days);
        let range = DateRange::new(
            self.date_start.unwrap_or(default.start),
            self.date_end.unwrap_or(default.end),
        )?;
        Ok(range)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = adsync_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let Some(task) = Task::from_name(&cli.task) else {
        tracing::error!(task = %cli.task, "unknown task");
        return Ok(());
    };

    let range = cli.range(Utc::now().date_naive(), config.runner.live_window_days)?;
    let window = adsync_pipeline::SyncWindow {
        level: cli.level,
        scheduler: cli.scheduler_type,
        range,
    };

    let span = tracing::info_span!("task", name = %cli.task, run_id = %uuid::Uuid::new_v4());
    async move {
        tracing::info!(
            env = %config.env,
            level = %window.level,
            scheduler = %window.scheduler,
            start = %range.start_str(),
            end = %range.end_str(),
            "task started"
        );
        jobs::run(task, &config, window).await?;
        tracing::info!("task finished");
        anyhow::Ok(())
    }
    .instrument(span)
    .await
}
