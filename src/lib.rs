use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    delivery::{deliver_pending_once, Channel, CliAdapter, DeliveryAdapter, SlackWebhookAdapter},
    engine::{pause, process_continuously, process_pending_once, ProcessStats, Reconciler},
    env::{ChannelSettings, Settings},
    errors::ReporterResult,
    ingest::{ingest_continuously, ingest_once, IngestOptions, IngestStats},
    pipeline::PipelineStore,
    reporting::{report_pending_once, ReportStats},
    screeps::{BattleFeed, HistoryProvider, UserResolver},
};

pub mod constants;
pub mod delivery;
pub mod engine;
pub mod env;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod reporting;
pub mod screeps;

pub struct LoggerManager {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

impl LoggerManager {
    pub fn setup(settings: &Settings) -> Self {
        // 1. 파일 로거 설정
        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            &settings.logging.directory,
            &settings.logging.filename,
        );
        let (non_blocking_file_writer, guard) = tracing_appender::non_blocking(file_appender);

        // 2. 로그 레벨 필터 설정 (환경 변수 또는 설정 파일 값)
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.server.log_level));

        // 3. 콘솔 출력 레이어 설정
        let console_layer = fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .pretty();

        // 4. 파일 출력 레이어 설정
        let file_layer = fmt::layer()
            .with_writer(non_blocking_file_writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(false);

        // 5. 레지스트리에 필터와 레이어 결합
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        tracing::info!(
            "로거 초기화 완료: 콘솔 및 파일({}/{}) 출력 활성화.",
            settings.logging.directory,
            settings.logging.filename
        );

        Self { _guard: guard }
    }
}

/// Everything the workers need, built once in `main` and passed down.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<dyn PipelineStore>,
    pub feed: Arc<dyn BattleFeed>,
    pub reconciler: Arc<Reconciler>,
    pub adapters: Vec<Arc<dyn DeliveryAdapter>>,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        store: Arc<dyn PipelineStore>,
        history: Arc<dyn HistoryProvider>,
        feed: Arc<dyn BattleFeed>,
        users: Arc<dyn UserResolver>,
        adapters: Vec<Arc<dyn DeliveryAdapter>>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            history,
            users,
            settings.worker.abandon_horizon_ticks,
        ));
        Self {
            settings,
            store,
            feed,
            reconciler,
            adapters,
        }
    }

    /// Channels that get a payload for every reported battle.
    pub fn channels(&self) -> Vec<Channel> {
        self.adapters.iter().map(|adapter| adapter.channel()).collect()
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions::from_settings(&self.settings.screeps, &self.settings.worker)
    }
}

/// Adapters for every channel switched on in the settings.
pub fn build_adapters(
    channels: &ChannelSettings,
    http_client: reqwest::Client,
) -> Vec<Arc<dyn DeliveryAdapter>> {
    let mut adapters: Vec<Arc<dyn DeliveryAdapter>> = Vec::new();
    if channels.cli {
        adapters.push(Arc::new(CliAdapter));
    }
    if let Some(url) = &channels.slack_webhook_url {
        adapters.push(Arc::new(SlackWebhookAdapter::new(http_client, url.clone())));
    }
    adapters
}

/// Drains every delivery queue once. A failing channel does not hold up the others.
pub async fn deliver_all_once(ctx: &AppContext) {
    for adapter in &ctx.adapters {
        let separator = match adapter.channel() {
            Channel::Slack => ctx.settings.channels.slack_batch_separator.as_str(),
            Channel::Cli => "\n",
        };
        if let Err(e) = deliver_pending_once(ctx.store.as_ref(), adapter.as_ref(), separator).await
        {
            error!("{} delivery pass failed: {}", adapter.channel(), e);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub ingest: IngestStats,
    pub process: ProcessStats,
    pub report: ReportStats,
}

/// One pass of every stage, in pipeline order.
pub async fn run_once(ctx: &AppContext) -> ReporterResult<RunSummary> {
    let ingest = ingest_once(ctx.store.as_ref(), ctx.feed.as_ref(), ctx.ingest_options()).await?;
    let process = process_pending_once(ctx.store.as_ref(), &ctx.reconciler).await?;
    let report = report_pending_once(ctx.store.as_ref(), &ctx.channels()).await?;
    deliver_all_once(ctx).await;

    let summary = RunSummary {
        ingest,
        process,
        report,
    };
    info!("Run complete: {:?}", summary);
    Ok(summary)
}

async fn report_continuously(ctx: AppContext, shutdown: CancellationToken) {
    let interval = Duration::from_secs(ctx.settings.worker.report_interval_seconds);
    let channels = ctx.channels();
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = report_pending_once(ctx.store.as_ref(), &channels) => result,
        };
        if let Err(e) = result {
            error!("Reporting pass failed: {}", e);
        }
        deliver_all_once(&ctx).await;
        if pause(&shutdown, interval).await {
            break;
        }
    }
    info!("Reporting worker stopped");
}

/// Runs ingestion, processing and reporting side by side until `shutdown`.
pub async fn run_continuously(ctx: AppContext, shutdown: CancellationToken) {
    let ingest = tokio::spawn(ingest_continuously(
        ctx.store.clone(),
        ctx.feed.clone(),
        ctx.ingest_options(),
        ctx.settings.worker.clone(),
        shutdown.clone(),
    ));
    let process = tokio::spawn(process_continuously(
        ctx.store.clone(),
        ctx.reconciler.clone(),
        ctx.settings.worker.clone(),
        shutdown.clone(),
    ));
    let report = tokio::spawn(report_continuously(ctx.clone(), shutdown.clone()));

    let (ingest, process, report) = tokio::join!(ingest, process, report);
    for (name, result) in [("ingest", ingest), ("process", process), ("report", report)] {
        if let Err(e) = result {
            error!("{} worker panicked: {}", name, e);
        }
    }
}
