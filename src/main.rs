use std::sync::Arc;

use actix_web::{dev::ServerHandle, web, App, HttpRequest, HttpResponse, HttpServer};
use battle_reporter::{
    build_adapters, deliver_all_once,
    engine::process_pending_once,
    env::Settings,
    errors::{ReporterError, ReporterResult},
    ingest::ingest_once,
    metrics,
    pipeline::RedisStore,
    reporting::report_pending_once,
    run_continuously, run_once,
    screeps::{ScreepsClient, ScreepsUserResolver},
    AppContext, LoggerManager,
};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "battle_reporter",
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None,
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Ingest, process, report and deliver once, then exit
    Once,
    /// Run every stage continuously until Ctrl+C
    Run,
    /// Poll the battle feed once
    Ingest,
    /// One pass over the processing queue
    Process,
    /// One pass over the reporting queue
    Report,
    /// One pass over every delivery queue
    Deliver,
}

#[derive(Clone)]
struct MetricsState {
    registry: Registry,
    auth_token: Option<String>,
}

async fn metrics_route(req: HttpRequest, state: web::Data<MetricsState>) -> HttpResponse {
    if let Some(expected_token) = &state.auth_token {
        let provided_token = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "));

        if provided_token != Some(expected_token.as_str()) {
            return HttpResponse::Unauthorized().body("Unauthorized: Invalid or missing token");
        }
    }

    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("Metrics encode error: {}", e));
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

fn start_http_server(settings: &Settings, registry: Registry) -> ReporterResult<ServerHandle> {
    let bind_address = format!("{}:{}", settings.server.bind_address, settings.server.port);
    let state = MetricsState {
        registry,
        auth_token: settings.server.metrics_auth_token.clone(),
    };

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/metrics", web::get().to(metrics_route))
            .route("/health", web::get().to(|| async { HttpResponse::Ok().body("OK") }))
    })
    .workers(1)
    .bind(&bind_address)?
    .run();

    let handle = server.handle();
    actix_web::rt::spawn(async move {
        if let Err(e) = server.await {
            error!("HTTP server exited: {}", e);
        }
    });
    info!("Health and metrics endpoint listening on {}", bind_address);
    Ok(handle)
}

async fn run(command: Command, settings: Settings) -> ReporterResult<()> {
    // 1. 메트릭 등록
    let registry = Registry::new();
    metrics::register_custom_metrics(&registry)
        .map_err(|e| ReporterError::internal_error(e.to_string()))?;

    // 2. Redis 연결
    let store = RedisStore::connect(&settings.redis, &settings.retry).await?;

    // 3. Screeps API 클라이언트와 사용자 정보 캐시
    let client = ScreepsClient::new(&settings.screeps)?;
    let users = ScreepsUserResolver::new(
        client.clone(),
        store.connection(),
        store.keys().clone(),
        settings.redis.operation_timeout_seconds,
    );

    // 4. 알림 채널
    let adapters = build_adapters(&settings.channels, client.http_client().clone());
    if adapters.is_empty() {
        info!("No delivery channel enabled; reported battles will wait in their queues");
    }

    let client = Arc::new(client);
    let ctx = AppContext::new(
        settings.clone(),
        Arc::new(store),
        client.clone(),
        client,
        Arc::new(users),
        adapters,
    );

    match command {
        Command::Once => {
            run_once(&ctx).await?;
        }
        Command::Ingest => {
            ingest_once(ctx.store.as_ref(), ctx.feed.as_ref(), ctx.ingest_options()).await?;
        }
        Command::Process => {
            let stats = process_pending_once(ctx.store.as_ref(), &ctx.reconciler).await?;
            info!("Processing pass: {:?}", stats);
        }
        Command::Report => {
            let stats = report_pending_once(ctx.store.as_ref(), &ctx.channels()).await?;
            info!("Reporting pass: {:?}", stats);
        }
        Command::Deliver => deliver_all_once(&ctx).await,
        Command::Run => {
            // 5. 전역 Shutdown Token 생성
            let shutdown_token = CancellationToken::new();

            // 6. HTTP 서버 (선택)
            let server = if settings.server.enabled {
                Some(start_http_server(&settings, registry)?)
            } else {
                None
            };

            // 7. 워커 시작
            let workers = tokio::spawn(run_continuously(ctx, shutdown_token.clone()));
            info!("Battle reporter is running");

            // 8. 종료 신호 대기
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Ctrl+C received. Initiating graceful shutdown...");
            shutdown_token.cancel();

            if let Some(server) = server {
                server.stop(true).await;
            }
            if let Err(e) = workers.await {
                error!("Workers did not shut down cleanly: {}", e);
            }
            info!("Battle reporter has shut down gracefully");
        }
    }
    Ok(())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // 1. 환경변수 로드
    dotenv::dotenv().ok();
    let args = Args::parse();

    // 2. 설정 파일 로드
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    // 3. 로거 초기화
    let _logger_manager = LoggerManager::setup(&settings);
    info!("Logger initialized");

    if let Err(e) = run(args.command, settings).await {
        error!("battle_reporter failed: {}", e);
        return Err(std::io::Error::other(e.to_string()));
    }
    Ok(())
}
