//! SQL Server 健康监控服务
//!
//! 提供 SQL Server 实例监控功能，包括：
//! - 周期性指标采集（CPU、内存、磁盘 I/O、等待统计、Top 查询）
//! - 健康评估与问题检测
//! - 问题记录管理
//! - WebSocket 实时推送

mod alerts;
mod analyzers;
mod collector;
mod collectors;
mod detector;
mod evaluator;
mod executor;
mod handlers;
mod history;
mod hub;
mod pipeline;
mod repository;
mod routes;
mod scheduler;
mod service;
mod settings_store;
mod state;
mod ws;

use anyhow::Context;
use axum::{body::Body, http::Request, middleware, routing::get, Json, Router};
use common::config::{AppConfig, LogFormat};
use common::middleware::request_id::request_id_middleware;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "monitor-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "监控服务 API",
        version = "0.1.0",
        description = "SQL Server 健康监控微服务"
    ),
    paths(
        handlers::check_connectivity,
        handlers::get_settings,
        handlers::update_settings,
        handlers::get_metrics,
        handlers::get_health,
        handlers::get_history,
        handlers::start_monitoring,
        handlers::stop_monitoring,
        handlers::get_status,
        handlers::detect_issues,
        handlers::list_issues,
        handlers::get_issue,
        handlers::resolve_issue,
        handlers::delete_issue,
        handlers::purge_issues,
        handlers::health_check,
    ),
    components(schemas(
        common::models::ConnectivityCheck,
        common::models::MetricSnapshot,
        common::models::HealthAssessment,
        common::models::HealthStatus,
        common::models::Issue,
        common::models::IssueType,
        common::models::IssueSeverity,
        common::models::MonitoringSettings,
        common::models::AlertChannel,
        common::models::AlertChannelKind,
        common::models::MonitorEvent,
        common::models::MonitorTick,
        common::response::MessageData,
        service::PurgeResult,
        handlers::HealthResponse,
    )),
    tags(
        (name = "monitoring", description = "监控端点"),
        (name = "issues", description = "问题管理端点"),
        (name = "settings", description = "监控设置端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（含 .env）
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 初始化日志追踪
    init_tracing(config.log_format);

    // 创建应用状态
    let state = AppState::new(config.clone())
        .await
        .context("failed to initialize application state")?;

    let app = create_router(state.clone());

    // 启动服务
    let addr = config.bind_addr();
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let stopped = state.scheduler.stop_all().await;
    info!(stopped, "服务已停止");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Query strings carry connection strings, so spans record the path only.
    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        tracing::info_span!(
            "http",
            method = %request.method(),
            path = %request.uri().path(),
        )
    });

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("收到停止信号");
}
