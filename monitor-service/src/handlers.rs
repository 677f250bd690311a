//! Handler模块

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use common::errors::AppError;
use common::models::{ConnectivityCheck, HealthAssessment, Issue, MetricSnapshot, MonitoringSettings};
use common::response::{ApiResponse, MessageData};

use crate::repository::IssueFilter;
use crate::service::{MonitoringService, MonitoringServiceTrait, PurgeResult};
use crate::state::AppState;

pub const SERVICE_NAME: &str = "monitor-service";

/// 目标服务器查询参数
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TargetQuery {
    /// SQL Server 连接串
    pub connection_string: Option<String>,
}

/// 问题列表查询参数
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct IssueQuery {
    /// 按服务器过滤（不区分大小写）
    pub server_name: Option<String>,
    /// 是否包含已解决的问题
    pub include_resolved: Option<bool>,
}

/// 服务健康状态
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub active_monitors: usize,
}

/// 检查目标服务器连通性
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/check-connectivity",
    tag = "monitoring",
    params(TargetQuery),
    responses(
        (status = 200, description = "连通性结果", body = ApiResponse<ConnectivityCheck>),
        (status = 400, description = "连接串无效")
    )
)]
pub async fn check_connectivity(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ApiResponse<ConnectivityCheck>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service
        .check_connectivity(query.connection_string.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 获取监控设置
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/settings",
    tag = "settings",
    responses(
        (status = 200, description = "当前设置", body = ApiResponse<MonitoringSettings>)
    )
)]
pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<MonitoringSettings>>, AppError> {
    let service = MonitoringService::new(&state);
    Ok(Json(ApiResponse::ok_with_service(
        service.settings().await,
        SERVICE_NAME,
    )))
}

/// 更新监控设置
#[utoipa::path(
    put,
    path = "/api/v1/monitoring/settings",
    tag = "settings",
    request_body = MonitoringSettings,
    responses(
        (status = 200, description = "设置已保存", body = ApiResponse<MonitoringSettings>),
        (status = 400, description = "设置校验失败")
    )
)]
pub async fn update_settings(
    State(state): State<AppState>,
    Json(settings): Json<MonitoringSettings>,
) -> Result<Json<ApiResponse<MonitoringSettings>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service.update_settings(settings).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 获取最新指标快照
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/metrics",
    tag = "monitoring",
    params(TargetQuery),
    responses(
        (status = 200, description = "最新快照", body = ApiResponse<MetricSnapshot>),
        (status = 400, description = "连接串无效")
    )
)]
pub async fn get_metrics(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ApiResponse<MetricSnapshot>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service.metrics(query.connection_string.as_deref()).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 获取最新健康评估
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/health",
    tag = "monitoring",
    params(TargetQuery),
    responses(
        (status = 200, description = "健康评估", body = ApiResponse<HealthAssessment>),
        (status = 400, description = "连接串无效")
    )
)]
pub async fn get_health(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ApiResponse<HealthAssessment>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service.health(query.connection_string.as_deref()).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 获取历史快照
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/history",
    tag = "monitoring",
    params(TargetQuery),
    responses(
        (status = 200, description = "历史快照（时间升序）", body = ApiResponse<Vec<MetricSnapshot>>)
    )
)]
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ApiResponse<Vec<MetricSnapshot>>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service.history(query.connection_string.as_deref()).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 启动监控
#[utoipa::path(
    post,
    path = "/api/v1/monitoring/start",
    tag = "monitoring",
    params(TargetQuery),
    responses(
        (status = 200, description = "监控已启动", body = ApiResponse<MessageData>),
        (status = 400, description = "连接串无效")
    )
)]
pub async fn start_monitoring(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ApiResponse<MessageData>>, AppError> {
    let service = MonitoringService::new(&state);
    let server = service.start(query.connection_string.as_deref()).await?;
    Ok(Json(ApiResponse::message(
        format!("Monitoring started for {}", server),
        SERVICE_NAME,
    )))
}

/// 停止监控（未指定连接串时停止全部）
#[utoipa::path(
    post,
    path = "/api/v1/monitoring/stop",
    tag = "monitoring",
    params(TargetQuery),
    responses(
        (status = 200, description = "监控已停止", body = ApiResponse<MessageData>)
    )
)]
pub async fn stop_monitoring(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ApiResponse<MessageData>>, AppError> {
    let service = MonitoringService::new(&state);
    let message = service.stop(query.connection_string.as_deref()).await?;
    Ok(Json(ApiResponse::message(message, SERVICE_NAME)))
}

/// 获取正在监控的服务器
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/status",
    tag = "monitoring",
    responses(
        (status = 200, description = "正在监控的服务器名", body = ApiResponse<Vec<String>>)
    )
)]
pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<String>>>, AppError> {
    let service = MonitoringService::new(&state);
    Ok(Json(ApiResponse::ok_with_service(
        service.status().await,
        SERVICE_NAME,
    )))
}

/// 按需检测问题
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/detect-issues",
    tag = "issues",
    params(TargetQuery),
    responses(
        (status = 200, description = "检测到的问题", body = ApiResponse<Vec<Issue>>),
        (status = 400, description = "连接串无效")
    )
)]
pub async fn detect_issues(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ApiResponse<Vec<Issue>>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service
        .detect_issues(query.connection_string.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 列出问题
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/issues",
    tag = "issues",
    params(IssueQuery),
    responses(
        (status = 200, description = "问题列表（最新在前）", body = ApiResponse<Vec<Issue>>)
    )
)]
pub async fn list_issues(
    State(state): State<AppState>,
    Query(query): Query<IssueQuery>,
) -> Result<Json<ApiResponse<Vec<Issue>>>, AppError> {
    let service = MonitoringService::new(&state);
    let filter = IssueFilter {
        server_name: query.server_name.filter(|s| !s.trim().is_empty()),
        include_resolved: query.include_resolved.unwrap_or(false),
    };
    let data = service.list_issues(filter).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 根据 ID 获取问题
#[utoipa::path(
    get,
    path = "/api/v1/monitoring/issues/{id}",
    tag = "issues",
    params(
        ("id" = String, Path, description = "问题 ID")
    ),
    responses(
        (status = 200, description = "问题详情", body = ApiResponse<Issue>),
        (status = 404, description = "问题未找到")
    )
)]
pub async fn get_issue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Issue>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service.get_issue(&id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 标记问题已解决
#[utoipa::path(
    put,
    path = "/api/v1/monitoring/issues/{id}/resolve",
    tag = "issues",
    params(
        ("id" = String, Path, description = "问题 ID")
    ),
    responses(
        (status = 200, description = "问题已解决", body = ApiResponse<Issue>),
        (status = 404, description = "问题未找到")
    )
)]
pub async fn resolve_issue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Issue>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service.resolve_issue(&id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 删除问题
#[utoipa::path(
    delete,
    path = "/api/v1/monitoring/issues/{id}",
    tag = "issues",
    params(
        ("id" = String, Path, description = "问题 ID")
    ),
    responses(
        (status = 200, description = "问题已删除", body = ApiResponse<MessageData>),
        (status = 404, description = "问题未找到")
    )
)]
pub async fn delete_issue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<MessageData>>, AppError> {
    let service = MonitoringService::new(&state);
    service.delete_issue(&id).await?;
    Ok(Json(ApiResponse::message(
        format!("Issue {} deleted", id),
        SERVICE_NAME,
    )))
}

/// 清理超过保留期的已解决问题
#[utoipa::path(
    post,
    path = "/api/v1/monitoring/issues/purge",
    tag = "issues",
    responses(
        (status = 200, description = "清理结果", body = ApiResponse<PurgeResult>)
    )
)]
pub async fn purge_issues(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PurgeResult>>, AppError> {
    let service = MonitoringService::new(&state);
    let data = service.purge_issues().await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 服务健康检查
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        active_monitors: state.scheduler.active().await.len(),
    })
}
