//! 监控服务路由模块

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::{
    check_connectivity, delete_issue, detect_issues, get_health, get_history, get_issue,
    get_metrics, get_settings, get_status, health_check, list_issues, purge_issues,
    resolve_issue, start_monitoring, stop_monitoring, update_settings,
};
use crate::state::AppState;
use crate::ws::monitoring_hub;

/// 创建监控路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/monitoring/check-connectivity", get(check_connectivity))
        .route("/api/v1/monitoring/settings", get(get_settings).put(update_settings))
        .route("/api/v1/monitoring/metrics", get(get_metrics))
        .route("/api/v1/monitoring/health", get(get_health))
        .route("/api/v1/monitoring/history", get(get_history))
        .route("/api/v1/monitoring/start", post(start_monitoring))
        .route("/api/v1/monitoring/stop", post(stop_monitoring))
        .route("/api/v1/monitoring/status", get(get_status))
        .route("/api/v1/monitoring/detect-issues", get(detect_issues))
        .route("/api/v1/monitoring/issues", get(list_issues))
        .route("/api/v1/monitoring/issues/purge", post(purge_issues))
        .route("/api/v1/monitoring/issues/{id}", get(get_issue).delete(delete_issue))
        .route("/api/v1/monitoring/issues/{id}/resolve", put(resolve_issue))
        .route("/api/health", get(health_check))
        .route("/hubs/monitoring", get(monitoring_hub))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use common::models::MonitoringSettings;

    use super::*;
    use crate::collectors::fixtures;

    const CS: &str = "connectionString=Server%3Ddb01%3BUser%20Id%3Dsa%3BPassword%3Dsecret";

    fn app() -> Router {
        router().with_state(AppState::for_tests(fixtures::server(95, 3600, 5.0)))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/api/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "monitor-service");
        assert_eq!(body["activeMonitors"], 0);
    }

    #[tokio::test]
    async fn test_missing_connection_string_is_bad_request() {
        let app = app();
        for uri in [
            "/api/v1/monitoring/metrics",
            "/api/v1/monitoring/health",
            "/api/v1/monitoring/check-connectivity",
        ] {
            let (status, body) = call(&app, Method::GET, uri, Body::empty()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["success"], false);
            assert_eq!(body["error"]["code"], "INVALID_CONNECTION_STRING");
        }
    }

    #[tokio::test]
    async fn test_metrics_envelope() {
        let app = app();
        let uri = format!("/api/v1/monitoring/metrics?{}", CS);
        let (status, body) = call(&app, Method::GET, &uri, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["meta"]["service"], "monitor-service");
        assert_eq!(body["data"]["serverName"], "db01");
    }

    #[tokio::test]
    async fn test_start_status_stop_flow() {
        let app = app();
        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/monitoring/start?{}", CS),
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("db01"));

        let (_, body) = call(&app, Method::GET, "/api/v1/monitoring/status", Body::empty()).await;
        assert_eq!(body["data"], serde_json::json!(["db01"]));

        let (status, _) = call(&app, Method::POST, "/api/v1/monitoring/stop", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, Method::GET, "/api/v1/monitoring/status", Body::empty()).await;
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_issue_endpoints() {
        let app = app();
        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/monitoring/detect-issues?{}", CS),
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"][0]["id"].as_str().unwrap().to_string();

        // A repeat detection reports the stored issue, which resolves.
        let (_, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/monitoring/detect-issues?{}", CS),
            Body::empty(),
        )
        .await;
        assert_eq!(body["data"][0]["id"], id.as_str());
        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/v1/monitoring/issues/{}", id),
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(
            &app,
            Method::GET,
            "/api/v1/monitoring/issues?serverName=DB01",
            Body::empty(),
        )
        .await;
        assert!(!body["data"].as_array().unwrap().is_empty());

        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/api/v1/monitoring/issues/{}/resolve", id),
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["resolved"], true);

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/api/v1/monitoring/issues/{}", id),
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/monitoring/issues/{}", id),
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_update_settings_rejects_invalid() {
        let app = app();
        let bad = MonitoringSettings {
            cpu_threshold: -5.0,
            ..Default::default()
        };
        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/v1/monitoring/settings",
            Body::from(serde_json::to_vec(&bad).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = call(&app, Method::GET, "/api/v1/monitoring/settings", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"]["cpuThreshold"],
            serde_json::to_value(MonitoringSettings::default().cpu_threshold).unwrap()
        );
    }

    #[tokio::test]
    async fn test_hub_requires_server_name() {
        let app = app();
        let request = Request::builder()
            .uri("/hubs/monitoring")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
