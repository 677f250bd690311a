//! 监控服务模块

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use common::errors::AppResult;
use common::models::{
    ConnectivityCheck, HealthAssessment, Issue, MetricSnapshot, MonitorTick, MonitoringSettings,
    Target,
};

use crate::analyzers::IssueAnalyzer;
use crate::pipeline::{split_recorded, MonitorPipeline};
use crate::repository::IssueFilter;
use crate::scheduler::MonitorScheduler;
use crate::settings_store::SettingsStore;
use crate::state::AppState;

/// 清理结果
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResult {
    pub purged: u64,
    pub retention_days: u32,
}

/// 监控服务 Trait
#[async_trait]
pub trait MonitoringServiceTrait: Send + Sync {
    /// 测试目标服务器连通性
    async fn check_connectivity(&self, connection_string: Option<&str>) -> AppResult<ConnectivityCheck>;

    /// 最新指标快照（无运行中的循环时按需采集）
    async fn metrics(&self, connection_string: Option<&str>) -> AppResult<MetricSnapshot>;

    /// 最新健康评估
    async fn health(&self, connection_string: Option<&str>) -> AppResult<HealthAssessment>;

    /// 保留的历史快照，按时间升序
    async fn history(&self, connection_string: Option<&str>) -> AppResult<Vec<MetricSnapshot>>;

    /// 启动监控循环，返回服务器显示名
    async fn start(&self, connection_string: Option<&str>) -> AppResult<String>;

    /// 停止监控；未指定连接串时停止全部
    async fn stop(&self, connection_string: Option<&str>) -> AppResult<String>;

    /// 正在监控的服务器
    async fn status(&self) -> Vec<String>;

    /// 按需问题检测
    async fn detect_issues(&self, connection_string: Option<&str>) -> AppResult<Vec<Issue>>;

    async fn settings(&self) -> MonitoringSettings;

    /// 更新设置并重启运行中的循环
    async fn update_settings(&self, settings: MonitoringSettings) -> AppResult<MonitoringSettings>;

    async fn list_issues(&self, filter: IssueFilter) -> AppResult<Vec<Issue>>;

    async fn get_issue(&self, id: &str) -> AppResult<Issue>;

    async fn resolve_issue(&self, id: &str) -> AppResult<Issue>;

    async fn delete_issue(&self, id: &str) -> AppResult<()>;

    /// 清理超过保留期的已解决问题
    async fn purge_issues(&self) -> AppResult<PurgeResult>;
}

/// 监控服务
pub struct MonitoringService {
    pipeline: Arc<MonitorPipeline>,
    scheduler: Arc<MonitorScheduler>,
    analyzer: Arc<IssueAnalyzer>,
    settings: Arc<SettingsStore>,
}

impl MonitoringService {
    pub fn new(state: &AppState) -> Self {
        Self {
            pipeline: state.pipeline.clone(),
            scheduler: state.scheduler.clone(),
            analyzer: state.analyzer.clone(),
            settings: state.settings.clone(),
        }
    }

    fn target(connection_string: Option<&str>) -> AppResult<Target> {
        Target::parse(connection_string.unwrap_or_default())
    }

    /// The running loop's latest tick, or a fresh one evaluated on demand.
    async fn latest_tick(&self, target: &Target) -> AppResult<Arc<MonitorTick>> {
        if self.scheduler.is_running(target.key()).await {
            if let Some(tick) = self.pipeline.history.latest(target.key()).await {
                return Ok(tick);
            }
        }
        let settings = self.settings.get().await;
        Ok(Arc::new(self.pipeline.evaluate_once(target, &settings).await))
    }
}

#[async_trait]
impl MonitoringServiceTrait for MonitoringService {
    async fn check_connectivity(&self, connection_string: Option<&str>) -> AppResult<ConnectivityCheck> {
        let target = Self::target(connection_string)?;
        Ok(self.pipeline.collector.check_connectivity(&target).await)
    }

    async fn metrics(&self, connection_string: Option<&str>) -> AppResult<MetricSnapshot> {
        let target = Self::target(connection_string)?;
        Ok(self.latest_tick(&target).await?.snapshot.clone())
    }

    async fn health(&self, connection_string: Option<&str>) -> AppResult<HealthAssessment> {
        let target = Self::target(connection_string)?;
        Ok(self.latest_tick(&target).await?.health.clone())
    }

    async fn history(&self, connection_string: Option<&str>) -> AppResult<Vec<MetricSnapshot>> {
        let target = Self::target(connection_string)?;
        Ok(self
            .pipeline
            .history
            .list(target.key())
            .await
            .iter()
            .map(|tick| tick.snapshot.clone())
            .collect())
    }

    async fn start(&self, connection_string: Option<&str>) -> AppResult<String> {
        let target = Self::target(connection_string)?;
        let name = target.display_name().to_string();
        let settings = self.settings.get().await;
        self.scheduler.start(target, settings).await;
        Ok(name)
    }

    async fn stop(&self, connection_string: Option<&str>) -> AppResult<String> {
        match connection_string.filter(|cs| !cs.trim().is_empty()) {
            Some(cs) => {
                let target = Target::parse(cs)?;
                if self.scheduler.stop(target.key()).await {
                    Ok(format!("Monitoring stopped for {}", target.display_name()))
                } else {
                    Ok(format!("Monitoring was not running for {}", target.display_name()))
                }
            }
            None => {
                let stopped = self.scheduler.stop_all().await;
                Ok(format!("Monitoring stopped for {} server(s)", stopped))
            }
        }
    }

    async fn status(&self) -> Vec<String> {
        self.scheduler.active().await
    }

    async fn detect_issues(&self, connection_string: Option<&str>) -> AppResult<Vec<Issue>> {
        let target = Self::target(connection_string)?;
        let settings = self.settings.get().await;

        let (tick, found) = tokio::join!(
            self.pipeline.evaluate_once(&target, &settings),
            self.analyzer.analyze(&target, &settings),
        );
        // An unreachable server makes every analyzer fail; the tick already
        // carries the ConnectionFailure issue. Its issues are already
        // recorded and carry stored ids.
        let mut issues = tick.issues;
        if tick.snapshot.is_connected() && !found.is_empty() {
            match self.pipeline.issues.record(found.clone()).await {
                Ok(recorded) => issues.extend(split_recorded(recorded).0),
                Err(e) => {
                    tracing::warn!(server = %target, error = %e, "Failed to record analyzer issues");
                    issues.extend(found);
                }
            }
        }
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(issues)
    }

    async fn settings(&self) -> MonitoringSettings {
        self.settings.get().await
    }

    async fn update_settings(&self, settings: MonitoringSettings) -> AppResult<MonitoringSettings> {
        let saved = self.settings.update(settings).await?;
        let restarted = self.scheduler.restart_all(&saved).await;
        tracing::info!(restarted, "设置已更新");
        Ok(saved)
    }

    async fn list_issues(&self, filter: IssueFilter) -> AppResult<Vec<Issue>> {
        self.pipeline.issues.list(&filter).await
    }

    async fn get_issue(&self, id: &str) -> AppResult<Issue> {
        self.pipeline.issues.get(id).await
    }

    async fn resolve_issue(&self, id: &str) -> AppResult<Issue> {
        let issue = self.pipeline.issues.resolve(id, Utc::now()).await?;
        tracing::info!(id = %id, "问题已解决");
        Ok(issue)
    }

    async fn delete_issue(&self, id: &str) -> AppResult<()> {
        self.pipeline.issues.delete(id).await?;
        tracing::info!(id = %id, "问题已删除");
        Ok(())
    }

    async fn purge_issues(&self) -> AppResult<PurgeResult> {
        let retention_days = self.settings.get().await.retention_days;
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let purged = self.pipeline.issues.purge_resolved_before(cutoff).await?;
        tracing::info!(purged, retention_days, "已清理过期问题");
        Ok(PurgeResult {
            purged,
            retention_days,
        })
    }
}
