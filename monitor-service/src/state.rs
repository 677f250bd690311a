//! Application state for monitor service.

use std::sync::Arc;
use std::time::Duration;

use common::config::AppConfig;
use common::errors::AppResult;
use common::models::HealthThresholds;

use crate::alerts::AlertDispatcher;
use crate::analyzers::IssueAnalyzer;
use crate::collector::MetricsCollector;
use crate::executor::{SqlExecutor, TdsExecutor};
use crate::history::SnapshotHistory;
use crate::hub::MetricsHub;
use crate::pipeline::MonitorPipeline;
use crate::repository::{InMemoryIssueRepository, IssueRepository, SqliteIssueRepository};
use crate::scheduler::MonitorScheduler;
use crate::settings_store::SettingsStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<MonitorPipeline>,
    pub scheduler: Arc<MonitorScheduler>,
    pub analyzer: Arc<IssueAnalyzer>,
    pub settings: Arc<SettingsStore>,
}

impl AppState {
    /// Creates the production state: TDS executor, persisted settings and
    /// the issue store named by the config.
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let executor: Arc<dyn SqlExecutor> = Arc::new(TdsExecutor::new(Duration::from_secs(
            config.connect_timeout_secs,
        )));

        let issues: Arc<dyn IssueRepository> = match &config.issue_store_url {
            Some(url) => {
                tracing::info!("Using durable issue store");
                Arc::new(SqliteIssueRepository::connect(url).await?)
            }
            None => {
                tracing::info!("Using in-memory issue store");
                Arc::new(InMemoryIssueRepository::new())
            }
        };

        let settings = Arc::new(SettingsStore::load(&config.settings_path).await?);
        Ok(Self::assemble(config, executor, issues, settings))
    }

    /// Wires the components around an executor and stores.
    pub fn assemble(
        config: AppConfig,
        executor: Arc<dyn SqlExecutor>,
        issues: Arc<dyn IssueRepository>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let query_timeout = Duration::from_secs(config.collector_timeout_secs);
        let pipeline = Arc::new(MonitorPipeline {
            collector: Arc::new(MetricsCollector::new(executor.clone(), query_timeout)),
            issues,
            history: Arc::new(SnapshotHistory::new()),
            hub: Arc::new(MetricsHub::new(config.broadcast_capacity)),
            alerts: Arc::new(AlertDispatcher::new(Duration::from_secs(
                config.connect_timeout_secs,
            ))),
            thresholds: HealthThresholds::default(),
        });

        Self {
            scheduler: Arc::new(MonitorScheduler::new(pipeline.clone())),
            analyzer: Arc::new(IssueAnalyzer::new(executor, query_timeout)),
            pipeline,
            settings,
            config,
        }
    }

    #[cfg(test)]
    pub fn for_tests(executor: crate::executor::testing::ScriptedExecutor) -> Self {
        Self::assemble(
            AppConfig::default(),
            Arc::new(executor),
            Arc::new(InMemoryIssueRepository::new()),
            Arc::new(SettingsStore::in_memory(Default::default())),
        )
    }
}
