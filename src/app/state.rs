// ==========================================
// 养殖台账系统 - 应用状态
// ==========================================
// 单个共享 SQLite 连接；所有仓储、协调器与看板都在此装配
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{DashboardApi, RepositoryDataSource};
use crate::config::ConfigManager;
use crate::db::open_and_migrate;
use crate::engine::{
    ActionLogAlertSink, AuditTrail, BatchRegistry, CapacityLedger, ConsistencyAudit,
    FarmRepositories, IntakeCoordinator, MovementCoordinator, OperatorAlertSink, RetryPolicy,
};

pub struct AppState {
    pub db_path: String,
    pub config: Arc<ConfigManager>,
    pub repositories: FarmRepositories,
    pub ledger: Arc<CapacityLedger>,
    pub registry: Arc<BatchRegistry>,
    pub intake: Arc<IntakeCoordinator>,
    pub movement: Arc<MovementCoordinator>,
    pub audit: Arc<ConsistencyAudit>,
    pub dashboard: Arc<DashboardApi>,
}

impl AppState {
    /// 打开(并迁移) `db_path` 处的数据库并完成装配
    pub fn new(db_path: String) -> anyhow::Result<Self> {
        tracing::info!(db_path = %db_path, "initializing application state");

        let conn = open_and_migrate(&db_path)?;
        let conn = Arc::new(Mutex::new(conn));

        let config = Arc::new(ConfigManager::from_connection(conn.clone())?);
        let repositories = FarmRepositories::from_connection(conn);
        Self::from_parts(db_path, config, repositories)
    }

    /// 基于调用方提供的 store 装配
    pub fn from_parts(
        db_path: String,
        config: Arc<ConfigManager>,
        repositories: FarmRepositories,
    ) -> anyhow::Result<Self> {
        let coordinator_config = config.load_coordinator_config()?;
        let fallback = config.fallback_policy()?;
        let policy = RetryPolicy::from(&coordinator_config);
        let request_timeout = coordinator_config.request_timeout();
        tracing::info!(
            max_attempts = policy.max_attempts,
            request_timeout_ms = coordinator_config.request_timeout_ms,
            fallback = fallback.to_db_str(),
            "coordinator configuration loaded"
        );

        let audit_trail = AuditTrail::new(repositories.action_log.clone());
        let alerts: Arc<dyn OperatorAlertSink> =
            Arc::new(ActionLogAlertSink::new(repositories.action_log.clone()));

        let ledger = Arc::new(
            CapacityLedger::new(repositories.barns.clone(), policy.clone()).with_audit(audit_trail.clone()),
        );
        let registry = Arc::new(BatchRegistry::new(repositories.batches.clone(), policy));

        let intake = Arc::new(IntakeCoordinator::new(
            ledger.clone(),
            registry.clone(),
            repositories.intakes.clone(),
            repositories.movements.clone(),
            audit_trail.clone(),
            alerts.clone(),
            request_timeout,
        ));
        let movement = Arc::new(MovementCoordinator::new(
            ledger.clone(),
            registry.clone(),
            repositories.movements.clone(),
            audit_trail,
            alerts,
            request_timeout,
        ));
        let audit = Arc::new(ConsistencyAudit::new(
            repositories.barns.clone(),
            repositories.batches.clone(),
            repositories.intakes.clone(),
        ));
        let dashboard = Arc::new(DashboardApi::new(
            Arc::new(RepositoryDataSource::new(
                repositories.barns.clone(),
                repositories.batches.clone(),
                repositories.action_log.clone(),
            )),
            fallback,
        ));

        Ok(Self {
            db_path,
            config,
            repositories,
            ledger,
            registry,
            intake,
            movement,
            audit,
            dashboard,
        })
    }
}

/// 默认数据库路径
///
/// 优先使用 `FARM_LEDGER_DB_PATH`；否则取平台数据目录
/// (`dirs::data_dir()`)，再退回到当前工作目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("FARM_LEDGER_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./farm_ledger.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("farm-ledger");
        // 尽力而为；真正的错误由打开数据库时报告
        std::fs::create_dir_all(&dir).ok();
        path = dir.join("farm_ledger.db");
    }

    path.to_string_lossy().to_string()
}
