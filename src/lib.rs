// ==========================================
// 养殖台账系统 - 核心库
// ==========================================
// 养殖作业台账的容量/头数一致性引擎:
// 栏舍、批次、进栏记录、出入栏记录
// 存储: SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层: 实体、枚举、命令
pub mod domain;

// 仓储层: 每表一个仓储，store trait 为接缝
pub mod repository;

// 引擎层: 容量账本、批次登记、协调器、saga
pub mod engine;

// 配置层: 基于 config_kv
pub mod config;

// 数据库连接与表结构
pub mod db;

pub mod logging;

// API 层: 只读看板
pub mod api;

// 应用层: 状态装配
pub mod app;

// ==========================================
// 重导出
// ==========================================

pub use domain::{
    ActionLog, ActionType, Barn, BarnStatus, Batch, BatchStatus, IntakeCommand, IntakeDeletion,
    IntakeOutcome, IntakeRecord, IntakeUpdate, MovementCommand, MovementOutcome, MovementRecord,
    MovementStatus, MovementType,
};

pub use engine::{
    BatchRegistry, CapacityLedger, ConsistencyAudit, EngineError, EngineResult, IntakeCoordinator,
    MovementCoordinator, RequestContext, RetryPolicy,
};

pub use api::DashboardApi;
pub use app::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const APP_NAME: &str = "Farm Ledger";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
