// ==========================================
// 养殖台账系统 - 引擎仓储集合
// ==========================================
// 汇总引擎所需的 store，协调器由单个值装配
// 测试中可替换单个 store 为故障注入包装
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::repository::{
    ActionLogRepository, BarnRepository, BarnStore, BatchRepository, BatchStore, IntakeRepository,
    IntakeStore, MovementRepository, MovementStore,
};

/// 引擎访问的全部 store (trait 对象)
///
/// # 成员
/// - `barns`: 栏舍，存栏量 CAS
/// - `batches`: 批次，头数 CAS
/// - `intakes`: 进栏记录
/// - `movements`: 出入栏记录，状态 CAS
/// - `action_log`: 审计轨迹与持久化告警
#[derive(Clone)]
pub struct FarmRepositories {
    pub barns: Arc<dyn BarnStore>,
    pub batches: Arc<dyn BatchStore>,
    pub intakes: Arc<dyn IntakeStore>,
    pub movements: Arc<dyn MovementStore>,
    pub action_log: Arc<ActionLogRepository>,
}

impl FarmRepositories {
    /// 共享同一连接的 SQLite store
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            barns: Arc::new(BarnRepository::new(conn.clone())),
            batches: Arc::new(BatchRepository::new(conn.clone())),
            intakes: Arc::new(IntakeRepository::new(conn.clone())),
            movements: Arc::new(MovementRepository::new(conn.clone())),
            action_log: Arc::new(ActionLogRepository::new(conn)),
        }
    }

    pub fn with_barns(mut self, barns: Arc<dyn BarnStore>) -> Self {
        self.barns = barns;
        self
    }

    pub fn with_batches(mut self, batches: Arc<dyn BatchStore>) -> Self {
        self.batches = batches;
        self
    }
}
