// ==========================================
// 养殖台账系统 - 审计轨迹
// ==========================================
// 每个已提交的协调器操作写一条 action_log
// 审计写入失败只记日志，不影响操作结果
// ==========================================

use std::sync::Arc;

use crate::domain::ActionLog;
use crate::repository::ActionLogRepository;

#[derive(Clone)]
pub struct AuditTrail {
    repo: Arc<ActionLogRepository>,
}

impl AuditTrail {
    pub fn new(repo: Arc<ActionLogRepository>) -> Self {
        Self { repo }
    }

    pub fn record(&self, entry: ActionLog) {
        if let Err(e) = self.repo.insert(&entry) {
            tracing::warn!(
                action_type = entry.action_type.as_str(),
                entity_id = ?entry.entity_id,
                error = %e,
                "failed to write audit entry"
            );
        }
    }

    pub fn repository(&self) -> &Arc<ActionLogRepository> {
        &self.repo
    }
}
