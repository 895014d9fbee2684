// ==========================================
// 养殖台账系统 - 运维告警
// ==========================================
// 补偿失败会让栏舍/批次真正不一致
// 这类情况经由本 trait 推送给运维人工对账，不降级为 warning
// ==========================================

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::action_log::{ActionLog, ActionType};
use crate::repository::ActionLogRepository;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub alert_id: String,
    pub operation: String,
    pub actor: String,
    pub cause: String,
    pub failed_compensations: Vec<String>,
    pub raised_at: NaiveDateTime,
}

impl OperatorAlert {
    pub fn new(operation: &str, actor: &str, cause: String, failed_compensations: Vec<String>) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            actor: actor.to_string(),
            cause,
            failed_compensations,
            raised_at: Utc::now().naive_utc(),
        }
    }
}

/// 接收需要人工对账的告警
pub trait OperatorAlertSink: Send + Sync {
    fn raise(&self, alert: &OperatorAlert);
}

fn log_alert(alert: &OperatorAlert) {
    tracing::error!(
        alert_id = %alert.alert_id,
        operation = %alert.operation,
        actor = %alert.actor,
        cause = %alert.cause,
        failed_compensations = ?alert.failed_compensations,
        "OPERATOR ALERT: compensation failed, manual reconciliation required"
    );
}

/// 仅输出 error 级日志
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

impl OperatorAlertSink for TracingAlertSink {
    fn raise(&self, alert: &OperatorAlert) {
        log_alert(alert);
    }
}

/// error 级日志 + 持久化一条 ReconciliationAlert 操作日志
pub struct ActionLogAlertSink {
    action_log_repo: Arc<ActionLogRepository>,
}

impl ActionLogAlertSink {
    pub fn new(action_log_repo: Arc<ActionLogRepository>) -> Self {
        Self { action_log_repo }
    }
}

impl OperatorAlertSink for ActionLogAlertSink {
    fn raise(&self, alert: &OperatorAlert) {
        log_alert(alert);

        let entry = ActionLog::new(ActionType::ReconciliationAlert, &alert.actor)
            .entity(&alert.alert_id)
            .payload(json!({
                "operation": alert.operation,
                "cause": alert.cause,
                "failed_compensations": alert.failed_compensations,
            }))
            .detail("compensation failed; manual reconciliation required");

        if let Err(e) = self.action_log_repo.insert(&entry) {
            // 上面的 error 日志仍是告警的记录
            tracing::error!(alert_id = %alert.alert_id, error = %e, "failed to persist operator alert");
        }
    }
}
