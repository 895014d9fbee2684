// ==========================================
// 养殖台账系统 - 操作日志(审计轨迹)
// ==========================================
// 每个完成的协调器操作写一行
// 运维告警以 ReconciliationAlert 行落在这里
// ==========================================

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub action_type: ActionType,
    pub action_ts: NaiveDateTime,
    pub actor: String,

    /// 主要涉及的实体 (intake / movement / batch / barn id)
    pub entity_id: Option<String>,
    pub barn_id: Option<String>,

    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

impl ActionLog {
    pub fn new(action_type: ActionType, actor: &str) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            action_type,
            action_ts: Utc::now().naive_utc(),
            actor: actor.to_string(),
            entity_id: None,
            barn_id: None,
            payload_json: None,
            detail: None,
        }
    }

    pub fn entity(mut self, entity_id: &str) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn barn(mut self, barn_id: &str) -> Self {
        self.barn_id = Some(barn_id.to_string());
        self
    }

    pub fn payload(mut self, payload: JsonValue) -> Self {
        self.payload_json = Some(payload);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ==========================================
// ActionType
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    BarnRegistered,
    BarnStatusChanged,
    BarnResized,
    IntakeCreated,
    IntakeUpdated,
    IntakeDeleted,
    MovementPending,
    MovementCompleted,
    MovementCancelled,
    BatchTransferred,
    BatchClosed,
    ReconciliationAlert,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::BarnRegistered => "BarnRegistered",
            ActionType::BarnStatusChanged => "BarnStatusChanged",
            ActionType::BarnResized => "BarnResized",
            ActionType::IntakeCreated => "IntakeCreated",
            ActionType::IntakeUpdated => "IntakeUpdated",
            ActionType::IntakeDeleted => "IntakeDeleted",
            ActionType::MovementPending => "MovementPending",
            ActionType::MovementCompleted => "MovementCompleted",
            ActionType::MovementCancelled => "MovementCancelled",
            ActionType::BatchTransferred => "BatchTransferred",
            ActionType::BatchClosed => "BatchClosed",
            ActionType::ReconciliationAlert => "ReconciliationAlert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let all = [
            ActionType::BarnRegistered,
            ActionType::BarnStatusChanged,
            ActionType::BarnResized,
            ActionType::IntakeCreated,
            ActionType::IntakeUpdated,
            ActionType::IntakeDeleted,
            ActionType::MovementPending,
            ActionType::MovementCompleted,
            ActionType::MovementCancelled,
            ActionType::BatchTransferred,
            ActionType::BatchClosed,
            ActionType::ReconciliationAlert,
        ];
        all.into_iter().find(|t| t.as_str() == s)
    }
}
