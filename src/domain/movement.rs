// ==========================================
// 养殖台账系统 - 出入栏记录(出栏 / 回栏)
// ==========================================
// Completed 记录已体现在 Batch.current_head_count 与 Barn.current_occupancy 中
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::batch::Batch;
use crate::domain::types::{MovementStatus, MovementType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRecord {
    #[serde(rename = "id")]
    pub movement_id: String,
    pub batch_id: String,
    /// 记录时批次所在栏舍
    pub barn_id: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub quantity: i64,

    // ===== 单价与金额 =====
    pub avg_weight_kg: f64,
    pub unit_price: f64,
    pub total_weight_kg: f64,
    pub total_amount: f64,

    pub counterparty_name: String,
    pub notes: Option<String>,
    pub status: MovementStatus,
    /// 计数生效后的批次头数
    pub resulting_head_count: Option<i64>,

    pub revision: i64,
    #[serde(rename = "timestamp")]
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

impl MovementRecord {
    /// 完成时对头数施加的有符号增量
    pub fn head_delta(&self) -> i64 {
        self.movement_type.signed(self.quantity)
    }
}

/// API 层传入的出入栏命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementCommand {
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub batch_id: String,
    pub quantity: i64,
    /// 默认取批次平均体重
    pub avg_weight_kg: Option<f64>,
    pub unit_price: f64,
    pub counterparty_name: String,
    pub notes: Option<String>,
}

/// 计算总重量与总金额
pub fn movement_totals(quantity: i64, avg_weight_kg: f64, unit_price: f64) -> (f64, f64) {
    let total_weight_kg = quantity as f64 * avg_weight_kg;
    (total_weight_kg, total_weight_kg * unit_price)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementOutcome {
    pub movement_record: MovementRecord,
    pub batch: Batch,
}
