// ==========================================
// 养殖台账系统 - 批次领域模型
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::BatchStatus;

// ==========================================
// Batch - 同批进栏的一群牲畜
// ==========================================
// barn_id 只是引用，不表示归属
// Sold / Closed 批次对所在栏舍存栏量贡献为 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    #[serde(rename = "id")]
    pub batch_id: String,
    pub barn_id: String,
    pub breed: String,
    pub initial_head_count: i64,
    pub current_head_count: i64,
    pub avg_weight_kg: f64,
    pub status: BatchStatus,

    pub revision: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Batch {
    /// 本批次当前计入栏舍存栏量的头数
    pub fn occupancy_contribution(&self) -> i64 {
        if self.status.counts_toward_occupancy() {
            self.current_head_count
        } else {
            0
        }
    }
}

/// 创建批次的参数
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub barn_id: String,
    pub breed: String,
    pub head_count: i64,
    pub avg_weight_kg: f64,
}
