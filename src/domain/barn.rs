// ==========================================
// 养殖台账系统 - 栏舍领域模型
// ==========================================
// 不变量: 0 <= current_occupancy <= max_capacity
// current_occupancy 只由容量账本写入
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::BarnStatus;
use crate::engine::consistency::{capacity_would_exceed, is_barn_full};

// ==========================================
// Barn - 实体栏舍
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Barn {
    #[serde(rename = "id")]
    pub barn_id: String,
    pub name: String,
    pub max_capacity: i64,
    pub current_occupancy: i64,
    pub status: BarnStatus,

    // ===== 记账字段 =====
    pub revision: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Barn {
    /// 新登记的空栏舍
    pub fn new(barn_id: String, name: String, max_capacity: i64, now: NaiveDateTime) -> Self {
        Self {
            barn_id,
            name,
            max_capacity,
            current_occupancy: 0,
            status: BarnStatus::Empty,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ==========================================
// Trait: OccupancyConstraint
// ==========================================
pub trait OccupancyConstraint {
    /// 再放入 `head` 头是否仍不超过 max_capacity
    fn can_house(&self, head: i64) -> bool;

    fn is_full(&self) -> bool;

    fn remaining_capacity(&self) -> i64;

    /// 存栏率 (容量为 0 时取 0.0)
    fn utilization(&self) -> f64;
}

impl OccupancyConstraint for Barn {
    fn can_house(&self, head: i64) -> bool {
        !capacity_would_exceed(self.current_occupancy, self.max_capacity, head)
    }

    fn is_full(&self) -> bool {
        is_barn_full(self.current_occupancy, self.max_capacity)
    }

    fn remaining_capacity(&self) -> i64 {
        (self.max_capacity - self.current_occupancy).max(0)
    }

    fn utilization(&self) -> f64 {
        if self.max_capacity <= 0 {
            return 0.0;
        }
        self.current_occupancy as f64 / self.max_capacity as f64
    }
}
