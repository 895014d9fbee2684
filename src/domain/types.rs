// ==========================================
// 养殖台账系统 - 领域枚举
// ==========================================
// 在 SQLite 中以 SCREAMING_SNAKE_CASE 字符串存储 (to_db_str / from_db_str)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 栏舍状态
// ==========================================
// Empty -> Active 由容量账本在存栏量首次非零时推导
// 只有运维显式操作才会把栏舍改回 Empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarnStatus {
    Active,
    Empty,
    Maintenance,
    Incident,
}

impl BarnStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            BarnStatus::Active => "ACTIVE",
            BarnStatus::Empty => "EMPTY",
            BarnStatus::Maintenance => "MAINTENANCE",
            BarnStatus::Incident => "INCIDENT",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(BarnStatus::Active),
            "EMPTY" => Some(BarnStatus::Empty),
            "MAINTENANCE" => Some(BarnStatus::Maintenance),
            "INCIDENT" => Some(BarnStatus::Incident),
            _ => None,
        }
    }

    /// 栏舍是否可接收新牲畜
    pub fn accepts_intake(&self) -> bool {
        matches!(self, BarnStatus::Active | BarnStatus::Empty)
    }
}

impl fmt::Display for BarnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 批次状态
// ==========================================
// 仅 Raising 批次计入栏舍存栏量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    Raising,
    Sold,
    Closed,
}

impl BatchStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            BatchStatus::Raising => "RAISING",
            BatchStatus::Sold => "SOLD",
            BatchStatus::Closed => "CLOSED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "RAISING" => Some(BatchStatus::Raising),
            "SOLD" => Some(BatchStatus::Sold),
            "CLOSED" => Some(BatchStatus::Closed),
            _ => None,
        }
    }

    pub fn counts_toward_occupancy(&self) -> bool {
        matches!(self, BatchStatus::Raising)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 出入栏类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Export,
    Reintake,
}

impl MovementType {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            MovementType::Export => "EXPORT",
            MovementType::Reintake => "REINTAKE",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "EXPORT" => Some(MovementType::Export),
            "REINTAKE" => Some(MovementType::Reintake),
            _ => None,
        }
    }

    /// 数量作用于头数与存栏量时的符号
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            MovementType::Export => -quantity,
            MovementType::Reintake => quantity,
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 出入栏状态
// ==========================================
// Pending -> Completed -> Cancelled，或 Pending -> Cancelled
// 计数只在进入 Completed 时生效一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementStatus {
    Pending,
    Completed,
    Cancelled,
}

impl MovementStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            MovementStatus::Pending => "PENDING",
            MovementStatus::Completed => "COMPLETED",
            MovementStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(MovementStatus::Pending),
            "COMPLETED" => Some(MovementStatus::Completed),
            "CANCELLED" => Some(MovementStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: MovementStatus) -> bool {
        matches!(
            (self, next),
            (MovementStatus::Pending, MovementStatus::Completed)
                | (MovementStatus::Pending, MovementStatus::Cancelled)
                | (MovementStatus::Completed, MovementStatus::Cancelled)
        )
    }
}

impl fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}
