// ==========================================
// 养殖台账系统 - 进栏记录与命令
// ==========================================
// 一条 IntakeRecord 对应一个 Batch，同时创建
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::batch::Batch;

// ==========================================
// IntakeRecord - 一次进栏事件的持久记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRecord {
    #[serde(rename = "id")]
    pub intake_id: String,
    pub batch_id: String,
    pub barn_id: String,
    pub supplier_name: String,
    pub breed: String,
    pub quantity: i64,
    pub avg_weight_kg: f64,
    #[serde(rename = "date")]
    pub import_date: NaiveDate,

    pub revision: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// API 层传入的进栏命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeCommand {
    pub import_date: NaiveDate,
    pub supplier_name: String,
    pub breed: String,
    pub quantity: i64,
    pub avg_weight_kg: f64,
    pub barn_id: String,
}

/// 对已有进栏记录的部分修改，`None` 表示保持原值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeUpdate {
    pub import_date: Option<NaiveDate>,
    pub supplier_name: Option<String>,
    pub breed: Option<String>,
    pub quantity: Option<i64>,
    pub avg_weight_kg: Option<f64>,
    pub barn_id: Option<String>,
}

impl IntakeUpdate {
    pub fn is_empty(&self) -> bool {
        self.import_date.is_none()
            && self.supplier_name.is_none()
            && self.breed.is_none()
            && self.quantity.is_none()
            && self.avg_weight_kg.is_none()
            && self.barn_id.is_none()
    }
}

/// 进栏创建/修改的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeOutcome {
    pub intake_record: IntakeRecord,
    pub batch: Batch,
}

/// 删除进栏记录对关联批次的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeDeletion {
    /// 批次无出入栏记录，随进栏记录一并删除
    BatchRemoved,
    /// 批次被出入栏记录引用，改为关闭
    BatchClosed,
    /// 批次已是 Sold/Closed，存栏量无需变化
    CapacityUnchanged,
}
