// ==========================================
// 养殖台账系统 - 一致性对账
// ==========================================
// 只读对账: 由在养批次重算每个栏舍的存栏量，列出所有不变量违反
// PartialFailure 告警后用于指导人工修复，从不写入
// ==========================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

use crate::domain::{BarnStatus, BatchStatus};
use crate::engine::error::EngineResult;
use crate::repository::{BarnStore, BatchStore, IntakeStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarnReconciliation {
    pub barn_id: String,
    pub name: String,
    pub status: BarnStatus,
    pub max_capacity: i64,
    pub recorded_occupancy: i64,
    /// 该栏舍下 Raising 批次 current_head_count 之和
    pub expected_occupancy: i64,
    pub drift: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Violation {
    OccupancyOutOfBounds {
        barn_id: String,
        occupancy: i64,
        max_capacity: i64,
    },
    OccupancyDrift {
        barn_id: String,
        recorded: i64,
        expected: i64,
    },
    NegativeHeadCount {
        batch_id: String,
        head_count: i64,
    },
    DepletedStillRaising {
        batch_id: String,
    },
    BatchInUnknownBarn {
        batch_id: String,
        barn_id: String,
    },
    IntakeWithoutBatch {
        intake_id: String,
        batch_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub generated_at: NaiveDateTime,
    pub barns: Vec<BarnReconciliation>,
    pub violations: Vec<Violation>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct ConsistencyAudit {
    barns: Arc<dyn BarnStore>,
    batches: Arc<dyn BatchStore>,
    intakes: Arc<dyn IntakeStore>,
}

impl ConsistencyAudit {
    pub fn new(barns: Arc<dyn BarnStore>, batches: Arc<dyn BatchStore>, intakes: Arc<dyn IntakeStore>) -> Self {
        Self {
            barns,
            batches,
            intakes,
        }
    }

    pub fn run(&self) -> EngineResult<ReconciliationReport> {
        let barns = self.barns.list_all()?;
        let batches = self.batches.list_all()?;
        let intakes = self.intakes.list_all()?;

        let mut violations = Vec::new();
        let mut expected: HashMap<&str, i64> = HashMap::new();
        let barn_ids: HashSet<&str> = barns.iter().map(|b| b.barn_id.as_str()).collect();

        for batch in &batches {
            if batch.current_head_count < 0 {
                violations.push(Violation::NegativeHeadCount {
                    batch_id: batch.batch_id.clone(),
                    head_count: batch.current_head_count,
                });
            }
            if batch.current_head_count == 0 && batch.status == BatchStatus::Raising {
                violations.push(Violation::DepletedStillRaising {
                    batch_id: batch.batch_id.clone(),
                });
            }
            if !barn_ids.contains(batch.barn_id.as_str()) {
                violations.push(Violation::BatchInUnknownBarn {
                    batch_id: batch.batch_id.clone(),
                    barn_id: batch.barn_id.clone(),
                });
            }
            *expected.entry(batch.barn_id.as_str()).or_insert(0) += batch.occupancy_contribution();
        }

        let batch_ids: HashSet<&str> = batches.iter().map(|b| b.batch_id.as_str()).collect();
        for intake in &intakes {
            if !batch_ids.contains(intake.batch_id.as_str()) {
                violations.push(Violation::IntakeWithoutBatch {
                    intake_id: intake.intake_id.clone(),
                    batch_id: intake.batch_id.clone(),
                });
            }
        }

        let mut rows = Vec::with_capacity(barns.len());
        for barn in &barns {
            if barn.current_occupancy < 0 || barn.current_occupancy > barn.max_capacity {
                violations.push(Violation::OccupancyOutOfBounds {
                    barn_id: barn.barn_id.clone(),
                    occupancy: barn.current_occupancy,
                    max_capacity: barn.max_capacity,
                });
            }
            let expected_occupancy = expected.get(barn.barn_id.as_str()).copied().unwrap_or(0);
            let drift = barn.current_occupancy - expected_occupancy;
            if drift != 0 {
                violations.push(Violation::OccupancyDrift {
                    barn_id: barn.barn_id.clone(),
                    recorded: barn.current_occupancy,
                    expected: expected_occupancy,
                });
            }
            rows.push(BarnReconciliation {
                barn_id: barn.barn_id.clone(),
                name: barn.name.clone(),
                status: barn.status,
                max_capacity: barn.max_capacity,
                recorded_occupancy: barn.current_occupancy,
                expected_occupancy,
                drift,
            });
        }

        if violations.is_empty() {
            tracing::info!(barns = rows.len(), batches = batches.len(), "reconciliation clean");
        } else {
            tracing::warn!(violations = violations.len(), "reconciliation found violations");
        }

        Ok(ReconciliationReport {
            generated_at: Utc::now().naive_utc(),
            barns: rows,
            violations,
        })
    }
}
