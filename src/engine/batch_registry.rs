// ==========================================
// 养殖台账系统 - 批次登记
// ==========================================
// 批次生命周期与头数记账
// Raising --(head reaches 0 via export)--> Sold
// Sold --(re-intake)--> Raising
// Sold --(close)--> Closed
// Raising --(intake deleted)--> Closed
// 头数写入以观察到的头数与状态为条件
// ==========================================

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::instrument;

use crate::domain::{Batch, BatchStatus, NewBatch};
use crate::engine::consistency::head_count_would_underflow;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::saga::RetryPolicy;
use crate::repository::BatchStore;

pub struct BatchRegistry {
    batches: Arc<dyn BatchStore>,
    policy: RetryPolicy,
}

impl BatchRegistry {
    pub fn new(batches: Arc<dyn BatchStore>, policy: RetryPolicy) -> Self {
        Self { batches, policy }
    }

    // ==========================================
    // 读取
    // ==========================================

    pub fn get(&self, batch_id: &str) -> EngineResult<Batch> {
        self.batches
            .find_by_id(batch_id)?
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))
    }

    pub fn list_by_barn(&self, barn_id: &str) -> EngineResult<Vec<Batch>> {
        Ok(self.batches.list_by_barn(barn_id)?)
    }

    pub fn list_all(&self) -> EngineResult<Vec<Batch>> {
        Ok(self.batches.list_all()?)
    }

    // ==========================================
    // 生命周期
    // ==========================================

    /// 新建 Raising 批次，current_head_count = initial_head_count
    #[instrument(skip(self, new_batch), fields(barn_id = %new_batch.barn_id, head_count = new_batch.head_count))]
    pub fn create(&self, new_batch: &NewBatch) -> EngineResult<Batch> {
        if new_batch.head_count <= 0 {
            return Err(EngineError::Validation(format!(
                "batch head-count must be positive, got {}",
                new_batch.head_count
            )));
        }

        let now = Utc::now().naive_utc();
        let batch = Batch {
            batch_id: uuid::Uuid::new_v4().to_string(),
            barn_id: new_batch.barn_id.clone(),
            breed: new_batch.breed.clone(),
            initial_head_count: new_batch.head_count,
            current_head_count: new_batch.head_count,
            avg_weight_kg: new_batch.avg_weight_kg,
            status: BatchStatus::Raising,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        self.batches.insert(&batch)?;
        tracing::debug!(batch_id = %batch.batch_id, "batch created");
        Ok(batch)
    }

    /// 物理删除；用于回滚未完成进栏的批次，或删除无出入栏历史的批次
    pub fn delete(&self, batch_id: &str) -> EngineResult<()> {
        if !self.batches.delete(batch_id)? {
            return Err(EngineError::BatchNotFound(batch_id.to_string()));
        }
        tracing::debug!(batch_id, "batch deleted");
        Ok(())
    }

    /// 管理性关闭已出清批次
    ///
    /// # 错误
    /// 批次仍占用栏舍时返回 `BatchActiveRaising`
    #[instrument(skip(self))]
    pub fn close(&self, batch_id: &str) -> EngineResult<Batch> {
        self.policy.run("close_batch", "batch", None, |_| {
            let batch = self.get(batch_id)?;
            match batch.status {
                BatchStatus::Raising => Err(EngineError::BatchActiveRaising(batch_id.to_string())),
                BatchStatus::Closed => Ok(batch),
                BatchStatus::Sold => Ok(self.batches.compare_and_set_head_count(
                    batch_id,
                    batch.current_head_count,
                    BatchStatus::Sold,
                    batch.current_head_count,
                    BatchStatus::Closed,
                )?),
            }
        })
    }

    /// Raising -> Closed，头数保留为历史；
    /// 由调用方从栏舍释放返回批次的头数
    pub fn retire(&self, batch_id: &str, deadline: Option<Instant>) -> EngineResult<Batch> {
        self.policy.run("retire_batch", "batch", deadline, |_| {
            let batch = self.get(batch_id)?;
            if batch.status != BatchStatus::Raising {
                return Err(EngineError::InvalidStateTransition {
                    entity: format!("Batch {}", batch_id),
                    from: batch.status.to_string(),
                    to: BatchStatus::Closed.to_string(),
                });
            }
            Ok(self.batches.compare_and_set_head_count(
                batch_id,
                batch.current_head_count,
                BatchStatus::Raising,
                batch.current_head_count,
                BatchStatus::Closed,
            )?)
        })
    }

    /// Closed -> Raising，撤销 [`BatchRegistry::retire`]
    pub fn reopen(&self, batch_id: &str) -> EngineResult<Batch> {
        self.policy.run("compensation", "batch", None, |_| {
            let batch = self.get(batch_id)?;
            if batch.status != BatchStatus::Closed {
                return Err(EngineError::InvalidStateTransition {
                    entity: format!("Batch {}", batch_id),
                    from: batch.status.to_string(),
                    to: BatchStatus::Raising.to_string(),
                });
            }
            Ok(self.batches.compare_and_set_head_count(
                batch_id,
                batch.current_head_count,
                BatchStatus::Closed,
                batch.current_head_count,
                BatchStatus::Raising,
            )?)
        })
    }

    // ==========================================
    // 头数
    // ==========================================

    /// 头数仍等于 `expected_head_count` 时应用 `delta`
    /// 负增量使头数归 0 时批次转为 Sold；Sold 批次收到正增量时回到 Raising
    ///
    /// # 错误
    /// `InsufficientHeadCount`, `BatchClosed`, `BatchNotFound`,
    /// `ConcurrentModification`
    pub fn adjust_head_count(
        &self,
        batch_id: &str,
        delta: i64,
        expected_head_count: i64,
    ) -> EngineResult<Batch> {
        let batch = self.get(batch_id)?;
        if batch.status == BatchStatus::Closed {
            return Err(EngineError::BatchClosed(batch_id.to_string()));
        }
        if batch.current_head_count != expected_head_count {
            return Err(EngineError::ConcurrentModification {
                entity: "Batch".to_string(),
                id: batch_id.to_string(),
            });
        }
        if head_count_would_underflow(batch.current_head_count, delta) {
            return Err(EngineError::InsufficientHeadCount {
                batch_id: batch_id.to_string(),
                available: batch.current_head_count,
                requested: -delta,
            });
        }

        let new_head_count = batch.current_head_count + delta;
        let new_status = if delta < 0 && new_head_count == 0 {
            BatchStatus::Sold
        } else if delta > 0 && batch.status == BatchStatus::Sold {
            BatchStatus::Raising
        } else {
            batch.status
        };

        let updated = self.batches.compare_and_set_head_count(
            batch_id,
            expected_head_count,
            batch.status,
            new_head_count,
            new_status,
        )?;
        if new_status != batch.status {
            tracing::info!(batch_id, from = %batch.status, to = %new_status, "batch status changed");
        }
        Ok(updated)
    }

    /// 带重试策略的 `adjust_head_count`；首次尝试使用给定的 `observed`
    pub fn adjust_head_count_retrying(
        &self,
        operation: &str,
        batch_id: &str,
        delta: i64,
        observed: Option<i64>,
        deadline: Option<Instant>,
    ) -> EngineResult<Batch> {
        self.policy.run(operation, "head_count", deadline, |attempt| {
            let expected = match observed {
                Some(head) if attempt == 1 => head,
                _ => self.get(batch_id)?.current_head_count,
            };
            self.adjust_head_count(batch_id, delta, expected)
        })
    }

    /// 撤销已应用的头数增量，忽略截止时间
    pub fn compensate_head_count(&self, batch_id: &str, applied_delta: i64) -> EngineResult<Batch> {
        self.adjust_head_count_retrying("compensation", batch_id, -applied_delta, None, None)
    }

    /// 进栏数量修改后，将初始与当前头数同时调整 `diff`；仅 Raising 批次可修订
    pub fn revise_intake_quantity(
        &self,
        batch_id: &str,
        diff: i64,
        deadline: Option<Instant>,
    ) -> EngineResult<Batch> {
        self.policy.run("revise_intake_quantity", "batch", deadline, |_| {
            let mut batch = self.get(batch_id)?;
            if batch.status != BatchStatus::Raising {
                return Err(EngineError::InvalidStateTransition {
                    entity: format!("Batch {}", batch_id),
                    from: batch.status.to_string(),
                    to: "quantity revision".to_string(),
                });
            }
            if head_count_would_underflow(batch.current_head_count, diff) {
                return Err(EngineError::InsufficientHeadCount {
                    batch_id: batch_id.to_string(),
                    available: batch.current_head_count,
                    requested: -diff,
                });
            }
            if batch.current_head_count + diff == 0 {
                return Err(EngineError::Validation(format!(
                    "quantity edit would leave batch {} with no head; export it instead",
                    batch_id
                )));
            }
            batch.initial_head_count += diff;
            batch.current_head_count += diff;
            Ok(self.batches.update(&batch)?)
        })
    }

    // ==========================================
    // 栏舍归属
    // ==========================================

    /// 批次仍在 `from_barn_id` 时改挂到 `to_barn_id`
    /// 不改存栏量；调用方按返回批次安排两次账本增量，
    /// 返回批次的头数即改挂时所依据的头数
    ///
    /// # 错误
    /// `BatchClosed`；批次已离开 `from_barn_id` 时返回 `InvalidStateTransition`
    pub fn reassign_barn(
        &self,
        batch_id: &str,
        from_barn_id: &str,
        to_barn_id: &str,
        deadline: Option<Instant>,
    ) -> EngineResult<Batch> {
        self.policy.run("reassign_barn", "batch", deadline, |_| {
            let mut batch = self.get(batch_id)?;
            if batch.status == BatchStatus::Closed {
                return Err(EngineError::BatchClosed(batch_id.to_string()));
            }
            if batch.barn_id != from_barn_id {
                return Err(EngineError::InvalidStateTransition {
                    entity: format!("Batch {}", batch_id),
                    from: format!("barn {}", batch.barn_id),
                    to: format!("barn {}", to_barn_id),
                });
            }
            if from_barn_id == to_barn_id {
                return Ok(batch);
            }
            batch.barn_id = to_barn_id.to_string();
            Ok(self.batches.update(&batch)?)
        })
    }
}
