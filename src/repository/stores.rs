// ==========================================
// 养殖台账系统 - store trait
// ==========================================
// 引擎与持久化之间的接缝；SQLite 仓储实现这些 trait，
// 测试对其包装以注入竞争与故障
// 红线: store 不含业务逻辑，只做映射与条件写入
// ==========================================

use crate::domain::{Barn, BarnStatus, Batch, BatchStatus, IntakeRecord, MovementRecord, MovementStatus};
use crate::repository::error::RepositoryResult;
use chrono::NaiveDateTime;

// ==========================================
// BarnStore
// ==========================================
pub trait BarnStore: Send + Sync {
    fn insert(&self, barn: &Barn) -> RepositoryResult<()>;

    fn find_by_id(&self, barn_id: &str) -> RepositoryResult<Option<Barn>>;

    fn list_all(&self) -> RepositoryResult<Vec<Barn>>;

    /// 条件写入存栏量
    ///
    /// 仅当存储的存栏量与状态仍等于 `expected` 和 `expected_status` 时成功
    /// `new_occupancy > 0` 时 Empty 栏舍转为 Active
    ///
    /// # 错误
    /// - `OptimisticLockFailure`: 读取后存栏量或状态已变化
    /// - `NotFound`: barn_id 不存在
    fn compare_and_set_occupancy(
        &self,
        barn_id: &str,
        expected: i64,
        expected_status: BarnStatus,
        new_occupancy: i64,
    ) -> RepositoryResult<Barn>;

    /// 带 revision 校验写入 name / max_capacity / status
    /// 存栏量不经此路径写入
    fn update_profile(&self, barn: &Barn) -> RepositoryResult<Barn>;
}

// ==========================================
// BatchStore
// ==========================================
pub trait BatchStore: Send + Sync {
    fn insert(&self, batch: &Batch) -> RepositoryResult<()>;

    fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<Batch>>;

    fn list_by_barn(&self, barn_id: &str) -> RepositoryResult<Vec<Batch>>;

    fn list_all(&self) -> RepositoryResult<Vec<Batch>>;

    /// 条件写入头数/状态，以观察到的头数与状态为条件
    fn compare_and_set_head_count(
        &self,
        batch_id: &str,
        expected_head_count: i64,
        expected_status: BatchStatus,
        new_head_count: i64,
        new_status: BatchStatus,
    ) -> RepositoryResult<Batch>;

    /// 带 revision 校验写入全部可变列
    fn update(&self, batch: &Batch) -> RepositoryResult<Batch>;

    /// 未删除任何行时返回 false
    fn delete(&self, batch_id: &str) -> RepositoryResult<bool>;
}

// ==========================================
// IntakeStore
// ==========================================
pub trait IntakeStore: Send + Sync {
    fn insert(&self, record: &IntakeRecord) -> RepositoryResult<()>;

    fn find_by_id(&self, intake_id: &str) -> RepositoryResult<Option<IntakeRecord>>;

    fn find_by_batch(&self, batch_id: &str) -> RepositoryResult<Option<IntakeRecord>>;

    fn list_all(&self) -> RepositoryResult<Vec<IntakeRecord>>;

    /// 带 revision 校验的更新
    fn update(&self, record: &IntakeRecord) -> RepositoryResult<IntakeRecord>;

    fn delete(&self, intake_id: &str) -> RepositoryResult<bool>;
}

// ==========================================
// MovementStore
// ==========================================
pub trait MovementStore: Send + Sync {
    fn insert(&self, record: &MovementRecord) -> RepositoryResult<()>;

    fn find_by_id(&self, movement_id: &str) -> RepositoryResult<Option<MovementRecord>>;

    fn list_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<MovementRecord>>;

    fn count_by_batch(&self, batch_id: &str) -> RepositoryResult<i64>;

    /// 以观察到的状态为条件的状态流转
    fn compare_and_set_status(
        &self,
        movement_id: &str,
        expected: MovementStatus,
        new_status: MovementStatus,
        resulting_head_count: Option<i64>,
        completed_at: Option<NaiveDateTime>,
    ) -> RepositoryResult<MovementRecord>;
}
