// ==========================================
// 养殖台账系统 - 引擎错误分类
// ==========================================
// 校验/业务规则/未找到错误直接返回调用方
// ConcurrentModification 本地重试，耗尽后升级为 Busy
// PartialFailure 必然上报，并触发运维告警
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 输入错误 =====
    #[error("数据验证失败: {0}")]
    Validation(String),

    // ===== 业务规则错误 =====
    #[error("栏舍容量不足: barn={barn_id}, occupancy={current_occupancy}, requested={requested}, max={max_capacity}")]
    CapacityExceeded {
        barn_id: String,
        current_occupancy: i64,
        requested: i64,
        max_capacity: i64,
    },

    #[error("存栏量将为负: barn={barn_id}, occupancy={current_occupancy}, delta={delta}")]
    NegativeOccupancy {
        barn_id: String,
        current_occupancy: i64,
        delta: i64,
    },

    #[error("批次头数不足: batch={batch_id}, available={available}, requested={requested}")]
    InsufficientHeadCount {
        batch_id: String,
        available: i64,
        requested: i64,
    },

    #[error("栏舍 {barn_id} 当前不接收牲畜 (status={status})")]
    BarnUnavailable { barn_id: String, status: String },

    #[error("批次 {0} 仍在养，需先出栏")]
    BatchActiveRaising(String),

    #[error("批次 {0} 已关闭")]
    BatchClosed(String),

    #[error("无效的状态转换 {entity}: from={from} to={to}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
    },

    // ===== 未找到 =====
    #[error("栏舍未找到: {0}")]
    BarnNotFound(String),

    #[error("批次未找到: {0}")]
    BatchNotFound(String),

    #[error("进栏记录未找到: {0}")]
    IntakeNotFound(String),

    #[error("出入栏记录未找到: {0}")]
    MovementNotFound(String),

    // ===== 并发控制错误 =====
    #[error("并发修改冲突: {entity} {id}")]
    ConcurrentModification { entity: String, id: String },

    #[error("{entity} {id} 繁忙: 重试 {attempts} 次后放弃")]
    Busy {
        entity: String,
        id: String,
        attempts: u32,
    },

    #[error("{operation} 超时, 步骤 '{step}'")]
    Timeout { operation: String, step: String },

    // ===== 需人工对账的不一致 =====
    #[error("部分失败 {operation}: {cause}; 补偿失败: {failed_compensations:?}")]
    PartialFailure {
        operation: String,
        cause: String,
        failed_compensations: Vec<String>,
    },

    #[error(transparent)]
    Storage(RepositoryError),
}

/// [`EngineError`] 的粗粒度分组，供调用方选择响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    NotFound,
    Conflict,
    Busy,
    Timeout,
    PartialFailure,
    Internal,
}

impl ErrorKind {
    /// API 层使用的等价 HTTP 状态码
    pub fn status_hint(&self) -> u16 {
        match self {
            ErrorKind::Validation | ErrorKind::BusinessRule => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Busy => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::PartialFailure | ErrorKind::Internal => 500,
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::CapacityExceeded { .. }
            | EngineError::NegativeOccupancy { .. }
            | EngineError::InsufficientHeadCount { .. }
            | EngineError::BarnUnavailable { .. }
            | EngineError::BatchActiveRaising(_)
            | EngineError::BatchClosed(_)
            | EngineError::InvalidStateTransition { .. } => ErrorKind::BusinessRule,
            EngineError::BarnNotFound(_)
            | EngineError::BatchNotFound(_)
            | EngineError::IntakeNotFound(_)
            | EngineError::MovementNotFound(_) => ErrorKind::NotFound,
            EngineError::ConcurrentModification { .. } => ErrorKind::Conflict,
            EngineError::Busy { .. } => ErrorKind::Busy,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::PartialFailure { .. } => ErrorKind::PartialFailure,
            EngineError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// 调用方是否可以稍后原样重提
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ConcurrentModification { .. }
                | EngineError::Busy { .. }
                | EngineError::Timeout { .. }
        )
    }

    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification { .. })
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure { entity, id, .. } => {
                EngineError::ConcurrentModification { entity, id }
            }
            RepositoryError::NotFound { entity, id } => match entity.as_str() {
                "Barn" => EngineError::BarnNotFound(id),
                "Batch" => EngineError::BatchNotFound(id),
                "IntakeRecord" => EngineError::IntakeNotFound(id),
                "MovementRecord" => EngineError::MovementNotFound(id),
                _ => EngineError::Storage(RepositoryError::NotFound { entity, id }),
            },
            other => EngineError::Storage(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
