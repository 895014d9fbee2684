// ==========================================
// 养殖台账系统 - API 层错误类型
// ==========================================
// 将引擎/仓储错误转换为面向调用方的错误
// 附带等价 HTTP 状态码，供进程外 API 使用
// ==========================================

use crate::engine::error::{EngineError, ErrorKind};
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 读侧数据源失败且降级策略为 FAIL_FAST
    #[error("数据源不可用: {0}")]
    DataSourceUnavailable(String),

    #[error("引擎错误: {0}")]
    Engine(#[from] EngineError),

    #[error("数据库错误: {0}")]
    DatabaseError(String),
}

impl ApiError {
    pub fn status_hint(&self) -> u16 {
        match self {
            ApiError::InvalidInput(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::DataSourceUnavailable(_) => 503,
            ApiError::Engine(e) => e.kind().status_hint(),
            ApiError::DatabaseError(_) => ErrorKind::Internal.status_hint(),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})", entity, id))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("field {}: {}", field, message))
            }
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
