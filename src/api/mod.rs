// ==========================================
// 养殖台账系统 - API 层
// ==========================================
// 看板只读聚合，不做任何写入
// ==========================================

pub mod dashboard_api;
pub mod error;

pub use dashboard_api::{BarnSummary, DashboardApi, FarmDataSource, FarmSnapshot, RepositoryDataSource};
pub use error::{ApiError, ApiResult};
