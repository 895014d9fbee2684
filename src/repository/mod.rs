// ==========================================
// 养殖台账系统 - 仓储层
// ==========================================
// 红线: 仓储层不含业务逻辑
// 红线: 所有查询参数化
// ==========================================
// 每张核心表一个仓储，实现对应的 store trait
// 存栏量/头数/状态写入均为比较并交换语句
// ==========================================

pub mod action_log_repo;
pub mod barn_repo;
pub mod batch_repo;
pub mod error;
pub mod intake_repo;
pub mod movement_repo;
mod row_mapping;
pub mod stores;

pub use action_log_repo::ActionLogRepository;
pub use barn_repo::BarnRepository;
pub use batch_repo::BatchRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use intake_repo::IntakeRepository;
pub use movement_repo::MovementRepository;
pub use stores::{BarnStore, BatchStore, IntakeStore, MovementStore};
