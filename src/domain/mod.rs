// ==========================================
// 养殖台账系统 - 领域层
// ==========================================
// 实体、枚举与命令；不含数据访问和引擎逻辑
// ==========================================

pub mod action_log;
pub mod barn;
pub mod batch;
pub mod intake;
pub mod movement;
pub mod types;

pub use action_log::{ActionLog, ActionType};
pub use barn::{Barn, OccupancyConstraint};
pub use batch::{Batch, NewBatch};
pub use intake::{IntakeCommand, IntakeDeletion, IntakeOutcome, IntakeRecord, IntakeUpdate};
pub use movement::{movement_totals, MovementCommand, MovementOutcome, MovementRecord};
pub use types::{BarnStatus, BatchStatus, MovementStatus, MovementType};
