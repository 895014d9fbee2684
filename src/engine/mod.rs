// ==========================================
// 养殖台账系统 - 引擎层
// ==========================================
// 依赖顺序(叶子在前):
//   consistency -> capacity_ledger -> batch_registry -> {intake, movement}
// 红线: 引擎不拼 SQL，只经由 store trait 访问存储
// ==========================================

pub mod alerts;
pub mod audit;
pub mod batch_registry;
pub mod capacity_ledger;
pub mod consistency;
pub mod error;
pub mod intake;
pub mod movement;
pub mod reconcile;
pub mod repositories;
pub mod saga;

pub use alerts::{ActionLogAlertSink, OperatorAlert, OperatorAlertSink, TracingAlertSink};
pub use audit::AuditTrail;
pub use batch_registry::BatchRegistry;
pub use capacity_ledger::{CapacityCheck, CapacityLedger};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use intake::IntakeCoordinator;
pub use movement::MovementCoordinator;
pub use reconcile::{BarnReconciliation, ConsistencyAudit, ReconciliationReport, Violation};
pub use repositories::FarmRepositories;
pub use saga::{compensation, Compensation, RequestContext, RetryPolicy, Saga};
