// ==========================================
// 养殖台账系统 - 应用层
// ==========================================
// 装配共享连接、配置、仓储与协调器
// ==========================================

pub mod state;

pub use state::{get_default_db_path, AppState};
