// ==========================================
// 养殖台账系统 - 命令行入口
// ==========================================
// 打开(并迁移)数据库，输出对账报告
// 用法: farm-ledger [DB_PATH]
// ==========================================

use anyhow::Context;
use farm_ledger::app::{get_default_db_path, AppState};
use farm_ledger::logging;

fn main() -> anyhow::Result<()> {
    logging::init();

    let db_path = std::env::args().nth(1).unwrap_or_else(get_default_db_path);

    tracing::info!("==================================================");
    tracing::info!("{} v{}", farm_ledger::APP_NAME, farm_ledger::VERSION);
    tracing::info!("database: {}", db_path);
    tracing::info!("==================================================");

    let state = AppState::new(db_path.clone())
        .with_context(|| format!("failed to initialize state for {}", db_path))?;

    let report = state.audit.run().context("reconciliation failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_consistent() {
        tracing::warn!(
            violations = report.violations.len(),
            "inconsistencies found; manual reconciliation required"
        );
        std::process::exit(2);
    }
    Ok(())
}
