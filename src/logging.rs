// ==========================================
// 养殖台账系统 - 日志
// ==========================================
// tracing + tracing-subscriber，日志级别取自 RUST_LOG
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 初始化全局 subscriber；日志写 stderr，stdout 保持机器可读
///
/// # 环境变量
/// - RUST_LOG: 过滤指令 (默认 info)，
///   如 `RUST_LOG=debug` 或 `RUST_LOG=farm_ledger::engine=trace`
/// - FARM_LEDGER_LOG_FORMAT: 取 `json` 时每行输出一个 JSON 对象
///
/// # 示例
/// ```no_run
/// use farm_ledger::logging;
/// logging::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FARM_LEDGER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true);

    if json {
        builder.json().with_current_span(true).init();
    } else {
        builder.init();
    }
}

/// 测试用 subscriber (debug 级，经测试框架输出)，可在每个测试中重复调用
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
