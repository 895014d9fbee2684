// ==========================================
// 养殖台账系统 - 行映射辅助
// ==========================================

use rusqlite::types::Type;
use rusqlite::Row;

/// 读取存放 SCREAMING_SNAKE_CASE 枚举值的 TEXT 列
pub(crate) fn enum_column<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognized enum value: {}", raw).into(),
        )
    })
}
