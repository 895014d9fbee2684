// ==========================================
// 养殖台账系统 - 操作日志仓储
// ==========================================
// 审计轨迹与持久化的运维告警
// ==========================================

use crate::domain::action_log::{ActionLog, ActionType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::enum_column;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const ACTION_COLUMNS: &str =
    "action_id, action_type, action_ts, actor, entity_id, barn_id, payload_json, detail";

pub struct ActionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ActionLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ActionLog> {
        let payload: Option<String> = row.get(6)?;
        Ok(ActionLog {
            action_id: row.get(0)?,
            action_type: enum_column(row, 1, ActionType::parse)?,
            action_ts: row.get(2)?,
            actor: row.get(3)?,
            entity_id: row.get(4)?,
            barn_id: row.get(5)?,
            payload_json: payload.and_then(|s| serde_json::from_str(&s).ok()),
            detail: row.get(7)?,
        })
    }

    /// 插入一条日志，返回 action_id
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO action_log (
                action_id, action_type, action_ts, actor,
                entity_id, barn_id, payload_json, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                log.action_id,
                log.action_type.as_str(),
                log.action_ts,
                log.actor,
                log.entity_id,
                log.barn_id,
                log.payload_json.as_ref().map(|v| v.to_string()),
                log.detail,
            ],
        )?;
        Ok(log.action_id.clone())
    }

    /// 按时间倒序
    pub fn list_recent(&self, limit: i64) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM action_log ORDER BY action_ts DESC LIMIT ?1",
            ACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![limit], Self::map_row)?
            .collect::<rusqlite::Result<Vec<ActionLog>>>()?;
        Ok(logs)
    }

    pub fn find_by_type(&self, action_type: ActionType) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM action_log WHERE action_type = ?1 ORDER BY action_ts",
            ACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![action_type.as_str()], Self::map_row)?
            .collect::<rusqlite::Result<Vec<ActionLog>>>()?;
        Ok(logs)
    }

    pub fn find_by_entity(&self, entity_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM action_log WHERE entity_id = ?1 ORDER BY action_ts",
            ACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![entity_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<ActionLog>>>()?;
        Ok(logs)
    }
}
