// ==========================================
// 养殖台账系统 - 出入栏记录仓储
// ==========================================
// 记录除状态流转外不可变
// ==========================================

use crate::domain::{MovementRecord, MovementStatus, MovementType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::enum_column;
use crate::repository::stores::MovementStore;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const MOVEMENT_COLUMNS: &str = "movement_id, batch_id, barn_id, movement_type, quantity, \
     avg_weight_kg, unit_price, total_weight_kg, total_amount, counterparty_name, notes, \
     status, resulting_head_count, revision, created_at, completed_at";

pub struct MovementRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MovementRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<MovementRecord> {
        Ok(MovementRecord {
            movement_id: row.get(0)?,
            batch_id: row.get(1)?,
            barn_id: row.get(2)?,
            movement_type: enum_column(row, 3, MovementType::from_db_str)?,
            quantity: row.get(4)?,
            avg_weight_kg: row.get(5)?,
            unit_price: row.get(6)?,
            total_weight_kg: row.get(7)?,
            total_amount: row.get(8)?,
            counterparty_name: row.get(9)?,
            notes: row.get(10)?,
            status: enum_column(row, 11, MovementStatus::from_db_str)?,
            resulting_head_count: row.get(12)?,
            revision: row.get(13)?,
            created_at: row.get(14)?,
            completed_at: row.get(15)?,
        })
    }

    fn select_one(conn: &Connection, movement_id: &str) -> RepositoryResult<Option<MovementRecord>> {
        let sql = format!(
            "SELECT {} FROM movement_record WHERE movement_id = ?1",
            MOVEMENT_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![movement_id], Self::map_row)
            .optional()?)
    }
}

impl MovementStore for MovementRepository {
    fn insert(&self, record: &MovementRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO movement_record (
                movement_id, batch_id, barn_id, movement_type, quantity,
                avg_weight_kg, unit_price, total_weight_kg, total_amount,
                counterparty_name, notes, status, resulting_head_count,
                revision, created_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                record.movement_id,
                record.batch_id,
                record.barn_id,
                record.movement_type.to_db_str(),
                record.quantity,
                record.avg_weight_kg,
                record.unit_price,
                record.total_weight_kg,
                record.total_amount,
                record.counterparty_name,
                record.notes,
                record.status.to_db_str(),
                record.resulting_head_count,
                record.revision,
                record.created_at,
                record.completed_at,
            ],
        )?;
        Ok(())
    }

    fn find_by_id(&self, movement_id: &str) -> RepositoryResult<Option<MovementRecord>> {
        let conn = self.get_conn()?;
        Self::select_one(&conn, movement_id)
    }

    fn list_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<MovementRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM movement_record WHERE batch_id = ?1 ORDER BY created_at, movement_id",
            MOVEMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![batch_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<MovementRecord>>>()?;
        Ok(records)
    }

    fn count_by_batch(&self, batch_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM movement_record WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn compare_and_set_status(
        &self,
        movement_id: &str,
        expected: MovementStatus,
        new_status: MovementStatus,
        resulting_head_count: Option<i64>,
        completed_at: Option<NaiveDateTime>,
    ) -> RepositoryResult<MovementRecord> {
        let conn = self.get_conn()?;

        // COALESCE 保留此前完成时写入的值
        let rows_affected = conn.execute(
            r#"
            UPDATE movement_record
               SET status = ?1,
                   resulting_head_count = COALESCE(?2, resulting_head_count),
                   completed_at = COALESCE(?3, completed_at),
                   revision = revision + 1
             WHERE movement_id = ?4 AND status = ?5
            "#,
            params![
                new_status.to_db_str(),
                resulting_head_count,
                completed_at,
                movement_id,
                expected.to_db_str(),
            ],
        )?;

        if rows_affected == 0 {
            return match Self::select_one(&conn, movement_id)? {
                Some(actual) => Err(RepositoryError::lock_failure(
                    "MovementRecord",
                    movement_id,
                    expected,
                    actual.status,
                )),
                None => Err(RepositoryError::not_found("MovementRecord", movement_id)),
            };
        }

        Self::select_one(&conn, movement_id)?
            .ok_or_else(|| RepositoryError::not_found("MovementRecord", movement_id))
    }
}
