// ==========================================
// 养殖台账系统 - 进栏记录仓储
// ==========================================

use crate::domain::IntakeRecord;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::IntakeStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const INTAKE_COLUMNS: &str = "intake_id, batch_id, barn_id, supplier_name, breed, quantity, \
     avg_weight_kg, import_date, revision, created_at, updated_at";

pub struct IntakeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl IntakeRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<IntakeRecord> {
        Ok(IntakeRecord {
            intake_id: row.get(0)?,
            batch_id: row.get(1)?,
            barn_id: row.get(2)?,
            supplier_name: row.get(3)?,
            breed: row.get(4)?,
            quantity: row.get(5)?,
            avg_weight_kg: row.get(6)?,
            import_date: row.get(7)?,
            revision: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn select_where(
        conn: &Connection,
        column: &str,
        value: &str,
    ) -> RepositoryResult<Option<IntakeRecord>> {
        let sql = format!(
            "SELECT {} FROM intake_record WHERE {} = ?1 LIMIT 1",
            INTAKE_COLUMNS, column
        );
        Ok(conn
            .query_row(&sql, params![value], Self::map_row)
            .optional()?)
    }
}

impl IntakeStore for IntakeRepository {
    fn insert(&self, record: &IntakeRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO intake_record (
                intake_id, batch_id, barn_id, supplier_name, breed, quantity,
                avg_weight_kg, import_date, revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                record.intake_id,
                record.batch_id,
                record.barn_id,
                record.supplier_name,
                record.breed,
                record.quantity,
                record.avg_weight_kg,
                record.import_date,
                record.revision,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_by_id(&self, intake_id: &str) -> RepositoryResult<Option<IntakeRecord>> {
        let conn = self.get_conn()?;
        Self::select_where(&conn, "intake_id", intake_id)
    }

    fn find_by_batch(&self, batch_id: &str) -> RepositoryResult<Option<IntakeRecord>> {
        let conn = self.get_conn()?;
        Self::select_where(&conn, "batch_id", batch_id)
    }

    fn list_all(&self) -> RepositoryResult<Vec<IntakeRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM intake_record ORDER BY import_date DESC, created_at DESC",
            INTAKE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], Self::map_row)?
            .collect::<rusqlite::Result<Vec<IntakeRecord>>>()?;
        Ok(records)
    }

    fn update(&self, record: &IntakeRecord) -> RepositoryResult<IntakeRecord> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"
            UPDATE intake_record
               SET barn_id = ?1, supplier_name = ?2, breed = ?3, quantity = ?4,
                   avg_weight_kg = ?5, import_date = ?6,
                   revision = revision + 1, updated_at = ?7
             WHERE intake_id = ?8 AND revision = ?9
            "#,
            params![
                record.barn_id,
                record.supplier_name,
                record.breed,
                record.quantity,
                record.avg_weight_kg,
                record.import_date,
                Utc::now().naive_utc(),
                record.intake_id,
                record.revision,
            ],
        )?;

        if rows_affected == 0 {
            return match Self::select_where(&conn, "intake_id", &record.intake_id)? {
                Some(actual) => Err(RepositoryError::lock_failure(
                    "IntakeRecord",
                    &record.intake_id,
                    format!("revision {}", record.revision),
                    format!("revision {}", actual.revision),
                )),
                None => Err(RepositoryError::not_found("IntakeRecord", &record.intake_id)),
            };
        }

        Self::select_where(&conn, "intake_id", &record.intake_id)?
            .ok_or_else(|| RepositoryError::not_found("IntakeRecord", &record.intake_id))
    }

    fn delete(&self, intake_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM intake_record WHERE intake_id = ?1",
            params![intake_id],
        )?;
        Ok(rows > 0)
    }
}
