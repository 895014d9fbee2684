// ==========================================
// 养殖台账系统 - 批次仓储
// ==========================================
// 红线: 不含业务逻辑；头数写入以调用方观察到的头数与状态为条件
// ==========================================

use crate::domain::{Batch, BatchStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::enum_column;
use crate::repository::stores::BatchStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const BATCH_COLUMNS: &str = "batch_id, barn_id, breed, initial_head_count, current_head_count, \
     avg_weight_kg, status, revision, created_at, updated_at";

pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
        Ok(Batch {
            batch_id: row.get(0)?,
            barn_id: row.get(1)?,
            breed: row.get(2)?,
            initial_head_count: row.get(3)?,
            current_head_count: row.get(4)?,
            avg_weight_kg: row.get(5)?,
            status: enum_column(row, 6, BatchStatus::from_db_str)?,
            revision: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn select_one(conn: &Connection, batch_id: &str) -> RepositoryResult<Option<Batch>> {
        let sql = format!("SELECT {} FROM batch WHERE batch_id = ?1", BATCH_COLUMNS);
        Ok(conn
            .query_row(&sql, params![batch_id], Self::map_row)
            .optional()?)
    }

    fn select_many(
        conn: &Connection,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> RepositoryResult<Vec<Batch>> {
        let sql = format!(
            "SELECT {} FROM batch {} ORDER BY created_at, batch_id",
            BATCH_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(args, Self::map_row)?
            .collect::<rusqlite::Result<Vec<Batch>>>()?;
        Ok(batches)
    }
}

impl BatchStore for BatchRepository {
    fn insert(&self, batch: &Batch) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO batch (
                batch_id, barn_id, breed, initial_head_count, current_head_count,
                avg_weight_kg, status, revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                batch.batch_id,
                batch.barn_id,
                batch.breed,
                batch.initial_head_count,
                batch.current_head_count,
                batch.avg_weight_kg,
                batch.status.to_db_str(),
                batch.revision,
                batch.created_at,
                batch.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<Batch>> {
        let conn = self.get_conn()?;
        Self::select_one(&conn, batch_id)
    }

    fn list_by_barn(&self, barn_id: &str) -> RepositoryResult<Vec<Batch>> {
        let conn = self.get_conn()?;
        Self::select_many(&conn, "WHERE barn_id = ?1", &[&barn_id])
    }

    fn list_all(&self) -> RepositoryResult<Vec<Batch>> {
        let conn = self.get_conn()?;
        Self::select_many(&conn, "", &[])
    }

    fn compare_and_set_head_count(
        &self,
        batch_id: &str,
        expected_head_count: i64,
        expected_status: BatchStatus,
        new_head_count: i64,
        new_status: BatchStatus,
    ) -> RepositoryResult<Batch> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"
            UPDATE batch
               SET current_head_count = ?1, status = ?2,
                   revision = revision + 1, updated_at = ?3
             WHERE batch_id = ?4 AND current_head_count = ?5 AND status = ?6
            "#,
            params![
                new_head_count,
                new_status.to_db_str(),
                Utc::now().naive_utc(),
                batch_id,
                expected_head_count,
                expected_status.to_db_str(),
            ],
        )?;

        if rows_affected == 0 {
            return match Self::select_one(&conn, batch_id)? {
                Some(actual) => Err(RepositoryError::lock_failure(
                    "Batch",
                    batch_id,
                    format!("{}@{}", expected_head_count, expected_status),
                    format!("{}@{}", actual.current_head_count, actual.status),
                )),
                None => Err(RepositoryError::not_found("Batch", batch_id)),
            };
        }

        Self::select_one(&conn, batch_id)?
            .ok_or_else(|| RepositoryError::not_found("Batch", batch_id))
    }

    fn update(&self, batch: &Batch) -> RepositoryResult<Batch> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"
            UPDATE batch
               SET barn_id = ?1, breed = ?2, initial_head_count = ?3,
                   current_head_count = ?4, avg_weight_kg = ?5, status = ?6,
                   revision = revision + 1, updated_at = ?7
             WHERE batch_id = ?8 AND revision = ?9
            "#,
            params![
                batch.barn_id,
                batch.breed,
                batch.initial_head_count,
                batch.current_head_count,
                batch.avg_weight_kg,
                batch.status.to_db_str(),
                Utc::now().naive_utc(),
                batch.batch_id,
                batch.revision,
            ],
        )?;

        if rows_affected == 0 {
            return match Self::select_one(&conn, &batch.batch_id)? {
                Some(actual) => Err(RepositoryError::lock_failure(
                    "Batch",
                    &batch.batch_id,
                    format!("revision {}", batch.revision),
                    format!("revision {}", actual.revision),
                )),
                None => Err(RepositoryError::not_found("Batch", &batch.batch_id)),
            };
        }

        Self::select_one(&conn, &batch.batch_id)?
            .ok_or_else(|| RepositoryError::not_found("Batch", &batch.batch_id))
    }

    fn delete(&self, batch_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute("DELETE FROM batch WHERE batch_id = ?1", params![batch_id])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn setup() -> BatchRepository {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        BatchRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn make_batch(id: &str, barn: &str, head: i64) -> Batch {
        let now = Utc::now().naive_utc();
        Batch {
            batch_id: id.to_string(),
            barn_id: barn.to_string(),
            breed: "Landrace".to_string(),
            initial_head_count: head,
            current_head_count: head,
            avg_weight_kg: 25.0,
            status: BatchStatus::Raising,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_head_count_cas_guards_on_status_and_count() {
        let repo = setup();
        repo.insert(&make_batch("b1", "A", 50)).unwrap();

        let sold = repo
            .compare_and_set_head_count("b1", 50, BatchStatus::Raising, 0, BatchStatus::Sold)
            .unwrap();
        assert_eq!(sold.status, BatchStatus::Sold);
        assert_eq!(sold.current_head_count, 0);

        // 状态已过期
        let err = repo
            .compare_and_set_head_count("b1", 0, BatchStatus::Raising, 10, BatchStatus::Raising)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::OptimisticLockFailure { .. }));
    }

    #[test]
    fn test_negative_head_count_rejected_by_schema() {
        let repo = setup();
        repo.insert(&make_batch("b1", "A", 5)).unwrap();
        let err = repo
            .compare_and_set_head_count("b1", 5, BatchStatus::Raising, -1, BatchStatus::Raising)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CheckConstraintViolation(_)));
    }

    #[test]
    fn test_list_by_barn_and_delete() {
        let repo = setup();
        repo.insert(&make_batch("b1", "A", 5)).unwrap();
        repo.insert(&make_batch("b2", "A", 7)).unwrap();
        repo.insert(&make_batch("b3", "B", 9)).unwrap();

        assert_eq!(repo.list_by_barn("A").unwrap().len(), 2);
        assert!(repo.delete("b1").unwrap());
        assert!(!repo.delete("b1").unwrap());
        assert_eq!(repo.list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_update_moves_barn_with_revision_check() {
        let repo = setup();
        repo.insert(&make_batch("b1", "A", 5)).unwrap();
        let mut batch = repo.find_by_id("b1").unwrap().unwrap();
        batch.barn_id = "B".to_string();
        let moved = repo.update(&batch).unwrap();
        assert_eq!(moved.barn_id, "B");
        assert_eq!(moved.revision, 1);

        // 再次使用同一(已过期)revision
        let err = repo.update(&batch).unwrap_err();
        assert!(matches!(err, RepositoryError::OptimisticLockFailure { .. }));
    }
}
