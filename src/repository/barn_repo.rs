// ==========================================
// 养殖台账系统 - 栏舍仓储
// ==========================================
// 红线: 不含业务逻辑；存栏量只经由下方的比较并交换语句写入
// ==========================================

use crate::domain::{Barn, BarnStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::enum_column;
use crate::repository::stores::BarnStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const BARN_COLUMNS: &str =
    "barn_id, name, max_capacity, current_occupancy, status, revision, created_at, updated_at";

// ==========================================
// BarnRepository
// ==========================================
pub struct BarnRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BarnRepository {
    /// 基于共享连接构建
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Barn> {
        Ok(Barn {
            barn_id: row.get(0)?,
            name: row.get(1)?,
            max_capacity: row.get(2)?,
            current_occupancy: row.get(3)?,
            status: enum_column(row, 4, BarnStatus::from_db_str)?,
            revision: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn select_one(conn: &Connection, barn_id: &str) -> RepositoryResult<Option<Barn>> {
        let sql = format!("SELECT {} FROM barn WHERE barn_id = ?1", BARN_COLUMNS);
        let barn = conn
            .query_row(&sql, params![barn_id], Self::map_row)
            .optional()?;
        Ok(barn)
    }
}

impl BarnStore for BarnRepository {
    fn insert(&self, barn: &Barn) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO barn (
                barn_id, name, max_capacity, current_occupancy, status,
                revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                barn.barn_id,
                barn.name,
                barn.max_capacity,
                barn.current_occupancy,
                barn.status.to_db_str(),
                barn.revision,
                barn.created_at,
                barn.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_by_id(&self, barn_id: &str) -> RepositoryResult<Option<Barn>> {
        let conn = self.get_conn()?;
        Self::select_one(&conn, barn_id)
    }

    fn list_all(&self) -> RepositoryResult<Vec<Barn>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM barn ORDER BY name, barn_id", BARN_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let barns = stmt
            .query_map([], Self::map_row)?
            .collect::<rusqlite::Result<Vec<Barn>>>()?;
        Ok(barns)
    }

    fn compare_and_set_occupancy(
        &self,
        barn_id: &str,
        expected: i64,
        expected_status: BarnStatus,
        new_occupancy: i64,
    ) -> RepositoryResult<Barn> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"
            UPDATE barn
               SET current_occupancy = ?1,
                   status = CASE WHEN status = 'EMPTY' AND ?1 > 0 THEN 'ACTIVE' ELSE status END,
                   revision = revision + 1,
                   updated_at = ?2
             WHERE barn_id = ?3 AND current_occupancy = ?4 AND status = ?5
            "#,
            params![
                new_occupancy,
                Utc::now().naive_utc(),
                barn_id,
                expected,
                expected_status.to_db_str(),
            ],
        )?;

        if rows_affected == 0 {
            // 行不存在或竞争落败
            return match Self::select_one(&conn, barn_id)? {
                Some(actual) => Err(RepositoryError::lock_failure(
                    "Barn",
                    barn_id,
                    format!("{} ({})", expected, expected_status),
                    format!("{} ({})", actual.current_occupancy, actual.status),
                )),
                None => Err(RepositoryError::not_found("Barn", barn_id)),
            };
        }

        Self::select_one(&conn, barn_id)?
            .ok_or_else(|| RepositoryError::not_found("Barn", barn_id))
    }

    fn update_profile(&self, barn: &Barn) -> RepositoryResult<Barn> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"
            UPDATE barn
               SET name = ?1, max_capacity = ?2, status = ?3,
                   revision = revision + 1, updated_at = ?4
             WHERE barn_id = ?5 AND revision = ?6
            "#,
            params![
                barn.name,
                barn.max_capacity,
                barn.status.to_db_str(),
                Utc::now().naive_utc(),
                barn.barn_id,
                barn.revision,
            ],
        )?;

        if rows_affected == 0 {
            return match Self::select_one(&conn, &barn.barn_id)? {
                Some(actual) => Err(RepositoryError::lock_failure(
                    "Barn",
                    &barn.barn_id,
                    format!("revision {}", barn.revision),
                    format!("revision {}", actual.revision),
                )),
                None => Err(RepositoryError::not_found("Barn", &barn.barn_id)),
            };
        }

        Self::select_one(&conn, &barn.barn_id)?
            .ok_or_else(|| RepositoryError::not_found("Barn", &barn.barn_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup() -> BarnRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        BarnRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn seed(repo: &BarnRepository, id: &str, max: i64) -> Barn {
        let barn = Barn::new(id.to_string(), format!("Barn {}", id), max, Utc::now().naive_utc());
        repo.insert(&barn).unwrap();
        barn
    }

    #[test]
    fn test_cas_applies_and_activates_empty_barn() {
        let repo = setup();
        seed(&repo, "A", 100);

        let barn = repo.compare_and_set_occupancy("A", 0, BarnStatus::Empty, 40).unwrap();
        assert_eq!(barn.current_occupancy, 40);
        assert_eq!(barn.status, BarnStatus::Active);
        assert_eq!(barn.revision, 1);
    }

    #[test]
    fn test_cas_does_not_force_barn_back_to_empty() {
        let repo = setup();
        seed(&repo, "A", 100);
        repo.compare_and_set_occupancy("A", 0, BarnStatus::Empty, 40).unwrap();

        let barn = repo.compare_and_set_occupancy("A", 40, BarnStatus::Active, 0).unwrap();
        assert_eq!(barn.current_occupancy, 0);
        assert_eq!(barn.status, BarnStatus::Active);
    }

    #[test]
    fn test_cas_with_stale_expectation_fails() {
        let repo = setup();
        seed(&repo, "A", 100);
        repo.compare_and_set_occupancy("A", 0, BarnStatus::Empty, 10).unwrap();

        let err = repo.compare_and_set_occupancy("A", 0, BarnStatus::Active, 20).unwrap_err();
        assert!(matches!(err, RepositoryError::OptimisticLockFailure { .. }));
        assert_eq!(repo.find_by_id("A").unwrap().unwrap().current_occupancy, 10);
    }

    #[test]
    fn test_cas_fails_when_status_changed_underneath() {
        let repo = setup();
        seed(&repo, "A", 100);
        repo.compare_and_set_occupancy("A", 0, BarnStatus::Empty, 10).unwrap();

        let mut barn = repo.find_by_id("A").unwrap().unwrap();
        barn.status = BarnStatus::Maintenance;
        repo.update_profile(&barn).unwrap();

        let err = repo
            .compare_and_set_occupancy("A", 10, BarnStatus::Active, 20)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::OptimisticLockFailure { .. }));
        assert_eq!(repo.find_by_id("A").unwrap().unwrap().current_occupancy, 10);
    }

    #[test]
    fn test_cas_on_missing_barn_is_not_found() {
        let repo = setup();
        let err = repo.compare_and_set_occupancy("nope", 0, BarnStatus::Empty, 1).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }

    #[test]
    fn test_cas_beyond_capacity_hits_check_constraint() {
        let repo = setup();
        seed(&repo, "A", 10);
        let err = repo.compare_and_set_occupancy("A", 0, BarnStatus::Empty, 11).unwrap_err();
        assert!(matches!(err, RepositoryError::CheckConstraintViolation(_)));
    }

    #[test]
    fn test_update_profile_checks_revision() {
        let repo = setup();
        let stale = seed(&repo, "A", 10);
        repo.compare_and_set_occupancy("A", 0, BarnStatus::Empty, 5).unwrap();

        let mut edit = stale.clone();
        edit.name = "Renamed".to_string();
        let err = repo.update_profile(&edit).unwrap_err();
        assert!(matches!(err, RepositoryError::OptimisticLockFailure { .. }));

        let mut fresh = repo.find_by_id("A").unwrap().unwrap();
        fresh.name = "Renamed".to_string();
        let saved = repo.update_profile(&fresh).unwrap();
        assert_eq!(saved.name, "Renamed");
        assert_eq!(saved.current_occupancy, 5);
    }
}
