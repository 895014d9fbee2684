// ==========================================
// 养殖台账系统 - 配置管理器
// ==========================================
// 存储: config_kv 表 (键值对，scope 'global')
// 缺失的键回退到类型化默认值
// ==========================================

use crate::db::configure_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    pub const MAX_ATTEMPTS: &str = "coordinator.max_attempts";
    pub const BACKOFF_BASE_MS: &str = "coordinator.backoff_base_ms";
    pub const BACKOFF_JITTER_MS: &str = "coordinator.backoff_jitter_ms";
    pub const REQUEST_TIMEOUT_MS: &str = "coordinator.request_timeout_ms";
    pub const FALLBACK_POLICY: &str = "dashboard.fallback_policy";
}

// ==========================================
// CoordinatorConfig
// ==========================================
/// 进栏与出入栏协调器共用的重试/超时配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// 每个比较并交换步骤的尝试次数，耗尽后返回 Busy
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter_ms: u64,
    /// 调用方未给出截止时间时使用
    pub request_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 20,
            backoff_jitter_ms: 30,
            request_timeout_ms: 5_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ==========================================
// FallbackPolicy
// ==========================================
/// 读侧数据源失败时的降级策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackPolicy {
    /// 直接返回错误
    FailFast,
    /// 返回标记为降级的空快照
    EmptySnapshot,
}

impl FallbackPolicy {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            FallbackPolicy::FailFast => "FAIL_FAST",
            FallbackPolicy::EmptySnapshot => "EMPTY_SNAPSHOT",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim() {
            "FAIL_FAST" => Some(FallbackPolicy::FailFast),
            "EMPTY_SNAPSHOT" => Some(FallbackPolicy::EmptySnapshot),
            _ => None,
        }
    }
}

// ==========================================
// ConfigManager
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 基于共享连接构建；重新应用统一 PRAGMA (幂等)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取全局键的原始值
    pub fn get_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入或覆盖全局键
    pub fn set_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value,
                                                     updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 全部全局键，用于快照与诊断
    pub fn snapshot(&self) -> RepositoryResult<HashMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> RepositoryResult<T> {
        match self.get_value(key)? {
            Some(raw) => raw.trim().parse::<T>().map_err(|_| {
                RepositoryError::bad_field(key, format!("cannot parse config value '{}'", raw))
            }),
            None => Ok(default),
        }
    }

    /// 协调器重试/超时配置
    ///
    /// # 错误
    /// - 存储值无法解析或 max_attempts 为 0 时返回 `FieldValueError`
    pub fn load_coordinator_config(&self) -> RepositoryResult<CoordinatorConfig> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            max_attempts: self.get_parsed(config_keys::MAX_ATTEMPTS, defaults.max_attempts)?,
            backoff_base_ms: self.get_parsed(config_keys::BACKOFF_BASE_MS, defaults.backoff_base_ms)?,
            backoff_jitter_ms: self
                .get_parsed(config_keys::BACKOFF_JITTER_MS, defaults.backoff_jitter_ms)?,
            request_timeout_ms: self
                .get_parsed(config_keys::REQUEST_TIMEOUT_MS, defaults.request_timeout_ms)?,
        };

        if config.max_attempts == 0 {
            return Err(RepositoryError::bad_field(
                config_keys::MAX_ATTEMPTS,
                "must be at least 1",
            ));
        }
        Ok(config)
    }

    pub fn fallback_policy(&self) -> RepositoryResult<FallbackPolicy> {
        match self.get_value(config_keys::FALLBACK_POLICY)? {
            Some(raw) => FallbackPolicy::from_db_str(&raw).ok_or_else(|| {
                RepositoryError::bad_field(
                    config_keys::FALLBACK_POLICY,
                    format!("unknown fallback policy '{}'", raw),
                )
            }),
            None => Ok(FallbackPolicy::FailFast),
        }
    }
}
