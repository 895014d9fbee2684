// ==========================================
// 养殖台账系统 - 看板 API
// ==========================================
// 看板/报表读侧；各实体分别读取，不提供跨实体读事务
// 数据源失败时由 FallbackPolicy 决定返回错误还是显式降级的空快照
// ==========================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::config::FallbackPolicy;
use crate::domain::{ActionLog, Barn, BarnStatus, Batch, BatchStatus, OccupancyConstraint};
use crate::repository::{ActionLogRepository, BarnStore, BatchStore, RepositoryResult};

// ==========================================
// FarmDataSource
// ==========================================

/// 看板读取的数据来源
pub trait FarmDataSource: Send + Sync {
    fn barns(&self) -> RepositoryResult<Vec<Barn>>;

    fn batches(&self) -> RepositoryResult<Vec<Batch>>;

    fn recent_actions(&self, limit: i64) -> RepositoryResult<Vec<ActionLog>>;
}

/// 基于 SQLite 仓储的数据源
pub struct RepositoryDataSource {
    barns: Arc<dyn BarnStore>,
    batches: Arc<dyn BatchStore>,
    action_log: Arc<ActionLogRepository>,
}

impl RepositoryDataSource {
    pub fn new(
        barns: Arc<dyn BarnStore>,
        batches: Arc<dyn BatchStore>,
        action_log: Arc<ActionLogRepository>,
    ) -> Self {
        Self {
            barns,
            batches,
            action_log,
        }
    }
}

impl FarmDataSource for RepositoryDataSource {
    fn barns(&self) -> RepositoryResult<Vec<Barn>> {
        self.barns.list_all()
    }

    fn batches(&self) -> RepositoryResult<Vec<Batch>> {
        self.batches.list_all()
    }

    fn recent_actions(&self, limit: i64) -> RepositoryResult<Vec<ActionLog>> {
        self.action_log.list_recent(limit)
    }
}

// ==========================================
// 快照 DTO
// ==========================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarnSummary {
    pub barn_id: String,
    pub name: String,
    pub status: BarnStatus,
    pub max_capacity: i64,
    pub current_occupancy: i64,
    pub utilization: f64,
    pub raising_batches: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmSnapshot {
    pub generated_at: NaiveDateTime,
    pub barns: Vec<BarnSummary>,
    pub total_capacity: i64,
    pub total_occupancy: i64,
    pub raising_batches: usize,
    pub raising_head_count: i64,
    pub recent_actions: Vec<ActionLog>,
    /// 数据源失败且返回了空快照降级时为 true
    pub degraded: bool,
}

impl FarmSnapshot {
    fn empty_degraded() -> Self {
        Self {
            generated_at: Utc::now().naive_utc(),
            barns: Vec::new(),
            total_capacity: 0,
            total_occupancy: 0,
            raising_batches: 0,
            raising_head_count: 0,
            recent_actions: Vec::new(),
            degraded: true,
        }
    }
}

fn summarize(barn: &Barn, raising_batches: usize) -> BarnSummary {
    BarnSummary {
        barn_id: barn.barn_id.clone(),
        name: barn.name.clone(),
        status: barn.status,
        max_capacity: barn.max_capacity,
        current_occupancy: barn.current_occupancy,
        utilization: barn.utilization(),
        raising_batches,
    }
}

// ==========================================
// DashboardApi
// ==========================================
pub struct DashboardApi {
    source: Arc<dyn FarmDataSource>,
    fallback: FallbackPolicy,
}

impl DashboardApi {
    pub fn new(source: Arc<dyn FarmDataSource>, fallback: FallbackPolicy) -> Self {
        Self { source, fallback }
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        self.fallback
    }

    /// 全场快照
    ///
    /// # 错误
    /// `FailFast` 策略下数据源失败时返回 `DataSourceUnavailable`
    pub fn snapshot(&self, recent_limit: i64) -> ApiResult<FarmSnapshot> {
        match self.load_snapshot(recent_limit) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => match self.fallback {
                FallbackPolicy::FailFast => Err(ApiError::DataSourceUnavailable(e.to_string())),
                FallbackPolicy::EmptySnapshot => {
                    tracing::warn!(error = %e, "dashboard data source failed, serving degraded snapshot");
                    Ok(FarmSnapshot::empty_degraded())
                }
            },
        }
    }

    fn load_snapshot(&self, recent_limit: i64) -> RepositoryResult<FarmSnapshot> {
        let barns = self.source.barns()?;
        let batches = self.source.batches()?;
        let recent_actions = self.source.recent_actions(recent_limit.max(0))?;

        let raising: Vec<&Batch> = batches
            .iter()
            .filter(|b| b.status == BatchStatus::Raising)
            .collect();
        let mut per_barn: HashMap<&str, usize> = HashMap::new();
        for batch in &raising {
            *per_barn.entry(batch.barn_id.as_str()).or_insert(0) += 1;
        }

        let summaries: Vec<BarnSummary> = barns
            .iter()
            .map(|barn| summarize(barn, per_barn.get(barn.barn_id.as_str()).copied().unwrap_or(0)))
            .collect();

        Ok(FarmSnapshot {
            generated_at: Utc::now().naive_utc(),
            total_capacity: barns.iter().map(|b| b.max_capacity).sum(),
            total_occupancy: barns.iter().map(|b| b.current_occupancy).sum(),
            raising_batches: raising.len(),
            raising_head_count: raising.iter().map(|b| b.current_head_count).sum(),
            barns: summaries,
            recent_actions,
            degraded: false,
        })
    }

    /// 单个栏舍概要，不受降级策略影响
    pub fn barn_summary(&self, barn_id: &str) -> ApiResult<BarnSummary> {
        if barn_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("barn id must not be empty".to_string()));
        }
        let barn = self
            .source
            .barns()?
            .into_iter()
            .find(|b| b.barn_id == barn_id)
            .ok_or_else(|| ApiError::NotFound(format!("Barn(id={})", barn_id)))?;
        let raising = self
            .source
            .batches()?
            .iter()
            .filter(|b| b.barn_id == barn_id && b.status == BatchStatus::Raising)
            .count();
        Ok(summarize(&barn, raising))
    }
}
