// ==========================================
// 养殖台账系统 - 容量账本
// ==========================================
// Barn.current_occupancy 的唯一写入方
// 不变量: 0 <= current_occupancy <= max_capacity
// 每次写入都以调用方观察到的存栏量为条件
// ==========================================

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::domain::{ActionLog, ActionType, Barn, BarnStatus, OccupancyConstraint};
use crate::engine::audit::AuditTrail;
use crate::engine::consistency::{capacity_would_exceed, occupancy_would_underflow, validate_max_capacity};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::saga::RetryPolicy;
use crate::repository::error::RepositoryError;
use crate::repository::BarnStore;

/// [`CapacityLedger::check_capacity`] 的只读结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityCheck {
    pub ok: bool,
    pub current_occupancy: i64,
    pub max_capacity: i64,
    pub remaining: i64,
}

const OPERATOR: &str = "operator";

pub struct CapacityLedger {
    barns: Arc<dyn BarnStore>,
    policy: RetryPolicy,
    audit: Option<AuditTrail>,
}

impl CapacityLedger {
    pub fn new(barns: Arc<dyn BarnStore>, policy: RetryPolicy) -> Self {
        Self {
            barns,
            policy,
            audit: None,
        }
    }

    /// 将运维操作 (登记/状态/扩缩容) 写入操作日志
    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = Some(audit);
        self
    }

    fn record(&self, entry: ActionLog) {
        if let Some(ref audit) = self.audit {
            audit.record(entry);
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    // ==========================================
    // 读取
    // ==========================================

    pub fn get_barn(&self, barn_id: &str) -> EngineResult<Barn> {
        self.barns
            .find_by_id(barn_id)?
            .ok_or_else(|| EngineError::BarnNotFound(barn_id.to_string()))
    }

    pub fn list_barns(&self) -> EngineResult<Vec<Barn>> {
        Ok(self.barns.list_all()?)
    }

    /// 只读预检；`delta` 会使存栏量超过 max_capacity 或小于 0 时 `ok` 为 false
    pub fn check_capacity(&self, barn_id: &str, delta: i64) -> EngineResult<CapacityCheck> {
        let barn = self.get_barn(barn_id)?;
        let ok = !capacity_would_exceed(barn.current_occupancy, barn.max_capacity, delta)
            && !occupancy_would_underflow(barn.current_occupancy, delta);
        Ok(CapacityCheck {
            ok,
            current_occupancy: barn.current_occupancy,
            max_capacity: barn.max_capacity,
            remaining: barn.remaining_capacity(),
        })
    }

    /// 预检失败时转换为对应错误；
    /// 返回观察到的栏舍，调用方可沿用其存栏量
    pub fn require_capacity(&self, barn_id: &str, delta: i64) -> EngineResult<Barn> {
        let barn = self.get_barn(barn_id)?;
        Self::check_rules(&barn, delta, true)?;
        Ok(barn)
    }

    fn check_rules(barn: &Barn, delta: i64, enforce_status: bool) -> EngineResult<()> {
        if enforce_status && delta > 0 && !barn.status.accepts_intake() {
            return Err(EngineError::BarnUnavailable {
                barn_id: barn.barn_id.clone(),
                status: barn.status.to_string(),
            });
        }
        if capacity_would_exceed(barn.current_occupancy, barn.max_capacity, delta) {
            return Err(EngineError::CapacityExceeded {
                barn_id: barn.barn_id.clone(),
                current_occupancy: barn.current_occupancy,
                requested: delta,
                max_capacity: barn.max_capacity,
            });
        }
        if occupancy_would_underflow(barn.current_occupancy, delta) {
            return Err(EngineError::NegativeOccupancy {
                barn_id: barn.barn_id.clone(),
                current_occupancy: barn.current_occupancy,
                delta,
            });
        }
        Ok(())
    }

    // ==========================================
    // 条件写入
    // ==========================================

    /// 存栏量仍等于 `expected_occupancy` 时应用 `delta`
    ///
    /// # 错误
    /// `CapacityExceeded`, `NegativeOccupancy`, `BarnUnavailable`,
    /// `BarnNotFound`, `ConcurrentModification`
    pub fn apply_delta(&self, barn_id: &str, delta: i64, expected_occupancy: i64) -> EngineResult<Barn> {
        self.apply(barn_id, delta, expected_occupancy, true)
    }

    fn apply(
        &self,
        barn_id: &str,
        delta: i64,
        expected_occupancy: i64,
        enforce_status: bool,
    ) -> EngineResult<Barn> {
        let barn = self.get_barn(barn_id)?;
        if barn.current_occupancy != expected_occupancy {
            return Err(EngineError::ConcurrentModification {
                entity: "Barn".to_string(),
                id: barn_id.to_string(),
            });
        }
        Self::check_rules(&barn, delta, enforce_status)?;

        match self
            .barns
            .compare_and_set_occupancy(barn_id, expected_occupancy, barn.status, expected_occupancy + delta)
        {
            Ok(updated) => {
                tracing::debug!(
                    barn_id,
                    delta,
                    occupancy = updated.current_occupancy,
                    "occupancy updated"
                );
                Ok(updated)
            }
            // 读写之间 max_capacity 被调小；重新读取后再判定
            Err(RepositoryError::CheckConstraintViolation(_)) => Err(EngineError::ConcurrentModification {
                entity: "Barn".to_string(),
                id: barn_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// 带重试策略的 `apply_delta`；首次尝试使用给定的 `observed`，
    /// 之后重新读取栏舍
    pub fn apply_delta_retrying(
        &self,
        operation: &str,
        barn_id: &str,
        delta: i64,
        observed: Option<i64>,
        deadline: Option<Instant>,
    ) -> EngineResult<Barn> {
        self.policy.run(operation, "capacity", deadline, |attempt| {
            let expected = match observed {
                Some(occupancy) if attempt == 1 => occupancy,
                _ => self.get_barn(barn_id)?.current_occupancy,
            };
            self.apply(barn_id, delta, expected, true)
        })
    }

    /// 撤销已应用的增量；忽略调用方截止时间与栏舍状态，
    /// 检修中的栏舍同样可以修复
    pub fn compensate_delta(&self, barn_id: &str, applied_delta: i64) -> EngineResult<Barn> {
        self.policy.run("compensation", "capacity", None, |_| {
            let expected = self.get_barn(barn_id)?.current_occupancy;
            self.apply(barn_id, -applied_delta, expected, false)
        })
    }

    // ==========================================
    // 运维操作
    // ==========================================

    #[instrument(skip(self))]
    pub fn register_barn(&self, name: &str, max_capacity: i64) -> EngineResult<Barn> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("barn name must not be empty".to_string()));
        }
        validate_max_capacity(max_capacity)?;

        let barn = Barn::new(
            uuid::Uuid::new_v4().to_string(),
            name.trim().to_string(),
            max_capacity,
            Utc::now().naive_utc(),
        );
        self.barns.insert(&barn)?;
        self.record(
            ActionLog::new(ActionType::BarnRegistered, OPERATOR)
                .barn(&barn.barn_id)
                .payload(json!({ "name": barn.name, "max_capacity": max_capacity })),
        );
        tracing::info!(barn_id = %barn.barn_id, max_capacity, "barn registered");
        Ok(barn)
    }

    /// 运维显式修改状态；仅存栏量为 0 时允许 `Empty`
    #[instrument(skip(self))]
    pub fn set_status(&self, barn_id: &str, status: BarnStatus) -> EngineResult<Barn> {
        let barn = self.policy.run("set_barn_status", "barn", None, |_| {
            let mut barn = self.get_barn(barn_id)?;
            if status == BarnStatus::Empty && barn.current_occupancy > 0 {
                return Err(EngineError::InvalidStateTransition {
                    entity: format!("Barn {}", barn_id),
                    from: format!("{} (occupancy {})", barn.status, barn.current_occupancy),
                    to: status.to_string(),
                });
            }
            if barn.status == status {
                return Ok(barn);
            }
            barn.status = status;
            Ok(self.barns.update_profile(&barn)?)
        })?;
        self.record(
            ActionLog::new(ActionType::BarnStatusChanged, OPERATOR)
                .barn(barn_id)
                .payload(json!({ "status": status.to_db_str() })),
        );
        Ok(barn)
    }

    /// 修改 max_capacity，不得低于当前存栏量
    #[instrument(skip(self))]
    pub fn resize(&self, barn_id: &str, new_max_capacity: i64) -> EngineResult<Barn> {
        validate_max_capacity(new_max_capacity)?;
        let barn = self.policy.run("resize_barn", "barn", None, |_| {
            let mut barn = self.get_barn(barn_id)?;
            if new_max_capacity < barn.current_occupancy {
                return Err(EngineError::Validation(format!(
                    "max capacity {} is below current occupancy {} of barn {}",
                    new_max_capacity, barn.current_occupancy, barn_id
                )));
            }
            barn.max_capacity = new_max_capacity;
            Ok(self.barns.update_profile(&barn)?)
        })?;
        self.record(
            ActionLog::new(ActionType::BarnResized, OPERATOR)
                .barn(barn_id)
                .payload(json!({ "max_capacity": new_max_capacity })),
        );
        Ok(barn)
    }
}
