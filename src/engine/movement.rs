// ==========================================
// 养殖台账系统 - 出入栏协调器
// ==========================================
// 针对已有批次的出栏/回栏，以及批次转栏；计数只在记录完成时变化:
//   调整头数 -> 栏舍存栏增量 -> 出入栏记录(最后写)
// 取消从不改动计数，无论原状态如何
// ==========================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::domain::{
    movement_totals, ActionLog, ActionType, Batch, BatchStatus, MovementCommand, MovementOutcome,
    MovementRecord, MovementStatus, MovementType,
};
use crate::engine::alerts::OperatorAlertSink;
use crate::engine::audit::AuditTrail;
use crate::engine::batch_registry::BatchRegistry;
use crate::engine::capacity_ledger::CapacityLedger;
use crate::engine::consistency::validate_movement_command;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::saga::{compensation, RequestContext, Saga};
use crate::repository::MovementStore;

pub struct MovementCoordinator {
    ledger: Arc<CapacityLedger>,
    registry: Arc<BatchRegistry>,
    movements: Arc<dyn MovementStore>,
    audit: AuditTrail,
    alerts: Arc<dyn OperatorAlertSink>,
    request_timeout: Duration,
}

impl MovementCoordinator {
    pub fn new(
        ledger: Arc<CapacityLedger>,
        registry: Arc<BatchRegistry>,
        movements: Arc<dyn MovementStore>,
        audit: AuditTrail,
        alerts: Arc<dyn OperatorAlertSink>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            registry,
            movements,
            audit,
            alerts,
            request_timeout,
        }
    }

    pub fn get(&self, movement_id: &str) -> EngineResult<MovementRecord> {
        self.movements
            .find_by_id(movement_id)?
            .ok_or_else(|| EngineError::MovementNotFound(movement_id.to_string()))
    }

    pub fn list_by_batch(&self, batch_id: &str) -> EngineResult<Vec<MovementRecord>> {
        Ok(self.movements.list_by_batch(batch_id)?)
    }

    // ==========================================
    // 计数生效
    // ==========================================

    /// 对 `batch` 应用出入栏前的业务校验；增加头数时返回目标栏舍的存栏量
    fn precheck_counts(
        &self,
        batch: &Batch,
        movement_type: MovementType,
        quantity: i64,
    ) -> EngineResult<Option<i64>> {
        if batch.status == BatchStatus::Closed {
            return Err(EngineError::BatchClosed(batch.batch_id.clone()));
        }
        match movement_type {
            MovementType::Export => {
                if quantity > batch.current_head_count {
                    return Err(EngineError::InsufficientHeadCount {
                        batch_id: batch.batch_id.clone(),
                        available: batch.current_head_count,
                        requested: quantity,
                    });
                }
                Ok(None)
            }
            MovementType::Reintake => {
                let barn = self.ledger.require_capacity(&batch.barn_id, quantity)?;
                Ok(Some(barn.current_occupancy))
            }
        }
    }

    /// 先头数步骤后容量步骤，各自登记撤销动作
    fn apply_counts<'a>(
        &'a self,
        saga: &mut Saga<'a>,
        operation: &'static str,
        batch: &Batch,
        delta: i64,
        observed_occupancy: Option<i64>,
        deadline: Option<Instant>,
    ) -> EngineResult<Batch> {
        let ledger = self.ledger.as_ref();
        let registry = self.registry.as_ref();

        let batch_id = batch.batch_id.clone();
        let updated = saga.step(
            "adjust_head_count",
            || {
                registry.adjust_head_count_retrying(
                    operation,
                    &batch.batch_id,
                    delta,
                    Some(batch.current_head_count),
                    deadline,
                )
            },
            move |_| compensation(move || registry.compensate_head_count(&batch_id, delta).map(|_| ())),
        )?;

        let barn_id = updated.barn_id.clone();
        saga.step(
            "apply_capacity",
            || ledger.apply_delta_retrying(operation, &updated.barn_id, delta, observed_occupancy, deadline),
            move |_| compensation(move || ledger.compensate_delta(&barn_id, delta).map(|_| ())),
        )?;

        Ok(updated)
    }

    fn build_record(
        cmd: &MovementCommand,
        batch: &Batch,
        status: MovementStatus,
        resulting_head_count: Option<i64>,
    ) -> MovementRecord {
        let now = Utc::now().naive_utc();
        let avg_weight_kg = cmd.avg_weight_kg.unwrap_or(batch.avg_weight_kg);
        let (total_weight_kg, total_amount) = movement_totals(cmd.quantity, avg_weight_kg, cmd.unit_price);
        MovementRecord {
            movement_id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch.batch_id.clone(),
            barn_id: batch.barn_id.clone(),
            movement_type: cmd.movement_type,
            quantity: cmd.quantity,
            avg_weight_kg,
            unit_price: cmd.unit_price,
            total_weight_kg,
            total_amount,
            counterparty_name: cmd.counterparty_name.trim().to_string(),
            notes: cmd.notes.clone(),
            status,
            resulting_head_count,
            revision: 0,
            created_at: now,
            completed_at: if status == MovementStatus::Completed {
                Some(now)
            } else {
                None
            },
        }
    }

    fn audit_movement(&self, action_type: ActionType, actor: &str, record: &MovementRecord) {
        self.audit.record(
            ActionLog::new(action_type, actor)
                .entity(&record.movement_id)
                .barn(&record.barn_id)
                .payload(json!({
                    "batch_id": record.batch_id,
                    "type": record.movement_type.to_db_str(),
                    "quantity": record.quantity,
                    "status": record.status.to_db_str(),
                    "resulting_head_count": record.resulting_head_count,
                })),
        );
    }

    // ==========================================
    // 即时出入栏
    // ==========================================

    /// 记录一次出栏或回栏并立即生效
    ///
    /// 出栏要求 `quantity <= current_head_count`，出清后批次转为 Sold；
    /// 对 Sold 批次回栏会使其回到 Raising
    /// 两项计数都变更后才写入 Completed 记录
    #[instrument(skip(self, ctx, cmd), fields(actor = %ctx.actor, batch_id = %cmd.batch_id, kind = %cmd.movement_type, quantity = cmd.quantity))]
    pub fn record(&self, ctx: &RequestContext, cmd: &MovementCommand) -> EngineResult<MovementOutcome> {
        validate_movement_command(cmd)?;
        let ctx = ctx.or_default_timeout(self.request_timeout);
        let batch = self.registry.get(&cmd.batch_id)?;
        let observed = self.precheck_counts(&batch, cmd.movement_type, cmd.quantity)?;

        let mut saga = Saga::begin("movement.record", &ctx, self.alerts.as_ref());
        let updated = self.apply_counts(
            &mut saga,
            "movement.record",
            &batch,
            cmd.movement_type.signed(cmd.quantity),
            observed,
            ctx.deadline,
        )?;

        let record = Self::build_record(
            cmd,
            &updated,
            MovementStatus::Completed,
            Some(updated.current_head_count),
        );
        saga.final_step("persist_movement", || Ok(self.movements.insert(&record)?))?;
        saga.commit();

        self.audit_movement(ActionType::MovementCompleted, &ctx.actor, &record);
        tracing::info!(
            movement_id = %record.movement_id,
            head_count = updated.current_head_count,
            "movement recorded"
        );
        Ok(MovementOutcome {
            movement_record: record,
            batch: updated,
        })
    }

    pub fn export(&self, ctx: &RequestContext, cmd: &MovementCommand) -> EngineResult<MovementOutcome> {
        if cmd.movement_type != MovementType::Export {
            return Err(EngineError::Validation("export requires an export command".to_string()));
        }
        self.record(ctx, cmd)
    }

    pub fn reintake(&self, ctx: &RequestContext, cmd: &MovementCommand) -> EngineResult<MovementOutcome> {
        if cmd.movement_type != MovementType::Reintake {
            return Err(EngineError::Validation("reintake requires a reintake command".to_string()));
        }
        self.record(ctx, cmd)
    }

    // ==========================================
    // 待完成出入栏
    // ==========================================

    /// 保存 Pending 记录，`complete` 之前不改动计数
    #[instrument(skip(self, ctx, cmd), fields(actor = %ctx.actor, batch_id = %cmd.batch_id))]
    pub fn submit_pending(&self, ctx: &RequestContext, cmd: &MovementCommand) -> EngineResult<MovementRecord> {
        validate_movement_command(cmd)?;
        let batch = self.registry.get(&cmd.batch_id)?;
        if batch.status == BatchStatus::Closed {
            return Err(EngineError::BatchClosed(batch.batch_id));
        }

        let record = Self::build_record(cmd, &batch, MovementStatus::Pending, None);
        self.movements.insert(&record)?;
        self.audit_movement(ActionType::MovementPending, &ctx.actor, &record);
        tracing::info!(movement_id = %record.movement_id, "pending movement submitted");
        Ok(record)
    }

    /// 应用 Pending 记录的计数并转为 Completed；
    /// 状态流转落败(如被并发取消)时撤销计数
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn complete(&self, ctx: &RequestContext, movement_id: &str) -> EngineResult<MovementOutcome> {
        let ctx = ctx.or_default_timeout(self.request_timeout);
        let pending = self.get(movement_id)?;
        if !pending.status.can_transition_to(MovementStatus::Completed) {
            return Err(EngineError::InvalidStateTransition {
                entity: format!("MovementRecord {}", movement_id),
                from: pending.status.to_string(),
                to: MovementStatus::Completed.to_string(),
            });
        }

        let batch = self.registry.get(&pending.batch_id)?;
        let observed = self.precheck_counts(&batch, pending.movement_type, pending.quantity)?;

        let mut saga = Saga::begin("movement.complete", &ctx, self.alerts.as_ref());
        let updated = self.apply_counts(
            &mut saga,
            "movement.complete",
            &batch,
            pending.head_delta(),
            observed,
            ctx.deadline,
        )?;

        let completed = saga.final_step("complete_movement", || {
            Ok(self.movements.compare_and_set_status(
                movement_id,
                MovementStatus::Pending,
                MovementStatus::Completed,
                Some(updated.current_head_count),
                Some(Utc::now().naive_utc()),
            )?)
        })?;
        saga.commit();

        self.audit_movement(ActionType::MovementCompleted, &ctx.actor, &completed);
        tracing::info!(movement_id, head_count = updated.current_head_count, "movement completed");
        Ok(MovementOutcome {
            movement_record: completed,
            batch: updated,
        })
    }

    /// 取消 Pending 或 Completed 记录，不再改动计数
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn cancel(&self, ctx: &RequestContext, movement_id: &str) -> EngineResult<MovementRecord> {
        let current = self.get(movement_id)?;
        if !current.status.can_transition_to(MovementStatus::Cancelled) {
            return Err(EngineError::InvalidStateTransition {
                entity: format!("MovementRecord {}", movement_id),
                from: current.status.to_string(),
                to: MovementStatus::Cancelled.to_string(),
            });
        }

        let cancelled = self.movements.compare_and_set_status(
            movement_id,
            current.status,
            MovementStatus::Cancelled,
            None,
            None,
        )?;
        self.audit_movement(ActionType::MovementCancelled, &ctx.actor, &cancelled);
        tracing::info!(movement_id, from = %current.status, "movement cancelled");
        Ok(cancelled)
    }

    // ==========================================
    // 批次级操作
    // ==========================================

    /// 批次转栏: 改挂栏舍、释放旧栏、占用新栏
    /// 只有 Raising 批次的头数影响存栏量，且迁移的头数以改挂时的条件为准
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn transfer_batch(&self, ctx: &RequestContext, batch_id: &str, new_barn_id: &str) -> EngineResult<Batch> {
        let ctx = ctx.or_default_timeout(self.request_timeout);
        let batch = self.registry.get(batch_id)?;
        if batch.status == BatchStatus::Closed {
            return Err(EngineError::BatchClosed(batch_id.to_string()));
        }
        if batch.barn_id == new_barn_id {
            return Ok(batch);
        }

        // 目标栏舍快速失败；写入时按最终头数再校验
        let planned = batch.occupancy_contribution();
        let observed = if planned > 0 {
            Some(self.ledger.require_capacity(new_barn_id, planned)?.current_occupancy)
        } else {
            self.ledger.get_barn(new_barn_id)?;
            None
        };

        let ledger = self.ledger.as_ref();
        let registry = self.registry.as_ref();
        let old_barn_id = batch.barn_id.clone();
        let deadline = ctx.deadline;
        let mut saga = Saga::begin("batch.transfer", &ctx, self.alerts.as_ref());

        let (back_from, back_to) = (new_barn_id.to_string(), old_barn_id.clone());
        let id = batch_id.to_string();
        let moved = saga.step(
            "reassign_batch",
            || registry.reassign_barn(batch_id, &old_barn_id, new_barn_id, deadline),
            move |_| compensation(move || registry.reassign_barn(&id, &back_from, &back_to, None).map(|_| ())),
        )?;

        let head = moved.occupancy_contribution();
        if head != planned {
            tracing::debug!(batch_id, planned, head, "head-count changed before reassignment");
        }
        if head > 0 {
            let released_from = old_barn_id.clone();
            saga.step(
                "release_old_barn",
                || ledger.apply_delta_retrying("batch.transfer", &old_barn_id, -head, None, deadline),
                move |_| compensation(move || ledger.compensate_delta(&released_from, -head).map(|_| ())),
            )?;

            let occupied = new_barn_id.to_string();
            saga.step(
                "occupy_new_barn",
                || ledger.apply_delta_retrying("batch.transfer", new_barn_id, head, observed, deadline),
                move |_| compensation(move || ledger.compensate_delta(&occupied, head).map(|_| ())),
            )?;
        }
        saga.commit();

        self.audit.record(
            ActionLog::new(ActionType::BatchTransferred, &ctx.actor)
                .entity(batch_id)
                .barn(new_barn_id)
                .payload(json!({ "from": old_barn_id, "to": new_barn_id, "head": head })),
        );
        tracing::info!(batch_id, from = %old_barn_id, to = new_barn_id, head, "batch transferred");
        Ok(moved)
    }

    /// 管理性关闭已出清批次
    pub fn close_batch(&self, ctx: &RequestContext, batch_id: &str) -> EngineResult<Batch> {
        let closed = self.registry.close(batch_id)?;
        self.audit.record(
            ActionLog::new(ActionType::BatchClosed, &ctx.actor)
                .entity(batch_id)
                .barn(&closed.barn_id),
        );
        Ok(closed)
    }
}
