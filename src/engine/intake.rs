// ==========================================
// 养殖台账系统 - 进栏协调器
// ==========================================
// 进栏事件的创建/修改/删除，级联到批次登记与容量账本
// 步骤顺序: 容量预检 -> 批次变更 -> 容量变更 -> 进栏记录持久化
// 已生效步骤按逆序补偿
// ==========================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::domain::{
    ActionLog, ActionType, BatchStatus, IntakeCommand, IntakeDeletion, IntakeOutcome, IntakeRecord,
    IntakeUpdate, NewBatch,
};
use crate::engine::alerts::OperatorAlertSink;
use crate::engine::audit::AuditTrail;
use crate::engine::batch_registry::BatchRegistry;
use crate::engine::capacity_ledger::CapacityLedger;
use crate::engine::consistency::{validate_intake_command, validate_intake_update};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::saga::{compensation, RequestContext, Saga};
use crate::repository::{IntakeStore, MovementStore};

pub struct IntakeCoordinator {
    ledger: Arc<CapacityLedger>,
    registry: Arc<BatchRegistry>,
    intakes: Arc<dyn IntakeStore>,
    movements: Arc<dyn MovementStore>,
    audit: AuditTrail,
    alerts: Arc<dyn OperatorAlertSink>,
    request_timeout: Duration,
}

impl IntakeCoordinator {
    pub fn new(
        ledger: Arc<CapacityLedger>,
        registry: Arc<BatchRegistry>,
        intakes: Arc<dyn IntakeStore>,
        movements: Arc<dyn MovementStore>,
        audit: AuditTrail,
        alerts: Arc<dyn OperatorAlertSink>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            registry,
            intakes,
            movements,
            audit,
            alerts,
            request_timeout,
        }
    }

    pub fn get(&self, intake_id: &str) -> EngineResult<IntakeRecord> {
        self.intakes
            .find_by_id(intake_id)?
            .ok_or_else(|| EngineError::IntakeNotFound(intake_id.to_string()))
    }

    pub fn list(&self) -> EngineResult<Vec<IntakeRecord>> {
        Ok(self.intakes.list_all()?)
    }

    // ==========================================
    // 创建
    // ==========================================

    /// 登记进栏: 新建 Raising 批次，栏舍 +quantity，最后写进栏记录
    ///
    /// # 错误
    /// - 写入前: `Validation`、`CapacityExceeded`、`BarnUnavailable`、`BarnNotFound`
    /// - 批次回滚后: `Busy` / `Timeout`
    /// - 回滚本身失败: `PartialFailure`
    #[instrument(skip(self, ctx, cmd), fields(actor = %ctx.actor, barn_id = %cmd.barn_id, quantity = cmd.quantity))]
    pub fn create(&self, ctx: &RequestContext, cmd: &IntakeCommand) -> EngineResult<IntakeOutcome> {
        validate_intake_command(cmd)?;
        let ctx = ctx.or_default_timeout(self.request_timeout);
        let observed = self.ledger.require_capacity(&cmd.barn_id, cmd.quantity)?;

        let ledger = self.ledger.as_ref();
        let registry = self.registry.as_ref();
        let mut saga = Saga::begin("intake.create", &ctx, self.alerts.as_ref());

        let batch = saga.step(
            "create_batch",
            || {
                registry.create(&NewBatch {
                    barn_id: cmd.barn_id.clone(),
                    breed: cmd.breed.trim().to_string(),
                    head_count: cmd.quantity,
                    avg_weight_kg: cmd.avg_weight_kg,
                })
            },
            move |batch| {
                let batch_id = batch.batch_id.clone();
                compensation(move || registry.delete(&batch_id))
            },
        )?;

        saga.step(
            "apply_capacity",
            || {
                ledger.apply_delta_retrying(
                    "intake.create",
                    &cmd.barn_id,
                    cmd.quantity,
                    Some(observed.current_occupancy),
                    ctx.deadline,
                )
            },
            move |barn| {
                let barn_id = barn.barn_id.clone();
                let quantity = cmd.quantity;
                compensation(move || ledger.compensate_delta(&barn_id, quantity).map(|_| ()))
            },
        )?;

        let now = Utc::now().naive_utc();
        let record = IntakeRecord {
            intake_id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch.batch_id.clone(),
            barn_id: cmd.barn_id.clone(),
            supplier_name: cmd.supplier_name.trim().to_string(),
            breed: cmd.breed.trim().to_string(),
            quantity: cmd.quantity,
            avg_weight_kg: cmd.avg_weight_kg,
            import_date: cmd.import_date,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        saga.final_step("persist_intake", || Ok(self.intakes.insert(&record)?))?;
        saga.commit();

        self.audit.record(
            ActionLog::new(ActionType::IntakeCreated, &ctx.actor)
                .entity(&record.intake_id)
                .barn(&record.barn_id)
                .payload(json!({
                    "batch_id": record.batch_id,
                    "quantity": record.quantity,
                    "supplier_name": record.supplier_name,
                })),
        );
        tracing::info!(intake_id = %record.intake_id, batch_id = %batch.batch_id, "intake created");

        Ok(IntakeOutcome {
            intake_record: record,
            batch,
        })
    }

    // ==========================================
    // 修改
    // ==========================================

    /// 修改进栏记录；数量与栏舍变更级联到关联批次及两个栏舍的存栏量，
    /// 其他字段只改记录
    ///
    /// # 错误
    /// - 批次已非 Raising 时修改数量或栏舍: `InvalidStateTransition`
    /// - 目标栏舍 `CapacityExceeded` / `BarnUnavailable`: 能预检时在写入前返回，
    ///   否则在补偿后返回
    #[instrument(skip(self, ctx, update), fields(actor = %ctx.actor))]
    pub fn update(
        &self,
        ctx: &RequestContext,
        intake_id: &str,
        update: &IntakeUpdate,
    ) -> EngineResult<IntakeOutcome> {
        validate_intake_update(update)?;
        let ctx = ctx.or_default_timeout(self.request_timeout);

        let record = self.get(intake_id)?;
        let batch = self.registry.get(&record.batch_id)?;

        let new_quantity = update.quantity.unwrap_or(record.quantity);
        let quantity_diff = new_quantity - record.quantity;
        let old_barn_id = batch.barn_id.clone();
        let new_barn_id = update.barn_id.clone().unwrap_or_else(|| old_barn_id.clone());
        let barn_changed = new_barn_id != old_barn_id;

        if (quantity_diff != 0 || barn_changed) && batch.status != BatchStatus::Raising {
            return Err(EngineError::InvalidStateTransition {
                entity: format!("IntakeRecord {}", intake_id),
                from: format!("batch {}", batch.status),
                to: "quantity/barn change".to_string(),
            });
        }

        // 数量修改生效后批次的贡献头数
        let old_contribution = batch.current_head_count;
        let new_contribution = old_contribution + quantity_diff;
        if new_contribution < 0 {
            return Err(EngineError::InsufficientHeadCount {
                batch_id: batch.batch_id.clone(),
                available: batch.current_head_count,
                requested: -quantity_diff,
            });
        }
        if quantity_diff != 0 && new_contribution == 0 {
            return Err(EngineError::Validation(format!(
                "quantity edit would leave batch {} with no head; export it instead",
                batch.batch_id
            )));
        }

        // 写入前对目标栏舍快速失败
        let observed_target = if barn_changed {
            Some(self.ledger.require_capacity(&new_barn_id, new_contribution)?)
        } else if quantity_diff != 0 {
            Some(self.ledger.require_capacity(&old_barn_id, quantity_diff)?)
        } else {
            None
        };

        let ledger = self.ledger.as_ref();
        let registry = self.registry.as_ref();
        let batch_id = batch.batch_id.clone();
        let deadline = ctx.deadline;
        let mut saga = Saga::begin("intake.update", &ctx, self.alerts.as_ref());

        if quantity_diff != 0 {
            let id = batch_id.clone();
            saga.step(
                "revise_batch",
                || registry.revise_intake_quantity(&batch_id, quantity_diff, deadline),
                move |_| compensation(move || registry.revise_intake_quantity(&id, -quantity_diff, None).map(|_| ())),
            )?;
        }

        if barn_changed {
            let id = batch_id.clone();
            let (back_from, back_to) = (new_barn_id.clone(), old_barn_id.clone());
            let moved = saga.step(
                "reassign_batch",
                || registry.reassign_barn(&batch_id, &old_barn_id, &new_barn_id, deadline),
                move |_| compensation(move || registry.reassign_barn(&id, &back_from, &back_to, None).map(|_| ())),
            )?;

            // 数量修订只改了头数未改存栏量，旧栏舍仍承载修改前的份额
            let carried = moved.occupancy_contribution();
            let released = carried - quantity_diff;

            if released != 0 {
                let released_from = old_barn_id.clone();
                saga.step(
                    "release_old_barn",
                    || ledger.apply_delta_retrying("intake.update", &old_barn_id, -released, None, deadline),
                    move |_| compensation(move || ledger.compensate_delta(&released_from, -released).map(|_| ())),
                )?;
            }

            if carried > 0 {
                let occupied = new_barn_id.clone();
                let observed = observed_target.as_ref().map(|b| b.current_occupancy);
                saga.step(
                    "occupy_new_barn",
                    || ledger.apply_delta_retrying("intake.update", &new_barn_id, carried, observed, deadline),
                    move |_| compensation(move || ledger.compensate_delta(&occupied, carried).map(|_| ())),
                )?;
            }
        } else if quantity_diff != 0 {
            let barn_id = old_barn_id.clone();
            let observed = observed_target.as_ref().map(|b| b.current_occupancy);
            saga.step(
                "apply_capacity",
                || ledger.apply_delta_retrying("intake.update", &old_barn_id, quantity_diff, observed, deadline),
                move |_| compensation(move || ledger.compensate_delta(&barn_id, quantity_diff).map(|_| ())),
            )?;
        }

        let mut edited = record.clone();
        if let Some(date) = update.import_date {
            edited.import_date = date;
        }
        if let Some(ref supplier) = update.supplier_name {
            edited.supplier_name = supplier.trim().to_string();
        }
        if let Some(ref breed) = update.breed {
            edited.breed = breed.trim().to_string();
        }
        if let Some(weight) = update.avg_weight_kg {
            edited.avg_weight_kg = weight;
        }
        edited.quantity = new_quantity;
        edited.barn_id = new_barn_id.clone();

        let saved = saga.final_step("persist_intake", || Ok(self.intakes.update(&edited)?))?;
        saga.commit();

        let batch = self.registry.get(&batch_id)?;
        self.audit.record(
            ActionLog::new(ActionType::IntakeUpdated, &ctx.actor)
                .entity(&saved.intake_id)
                .barn(&saved.barn_id)
                .payload(json!({
                    "batch_id": saved.batch_id,
                    "old_quantity": record.quantity,
                    "new_quantity": saved.quantity,
                    "old_barn_id": old_barn_id,
                    "new_barn_id": saved.barn_id,
                })),
        );
        tracing::info!(intake_id, quantity_diff, barn_changed, "intake updated");

        Ok(IntakeOutcome {
            intake_record: saved,
            batch,
        })
    }

    // ==========================================
    // 删除
    // ==========================================

    /// 删除进栏记录；仍在养的批次被关闭并从栏舍释放头数，
    /// 仅当无出入栏记录引用时才删除批次行
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn delete(&self, ctx: &RequestContext, intake_id: &str) -> EngineResult<IntakeDeletion> {
        let ctx = ctx.or_default_timeout(self.request_timeout);
        let record = self.get(intake_id)?;

        let batch = match self.registry.get(&record.batch_id) {
            Ok(batch) => Some(batch),
            Err(EngineError::BatchNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let outcome = match batch {
            Some(batch) if batch.status == BatchStatus::Raising => {
                let ledger = self.ledger.as_ref();
                let registry = self.registry.as_ref();
                let deadline = ctx.deadline;
                let mut saga = Saga::begin("intake.delete", &ctx, self.alerts.as_ref());

                let retired = saga.step(
                    "retire_batch",
                    || registry.retire(&batch.batch_id, deadline),
                    move |retired| {
                        let batch_id = retired.batch_id.clone();
                        compensation(move || registry.reopen(&batch_id).map(|_| ()))
                    },
                )?;

                let released = retired.current_head_count;
                if released > 0 {
                    let barn_id = retired.barn_id.clone();
                    saga.step(
                        "release_capacity",
                        || ledger.apply_delta_retrying("intake.delete", &retired.barn_id, -released, None, deadline),
                        move |_| compensation(move || ledger.compensate_delta(&barn_id, -released).map(|_| ())),
                    )?;
                }

                let deleted = saga.final_step("delete_intake", || Ok(self.intakes.delete(intake_id)?))?;
                if !deleted {
                    return Err(saga.abort(EngineError::IntakeNotFound(intake_id.to_string())));
                }
                saga.commit();

                if self.movements.count_by_batch(&batch.batch_id)? == 0 {
                    match self.registry.delete(&batch.batch_id) {
                        Ok(()) => IntakeDeletion::BatchRemoved,
                        Err(e) => {
                            // 批次保持 Closed，不计入存栏
                            tracing::warn!(batch_id = %batch.batch_id, error = %e, "could not remove closed batch");
                            IntakeDeletion::BatchClosed
                        }
                    }
                } else {
                    IntakeDeletion::BatchClosed
                }
            }
            _ => {
                if !self.intakes.delete(intake_id)? {
                    return Err(EngineError::IntakeNotFound(intake_id.to_string()));
                }
                IntakeDeletion::CapacityUnchanged
            }
        };

        self.audit.record(
            ActionLog::new(ActionType::IntakeDeleted, &ctx.actor)
                .entity(intake_id)
                .barn(&record.barn_id)
                .payload(json!({
                    "batch_id": record.batch_id,
                    "outcome": format!("{:?}", outcome),
                })),
        );
        tracing::info!(intake_id, outcome = ?outcome, "intake deleted");
        Ok(outcome)
    }
}
