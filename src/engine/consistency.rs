// ==========================================
// 养殖台账系统 - 一致性校验
// ==========================================
// 纯函数，无 I/O；各协调器在首次写入前调用，
// 非法或违反规则的命令不会开始写入
// ==========================================

use crate::domain::{IntakeCommand, IntakeUpdate, MovementCommand};
use crate::engine::error::{EngineError, EngineResult};

/// 应用 `delta` 后存栏量是否超过上限
pub fn capacity_would_exceed(occupancy: i64, max_capacity: i64, delta: i64) -> bool {
    occupancy.saturating_add(delta) > max_capacity
}

/// 应用 `delta` 后存栏量是否小于 0
pub fn occupancy_would_underflow(occupancy: i64, delta: i64) -> bool {
    occupancy.saturating_add(delta) < 0
}

/// 应用 `delta` 后批次头数是否小于 0
pub fn head_count_would_underflow(head_count: i64, delta: i64) -> bool {
    head_count.saturating_add(delta) < 0
}

pub fn is_barn_full(occupancy: i64, max_capacity: i64) -> bool {
    occupancy >= max_capacity
}

// ==========================================
// 命令校验
// ==========================================

fn require_positive_quantity(quantity: i64) -> EngineResult<()> {
    if quantity <= 0 {
        return Err(EngineError::Validation(format!(
            "quantity must be a positive integer, got {}",
            quantity
        )));
    }
    Ok(())
}

fn require_positive_weight(weight: f64) -> EngineResult<()> {
    if !weight.is_finite() || weight <= 0.0 {
        return Err(EngineError::Validation(format!(
            "average weight must be a positive number, got {}",
            weight
        )));
    }
    Ok(())
}

fn require_text(value: &str, label: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{} must not be empty", label)));
    }
    Ok(())
}

pub fn validate_intake_command(cmd: &IntakeCommand) -> EngineResult<()> {
    require_positive_quantity(cmd.quantity)?;
    require_positive_weight(cmd.avg_weight_kg)?;
    require_text(&cmd.supplier_name, "supplier name")?;
    require_text(&cmd.breed, "breed")?;
    require_text(&cmd.barn_id, "barn id")?;
    Ok(())
}

pub fn validate_intake_update(update: &IntakeUpdate) -> EngineResult<()> {
    if update.is_empty() {
        return Err(EngineError::Validation("intake update changes nothing".to_string()));
    }
    if let Some(quantity) = update.quantity {
        require_positive_quantity(quantity)?;
    }
    if let Some(weight) = update.avg_weight_kg {
        require_positive_weight(weight)?;
    }
    if let Some(ref supplier) = update.supplier_name {
        require_text(supplier, "supplier name")?;
    }
    if let Some(ref breed) = update.breed {
        require_text(breed, "breed")?;
    }
    if let Some(ref barn_id) = update.barn_id {
        require_text(barn_id, "barn id")?;
    }
    Ok(())
}

pub fn validate_movement_command(cmd: &MovementCommand) -> EngineResult<()> {
    require_positive_quantity(cmd.quantity)?;
    require_text(&cmd.batch_id, "batch id")?;
    require_text(&cmd.counterparty_name, "counterparty name")?;
    if !cmd.unit_price.is_finite() || cmd.unit_price < 0.0 {
        return Err(EngineError::Validation(format!(
            "unit price must be a non-negative number, got {}",
            cmd.unit_price
        )));
    }
    if let Some(weight) = cmd.avg_weight_kg {
        require_positive_weight(weight)?;
    }
    Ok(())
}

pub fn validate_max_capacity(max_capacity: i64) -> EngineResult<()> {
    if max_capacity < 0 {
        return Err(EngineError::Validation(format!(
            "max capacity must be >= 0, got {}",
            max_capacity
        )));
    }
    Ok(())
}
