// ==========================================
// 养殖台账系统 - saga、重试与请求上下文
// ==========================================
// 多记录操作以 saga 方式执行: 每个已生效的步骤登记补偿动作，
// 失败(或超时)时按逆序执行补偿后再返回错误
//
// 竞争落败的条件写入按有界、带抖动的退避重试；耗尽后返回 Busy
// ==========================================

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::CoordinatorConfig;
use crate::engine::alerts::{OperatorAlert, OperatorAlertSink};
use crate::engine::error::{EngineError, EngineResult};

// ==========================================
// RequestContext
// ==========================================
/// 单次请求的调用方身份与截止时间
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor: String,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// 未设置截止时间时套用 `default_timeout` 的副本
    pub fn or_default_timeout(&self, default_timeout: Duration) -> RequestContext {
        match self.deadline {
            Some(_) => self.clone(),
            None => self.clone().with_timeout(default_timeout),
        }
    }
}

// ==========================================
// RetryPolicy
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for RetryPolicy {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_jitter: Duration::from_millis(config.backoff_jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt + 1` 次尝试前的等待: 指数基数加均匀抖动
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.saturating_sub(1).min(10));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        exp + jitter
    }

    /// 反复执行 `op`，直到不再返回 ConcurrentModification
    ///
    /// `op` 接收从 1 开始的尝试序号，首次尝试可复用调用方已观察到的值
    ///
    /// # 错误
    /// - `Busy`: `max_attempts` 次条件写入均落败
    /// - `Timeout`: 下一次尝试前已过截止时间
    /// - `op` 返回的其他错误原样返回
    pub fn run<T, F>(
        &self,
        operation: &str,
        step: &str,
        deadline: Option<Instant>,
        mut op: F,
    ) -> EngineResult<T>
    where
        F: FnMut(u32) -> EngineResult<T>,
    {
        let mut attempt = 1;
        loop {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(EngineError::Timeout {
                        operation: operation.to_string(),
                        step: step.to_string(),
                    });
                }
            }

            match op(attempt) {
                Err(EngineError::ConcurrentModification { entity, id }) => {
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            operation,
                            step,
                            entity = %entity,
                            id = %id,
                            attempts = attempt,
                            "conditional write kept losing; giving up"
                        );
                        return Err(EngineError::Busy {
                            entity,
                            id,
                            attempts: attempt,
                        });
                    }

                    let delay = self.backoff_delay(attempt);
                    if let Some(d) = deadline {
                        if Instant::now() + delay >= d {
                            return Err(EngineError::Timeout {
                                operation: operation.to_string(),
                                step: step.to_string(),
                            });
                        }
                    }
                    tracing::debug!(
                        operation,
                        step,
                        entity = %entity,
                        id = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "lost conditional write, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

// ==========================================
// Saga
// ==========================================

/// 已生效步骤登记的撤销动作
pub type Compensation<'a> = Box<dyn FnOnce() -> EngineResult<()> + 'a>;

pub fn compensation<'a, F>(undo: F) -> Compensation<'a>
where
    F: FnOnce() -> EngineResult<()> + 'a,
{
    Box::new(undo)
}

struct AppliedStep<'a> {
    name: &'static str,
    undo: Compensation<'a>,
}

pub struct Saga<'a> {
    operation: &'static str,
    actor: String,
    deadline: Option<Instant>,
    applied: Vec<AppliedStep<'a>>,
    alerts: &'a dyn OperatorAlertSink,
}

impl<'a> Saga<'a> {
    pub fn begin(
        operation: &'static str,
        ctx: &RequestContext,
        alerts: &'a dyn OperatorAlertSink,
    ) -> Self {
        Self {
            operation,
            actor: ctx.actor.clone(),
            deadline: ctx.deadline,
            applied: Vec::new(),
            alerts,
        }
    }

    /// 已过截止时间则回滚并返回 Timeout
    pub fn checkpoint(&mut self, step: &'static str) -> EngineResult<()> {
        if let Some(d) = self.deadline {
            if Instant::now() >= d {
                let err = EngineError::Timeout {
                    operation: self.operation.to_string(),
                    step: step.to_string(),
                };
                return Err(self.unwind(err));
            }
        }
        Ok(())
    }

    /// 执行一个步骤；成功则登记补偿，失败则回滚
    pub fn step<T, A, U>(&mut self, name: &'static str, action: A, undo: U) -> EngineResult<T>
    where
        A: FnOnce() -> EngineResult<T>,
        U: FnOnce(&T) -> Compensation<'a>,
    {
        self.checkpoint(name)?;
        match action() {
            Ok(value) => {
                let undo = undo(&value);
                self.applied.push(AppliedStep { name, undo });
                Ok(value)
            }
            Err(err) => Err(self.unwind(err)),
        }
    }

    /// 执行无需撤销的步骤 (通常是最终的记录写入)
    pub fn final_step<T, A>(&mut self, name: &'static str, action: A) -> EngineResult<T>
    where
        A: FnOnce() -> EngineResult<T>,
    {
        self.checkpoint(name)?;
        action().map_err(|err| self.unwind(err))
    }

    /// 以 `cause` 中止，执行全部已登记补偿
    pub fn abort(mut self, cause: EngineError) -> EngineError {
        self.unwind(cause)
    }

    /// 全部步骤成功，丢弃补偿
    pub fn commit(mut self) {
        tracing::debug!(
            operation = self.operation,
            steps = self.applied.len(),
            "saga committed"
        );
        self.applied.clear();
    }

    fn unwind(&mut self, cause: EngineError) -> EngineError {
        if self.applied.is_empty() {
            return cause;
        }

        tracing::warn!(
            operation = self.operation,
            actor = %self.actor,
            steps = self.applied.len(),
            cause = %cause,
            "rolling back applied steps"
        );

        let mut failed = Vec::new();
        while let Some(step) = self.applied.pop() {
            if let Err(e) = (step.undo)() {
                failed.push(format!("{}: {}", step.name, e));
            }
        }

        if failed.is_empty() {
            return cause;
        }

        let alert = OperatorAlert::new(self.operation, &self.actor, cause.to_string(), failed.clone());
        self.alerts.raise(&alert);
        EngineError::PartialFailure {
            operation: self.operation.to_string(),
            cause: cause.to_string(),
            failed_compensations: failed,
        }
    }
}

impl Drop for Saga<'_> {
    fn drop(&mut self) {
        if !self.applied.is_empty() {
            // 未提交的 saga 被丢弃时同样执行补偿
            let err = self.unwind(EngineError::Timeout {
                operation: self.operation.to_string(),
                step: "abandoned".to_string(),
            });
            tracing::warn!(operation = self.operation, error = %err, "saga dropped without commit");
        }
    }
}
