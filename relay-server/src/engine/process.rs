//! 序列执行引擎
//!
//! 每台机器至多一条在途序列，由 `process_locked` 这一把每机锁守护。
//! 执行体是一个 tokio task：逐步拉高/拉低继电器，在 on/off 两类延时边界
//! 挂起。取消是协作式的 —— 不杀 task，而是让每个恢复点重新读库：
//! 锁没了就让位，设备失联就中断，run 被新一代取代就退场。
//! 过期的定时器醒来后观察到前提失效，自然变成 no-op。
//!
//! 断连重连的和解策略：恢复窗口内整条序列从第 0 步重跑（断连后的中途
//! 物理状态不可信，宁可整体重来也不冒跳步/重复触发的风险）；超窗视为
//! 被放弃，解锁归位，不再重试。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::sleep;

use crate::db::models::{GpioState, Machine, Sequence};
use crate::db::repository::{MachineRepository, SequenceRepository, TransactionRepository};
use crate::events::EventLogService;
use crate::utils::{AppError, AppResult};
use shared::util::now_millis;

/// 引擎时间参数
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// 心跳超时：超过即判离线（毫秒）
    pub heartbeat_timeout_ms: i64,
    /// 重连恢复窗口：中断的 run 超过此时长不再重启（毫秒）
    pub restart_stale_window_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 10_000,
            restart_stale_window_ms: 10 * 60 * 1000,
        }
    }
}

/// 序列执行引擎（进程内单例，全部持久状态都在注册表里）
pub struct ProcessEngine {
    machines: MachineRepository,
    sequences: SequenceRepository,
    transactions: TransactionRepository,
    events: Arc<EventLogService>,
    config: EngineConfig,
    /// machine key → 当前 run 的代号。重启一条 run 就换代，
    /// 旧 task 在下一个恢复点发现代号不符即退场。
    runs: DashMap<String, u64>,
    run_counter: AtomicU64,
    /// 自引用句柄，spawn 执行体时升级成 Arc
    me: Weak<ProcessEngine>,
}

impl ProcessEngine {
    pub fn new(
        machines: MachineRepository,
        sequences: SequenceRepository,
        transactions: TransactionRepository,
        events: Arc<EventLogService>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            machines,
            sequences,
            transactions,
            events,
            config,
            runs: DashMap::new(),
            run_counter: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// 是否有在途 run（诊断用）
    pub fn has_active_run(&self, machine_key: &str) -> bool {
        self.runs.contains_key(machine_key)
    }

    // ========================================================================
    // StartSequence
    // ========================================================================

    /// 启动序列
    ///
    /// 前置检查按序报告第一个失败项：机器存在 → 序列存在 → 在线 → 抢锁。
    /// 抢锁是存储层单条条件 UPDATE，两个并发 start 只会有一个成功，
    /// 输家拿到 `AlreadyRunning`，绝不排队。
    ///
    /// 成功即返回 —— 执行体异步推进，调用方不等整条序列跑完。
    pub async fn start_sequence(
        &self,
        machine_key: &str,
        sequence_key: &str,
        transaction_key: Option<String>,
    ) -> AppResult<()> {
        let machine = self
            .machines
            .find_by_key(machine_key)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Machine {}", machine_key)))?;

        let sequence = self
            .sequences
            .find_by_key(sequence_key)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Sequence {}", sequence_key)))?;

        let now = now_millis();
        if !machine.is_online(now, self.config.heartbeat_timeout_ms) {
            return Err(AppError::offline(machine.machine_id));
        }

        let sequence_ref = SequenceRepository::ref_string(sequence_key);
        let Some(machine) = self
            .machines
            .try_acquire_lock(machine_key, &sequence_ref, now)
            .await?
        else {
            return Err(AppError::already_running(machine.machine_id));
        };

        if let Some(txn_key) = &transaction_key
            && let Err(e) = self
                .transactions
                .mark_sequence_started(txn_key, &sequence_ref, now)
                .await
        {
            tracing::warn!(
                transaction = %txn_key,
                error = %e,
                "Failed to stamp sequence start on transaction"
            );
        }

        self.events
            .sequence_start(&machine, &sequence, transaction_key.as_deref())
            .await;
        tracing::info!(
            machine = %machine.machine_id,
            sequence = %sequence.name,
            steps = sequence.steps.len(),
            "Sequence started"
        );

        self.spawn_run(machine_key.to_string(), sequence, transaction_key);
        Ok(())
    }

    fn spawn_run(&self, machine_key: String, sequence: Sequence, txn: Option<String>) {
        let generation = self.run_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.runs.insert(machine_key.clone(), generation);

        let Some(engine) = self.me.upgrade() else {
            // 引擎正在析构，没有人会再观察这条 run
            return;
        };
        tokio::spawn(async move {
            engine.run_steps(machine_key, sequence, txn, generation).await;
        });
    }

    fn owns_run(&self, machine_key: &str, generation: u64) -> bool {
        self.runs.get(machine_key).map(|g| *g) == Some(generation)
    }

    fn finish_run(&self, machine_key: &str, generation: u64) {
        self.runs.remove_if(machine_key, |_, g| *g == generation);
    }

    // ========================================================================
    // Step loop
    // ========================================================================

    async fn run_steps(
        self: Arc<Self>,
        machine_key: String,
        sequence: Sequence,
        transaction_key: Option<String>,
        generation: u64,
    ) {
        let steps = &sequence.steps;
        let mut index = 0usize;

        loop {
            // 每个恢复点重新读库，绝不信任跨延时边界的内存快照 ——
            // 急停、手动解锁、并发心跳都可能已经改写了机器状态。
            let machine = match self.machines.find_by_key(&machine_key).await {
                Ok(Some(m)) => m,
                Ok(None) => {
                    tracing::warn!(
                        machine = %machine_key,
                        "Machine vanished mid-sequence, stopping run"
                    );
                    self.finish_run(&machine_key, generation);
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        machine = %machine_key,
                        error = %e,
                        "Failed to reload machine state, aborting run"
                    );
                    self.unlock_machine(&machine_key).await;
                    self.finish_run(&machine_key, generation);
                    return;
                }
            };

            // run 已被新一代取代（重连重启）：静默退场，不得再碰任何状态
            if !self.owns_run(&machine_key, generation) {
                return;
            }

            // 锁被外部释放（急停等）：善后已由释放方做完，这里只收尾
            if !machine.process_locked {
                self.finish_run(&machine_key, generation);
                return;
            }

            let now = now_millis();
            if !machine.is_online(now, self.config.heartbeat_timeout_ms) {
                self.events.device_disconnected(&machine).await;
                self.events
                    .sequence_interrupted(&machine, &sequence, "controller went offline")
                    .await;
                tracing::warn!(
                    machine = %machine.machine_id,
                    sequence = %sequence.name,
                    step = index + 1,
                    "Controller offline at step boundary, interrupting sequence"
                );
                self.unlock_machine(&machine_key).await;
                self.finish_run(&machine_key, generation);
                return;
            }

            if index >= steps.len() {
                self.complete_sequence(&machine_key, &sequence, transaction_key.as_deref())
                    .await;
                self.finish_run(&machine_key, generation);
                return;
            }

            let step = &steps[index];

            if machine.find_gpio(&step.gpio_name).is_none() {
                // 配置缺失不能挂死整条序列：告警后立刻跳下一步
                self.events
                    .warning(
                        format!(
                            "GPIO \"{}\" not found in machine configuration",
                            step.gpio_name
                        ),
                        serde_json::json!({ "step": index + 1 }),
                        machine.id.as_ref().map(|id| id.to_string()),
                        None,
                    )
                    .await;
                index += 1;
                continue;
            }

            // ===== ON phase =====
            if let Err(e) = self
                .machines
                .set_gpio_state(&machine_key, &step.gpio_name, GpioState::On)
                .await
            {
                tracing::error!(
                    machine = %machine.machine_id,
                    gpio = %step.gpio_name,
                    error = %e,
                    "Failed to drive pin ON, aborting run"
                );
                self.unlock_machine(&machine_key).await;
                self.finish_run(&machine_key, generation);
                return;
            }
            if let Err(e) = self.machines.set_step(&machine_key, (index + 1) as u32).await {
                tracing::error!(machine = %machine.machine_id, error = %e, "Failed to persist step cursor");
            }
            self.events
                .info(
                    format!(
                        "Step {}: {} ON for {}s",
                        index + 1,
                        step.gpio_name,
                        step.on_time
                    ),
                    serde_json::json!({
                        "step": index + 1,
                        "gpio_name": step.gpio_name,
                        "on_time": step.on_time,
                    }),
                    machine.id.as_ref().map(|id| id.to_string()),
                    None,
                )
                .await;

            sleep(Duration::from_secs_f64(step.on_time)).await;

            // ===== OFF phase =====
            // 被取代的 run 到此让位：写 OFF 会踩到新 run 刚拉高的 pin
            if !self.owns_run(&machine_key, generation) {
                return;
            }
            if let Err(e) = self
                .machines
                .set_gpio_state(&machine_key, &step.gpio_name, GpioState::Off)
                .await
            {
                // 下一轮循环的边界检查会接手善后
                tracing::error!(
                    machine = %machine_key,
                    gpio = %step.gpio_name,
                    error = %e,
                    "Failed to drive pin OFF"
                );
            }

            if step.off_time > 0.0 {
                sleep(Duration::from_secs_f64(step.off_time)).await;
            }
            index += 1;
        }
    }

    // ========================================================================
    // CompleteSequence
    // ========================================================================

    async fn complete_sequence(
        &self,
        machine_key: &str,
        sequence: &Sequence,
        transaction_key: Option<&str>,
    ) {
        let now = now_millis();
        match self.machines.release_lock(machine_key, now).await {
            Ok(machine) => {
                if let Some(txn_key) = transaction_key
                    && let Err(e) = self
                        .transactions
                        .mark_sequence_completed(txn_key, now)
                        .await
                {
                    tracing::warn!(
                        transaction = %txn_key,
                        error = %e,
                        "Failed to stamp sequence completion on transaction"
                    );
                }

                self.events
                    .sequence_end(&machine, sequence, transaction_key)
                    .await;
                tracing::info!(
                    machine = %machine.machine_id,
                    sequence = %sequence.name,
                    "Sequence completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    machine = %machine_key,
                    error = %e,
                    "Failed to release lock after sequence completion"
                );
            }
        }
    }

    // ========================================================================
    // EmergencyStop
    // ========================================================================

    /// 急停：无条件归零
    ///
    /// 不管当前锁态如何都把所有 pin 拉低、清锁、置 IDLE。对已空闲的机器
    /// 是状态幂等的（操作员可以防御性地按急停），但每次都记一条
    /// EMERGENCY_STOP 事件。
    pub async fn emergency_stop(&self, machine_key: &str, actor: &str) -> AppResult<()> {
        self.machines
            .find_by_key(machine_key)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Machine {}", machine_key)))?;

        // 先作废在途 run：旧 task 在下一个恢复点发现代号已失效即让位
        self.runs.remove(machine_key);

        let machine = self.machines.release_lock(machine_key, now_millis()).await?;
        self.events.emergency_stop(&machine, actor).await;
        tracing::warn!(
            machine = %machine.machine_id,
            actor = %actor,
            "Emergency stop executed"
        );
        Ok(())
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// 重连和解：设备 离线→在线 且仍持锁时由心跳路径调用
    ///
    /// 窗口内 → 同一条序列从第 0 步整体重跑（不续跑、不新建交易关联）；
    /// 超窗或序列已被删除 → 解锁归位，不再重试。
    pub async fn restart_after_reconnect(&self, machine_key: &str) -> AppResult<()> {
        let Some(machine) = self.machines.find_by_key(machine_key).await? else {
            return Ok(());
        };
        if !machine.process_locked {
            return Ok(());
        }

        let Some(sequence_id) = machine.current_sequence.clone() else {
            // 锁着却没有序列 —— 缺陷态，按"序列丢失"自愈到空闲
            tracing::warn!(
                machine = %machine.machine_id,
                "Locked without a sequence reference, self-healing to idle"
            );
            self.unlock_machine(machine_key).await;
            return Ok(());
        };

        let now = now_millis();
        let started = machine.process_start_time.unwrap_or(0);
        if now - started > self.config.restart_stale_window_ms {
            // 卡了太久的 run 视为被放弃，不可恢复
            self.events
                .info(
                    "Interrupted run exceeded the restart window, releasing lock",
                    serde_json::json!({
                        "process_start_time": machine.process_start_time,
                        "stale_window_ms": self.config.restart_stale_window_ms,
                    }),
                    machine.id.as_ref().map(|id| id.to_string()),
                    None,
                )
                .await;
            tracing::info!(
                machine = %machine.machine_id,
                "Reconnected past the restart window, unlocking without retry"
            );
            self.unlock_machine(machine_key).await;
            return Ok(());
        }

        let sequence_key = sequence_id.key().to_string();
        let Some(sequence) = self.sequences.find_by_key(&sequence_key).await? else {
            self.unlock_machine(machine_key).await;
            return Ok(());
        };

        self.events
            .info(
                "Restarting interrupted sequence after reconnection",
                serde_json::json!({
                    "sequence_name": sequence.name,
                    "interrupted_step": machine.current_step,
                }),
                machine.id.as_ref().map(|id| id.to_string()),
                None,
            )
            .await;
        tracing::info!(
            machine = %machine.machine_id,
            sequence = %sequence.name,
            interrupted_step = machine.current_step,
            "Restarting interrupted sequence from step 0"
        );

        self.machines.set_step(machine_key, 0).await?;
        self.spawn_run(machine_key.to_string(), sequence, None);
        Ok(())
    }

    /// 启动孤锁回收：进程重启后"锁着却没有活体 task"的记录一律中止
    pub async fn release_orphaned_locks(&self) -> AppResult<usize> {
        let locked = self.machines.find_locked().await?;
        let mut released = 0usize;

        for machine in locked {
            let key = machine.key();
            if self.runs.contains_key(&key) {
                continue;
            }
            tracing::warn!(
                machine = %machine.machine_id,
                "Releasing orphaned process lock left by a previous run"
            );
            self.events
                .warning(
                    "Orphaned process lock released at startup",
                    serde_json::json!({
                        "sequence": machine.current_sequence.as_ref().map(|id| id.to_string()),
                        "interrupted_step": machine.current_step,
                    }),
                    machine.id.as_ref().map(|id| id.to_string()),
                    None,
                )
                .await;
            self.unlock_machine(&key).await;
            released += 1;
        }

        Ok(released)
    }

    // ========================================================================
    // Unlock
    // ========================================================================

    /// 中断路径的解锁：pin 全 OFF、清锁、IDLE
    async fn unlock_machine(&self, machine_key: &str) {
        if let Err(e) = self.machines.release_lock(machine_key, now_millis()).await {
            tracing::error!(
                machine = %machine_key,
                error = %e,
                "Failed to unlock machine"
            );
        }
    }
}

/// 机器状态自检：锁、状态、序列引用三者必须同向
///
/// `process_locked == true ⇔ status == RUNNING ⇔ current_sequence != null`。
/// OFFLINE 遮盖 RUNNING（断连中的持锁机器推导为 OFFLINE，等待和解），
/// 所以 status 这一腿只在设备在线时可判。测试与诊断断言用。
pub fn lock_state_consistent(machine: &Machine, now: i64, timeout_ms: i64) -> bool {
    use crate::db::models::MachineStatus;
    if machine.process_locked != machine.current_sequence.is_some() {
        return false;
    }
    if machine.is_online(now, timeout_ms) {
        let running = machine.effective_status(now, timeout_ms) == MachineStatus::Running;
        return machine.process_locked == running;
    }
    true
}
