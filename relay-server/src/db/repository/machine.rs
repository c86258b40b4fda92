//! Machine Repository
//!
//! 设备注册表：机器实体 + 流程锁的全部原子变更。
//!
//! 锁获取是唯一一条带条件的 UPDATE（`WHERE process_locked = false`），
//! 检查与置位在存储层一次完成，两个并发 start 只会有一个拿到行。

use super::{BaseRepository, RepoError, RepoResult};
use crate::db::models::{
    Gpio, GpioConfig, GpioState, Machine, MachineCreate, MachineStatus, MachineUpdate,
};
use shared::request::HeartbeatRequest;
use shared::util::now_millis;
use surrealdb::RecordId;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "machine";

/// Controller pins that may drive a relay channel
const VALID_PINS: &[u8] = &[
    0, 2, 4, 5, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 25, 26, 27, 32, 33,
];

/// 心跳落账结果
#[derive(Debug)]
pub struct HeartbeatOutcome {
    /// Machine state after the heartbeat was applied
    pub machine: Machine,
    /// true 表示这次心跳是 离线→在线 的跃迁（按更新前的旧时间戳判定）
    pub came_online: bool,
    /// Restart flag as it stood before this heartbeat consumed it
    pub pending_restart: bool,
}

#[derive(Clone)]
pub struct MachineRepository {
    base: BaseRepository,
}

impl MachineRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn record_id(key: &str) -> RecordId {
        RecordId::from_table_key(TABLE, key)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn find_all(&self) -> RepoResult<Vec<Machine>> {
        let machines: Vec<Machine> = self
            .base
            .db()
            .query("SELECT * FROM machine ORDER BY machine_id")
            .await?
            .take(0)?;
        Ok(machines)
    }

    /// Find by record key
    pub async fn find_by_key(&self, key: &str) -> RepoResult<Option<Machine>> {
        let machine: Option<Machine> = self.base.db().select((TABLE, key)).await?;
        Ok(machine)
    }

    /// Find by the external/physical label
    pub async fn find_by_machine_id(&self, machine_id: &str) -> RepoResult<Option<Machine>> {
        let machine_id = machine_id.to_string();
        let mut result = self
            .base
            .db()
            .query("SELECT * FROM machine WHERE machine_id = $machine_id LIMIT 1")
            .bind(("machine_id", machine_id))
            .await?;
        let machines: Vec<Machine> = result.take(0)?;
        Ok(machines.into_iter().next())
    }

    /// 所有持锁机器（启动孤锁回收用）
    pub async fn find_locked(&self) -> RepoResult<Vec<Machine>> {
        let machines: Vec<Machine> = self
            .base
            .db()
            .query("SELECT * FROM machine WHERE process_locked = true")
            .await?
            .take(0)?;
        Ok(machines)
    }

    /// 有多少台机器的 current_sequence 指向给定序列
    pub async fn count_referencing_sequence(&self, sequence_ref: &str) -> RepoResult<usize> {
        let sequence_ref = sequence_ref.to_string();
        let mut result = self
            .base
            .db()
            .query("SELECT * FROM machine WHERE current_sequence = $sequence")
            .bind(("sequence", sequence_ref))
            .await?;
        let machines: Vec<Machine> = result.take(0)?;
        Ok(machines.len())
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    pub async fn create(&self, data: MachineCreate) -> RepoResult<Machine> {
        if data.machine_id.trim().is_empty() {
            return Err(RepoError::Validation("machine_id must not be empty".into()));
        }
        if self.find_by_machine_id(&data.machine_id).await?.is_some() {
            return Err(RepoError::Duplicate(format!(
                "Machine '{}' already exists",
                data.machine_id
            )));
        }
        Self::validate_gpio_config(&data.gpios)?;

        let now = now_millis();
        let machine = Machine {
            id: None,
            machine_id: data.machine_id,
            location: data.location,
            fixed_price: data.fixed_price,
            status: MachineStatus::Offline,
            last_heartbeat: None,
            firmware_version: "v1.0.0".to_string(),
            gpios: data.gpios.into_iter().map(GpioConfig::into_gpio).collect(),
            current_sequence: None,
            process_locked: false,
            pending_restart: false,
            current_step: 0,
            process_start_time: None,
            process_end_time: None,
            ip_address: None,
            wifi_ssid: None,
            signal_strength: None,
            created_at: now,
            updated_at: now,
        };

        let created: Option<Machine> = self.base.db().create(TABLE).content(machine).await?;
        created.ok_or_else(|| RepoError::Database("Failed to create machine".to_string()))
    }

    pub async fn update(&self, key: &str, data: MachineUpdate) -> RepoResult<Machine> {
        self.find_by_key(key)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Machine {} not found", key)))?;

        let mut result = self
            .base
            .db()
            .query("UPDATE $machine MERGE $data RETURN AFTER")
            .bind(("machine", Self::record_id(key)))
            .bind(("data", data))
            .await?;
        let machines: Vec<Machine> = result.take(0)?;
        machines
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::NotFound(format!("Machine {} not found", key)))
    }

    /// 删除机器；序列执行期间拒绝
    pub async fn delete(&self, key: &str) -> RepoResult<bool> {
        let machine = self
            .find_by_key(key)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Machine {} not found", key)))?;

        if machine.process_locked {
            return Err(RepoError::Locked(format!(
                "Machine '{}' is running a sequence",
                machine.machine_id
            )));
        }

        let deleted: Option<Machine> = self.base.db().delete((TABLE, key)).await?;
        Ok(deleted.is_some())
    }

    /// 替换 pin 配置；校验合法引脚，执行期间拒绝
    pub async fn update_gpio_config(
        &self,
        key: &str,
        gpios: Vec<GpioConfig>,
    ) -> RepoResult<Machine> {
        let machine = self
            .find_by_key(key)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Machine {} not found", key)))?;

        if machine.process_locked {
            return Err(RepoError::Locked(format!(
                "Machine '{}' is running a sequence",
                machine.machine_id
            )));
        }
        Self::validate_gpio_config(&gpios)?;

        let gpios: Vec<Gpio> = gpios.into_iter().map(GpioConfig::into_gpio).collect();
        self.write_gpios(key, gpios).await
    }

    fn validate_gpio_config(gpios: &[GpioConfig]) -> RepoResult<()> {
        let mut names = std::collections::HashSet::new();
        for gpio in gpios {
            if !VALID_PINS.contains(&gpio.gpio_number) {
                return Err(RepoError::Validation(format!(
                    "Invalid GPIO pin: {}",
                    gpio.gpio_number
                )));
            }
            if !names.insert(gpio.gpio_name.as_str()) {
                return Err(RepoError::Validation(format!(
                    "Duplicate GPIO name: {}",
                    gpio.gpio_name
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Heartbeat / liveness
    // ========================================================================

    /// 落账一次心跳
    ///
    /// 跃迁判定用的是更新前的旧 `last_heartbeat` — 先判定再覆盖。
    /// `pending_restart` 随响应下发并就地清除（一次性指令）。
    pub async fn record_heartbeat(
        &self,
        machine_id: &str,
        hb: &HeartbeatRequest,
        now: i64,
        timeout_ms: i64,
    ) -> RepoResult<Option<HeartbeatOutcome>> {
        let Some(machine) = self.find_by_machine_id(machine_id).await? else {
            return Ok(None);
        };

        let came_online =
            crate::engine::liveness::marks_reconnection(machine.last_heartbeat, now, timeout_ms);
        let pending_restart = machine.pending_restart;
        let key = machine.key();

        // 持锁期间保持 RUNNING，否则心跳把 stored status 拉回 IDLE
        let status = if machine.process_locked {
            MachineStatus::Running
        } else {
            MachineStatus::Idle
        };
        let firmware = hb
            .firmware_version
            .clone()
            .unwrap_or(machine.firmware_version);

        let mut result = self
            .base
            .db()
            .query(
                "UPDATE $machine SET \
                     last_heartbeat = $now, \
                     status = $status, \
                     firmware_version = $firmware, \
                     ip_address = $ip, \
                     wifi_ssid = $ssid, \
                     signal_strength = $signal, \
                     pending_restart = false, \
                     updated_at = $now \
                 RETURN AFTER",
            )
            .bind(("machine", Self::record_id(&key)))
            .bind(("now", now))
            .bind(("status", status))
            .bind(("firmware", firmware))
            .bind(("ip", hb.ip_address.clone()))
            .bind(("ssid", hb.wifi_ssid.clone()))
            .bind(("signal", hb.signal_strength))
            .await?;
        let machines: Vec<Machine> = result.take(0)?;
        let machine = machines
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::Database("Heartbeat update returned nothing".into()))?;

        Ok(Some(HeartbeatOutcome {
            machine,
            came_online,
            pending_restart,
        }))
    }

    /// 轮询端点的轻量心跳：只刷新时间戳与 stored status，不动网络信息
    pub async fn touch_heartbeat(&self, machine_id: &str, now: i64) -> RepoResult<Option<Machine>> {
        let Some(machine) = self.find_by_machine_id(machine_id).await? else {
            return Ok(None);
        };
        let key = machine.key();
        let status = if machine.process_locked {
            MachineStatus::Running
        } else {
            MachineStatus::Idle
        };

        let mut result = self
            .base
            .db()
            .query(
                "UPDATE $machine SET last_heartbeat = $now, status = $status, updated_at = $now \
                 RETURN AFTER",
            )
            .bind(("machine", Self::record_id(&key)))
            .bind(("now", now))
            .bind(("status", status))
            .await?;
        let machines: Vec<Machine> = result.take(0)?;
        Ok(machines.into_iter().next())
    }

    // ========================================================================
    // Process lock (the sole concurrency gate)
    // ========================================================================

    /// 条件上锁：仅当未持锁时写入全部 RUNNING 字段
    ///
    /// 返回 `None` = 没抢到（已有序列在跑）。
    pub async fn try_acquire_lock(
        &self,
        key: &str,
        sequence_ref: &str,
        now: i64,
    ) -> RepoResult<Option<Machine>> {
        let sequence_ref = sequence_ref.to_string();
        let mut result = self
            .base
            .db()
            .query(
                "UPDATE $machine SET \
                     process_locked = true, \
                     current_sequence = $sequence, \
                     current_step = 0, \
                     process_start_time = $now, \
                     process_end_time = NONE, \
                     status = 'RUNNING', \
                     updated_at = $now \
                 WHERE process_locked = false \
                 RETURN AFTER",
            )
            .bind(("machine", Self::record_id(key)))
            .bind(("sequence", sequence_ref))
            .bind(("now", now))
            .await?;
        let machines: Vec<Machine> = result.take(0)?;
        Ok(machines.into_iter().next())
    }

    /// 释放锁并归零：所有 pin OFF、清空序列/步进、IDLE、记 end time
    ///
    /// 对已空闲机器调用等效为重置（幂等），急停路径依赖这一点。
    pub async fn release_lock(&self, key: &str, now: i64) -> RepoResult<Machine> {
        let machine = self
            .find_by_key(key)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Machine {} not found", key)))?;

        let mut gpios = machine.gpios;
        for gpio in &mut gpios {
            gpio.current_state = GpioState::Off;
        }

        let mut result = self
            .base
            .db()
            .query(
                "UPDATE $machine SET \
                     process_locked = false, \
                     current_sequence = NONE, \
                     current_step = 0, \
                     status = 'IDLE', \
                     process_end_time = $now, \
                     gpios = $gpios, \
                     updated_at = $now \
                 RETURN AFTER",
            )
            .bind(("machine", Self::record_id(key)))
            .bind(("now", now))
            .bind(("gpios", gpios))
            .await?;
        let machines: Vec<Machine> = result.take(0)?;
        machines
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::Database("Lock release returned nothing".into()))
    }

    /// 写步进游标（1-based；0 = 未开始）
    pub async fn set_step(&self, key: &str, step: u32) -> RepoResult<()> {
        self.base
            .db()
            .query("UPDATE $machine SET current_step = $step, updated_at = $now")
            .bind(("machine", Self::record_id(key)))
            .bind(("step", step))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Pin state
    // ========================================================================

    /// 按逻辑名写单个 pin 状态；返回 false 表示该名字不存在
    pub async fn set_gpio_state(
        &self,
        key: &str,
        gpio_name: &str,
        state: GpioState,
    ) -> RepoResult<bool> {
        let Some(machine) = self.find_by_key(key).await? else {
            return Err(RepoError::NotFound(format!("Machine {} not found", key)));
        };

        let mut gpios = machine.gpios;
        let Some(gpio) = gpios.iter_mut().find(|g| g.gpio_name == gpio_name) else {
            return Ok(false);
        };
        gpio.current_state = state;

        self.write_gpios(key, gpios).await?;
        Ok(true)
    }

    /// 设备侧按物理 pin 号确认状态
    pub async fn set_gpio_state_by_number(
        &self,
        key: &str,
        gpio_number: u8,
        state: GpioState,
    ) -> RepoResult<bool> {
        let Some(machine) = self.find_by_key(key).await? else {
            return Err(RepoError::NotFound(format!("Machine {} not found", key)));
        };

        let mut gpios = machine.gpios;
        let Some(gpio) = gpios.iter_mut().find(|g| g.gpio_number == gpio_number) else {
            return Ok(false);
        };
        gpio.current_state = state;

        self.write_gpios(key, gpios).await?;
        Ok(true)
    }

    /// Queue a controller reboot for the next heartbeat
    pub async fn set_pending_restart(&self, key: &str) -> RepoResult<()> {
        self.base
            .db()
            .query("UPDATE $machine SET pending_restart = true, updated_at = $now")
            .bind(("machine", Self::record_id(key)))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    async fn write_gpios(&self, key: &str, gpios: Vec<Gpio>) -> RepoResult<Machine> {
        let mut result = self
            .base
            .db()
            .query("UPDATE $machine SET gpios = $gpios, updated_at = $now RETURN AFTER")
            .bind(("machine", Self::record_id(key)))
            .bind(("gpios", gpios))
            .bind(("now", now_millis()))
            .await?;
        let machines: Vec<Machine> = result.take(0)?;
        machines
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::NotFound(format!("Machine {} not found", key)))
    }
}
