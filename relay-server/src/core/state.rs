//! 服务器状态
//!
//! `ServerState` 持有所有服务的共享引用（Arc 浅拷贝），是 axum
//! handler 的 `State`。全部持久状态都在嵌入式数据库里，引擎本身
//! 可安全重启 —— 启动时的孤锁回收是进程内游标不落库的补偿。

use std::sync::{Arc, Mutex};

use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use tokio::sync::mpsc;

use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::core::Config;
use crate::db::DbService;
use crate::db::repository::{MachineRepository, SequenceRepository, TransactionRepository};
use crate::engine::ProcessEngine;
use crate::events::{EventLogRequest, EventLogService, EventLogWorker, EventStorage};

/// 服务器状态 - 持有所有服务的单例引用
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | db | 嵌入式数据库 (SurrealDB) |
/// | machines / sequences / transactions | 仓储 |
/// | events | 事件日志服务 (mpsc 异步写入) |
/// | engine | 序列执行引擎 |
#[derive(Clone)]
pub struct ServerState {
    /// 服务器配置
    pub config: Config,
    /// 嵌入式数据库
    pub db: Surreal<Db>,
    /// 设备注册表
    pub machines: MachineRepository,
    /// 序列定义存储
    pub sequences: SequenceRepository,
    /// 交易记录
    pub transactions: TransactionRepository,
    /// 事件日志服务
    pub events: Arc<EventLogService>,
    /// 序列执行引擎
    pub engine: Arc<ProcessEngine>,
    /// 事件日志通道接收端，start_background_tasks 取走一次
    event_rx: Arc<Mutex<Option<mpsc::Receiver<EventLogRequest>>>>,
}

impl ServerState {
    /// 初始化服务器状态（磁盘数据库）
    ///
    /// # Panics
    ///
    /// 工作目录或数据库初始化失败时 panic
    pub async fn initialize(config: &Config) -> Self {
        config
            .ensure_work_dir_structure()
            .expect("Failed to create work directory structure");

        let db_path = config.database_dir().join("relay.db");
        let db_service = DbService::new(&db_path.to_string_lossy())
            .await
            .expect("Failed to initialize database");

        Self::from_db(config.clone(), db_service.db)
    }

    /// 初始化服务器状态（内存数据库 — 测试与临时运行）
    pub async fn initialize_in_memory(config: &Config) -> Self {
        let db_service = DbService::new_memory()
            .await
            .expect("Failed to initialize in-memory database");
        Self::from_db(config.clone(), db_service.db)
    }

    fn from_db(config: Config, db: Surreal<Db>) -> Self {
        let machines = MachineRepository::new(db.clone());
        let sequences = SequenceRepository::new(db.clone());
        let transactions = TransactionRepository::new(db.clone());

        let (events, event_rx) = EventLogService::new(db.clone(), config.event_buffer_size);

        let engine = ProcessEngine::new(
            machines.clone(),
            sequences.clone(),
            transactions.clone(),
            events.clone(),
            config.engine_config(),
        );

        Self {
            config,
            db,
            machines,
            sequences,
            transactions,
            events,
            engine,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
        }
    }

    /// 启动后台任务
    ///
    /// 必须在接收流量之前调用。启动的任务：
    /// - 事件日志 worker
    /// - 启动孤锁回收（Warmup：上一次进程留下的"锁着却没有活体 task"
    ///   记录一律中止归位）
    pub fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        let rx = self
            .event_rx
            .lock()
            .expect("event receiver mutex poisoned")
            .take();
        if let Some(rx) = rx {
            let worker = EventLogWorker::new(EventStorage::new(self.db.clone()));
            let shutdown = tasks.shutdown_token();
            tasks.spawn("event_log_worker", TaskKind::Worker, async move {
                worker.run(rx, shutdown).await;
            });
        }

        let engine = self.engine.clone();
        tasks.spawn("orphan_lock_recovery", TaskKind::Warmup, async move {
            match engine.release_orphaned_locks().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Released {} orphaned process lock(s) at startup", n),
                Err(e) => tracing::error!("Orphan lock recovery failed: {}", e),
            }
        });
    }

    /// 获取数据库实例
    pub fn get_db(&self) -> Surreal<Db> {
        self.db.clone()
    }
}
