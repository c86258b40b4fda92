//! 事件日志后台 Worker
//!
//! 从 mpsc 通道消费 EventLogRequest，写入 SurrealDB。
//! 通道关闭时自动退出。

use super::service::EventLogRequest;
use super::storage::EventStorage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 事件日志后台 Worker
pub struct EventLogWorker {
    storage: EventStorage,
}

impl EventLogWorker {
    pub fn new(storage: EventStorage) -> Self {
        Self { storage }
    }

    /// 运行 worker（阻塞直到通道关闭或收到 shutdown 信号）
    pub async fn run(self, mut rx: mpsc::Receiver<EventLogRequest>, shutdown: CancellationToken) {
        tracing::info!("Event log worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Event log worker received shutdown signal");
                    break;
                }
                req = rx.recv() => {
                    let Some(req) = req else {
                        tracing::info!("Event log channel closed, worker stopping");
                        break;
                    };
                    self.write_entry(req).await;
                }
            }
        }
    }

    async fn write_entry(&self, req: EventLogRequest) {
        match self
            .storage
            .append(
                req.kind,
                req.severity,
                req.message,
                req.metadata,
                req.machine,
                req.actor,
            )
            .await
        {
            Ok(entry) => {
                tracing::debug!(
                    kind = %entry.kind,
                    machine = ?entry.machine,
                    "Event entry recorded"
                );
            }
            Err(e) => {
                tracing::error!("Failed to write event entry: {:?}", e);
            }
        }
    }
}
