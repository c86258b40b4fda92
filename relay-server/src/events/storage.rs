//! 事件日志存储
//!
//! SurrealDB `event_log` 表的追加与过滤查询。只增不改不删。

use super::types::{EventEntry, EventKind, EventQuery, Severity};
use shared::util::now_millis;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use thiserror::Error;

const TABLE: &str = "event_log";

#[derive(Debug, Error)]
pub enum EventStorageError {
    #[error("Event storage error: {0}")]
    Database(String),
}

impl From<surrealdb::Error> for EventStorageError {
    fn from(err: surrealdb::Error) -> Self {
        EventStorageError::Database(err.to_string())
    }
}

/// Append-only event storage
#[derive(Clone)]
pub struct EventStorage {
    db: Surreal<Db>,
}

impl EventStorage {
    pub fn new(db: Surreal<Db>) -> Self {
        Self { db }
    }

    /// 追加一条事件
    pub async fn append(
        &self,
        kind: EventKind,
        severity: Severity,
        message: String,
        metadata: serde_json::Value,
        machine: Option<String>,
        actor: Option<String>,
    ) -> Result<EventEntry, EventStorageError> {
        let entry = EventEntry {
            kind,
            severity,
            message,
            metadata,
            machine,
            actor,
            created_at: now_millis(),
        };

        let created: Option<EventEntry> = self.db.create(TABLE).content(entry.clone()).await?;
        Ok(created.unwrap_or(entry))
    }

    /// 过滤查询，按时间倒序
    pub async fn query(
        &self,
        q: &EventQuery,
    ) -> Result<(Vec<EventEntry>, usize), EventStorageError> {
        let mut clauses: Vec<&str> = Vec::new();
        if q.from.is_some() {
            clauses.push("created_at >= $from");
        }
        if q.to.is_some() {
            clauses.push("created_at <= $to");
        }
        if q.kind.is_some() {
            clauses.push("kind = $kind");
        }
        if q.severity.is_some() {
            clauses.push("severity = $severity");
        }
        if q.machine.is_some() {
            clauses.push("machine = $machine");
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let list_sql = format!(
            "SELECT * FROM event_log{} ORDER BY created_at DESC LIMIT $limit START $offset",
            where_clause
        );
        let count_sql = format!("SELECT * FROM event_log{}", where_clause);

        let mut result = self
            .db
            .query(list_sql)
            .query(count_sql)
            .bind(("from", q.from))
            .bind(("to", q.to))
            .bind(("kind", q.kind))
            .bind(("severity", q.severity))
            .bind(("machine", q.machine.clone()))
            .bind(("limit", q.limit.min(100) as i64))
            .bind(("offset", q.offset as i64))
            .await?;

        let items: Vec<EventEntry> = result.take(0)?;
        let all: Vec<EventEntry> = result.take(1)?;
        Ok((items, all.len()))
    }

    /// 最近 N 条（测试与诊断用）
    pub async fn query_last(&self, n: u32) -> Result<Vec<EventEntry>, EventStorageError> {
        let mut result = self
            .db
            .query("SELECT * FROM event_log ORDER BY created_at DESC LIMIT $limit")
            .bind(("limit", n as i64))
            .await?;
        let items: Vec<EventEntry> = result.take(0)?;
        Ok(items)
    }
}
