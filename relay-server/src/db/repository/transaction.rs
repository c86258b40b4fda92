//! Transaction Repository
//!
//! 支付事件的落账与引擎回写。`payment_id` 全局唯一，webhook 重放靠它去重。

use super::{BaseRepository, RepoError, RepoResult};
use crate::db::models::{Transaction, TransactionStatus};
use shared::util::now_millis;
use surrealdb::RecordId;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "transaction";

#[derive(Clone)]
pub struct TransactionRepository {
    base: BaseRepository,
}

impl TransactionRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn record_id(key: &str) -> RecordId {
        RecordId::from_table_key(TABLE, key)
    }

    pub async fn find_by_key(&self, key: &str) -> RepoResult<Option<Transaction>> {
        let txn: Option<Transaction> = self.base.db().select((TABLE, key)).await?;
        Ok(txn)
    }

    /// Dedup lookup by external payment reference
    pub async fn find_by_payment_id(&self, payment_id: &str) -> RepoResult<Option<Transaction>> {
        let payment_id = payment_id.to_string();
        let mut result = self
            .base
            .db()
            .query("SELECT * FROM transaction WHERE payment_id = $payment_id LIMIT 1")
            .bind(("payment_id", payment_id))
            .await?;
        let txns: Vec<Transaction> = result.take(0)?;
        Ok(txns.into_iter().next())
    }

    /// Recent transactions, newest first
    pub async fn find_recent(&self, offset: u64, limit: u32) -> RepoResult<Vec<Transaction>> {
        let mut result = self
            .base
            .db()
            .query("SELECT * FROM transaction ORDER BY created_at DESC LIMIT $limit START $offset")
            .bind(("limit", limit as i64))
            .bind(("offset", offset as i64))
            .await?;
        let txns: Vec<Transaction> = result.take(0)?;
        Ok(txns)
    }

    /// Transactions for one machine, newest first
    pub async fn find_by_machine(&self, machine_ref: &str) -> RepoResult<Vec<Transaction>> {
        let machine_ref = machine_ref.to_string();
        let mut result = self
            .base
            .db()
            .query("SELECT * FROM transaction WHERE machine = $machine ORDER BY created_at DESC")
            .bind(("machine", machine_ref))
            .await?;
        let txns: Vec<Transaction> = result.take(0)?;
        Ok(txns)
    }

    pub async fn create(&self, mut txn: Transaction) -> RepoResult<Transaction> {
        if self.find_by_payment_id(&txn.payment_id).await?.is_some() {
            return Err(RepoError::Duplicate(format!(
                "Payment '{}' already recorded",
                txn.payment_id
            )));
        }
        let now = now_millis();
        txn.created_at = now;
        txn.updated_at = now;

        let created: Option<Transaction> = self.base.db().create(TABLE).content(txn).await?;
        created.ok_or_else(|| RepoError::Database("Failed to create transaction".to_string()))
    }

    /// 引擎回写：序列已为这笔支付启动
    pub async fn mark_sequence_started(
        &self,
        key: &str,
        sequence_ref: &str,
        now: i64,
    ) -> RepoResult<()> {
        let sequence_ref = sequence_ref.to_string();
        self.base
            .db()
            .query(
                "UPDATE $txn SET \
                     sequence = $sequence, \
                     sequence_started = true, \
                     sequence_start_time = $now, \
                     updated_at = $now",
            )
            .bind(("txn", Self::record_id(key)))
            .bind(("sequence", sequence_ref))
            .bind(("now", now))
            .await?;
        Ok(())
    }

    /// 引擎回写：序列执行完成
    pub async fn mark_sequence_completed(&self, key: &str, now: i64) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE $txn SET \
                     sequence_completed = true, \
                     sequence_end_time = $now, \
                     status = $status, \
                     updated_at = $now",
            )
            .bind(("txn", Self::record_id(key)))
            .bind(("status", TransactionStatus::Completed))
            .bind(("now", now))
            .await?;
        Ok(())
    }
}
