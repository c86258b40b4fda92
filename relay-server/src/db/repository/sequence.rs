//! Sequence Repository
//!
//! `total_duration` 只在这里重算；`is_default` 的全局唯一性也只在这里维护。

use super::{BaseRepository, RepoError, RepoResult};
use crate::db::models::{Sequence, SequenceCreate, SequenceStep, SequenceUpdate};
use shared::util::now_millis;
use surrealdb::RecordId;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "sequence";

#[derive(Clone)]
pub struct SequenceRepository {
    base: BaseRepository,
}

impl SequenceRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn record_id(key: &str) -> RecordId {
        RecordId::from_table_key(TABLE, key)
    }

    pub async fn find_all(&self) -> RepoResult<Vec<Sequence>> {
        let sequences: Vec<Sequence> = self
            .base
            .db()
            .query("SELECT * FROM sequence ORDER BY created_at DESC")
            .await?
            .take(0)?;
        Ok(sequences)
    }

    pub async fn find_by_key(&self, key: &str) -> RepoResult<Option<Sequence>> {
        let sequence: Option<Sequence> = self.base.db().select((TABLE, key)).await?;
        Ok(sequence)
    }

    /// 当前默认序列（至多一条）
    pub async fn find_default(&self) -> RepoResult<Option<Sequence>> {
        let mut result = self
            .base
            .db()
            .query("SELECT * FROM sequence WHERE is_default = true LIMIT 1")
            .await?;
        let sequences: Vec<Sequence> = result.take(0)?;
        Ok(sequences.into_iter().next())
    }

    pub async fn create(&self, data: SequenceCreate, actor: Option<String>) -> RepoResult<Sequence> {
        Self::validate_steps(&data.steps)?;
        if data.name.trim().is_empty() {
            return Err(RepoError::Validation("Sequence name must not be empty".into()));
        }

        // 夺取默认标记前先清掉别家的
        if data.is_default {
            self.clear_default_flags().await?;
        }

        let now = now_millis();
        let total_duration = Sequence::computed_total(&data.steps);
        let sequence = Sequence {
            id: None,
            name: data.name,
            description: data.description,
            steps: data.steps,
            is_default: data.is_default,
            total_duration,
            created_by: actor,
            created_at: now,
            updated_at: now,
        };

        let created: Option<Sequence> = self.base.db().create(TABLE).content(sequence).await?;
        created.ok_or_else(|| RepoError::Database("Failed to create sequence".to_string()))
    }

    pub async fn update(&self, key: &str, data: SequenceUpdate) -> RepoResult<Sequence> {
        let mut sequence = self
            .find_by_key(key)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Sequence {} not found", key)))?;

        if let Some(name) = data.name {
            if name.trim().is_empty() {
                return Err(RepoError::Validation("Sequence name must not be empty".into()));
            }
            sequence.name = name;
        }
        if let Some(description) = data.description {
            sequence.description = description;
        }
        if let Some(steps) = data.steps {
            Self::validate_steps(&steps)?;
            sequence.steps = steps;
        }
        match data.is_default {
            Some(true) => {
                self.clear_default_flags().await?;
                sequence.is_default = true;
            }
            Some(false) => sequence.is_default = false,
            None => {}
        }

        // total_duration 永远跟着 steps 走，外部传入的值被无视
        sequence.total_duration = Sequence::computed_total(&sequence.steps);
        sequence.updated_at = now_millis();

        let updated: Option<Sequence> = self
            .base
            .db()
            .update((TABLE, key))
            .content(sequence)
            .await?;
        updated.ok_or_else(|| RepoError::NotFound(format!("Sequence {} not found", key)))
    }

    /// 删除序列；仍被任何机器引用时拒绝
    pub async fn delete(&self, key: &str, machines_referencing: usize) -> RepoResult<Sequence> {
        if machines_referencing > 0 {
            return Err(RepoError::Locked(format!(
                "Sequence in use by {} machine(s)",
                machines_referencing
            )));
        }

        let deleted: Option<Sequence> = self.base.db().delete((TABLE, key)).await?;
        deleted.ok_or_else(|| RepoError::NotFound(format!("Sequence {} not found", key)))
    }

    async fn clear_default_flags(&self) -> RepoResult<()> {
        self.base
            .db()
            .query("UPDATE sequence SET is_default = false WHERE is_default = true")
            .await?;
        Ok(())
    }

    fn validate_steps(steps: &[SequenceStep]) -> RepoResult<()> {
        if steps.is_empty() {
            return Err(RepoError::Validation(
                "Sequence must contain at least one step".into(),
            ));
        }
        for (i, step) in steps.iter().enumerate() {
            if step.gpio_name.trim().is_empty() {
                return Err(RepoError::Validation(format!(
                    "Step {}: gpio_name must not be empty",
                    i + 1
                )));
            }
            if !step.on_time.is_finite() || step.on_time < 0.0 {
                return Err(RepoError::Validation(format!(
                    "Step {}: on_time must be >= 0",
                    i + 1
                )));
            }
            if !step.off_time.is_finite() || step.off_time < 0.0 {
                return Err(RepoError::Validation(format!(
                    "Step {}: off_time must be >= 0",
                    i + 1
                )));
            }
        }
        Ok(())
    }

    /// Record-id string ("sequence:xyz") for cross-table references
    pub fn ref_string(key: &str) -> String {
        Self::record_id(key).to_string()
    }
}
