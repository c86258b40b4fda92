//! Database Module
//!
//! Embedded SurrealDB: RocksDB engine under `work_dir/database` in
//! production, in-memory engine for tests.

pub mod models;
pub mod repository;

use crate::utils::AppError;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem, RocksDb};

const NAMESPACE: &str = "relay";
const DATABASE: &str = "supervision";

/// Database service — owns the embedded SurrealDB handle
#[derive(Clone)]
pub struct DbService {
    pub db: Surreal<Db>,
}

impl DbService {
    /// Open (or create) the on-disk database
    pub async fn new(db_path: &str) -> Result<Self, AppError> {
        let db = Surreal::new::<RocksDb>(db_path)
            .await
            .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;
        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| AppError::database(format!("Failed to select namespace: {e}")))?;

        tracing::info!("Database opened at {} (RocksDB)", db_path);
        Ok(Self { db })
    }

    /// In-memory database — test fixtures and ephemeral runs
    pub async fn new_memory() -> Result<Self, AppError> {
        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| AppError::database(format!("Failed to open in-memory database: {e}")))?;
        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| AppError::database(format!("Failed to select namespace: {e}")))?;
        Ok(Self { db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::MachineCreate;
    use crate::db::repository::MachineRepository;

    #[tokio::test]
    async fn on_disk_database_persists_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("relay.db");
        let service = DbService::new(&db_path.to_string_lossy())
            .await
            .expect("open db");

        let repo = MachineRepository::new(service.db.clone());
        let machine = repo
            .create(MachineCreate {
                machine_id: "VND-900".into(),
                location: "disk test".into(),
                fixed_price: 0.0,
                gpios: vec![],
            })
            .await
            .expect("create");

        let found = repo
            .find_by_machine_id("VND-900")
            .await
            .expect("query")
            .expect("machine present");
        assert_eq!(found.key(), machine.key());
    }
}
