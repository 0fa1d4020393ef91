// Database connection and pool management
// SQLite through sqlx; the schema is created in place by `migrate`.

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use tracing::info;

use crate::infrastructure::config::StorageConfig;

const IN_MEMORY: &str = "sqlite::memory:";

/// Columns introduced after the first schema, all nullable TEXT.
const ADDED_COLUMNS: [&str; 2] = ["two_piece_bonus", "four_piece_bonus"];

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 5).await
    }

    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::with_max_connections(&config.database_url, config.max_connections).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        // Every connection to `sqlite::memory:` opens its own database, so the
        // pool has to stay on one connection that never gets recycled.
        if database_url == IN_MEMORY {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await?;
            return Ok(Self { pool });
        }

        let db_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        let db_path = db_path.split('?').next().unwrap_or(db_path);

        if let Some(parent) = Path::new(db_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !Path::new(db_path).exists() {
            tokio::fs::File::create(db_path).await?;
            info!("created database file {}", db_path);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_entities_sql = r#"
            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                entity_key TEXT NOT NULL,
                name TEXT,
                localized_name TEXT,
                rarity INTEGER,
                element TEXT,
                weapon_category TEXT,
                region TEXT,
                health REAL,
                attack REAL,
                defense REAL,
                ascension_stat TEXT,
                ascension_value REAL,
                description TEXT,
                two_piece_bonus TEXT,
                four_piece_bonus TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                UNIQUE (entity_type, entity_key)
            )
        "#;

        let create_indexes_sql = [
            "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities (entity_type)",
            "CREATE INDEX IF NOT EXISTS idx_entities_updated_at ON entities (updated_at)",
        ];

        sqlx::query(create_entities_sql).execute(&self.pool).await?;
        self.add_missing_columns().await?;
        for sql in create_indexes_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Databases created before the artifact columns existed get them added.
    async fn add_missing_columns(&self) -> Result<()> {
        let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('entities')")
            .fetch_all(&self.pool)
            .await?;
        for column in ADDED_COLUMNS {
            if !existing.iter().any(|name| name == column) {
                sqlx::query(&format!("ALTER TABLE entities ADD COLUMN {column} TEXT"))
                    .execute(&self.pool)
                    .await?;
                info!("added column entities.{}", column);
            }
        }
        Ok(())
    }
}
