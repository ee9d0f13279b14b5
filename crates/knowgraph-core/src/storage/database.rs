//! SQLite database operations
//!
//! Provides connection pool management for the two knowgraph databases: the
//! relational knowledge database and the vector database. They never share a
//! transaction.

use crate::config::StorageConfig;
use crate::storage::migrations::{self, Schema};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default maximum connections in the pool
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Database configuration options
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Which schema this database carries
    pub schema: Schema,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to run migrations automatically
    pub auto_migrate: bool,
    /// Journal mode (default: WAL)
    pub journal_mode: SqliteJournalMode,
    pub synchronous: SqliteSynchronous,
}

impl DatabaseConfig {
    /// Create a new database config with the specified path
    pub fn with_path(path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            path: path.into(),
            schema,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_migrate: true,
            journal_mode: SqliteJournalMode::Wal,
            synchronous: SqliteSynchronous::Normal,
        }
    }

    /// Create a config for an in-memory database (useful for testing)
    pub fn in_memory(schema: Schema) -> Self {
        Self {
            max_connections: 1, // In-memory requires single connection
            ..Self::with_path(":memory:", schema)
        }
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Disable automatic migrations
    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_memory(&self) -> bool {
        self.path.to_string_lossy() == ":memory:"
    }
}

/// Default location of the relational database
pub fn default_database_path() -> PathBuf {
    default_data_dir().join("knowledge.db")
}

/// Default location of the vector database
pub fn default_vector_database_path() -> PathBuf {
    default_data_dir().join("vectors.db")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("knowgraph"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Database connection pool wrapper
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    /// Create a new database connection with the given configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        // Ensure the directory exists
        if let Some(parent) = config.path.parent() {
            if !config.is_memory() && !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
            }
        }

        let connection_str = if config.is_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", config.path.display())
        };

        let connect_options = SqliteConnectOptions::from_str(&connection_str)?
            .journal_mode(config.journal_mode)
            .synchronous(config.synchronous)
            .foreign_keys(true)
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if config.is_memory() {
            // Dropping the only connection would drop the database with it
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("Failed to connect to database: {:?}", config.path))?;

        let db = Self {
            pool,
            config: config.clone(),
        };

        if config.auto_migrate {
            db.migrate().await?;
        }

        tracing::debug!(
            schema = config.schema.as_str(),
            path = %config.path.display(),
            "Database ready"
        );
        Ok(db)
    }

    /// Create an in-memory database (useful for testing)
    pub async fn in_memory(schema: Schema) -> Result<Self> {
        Self::new(DatabaseConfig::in_memory(schema)).await
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the database configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool, self.config.schema)
            .await
            .context("Failed to run database migrations")
    }

    /// Check migration status
    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool, self.config.schema)
            .await
            .context("Failed to check migration status")
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

/// The relational and vector databases opened together
#[derive(Debug, Clone)]
pub struct Databases {
    knowledge: Database,
    vectors: Database,
}

impl Databases {
    /// Open both databases from storage settings
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let knowledge_path = config
            .database_path
            .clone()
            .unwrap_or_else(default_database_path);
        let vector_path = config
            .vector_database_path
            .clone()
            .unwrap_or_else(default_vector_database_path);

        if knowledge_path == vector_path {
            anyhow::bail!(
                "Knowledge and vector databases must be separate files, both set to {}",
                knowledge_path.display()
            );
        }

        let knowledge = Database::new(
            DatabaseConfig::with_path(knowledge_path, Schema::Knowledge)
                .max_connections(config.max_connections),
        )
        .await?;
        let vectors = Database::new(
            DatabaseConfig::with_path(vector_path, Schema::Vectors).max_connections(config.max_connections),
        )
        .await?;

        Ok(Self { knowledge, vectors })
    }

    /// Two independent in-memory databases (useful for testing)
    pub async fn in_memory() -> Result<Self> {
        Ok(Self {
            knowledge: Database::in_memory(Schema::Knowledge).await?,
            vectors: Database::in_memory(Schema::Vectors).await?,
        })
    }

    pub fn knowledge(&self) -> &Database {
        &self.knowledge
    }

    pub fn vectors(&self) -> &Database {
        &self.vectors
    }

    pub async fn close(&self) {
        self.knowledge.close().await;
        self.vectors.close().await;
    }
}
