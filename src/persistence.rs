//! SQLite-backed record store
//!
//! Provides storage and retrieval for:
//! - Findings appended by every normalized stage
//! - Per-category tables (discovery, exploit, detail)
//! - Host lookups that gate the dependent stages
//!
//! Any database error aborts the run; the pipeline never continues on a
//! store it cannot trust.

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use tokio::fs;

use crate::{
    config::AppConfig,
    core::{Category, Finding},
    error::{Result, ScanmanError},
};

/// Trait for finding storage operations
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the category table if it does not exist. Idempotent.
    async fn ensure_table(&self, category: Category) -> Result<()>;

    /// Drop the category table and every finding in it
    async fn drop_category(&self, category: Category) -> Result<()>;

    /// Append one finding. Duplicates are accepted; export deduplicates.
    async fn insert(&self, finding: &Finding) -> Result<()>;

    /// Distinct hosts from discovery findings on a port.
    ///
    /// An empty result is the signal to skip a dependent stage, not an error.
    async fn hosts_by_port(&self, port: u16) -> Result<Vec<String>>;

    /// Distinct hosts recorded by one module
    async fn hosts_by_module(&self, category: Category, module: &str) -> Result<Vec<String>>;

    /// Full finding rows recorded by one module
    async fn findings_by_module(&self, category: Category, module: &str) -> Result<Vec<Finding>>;
}

/// SQLite implementation of the record store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect with explicit options.
    ///
    /// A single connection is enough: the pipeline is strictly sequential,
    /// and `:memory:` databases exist per connection.
    pub async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Open (creating if missing) a database file on disk
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let store = Self::connect(options).await?;
        tracing::info!("Record store opened at: {}", path.display());
        Ok(store)
    }

    fn table_for(category: Category) -> Result<&'static str> {
        category.table().ok_or_else(|| {
            ScanmanError::store(
                "table lookup",
                format!("category {} owns no table", category),
            )
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn ensure_table(&self, category: Category) -> Result<()> {
        let table = Self::table_for(category)?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL,
                port INTEGER,
                protocol TEXT,
                module TEXT NOT NULL,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        tracing::debug!("Ensured table: {}", table);
        Ok(())
    }

    async fn drop_category(&self, category: Category) -> Result<()> {
        let table = Self::table_for(category)?;
        let sql = format!("DROP TABLE IF EXISTS {table}");
        sqlx::query(&sql).execute(&self.pool).await?;

        tracing::info!("Dropped table: {}", table);
        Ok(())
    }

    async fn insert(&self, finding: &Finding) -> Result<()> {
        let table = Self::table_for(finding.category)?;
        let sql = format!(
            "INSERT INTO {table} (host, port, protocol, module, detail, created_at)
             VALUES (?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&finding.host)
            .bind(finding.port.map(i64::from))
            .bind(&finding.protocol)
            .bind(&finding.module)
            .bind(&finding.detail)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn hosts_by_port(&self, port: u16) -> Result<Vec<String>> {
        let table = Self::table_for(Category::Discovery)?;
        let sql = format!("SELECT DISTINCT host FROM {table} WHERE port = ?");
        let rows = sqlx::query(&sql)
            .bind(i64::from(port))
            .fetch_all(&self.pool)
            .await?;

        let hosts = rows
            .iter()
            .map(|row| row.try_get::<String, _>("host"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hosts)
    }

    async fn hosts_by_module(&self, category: Category, module: &str) -> Result<Vec<String>> {
        let table = Self::table_for(category)?;
        let sql = format!("SELECT DISTINCT host FROM {table} WHERE module = ?");
        let rows = sqlx::query(&sql)
            .bind(module)
            .fetch_all(&self.pool)
            .await?;

        let hosts = rows
            .iter()
            .map(|row| row.try_get::<String, _>("host"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hosts)
    }

    async fn findings_by_module(&self, category: Category, module: &str) -> Result<Vec<Finding>> {
        let table = Self::table_for(category)?;
        let sql = format!(
            "SELECT host, port, protocol, module, detail FROM {table} WHERE module = ?"
        );
        let rows = sqlx::query(&sql)
            .bind(module)
            .fetch_all(&self.pool)
            .await?;

        let mut findings = Vec::with_capacity(rows.len());
        for row in rows {
            findings.push(Finding {
                host: row.try_get("host")?,
                port: row
                    .try_get::<Option<i64>, _>("port")?
                    .map(|p| p as u16),
                protocol: row.try_get("protocol")?,
                category,
                module: row.try_get("module")?,
                detail: row.try_get("detail")?,
            });
        }

        Ok(findings)
    }
}

/// Factory function for creating the record store
pub async fn create_store(config: &AppConfig) -> Result<Box<dyn RecordStore>> {
    if let Some(parent) = config.paths.db_file.parent() {
        fs::create_dir_all(parent).await?;
    }

    let store = SqliteStore::open(&config.paths.db_file).await?;
    Ok(Box::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let options = SqliteConnectOptions::new().in_memory(true);
        SqliteStore::connect(options).await.unwrap()
    }

    fn smb_finding(host: &str) -> Finding {
        Finding::new(host, Category::Discovery, "smb", "open")
            .unwrap()
            .with_port(445)
            .with_protocol("tcp")
    }

    #[tokio::test]
    async fn test_drop_then_ensure_leaves_category_empty() {
        let store = memory_store().await;
        store.ensure_table(Category::Discovery).await.unwrap();
        store.insert(&smb_finding("10.0.0.5")).await.unwrap();

        store.drop_category(Category::Discovery).await.unwrap();
        store.ensure_table(Category::Discovery).await.unwrap();

        let findings = store
            .findings_by_module(Category::Discovery, "smb")
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_inserts_accepted_but_hosts_distinct() {
        let store = memory_store().await;
        store.ensure_table(Category::Discovery).await.unwrap();
        store.insert(&smb_finding("10.0.0.5")).await.unwrap();
        store.insert(&smb_finding("10.0.0.5")).await.unwrap();

        let findings = store
            .findings_by_module(Category::Discovery, "smb")
            .await
            .unwrap();
        assert_eq!(findings.len(), 2);

        let hosts = store
            .hosts_by_module(Category::Discovery, "smb")
            .await
            .unwrap();
        assert_eq!(hosts, vec!["10.0.0.5".to_string()]);
    }

    #[tokio::test]
    async fn test_hosts_by_port_filters_discovery() {
        let store = memory_store().await;
        store.ensure_table(Category::Discovery).await.unwrap();
        store.insert(&smb_finding("10.0.0.5")).await.unwrap();

        let web = Finding::new("10.0.0.9", Category::Discovery, "web", "open")
            .unwrap()
            .with_port(80)
            .with_protocol("tcp");
        store.insert(&web).await.unwrap();

        let hosts = store.hosts_by_port(445).await.unwrap();
        assert_eq!(hosts, vec!["10.0.0.5".to_string()]);

        let none = store.hosts_by_port(22).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_screenshot_category_owns_no_table() {
        let store = memory_store().await;
        let result = store.ensure_table(Category::Screenshot).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let store = memory_store().await;
        store.ensure_table(Category::DetailScan).await.unwrap();

        let finding = Finding::new(
            "192.168.1.10",
            Category::DetailScan,
            "smb2-security-mode",
            "Message signing disabled",
        )
        .unwrap()
        .with_port(445);
        store.insert(&finding).await.unwrap();

        let rows = store
            .findings_by_module(Category::DetailScan, "smb2-security-mode")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].host, "192.168.1.10");
        assert_eq!(rows[0].port, Some(445));
        assert_eq!(rows[0].protocol, None);
        assert_eq!(rows[0].detail, "Message signing disabled");
    }
}
