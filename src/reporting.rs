//! Result export and post-processing
//!
//! Writes per-module `.ip` result files from the record store and runs the
//! final sort/dedup pass over every category directory. Audit `.stdout`
//! logs are never touched.

use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::{
    config::AppConfig,
    core::Category,
    error::Result,
    persistence::RecordStore,
    targets::sort_unique_hosts,
};

/// Trait for result file generation
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Write one `<module>.ip` file per module that has stored findings,
    /// one host per line, overwriting any previous file
    async fn export_category(
        &self,
        store: &dyn RecordStore,
        category: Category,
        modules: &[String],
    ) -> Result<()>;

    /// Sort and deduplicate every `.ip` file in every category directory.
    /// Idempotent: a rerun leaves the files byte-identical.
    async fn finalize(&self) -> Result<()>;
}

/// Flat-file exporter writing under the configured results directory
pub struct FileExporter {
    config: AppConfig,
}

impl FileExporter {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    async fn sort_ip_file(path: &Path) -> Result<()> {
        let content = fs::read_to_string(path).await?;
        let hosts = sort_unique_hosts(
            content
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty()),
        );

        let mut sorted = hosts.join("\n");
        if !sorted.is_empty() {
            sorted.push('\n');
        }
        fs::write(path, sorted).await?;

        debug!("Sorted result file: {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Exporter for FileExporter {
    async fn export_category(
        &self,
        store: &dyn RecordStore,
        category: Category,
        modules: &[String],
    ) -> Result<()> {
        let dir = self.config.paths.category_dir(category.as_str());
        fs::create_dir_all(&dir).await?;

        for module in modules {
            let hosts = store.hosts_by_module(category, module).await?;
            if hosts.is_empty() {
                debug!(module, "No stored findings, result file not written");
                continue;
            }

            let path = dir.join(format!("{}.ip", module));
            let mut content = hosts.join("\n");
            content.push('\n');
            fs::write(&path, content).await?;

            info!("Results written to: {}", path.display());
        }

        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        for category in Category::ALL {
            let dir = self.config.paths.category_dir(category.as_str());
            if !dir.exists() {
                continue;
            }

            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().map(|ext| ext == "ip").unwrap_or(false) {
                    Self::sort_ip_file(&path).await?;
                }
            }
        }

        info!("Result files sorted and deduplicated");
        Ok(())
    }
}

/// Factory function for creating the exporter
pub fn create_exporter(config: &AppConfig) -> Box<dyn Exporter> {
    Box::new(FileExporter::new(config.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Finding;
    use crate::persistence::SqliteStore;
    use sqlx::sqlite::SqliteConnectOptions;
    use tempfile::TempDir;

    fn exporter_for(temp_dir: &TempDir) -> FileExporter {
        let mut config = AppConfig::default();
        config.paths.results_dir = temp_dir.path().to_path_buf();
        FileExporter::new(config)
    }

    async fn memory_store() -> SqliteStore {
        let options = SqliteConnectOptions::new().in_memory(true);
        SqliteStore::connect(options).await.unwrap()
    }

    #[tokio::test]
    async fn test_finalize_sorts_and_dedups_idempotently() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("discovery");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("smb.ip");
        std::fs::write(&file, "10.0.0.2\n10.0.0.1\n10.0.0.2\n").unwrap();

        let exporter = exporter_for(&temp_dir);
        exporter.finalize().await.unwrap();
        let first_pass = std::fs::read_to_string(&file).unwrap();
        assert_eq!(first_pass, "10.0.0.1\n10.0.0.2\n");

        exporter.finalize().await.unwrap();
        let second_pass = std::fs::read_to_string(&file).unwrap();
        assert_eq!(first_pass, second_pass);
    }

    #[tokio::test]
    async fn test_finalize_never_touches_audit_logs() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("exploit");
        std::fs::create_dir_all(&dir).unwrap();
        let audit = dir.join("smb_ms17_010.stdout");
        let raw = "10.0.0.2 session opened\n10.0.0.1 session opened\n";
        std::fs::write(&audit, raw).unwrap();

        let exporter = exporter_for(&temp_dir);
        exporter.finalize().await.unwrap();

        let content = std::fs::read_to_string(&audit).unwrap();
        assert_eq!(content, raw);
    }

    #[tokio::test]
    async fn test_export_category_skips_empty_modules() {
        let temp_dir = TempDir::new().unwrap();
        let exporter = exporter_for(&temp_dir);

        let store = memory_store().await;
        store.ensure_table(Category::Discovery).await.unwrap();
        let finding = Finding::new("10.0.0.5", Category::Discovery, "smb", "open")
            .unwrap()
            .with_port(445)
            .with_protocol("tcp");
        store.insert(&finding).await.unwrap();

        let modules = vec!["smb".to_string(), "web".to_string()];
        exporter
            .export_category(&store, Category::Discovery, &modules)
            .await
            .unwrap();

        let dir = temp_dir.path().join("discovery");
        assert_eq!(
            std::fs::read_to_string(dir.join("smb.ip")).unwrap(),
            "10.0.0.5\n"
        );
        assert!(!dir.join("web.ip").exists());
    }

    #[tokio::test]
    async fn test_export_overwrites_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        let exporter = exporter_for(&temp_dir);

        let dir = temp_dir.path().join("discovery");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("smb.ip"), "172.16.0.1\n").unwrap();

        let store = memory_store().await;
        store.ensure_table(Category::Discovery).await.unwrap();
        let finding = Finding::new("10.0.0.5", Category::Discovery, "smb", "open")
            .unwrap()
            .with_port(445)
            .with_protocol("tcp");
        store.insert(&finding).await.unwrap();

        let modules = vec!["smb".to_string()];
        exporter
            .export_category(&store, Category::Discovery, &modules)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.join("smb.ip")).unwrap(),
            "10.0.0.5\n"
        );
    }
}
