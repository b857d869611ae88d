//! Target selection for dependent stages
//!
//! Dependent stages only scan hosts already known to expose the relevant
//! port. The selector queries discovery findings, writes the ordered host
//! list to the shared targets file and reports the count; an empty list is
//! the caller's signal to skip the stage.

use std::{collections::HashSet, path::PathBuf};
use tokio::fs;
use tracing::info;

use crate::{error::Result, persistence::RecordStore};

/// Ephemeral host list for one dependent stage invocation
#[derive(Debug, Clone)]
pub struct TargetList {
    pub hosts: Vec<String>,
    pub path: PathBuf,
}

impl TargetList {
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Sort hosts by numeric dotted-quad ordering after deduplication
pub fn sort_unique_hosts<I: IntoIterator<Item = String>>(hosts: I) -> Vec<String> {
    let unique: HashSet<String> = hosts.into_iter().collect();
    let mut sorted: Vec<String> = unique.into_iter().collect();
    sorted.sort_by_key(|host| {
        host.split('.')
            .map(|octet| octet.parse::<u64>().unwrap_or(0))
            .collect::<Vec<u64>>()
    });
    sorted
}

/// Writes the per-stage target list file
pub struct TargetSelector {
    targets_file: PathBuf,
}

impl TargetSelector {
    pub fn new(targets_file: PathBuf) -> Self {
        Self { targets_file }
    }

    /// Select discovery hosts seen on `port` and overwrite the targets
    /// file with them, one per line. Nothing is written when the selection
    /// is empty.
    pub async fn select(&self, store: &dyn RecordStore, port: u16) -> Result<TargetList> {
        let hosts = sort_unique_hosts(store.hosts_by_port(port).await?);

        if !hosts.is_empty() {
            if let Some(parent) = self.targets_file.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut content = hosts.join("\n");
            content.push('\n');
            fs::write(&self.targets_file, content).await?;
            info!(
                "{} targets written to: {}",
                hosts.len(),
                self.targets_file.display()
            );
        }

        Ok(TargetList {
            hosts,
            path: self.targets_file.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Category, Finding};
    use crate::persistence::SqliteStore;
    use sqlx::sqlite::SqliteConnectOptions;
    use tempfile::TempDir;

    async fn memory_store() -> SqliteStore {
        let options = SqliteConnectOptions::new().in_memory(true);
        SqliteStore::connect(options).await.unwrap()
    }

    async fn insert_discovery(store: &SqliteStore, host: &str, port: u16) {
        let finding = Finding::new(host, Category::Discovery, "smb", "open")
            .unwrap()
            .with_port(port)
            .with_protocol("tcp");
        store.insert(&finding).await.unwrap();
    }

    #[test]
    fn test_sort_unique_hosts() {
        let hosts = vec![
            "10.0.0.2".to_string(),
            "10.0.0.1".to_string(),
            "10.0.0.2".to_string(),
        ];
        assert_eq!(
            sort_unique_hosts(hosts),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
    }

    #[test]
    fn test_sort_is_numeric_not_lexicographic() {
        let hosts = vec!["10.0.0.10".to_string(), "10.0.0.2".to_string()];
        assert_eq!(
            sort_unique_hosts(hosts),
            vec!["10.0.0.2".to_string(), "10.0.0.10".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_list_and_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let targets_file = temp_dir.path().join("targets.txt");

        let store = memory_store().await;
        store.ensure_table(Category::Discovery).await.unwrap();

        let selector = TargetSelector::new(targets_file.clone());
        let list = selector.select(&store, 445).await.unwrap();

        assert!(list.is_empty());
        assert!(!targets_file.exists());
    }

    #[tokio::test]
    async fn test_select_writes_sorted_unique_hosts() {
        let temp_dir = TempDir::new().unwrap();
        let targets_file = temp_dir.path().join("targets.txt");

        let store = memory_store().await;
        store.ensure_table(Category::Discovery).await.unwrap();
        insert_discovery(&store, "10.0.0.2", 445).await;
        insert_discovery(&store, "10.0.0.1", 445).await;
        insert_discovery(&store, "10.0.0.2", 445).await;

        let selector = TargetSelector::new(targets_file.clone());
        let list = selector.select(&store, 445).await.unwrap();

        assert_eq!(list.len(), 2);
        let content = std::fs::read_to_string(&targets_file).unwrap();
        assert_eq!(content, "10.0.0.1\n10.0.0.2\n");

        // Rerun overwrites rather than appends
        let list = selector.select(&store, 445).await.unwrap();
        assert_eq!(list.len(), 2);
        let content = std::fs::read_to_string(&targets_file).unwrap();
        assert_eq!(content, "10.0.0.1\n10.0.0.2\n");
    }
}
