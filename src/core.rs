//! Core domain types and the pipeline coordinator
//!
//! Defines the category model shared by every module, the finding record
//! the store accepts, and the `Application` orchestrator that sequences
//! the stages: discovery always runs, the dependent stages only when their
//! flag is set, and the export pass closes every run.

use serde::{Deserialize, Serialize};
use std::{fmt, net::Ipv4Addr};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    cli::Cli,
    config::AppConfig,
    error::Result,
    persistence::{create_store, RecordStore},
    reporting::{create_exporter, Exporter},
    scanner::{module_label, StageRunner},
};

/// Pipeline stage category.
///
/// Each category owning findings maps to one database table and one result
/// directory; the screenshot stage only produces image output and an audit
/// log, so it owns no table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Discovery,
    Exploit,
    DetailScan,
    Screenshot,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Discovery,
        Category::Exploit,
        Category::DetailScan,
        Category::Screenshot,
    ];

    /// Directory name under the results root
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Discovery => "discovery",
            Category::Exploit => "exploit",
            Category::DetailScan => "detail-scan",
            Category::Screenshot => "screenshot",
        }
    }

    /// Database table owned by this category, if any
    pub fn table(&self) -> Option<&'static str> {
        match self {
            Category::Discovery => Some("discovery"),
            Category::Exploit => Some("exploit"),
            Category::DetailScan => Some("detail"),
            Category::Screenshot => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized record produced by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub host: String,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub category: Category,
    pub module: String,
    pub detail: String,
}

impl Finding {
    /// Build a finding, rejecting hosts that are not dotted-quad IPv4
    /// addresses
    pub fn new(host: &str, category: Category, module: &str, detail: &str) -> Result<Self> {
        host.parse::<Ipv4Addr>()?;

        Ok(Self {
            host: host.to_string(),
            port: None,
            protocol: None,
            category,
            module: module.to_string(),
            detail: detail.to_string(),
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_protocol<S: Into<String>>(mut self, protocol: S) -> Self {
        self.protocol = Some(protocol.into());
        self
    }
}

/// How one module invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The tool ran and its output was normalized and stored
    Completed { instances: usize },
    /// No targets (or no input report), nothing was run
    Skipped,
}

/// Counts accumulated over one pipeline run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub findings: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Completed { instances } => {
                self.completed += 1;
                self.findings += instances;
            }
            StageOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Main pipeline orchestrator
pub struct Application {
    config: AppConfig,
    store: Box<dyn RecordStore>,
    runner: StageRunner,
    exporter: Box<dyn Exporter>,
}

impl Application {
    /// Create an application instance with the flat-file exporter and the
    /// SQLite record store
    pub async fn new(config: AppConfig) -> Result<Self> {
        fs::create_dir_all(&config.paths.results_dir).await?;
        fs::create_dir_all(&config.paths.tmp_dir).await?;

        let store = create_store(&config).await?;
        let runner = StageRunner::new(config.clone());
        let exporter = create_exporter(&config);

        Ok(Self {
            config,
            store,
            runner,
            exporter,
        })
    }

    /// Run the full pipeline for one invocation
    pub async fn run(&self, cli: &Cli) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", run_id = %run_id);
        self.run_stages(cli).instrument(span).await
    }

    async fn run_stages(&self, cli: &Cli) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        self.run_discovery(cli, &mut summary).await?;

        if cli.exploit {
            self.run_exploit(cli, &mut summary).await?;
        }
        if cli.detail {
            self.run_detail(cli, &mut summary).await?;
        }
        if cli.screenshot {
            self.run_screenshot(&mut summary).await?;
        }

        // The sort pass runs even when a stage was skipped so that files
        // from earlier runs end up sorted too.
        self.exporter.finalize().await?;

        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            findings = summary.findings,
            "Pipeline run finished"
        );
        Ok(summary)
    }

    async fn run_discovery(&self, cli: &Cli, summary: &mut RunSummary) -> Result<()> {
        self.runner
            .check_tool_version("masscan", &self.config.tools.masscan, "--version")
            .await;
        self.prepare_category(Category::Discovery, cli.drop_tables)
            .await?;

        for (scan, ports) in &self.config.discovery.portscans {
            let result = self
                .runner
                .run_discovery(self.store.as_ref(), scan, ports, &cli.targets)
                .await;
            Self::absorb(summary, scan, result)?;
        }

        let scans: Vec<String> = self.config.discovery.portscans.keys().cloned().collect();
        self.exporter
            .export_category(self.store.as_ref(), Category::Discovery, &scans)
            .await
    }

    async fn run_exploit(&self, cli: &Cli, summary: &mut RunSummary) -> Result<()> {
        self.runner
            .check_tool_version("msfconsole", &self.config.tools.msfconsole, "-v")
            .await;
        self.prepare_category(Category::Exploit, cli.drop_tables)
            .await?;

        for (module, port) in &self.config.exploit.modules {
            let result = self
                .runner
                .run_exploit(self.store.as_ref(), module, *port)
                .await;
            Self::absorb(summary, module, result)?;
        }

        let labels: Vec<String> = self
            .config
            .exploit
            .modules
            .keys()
            .map(|module| module_label(module).to_string())
            .collect();
        self.exporter
            .export_category(self.store.as_ref(), Category::Exploit, &labels)
            .await
    }

    async fn run_detail(&self, cli: &Cli, summary: &mut RunSummary) -> Result<()> {
        self.runner
            .check_tool_version("nmap", &self.config.tools.nmap, "-V")
            .await;
        self.prepare_category(Category::DetailScan, cli.drop_tables)
            .await?;

        for (script, port) in &self.config.detail.scripts {
            let result = self
                .runner
                .run_detail(self.store.as_ref(), script, *port)
                .await;
            Self::absorb(summary, script, result)?;
        }

        let scripts: Vec<String> = self.config.detail.scripts.keys().cloned().collect();
        self.exporter
            .export_category(self.store.as_ref(), Category::DetailScan, &scripts)
            .await
    }

    async fn run_screenshot(&self, summary: &mut RunSummary) -> Result<()> {
        let result = self.runner.run_screenshot().await;
        Self::absorb(summary, "screenshot", result)
    }

    async fn prepare_category(&self, category: Category, drop_first: bool) -> Result<()> {
        if drop_first {
            self.store.drop_category(category).await?;
        }
        self.store.ensure_table(category).await
    }

    /// Store, configuration and validation errors abort the run; a failed
    /// tool invocation is reported and the pipeline moves on.
    fn absorb(summary: &mut RunSummary, label: &str, result: Result<StageOutcome>) -> Result<()> {
        match result {
            Ok(outcome) => {
                summary.record(outcome);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(label, "Stage failed, continuing: {}", err);
                summary.failed += 1;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_table_ownership() {
        assert_eq!(Category::Discovery.table(), Some("discovery"));
        assert_eq!(Category::Exploit.table(), Some("exploit"));
        assert_eq!(Category::DetailScan.table(), Some("detail"));
        assert_eq!(Category::Screenshot.table(), None);
    }

    #[test]
    fn test_category_display_matches_directory_names() {
        let names: Vec<&str> = Category::ALL.iter().map(Category::as_str).collect();
        assert_eq!(
            names,
            vec!["discovery", "exploit", "detail-scan", "screenshot"]
        );
        assert_eq!(Category::DetailScan.to_string(), "detail-scan");
    }

    #[test]
    fn test_finding_rejects_non_ipv4_hosts() {
        assert!(Finding::new("999.0.0.1", Category::Discovery, "smb", "open").is_err());
        assert!(Finding::new("example.com", Category::Discovery, "smb", "open").is_err());
        assert!(Finding::new("", Category::Discovery, "smb", "open").is_err());
    }

    #[test]
    fn test_finding_builders_set_optional_fields() {
        let finding = Finding::new("10.0.0.5", Category::Discovery, "smb", "open")
            .unwrap()
            .with_port(445)
            .with_protocol("tcp");

        assert_eq!(finding.host, "10.0.0.5");
        assert_eq!(finding.port, Some(445));
        assert_eq!(finding.protocol.as_deref(), Some("tcp"));
        assert_eq!(finding.category, Category::Discovery);
    }

    #[test]
    fn test_summary_records_outcomes() {
        let mut summary = RunSummary::default();
        summary.record(StageOutcome::Completed { instances: 3 });
        summary.record(StageOutcome::Skipped);
        summary.record(StageOutcome::Completed { instances: 2 });

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.findings, 5);
        assert_eq!(summary.failed, 0);
    }
}
