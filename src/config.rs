//! Configuration management
//!
//! Provides centralized configuration with support for:
//! - TOML configuration files
//! - Environment variable overrides (SCANMAN_ prefix)
//! - Ordered per-category module maps (entry order drives stage order)
//! - Load-time validation of module entries

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ScanmanError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem layout
    pub paths: PathsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Discovery stage (fast port scanner)
    pub discovery: DiscoveryConfig,
    /// Exploit stage (exploitation framework checks)
    pub exploit: ExploitConfig,
    /// Detail-scan stage (service scanner scripts)
    pub detail: DetailConfig,
    /// Screenshot stage (web screenshot tool)
    pub screenshot: ScreenshotConfig,
    /// External tool binaries and pinned versions
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for per-category result files
    pub results_dir: PathBuf,
    /// Scratch directory for target lists and XML output
    pub tmp_dir: PathBuf,
    /// SQLite database file
    pub db_file: PathBuf,
    /// Target list handed to dependent stages, overwritten per module
    pub targets_file: PathBuf,
    /// Directory for detail-scan XML reports
    pub xml_dir: PathBuf,
    /// XML report consumed by the screenshot tool
    pub web_xml: PathBuf,
}

impl PathsConfig {
    /// Result directory for one category
    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.results_dir.join(category)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Ordered scan name -> port specification (e.g. "445" or "80,443")
    pub portscans: IndexMap<String, String>,
    /// Sweep rate in packets per second
    pub rate: u64,
    /// Network interface to scan from
    pub interface: Option<String>,
    /// File of addresses to exclude from every sweep
    pub exclude_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploitConfig {
    /// Ordered framework module path -> port it targets
    pub modules: IndexMap<String, u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailConfig {
    /// Ordered script name -> port it targets
    pub scripts: IndexMap<String, u16>,
    /// Script outputs recorded in the audit log but never stored as findings
    pub benign_outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    /// Screenshot tool entry point
    pub binary: PathBuf,
    /// Working directory the tool is spawned in
    pub working_dir: PathBuf,
    /// Discovery scan whose XML report feeds the screenshot tool
    pub source_scan: String,
    /// Long arguments passed as `--key value` pairs
    pub long_args: IndexMap<String, String>,
    /// Boolean flags passed verbatim
    pub bool_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub masscan: ToolSpec,
    pub msfconsole: ToolSpec,
    pub nmap: ToolSpec,
}

/// One external tool: how to invoke it and which version is known good
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub binary: String,
    pub stable_version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                results_dir: PathBuf::from("./results"),
                tmp_dir: PathBuf::from("./results/.tmp"),
                db_file: PathBuf::from("./results/.tmp/scanman.db"),
                targets_file: PathBuf::from("./results/.tmp/targets.txt"),
                xml_dir: PathBuf::from("./results/.tmp/xml"),
                web_xml: PathBuf::from("./results/screenshot/web.xml"),
            },
            logging: LoggingConfig::default(),
            discovery: DiscoveryConfig {
                portscans: IndexMap::from([
                    ("smb".to_string(), "445".to_string()),
                    ("web".to_string(), "80,443,8080,8443".to_string()),
                ]),
                rate: 500,
                interface: None,
                exclude_file: None,
            },
            exploit: ExploitConfig {
                modules: IndexMap::from([(
                    "auxiliary/scanner/smb/smb_ms17_010".to_string(),
                    445u16,
                )]),
            },
            detail: DetailConfig {
                scripts: IndexMap::from([
                    ("smb2-security-mode".to_string(), 445u16),
                    ("smb-vuln-ms17-010".to_string(), 445u16),
                ]),
                benign_outputs: vec![
                    "Message signing enabled and required".to_string(),
                    "required".to_string(),
                ],
            },
            screenshot: ScreenshotConfig {
                binary: PathBuf::from("/opt/EyeWitness/EyeWitness.py"),
                working_dir: PathBuf::from("/opt/EyeWitness"),
                source_scan: "web".to_string(),
                long_args: IndexMap::from([
                    ("--timeout".to_string(), "10".to_string()),
                    ("--threads".to_string(), "5".to_string()),
                ]),
                bool_args: vec!["--web".to_string(), "--no-prompt".to_string()],
            },
            tools: ToolsConfig {
                masscan: ToolSpec {
                    binary: "masscan".to_string(),
                    stable_version: "1.3.2".to_string(),
                },
                msfconsole: ToolSpec {
                    binary: "msfconsole".to_string(),
                    stable_version: "6.0.52".to_string(),
                },
                nmap: ToolSpec {
                    binary: "nmap".to_string(),
                    stable_version: "7.91".to_string(),
                },
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub async fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        info!("Loading configuration from: {}", config_path.display());

        let mut settings = config::Config::builder();

        // Start with default configuration
        settings = settings.add_source(config::Config::try_from(&Self::default())?);

        // Load from config file if it exists
        if config_path.exists() {
            debug!("Found configuration file, loading settings");
            settings = settings.add_source(config::File::from(config_path));
        } else {
            info!("No configuration file found, using defaults");
            Self::create_default_config(config_path).await?;
        }

        // Override with environment variables (prefixed with SCANMAN_)
        settings = settings.add_source(
            config::Environment::with_prefix("SCANMAN")
                .separator("_")
                .try_parsing(true),
        );

        let config: AppConfig = settings
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Create a default configuration file
    async fn create_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let default_config = Self::default();
        let config_content = toml::to_string_pretty(&default_config)
            .context("Failed to serialize default configuration")?;

        tokio::fs::write(path, config_content)
            .await
            .context("Failed to write default configuration file")?;

        info!("Created default configuration file: {}", path.display());
        Ok(())
    }

    /// Validate configuration values before any stage runs
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ScanmanError::validation(
                    "logging.level",
                    format!("invalid level: {}", self.logging.level),
                )
                .into())
            }
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ScanmanError::validation(
                    "logging.format",
                    format!("invalid format: {}", self.logging.format),
                )
                .into())
            }
        }

        if self.discovery.portscans.is_empty() {
            return Err(
                ScanmanError::validation("discovery.portscans", "at least one scan required")
                    .into(),
            );
        }

        for (name, ports) in &self.discovery.portscans {
            if name.trim().is_empty() {
                return Err(
                    ScanmanError::validation("discovery.portscans", "empty scan name").into(),
                );
            }
            validate_port_spec(name, ports)?;
        }

        for (name, port) in &self.exploit.modules {
            if name.trim().is_empty() {
                return Err(ScanmanError::validation("exploit.modules", "empty module name").into());
            }
            if *port == 0 {
                return Err(ScanmanError::validation(
                    "exploit.modules",
                    format!("port 0 is not scannable: {}", name),
                )
                .into());
            }
        }

        for (name, port) in &self.detail.scripts {
            if name.trim().is_empty() {
                return Err(ScanmanError::validation("detail.scripts", "empty script name").into());
            }
            if *port == 0 {
                return Err(ScanmanError::validation(
                    "detail.scripts",
                    format!("port 0 is not scannable: {}", name),
                )
                .into());
            }
        }

        if self.screenshot.source_scan.trim().is_empty() {
            return Err(
                ScanmanError::validation("screenshot.source_scan", "empty scan name").into(),
            );
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

/// Check that a discovery port specification parses: comma-separated ports
/// or inclusive ranges, e.g. "445", "80,443", "8000-8100".
fn validate_port_spec(name: &str, spec: &str) -> Result<()> {
    if spec.trim().is_empty() {
        return Err(ScanmanError::validation(
            "discovery.portscans",
            format!("empty port specification: {}", name),
        )
        .into());
    }

    for segment in spec.split(',') {
        let segment = segment.trim();
        let parts: Vec<&str> = segment.splitn(2, '-').collect();
        for part in &parts {
            match part.parse::<u16>() {
                Ok(0) | Err(_) => {
                    return Err(ScanmanError::validation(
                        "discovery.portscans",
                        format!("bad port '{}' in scan {}", segment, name),
                    )
                    .into())
                }
                Ok(_) => {}
            }
        }
    }

    Ok(())
}
