//! Stage runner: external tool invocation and output capture
//!
//! Builds the argument list for each configured module, spawns the tool,
//! captures its output and hands it to the matching normalizer. Findings
//! land in the record store; raw or cleaned output is appended to the
//! per-module audit log. A tool that exits non-zero is reported and its
//! partial findings are kept.

use regex::Regex;
use std::{ffi::OsStr, path::Path, process::Stdio};
use tokio::{fs, io::AsyncWriteExt, process::Command};
use tracing::{debug, info, warn};

use crate::{
    config::{AppConfig, ToolSpec},
    core::{Category, StageOutcome},
    error::{Result, ScanmanError},
    normalize::{AnsiNormalizer, LineNormalizer, Normalized, Normalizer, NseNormalizer},
    persistence::RecordStore,
    targets::TargetSelector,
};

/// Runs one configured module of one category at a time
pub struct StageRunner {
    config: AppConfig,
    selector: TargetSelector,
}

impl StageRunner {
    pub fn new(config: AppConfig) -> Self {
        let selector = TargetSelector::new(config.paths.targets_file.clone());
        Self { config, selector }
    }

    /// Run one discovery sweep over the given address ranges.
    ///
    /// The scan named by the screenshot configuration additionally writes
    /// the XML report the screenshot stage consumes later.
    pub async fn run_discovery(
        &self,
        store: &dyn RecordStore,
        scan: &str,
        ports: &str,
        sweep_targets: &[String],
    ) -> Result<StageOutcome> {
        let discovery = &self.config.discovery;

        let mut args: Vec<String> = vec![
            format!("-p{}", ports),
            "--rate".to_string(),
            discovery.rate.to_string(),
        ];
        if let Some(interface) = &discovery.interface {
            args.push("-e".to_string());
            args.push(interface.clone());
        }
        if let Some(exclude) = &discovery.exclude_file {
            args.push("--excludefile".to_string());
            args.push(exclude.display().to_string());
        }
        args.extend(sweep_targets.iter().cloned());

        if scan == self.config.screenshot.source_scan {
            args.push("-oX".to_string());
            args.push(self.config.paths.web_xml.display().to_string());
        }

        let output = self
            .invoke(&self.config.tools.masscan.binary, &args, None)
            .await?;
        if !output.status.success() {
            warn!(scan, status = %output.status, "Discovery sweep exited non-zero, keeping partial output");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let normalized = LineNormalizer.normalize(&stdout, scan);
        let instances = self
            .persist(store, normalized, Category::Discovery, scan)
            .await?;

        info!(scan, instances, "Discovery sweep completed");
        Ok(StageOutcome::Completed { instances })
    }

    /// Run one exploitation-framework module against hosts that exposed
    /// its port during discovery
    pub async fn run_exploit(
        &self,
        store: &dyn RecordStore,
        module: &str,
        port: u16,
    ) -> Result<StageOutcome> {
        let targets = self.selector.select(store, port).await?;
        if targets.is_empty() {
            info!(module, port, "No targets found, stage skipped");
            return Ok(StageOutcome::Skipped);
        }

        let label = module_label(module);
        let console_command = format!(
            "use {}; set RHOSTS file:{}; set RPORT {}; run; exit -y",
            module,
            targets.path.display(),
            port
        );
        let args = vec!["-q".to_string(), "-x".to_string(), console_command];

        let output = self
            .invoke(&self.config.tools.msfconsole.binary, &args, None)
            .await?;
        if !output.status.success() {
            warn!(module, status = %output.status, "Framework module exited non-zero, keeping partial output");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let boilerplate = vec![
            format!("RPORT => {}", port),
            format!("RHOSTS => file:{}", targets.path.display()),
        ];
        let normalized = AnsiNormalizer::new(boilerplate)?.normalize(&stdout, label);
        let instances = self
            .persist(store, normalized, Category::Exploit, label)
            .await?;

        info!(module, instances, "Exploit module completed");
        Ok(StageOutcome::Completed { instances })
    }

    /// Run one service-scanner script against hosts that exposed its port
    /// during discovery
    pub async fn run_detail(
        &self,
        store: &dyn RecordStore,
        script: &str,
        port: u16,
    ) -> Result<StageOutcome> {
        let targets = self.selector.select(store, port).await?;
        if targets.is_empty() {
            info!(script, port, "No targets found, stage skipped");
            return Ok(StageOutcome::Skipped);
        }

        fs::create_dir_all(&self.config.paths.xml_dir).await?;
        let xml_file = self.config.paths.xml_dir.join(format!("{}.xml", script));

        let args = vec![
            "-Pn".to_string(),
            "--script".to_string(),
            script.to_string(),
            "-p".to_string(),
            port.to_string(),
            "-iL".to_string(),
            targets.path.display().to_string(),
            "-oX".to_string(),
            xml_file.display().to_string(),
        ];

        let output = self
            .invoke(&self.config.tools.nmap.binary, &args, None)
            .await?;
        if !output.status.success() {
            warn!(script, status = %output.status, "Detail scan exited non-zero, keeping partial output");
        }

        let report = match fs::read_to_string(&xml_file).await {
            Ok(report) => report,
            Err(err) => {
                warn!(script, "No XML report produced: {}", err);
                String::new()
            }
        };

        let normalized =
            NseNormalizer::new(self.config.detail.benign_outputs.clone()).normalize(&report, script);
        let instances = self
            .persist(store, normalized, Category::DetailScan, script)
            .await?;

        info!(script, instances, "Detail scan completed");
        Ok(StageOutcome::Completed { instances })
    }

    /// Run the screenshot tool over the XML report produced during
    /// discovery. Spawned in its own working directory; the pipeline's
    /// working directory never changes.
    pub async fn run_screenshot(&self) -> Result<StageOutcome> {
        let screenshot = &self.config.screenshot;
        let web_xml = &self.config.paths.web_xml;

        if !web_xml.exists() {
            warn!(
                "No XML report at {}, screenshot stage skipped",
                web_xml.display()
            );
            return Ok(StageOutcome::Skipped);
        }

        let mut args: Vec<String> = Vec::new();
        for (key, value) in &screenshot.long_args {
            args.push(key.clone());
            args.push(value.clone());
        }
        args.extend(screenshot.bool_args.iter().cloned());
        args.push("-x".to_string());
        args.push(web_xml.display().to_string());

        let output = self
            .invoke(&screenshot.binary, &args, Some(&screenshot.working_dir))
            .await?;
        if !output.status.success() {
            warn!(status = %output.status, "Screenshot tool exited non-zero");
        }

        let label = screenshot
            .binary
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or("screenshot");
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            self.append_audit(Category::Screenshot, label, &stdout).await?;
        }

        info!("Screenshot stage completed");
        Ok(StageOutcome::Completed { instances: 0 })
    }

    /// Probe a tool's version and compare it against the pinned known-good
    /// one. A probe that cannot run is a warning, never fatal.
    pub async fn check_tool_version(&self, name: &str, spec: &ToolSpec, flag: &str) {
        let output = match Command::new(&spec.binary)
            .arg(flag)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                warn!("Version probe failed for {}: {}", name, err);
                return;
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        match extract_version(&text) {
            Some(version) if version == spec.stable_version => {
                info!("{} v{} is supported", name, version);
            }
            Some(version) => {
                warn!(
                    "{} v{} differs from known-good v{}",
                    name, version, spec.stable_version
                );
            }
            None => warn!("Could not read a version from {} output", name),
        }
    }

    async fn invoke(
        &self,
        binary: impl AsRef<OsStr>,
        args: &[String],
        current_dir: Option<&Path>,
    ) -> Result<std::process::Output> {
        let binary = binary.as_ref();
        debug!(
            "Invoking: {} {}",
            binary.to_string_lossy(),
            args.join(" ")
        );

        let mut command = Command::new(binary);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = current_dir {
            command.current_dir(dir);
        }

        command
            .output()
            .await
            .map_err(|err| ScanmanError::invocation(binary.to_string_lossy(), err.to_string()))
    }

    async fn persist(
        &self,
        store: &dyn RecordStore,
        normalized: Normalized,
        category: Category,
        label: &str,
    ) -> Result<usize> {
        for finding in &normalized.findings {
            store.insert(finding).await?;
        }

        if !normalized.audit.is_empty() {
            self.append_audit(category, label, &normalized.audit).await?;
        }

        Ok(normalized.findings.len())
    }

    async fn append_audit(&self, category: Category, label: &str, text: &str) -> Result<()> {
        let dir = self.config.paths.category_dir(category.as_str());
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.stdout", label));
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            file.write_all(b"\n").await?;
        }

        Ok(())
    }
}

/// Final path segment of a framework module identifier
pub(crate) fn module_label(module: &str) -> &str {
    module.rsplit('/').next().unwrap_or(module)
}

fn extract_version(text: &str) -> Option<String> {
    let pattern = Regex::new(r"\d+\.\d+(\.\d+)*").ok()?;
    pattern.find(text).map(|m| m.as_str().to_string())
}
