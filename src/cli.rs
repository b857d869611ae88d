//! Command-line interface definition
//!
//! Parses the sweep targets, the optional stage flags and the discovery
//! overrides. Discovery always runs; the exploit, detail-scan and
//! screenshot stages only run when their flag is present.

use clap::Parser;
use std::{net::Ipv4Addr, path::PathBuf};

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "scanman",
    about = "Network reconnaissance pipeline orchestrator",
    long_about = "Drives a fast port-scan sweep over the given address ranges, stores the \
                  findings, and optionally chains exploitation checks, service scripts and \
                  web screenshots against the hosts it discovered"
)]
pub struct Cli {
    /// Address ranges handed to the discovery sweep
    #[arg(
        required = true,
        help = "Target specifications (e.g. 10.0.0.0/24, 192.168.1.1, 10.0.0.1-10.0.0.50)"
    )]
    pub targets: Vec<String>,

    #[arg(
        short = 'c',
        long,
        value_name = "FILE",
        default_value = "./configs/scanman.toml",
        help = "Configuration file path"
    )]
    pub config: PathBuf,

    // Dependent stages
    #[arg(short = 'e', long, help = "Run the exploitation-framework stage")]
    pub exploit: bool,

    #[arg(short = 'd', long, help = "Run the detail-scan stage")]
    pub detail: bool,

    #[arg(short = 's', long, help = "Run the screenshot stage")]
    pub screenshot: bool,

    #[arg(long, help = "Drop each stage's findings table before it runs")]
    pub drop_tables: bool,

    // Discovery overrides
    #[arg(
        short = 'r',
        long,
        value_name = "PPS",
        help = "Override the discovery sweep rate (packets per second)"
    )]
    pub rate: Option<u64>,

    #[arg(
        short = 'i',
        long,
        value_name = "INTERFACE",
        help = "Network interface to sweep from"
    )]
    pub interface: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "File of addresses excluded from every sweep"
    )]
    pub exclude_file: Option<PathBuf>,
}

impl Cli {
    /// Validate CLI arguments before configuration is loaded
    pub fn validate(&self) -> Result<(), String> {
        for target in &self.targets {
            validate_target_spec(target)?;
        }

        if self.rate == Some(0) {
            return Err("Sweep rate must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Fold the discovery overrides into the loaded configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(rate) = self.rate {
            config.discovery.rate = rate;
        }
        if let Some(interface) = &self.interface {
            config.discovery.interface = Some(interface.clone());
        }
        if let Some(exclude) = &self.exclude_file {
            config.discovery.exclude_file = Some(exclude.clone());
        }
    }
}

/// Check one target specification: a single IPv4 address, a CIDR range or
/// a dashed address range.
fn validate_target_spec(spec: &str) -> Result<(), String> {
    if let Some((address, prefix)) = spec.split_once('/') {
        address
            .parse::<Ipv4Addr>()
            .map_err(|_| format!("Invalid address in CIDR range: {}", spec))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("Invalid prefix in CIDR range: {}", spec))?;
        if prefix > 32 {
            return Err(format!("CIDR prefix out of range: {}", spec));
        }
        return Ok(());
    }

    if let Some((start, end)) = spec.split_once('-') {
        start
            .parse::<Ipv4Addr>()
            .and(end.parse::<Ipv4Addr>())
            .map_err(|_| format!("Invalid address range: {}", spec))?;
        return Ok(());
    }

    spec.parse::<Ipv4Addr>()
        .map_err(|_| format!("Invalid target address: {}", spec))?;
    Ok(())
}
