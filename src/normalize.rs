//! Output normalizers for external tool output
//!
//! Each external tool emits a different shape of output; the normalizers
//! turn all of them into the one finding shape the record store accepts:
//! - `LineNormalizer`: fast-scanner list output, one record per line
//! - `NseNormalizer`: service-scanner XML reports
//! - `AnsiNormalizer`: exploitation-framework console text
//!
//! Normalization never fails: fragments that do not parse are dropped and
//! zero matches yield an empty batch.

use regex::Regex;

use crate::{
    core::{Category, Finding},
    error::Result,
};

/// One normalization pass over a tool's captured output
pub trait Normalizer: Send + Sync {
    /// Convert raw output into findings plus the text destined for the
    /// module's audit log.
    fn normalize(&self, raw: &str, module: &str) -> Normalized;
}

/// Result of a normalization pass
#[derive(Debug, Default)]
pub struct Normalized {
    /// Findings to insert into the record store
    pub findings: Vec<Finding>,
    /// Text appended to the per-module audit log
    pub audit: String,
}

/// Normalizer for the fast port scanner's list output.
///
/// Lines look like `open tcp 445 10.0.0.5 1631886788`; fields are
/// positional `state proto port host`. Comment lines and lines that do not
/// parse are skipped.
pub struct LineNormalizer;

impl Normalizer for LineNormalizer {
    fn normalize(&self, raw: &str, module: &str) -> Normalized {
        let mut findings = Vec::new();

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }

            let (state, proto, port, host) = (fields[0], fields[1], fields[2], fields[3]);
            let port = match port.parse::<u16>() {
                Ok(p) => p,
                Err(_) => continue,
            };

            match Finding::new(host, Category::Discovery, module, state) {
                Ok(finding) => findings.push(finding.with_port(port).with_protocol(proto)),
                Err(_) => continue,
            }
        }

        Normalized {
            findings,
            audit: raw.to_string(),
        }
    }
}

/// One script result parsed from a service-scanner XML report
#[derive(Debug, Clone)]
pub struct NseEntry {
    pub host: String,
    pub port: Option<u16>,
    pub script: String,
    pub output: Option<String>,
}

/// Normalizer for service-scanner XML reports.
///
/// Walks `host` elements, takes the IPv4 `address` attribute and yields one
/// entry per `script` element under each `port`. Every entry lands in the
/// audit log; entries with no output, or whose output matches the benign
/// list, are excluded from the findings.
pub struct NseNormalizer {
    benign_outputs: Vec<String>,
}

impl NseNormalizer {
    pub fn new(benign_outputs: Vec<String>) -> Self {
        Self { benign_outputs }
    }

    fn parse_entries(&self, raw: &str) -> Vec<NseEntry> {
        let doc = match roxmltree::Document::parse(raw) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::debug!("Unparseable XML report dropped: {}", err);
                return Vec::new();
            }
        };

        let mut entries = Vec::new();

        for host_node in doc.descendants().filter(|n| n.has_tag_name("host")) {
            let addr = host_node
                .children()
                .find(|n| {
                    n.has_tag_name("address") && n.attribute("addrtype") == Some("ipv4")
                })
                .and_then(|n| n.attribute("addr"));

            let host = match addr {
                Some(addr) => addr.to_string(),
                None => continue,
            };

            for port_node in host_node.descendants().filter(|n| n.has_tag_name("port")) {
                let port = port_node
                    .attribute("portid")
                    .and_then(|p| p.parse::<u16>().ok());

                for script in port_node.children().filter(|n| n.has_tag_name("script")) {
                    let script_id = match script.attribute("id") {
                        Some(id) => id.to_string(),
                        None => continue,
                    };

                    entries.push(NseEntry {
                        host: host.clone(),
                        port,
                        script: script_id,
                        output: script.attribute("output").map(str::to_string),
                    });
                }
            }
        }

        entries
    }

    fn is_benign(&self, output: &str) -> bool {
        self.benign_outputs.iter().any(|benign| benign == output)
    }
}

impl Normalizer for NseNormalizer {
    fn normalize(&self, raw: &str, module: &str) -> Normalized {
        let entries = self.parse_entries(raw);

        let mut findings = Vec::new();
        let mut audit = String::new();

        for entry in &entries {
            let output = entry.output.as_deref().unwrap_or("");
            audit.push_str(&format!("{} {}\n", entry.host, output.to_uppercase()));

            let output = match entry.output.as_deref() {
                Some(output) if !self.is_benign(output) => output,
                _ => continue,
            };

            if let Ok(finding) =
                Finding::new(&entry.host, Category::DetailScan, module, output)
            {
                let finding = match entry.port {
                    Some(port) => finding.with_port(port),
                    None => finding,
                };
                findings.push(finding);
            }
        }

        Normalized { findings, audit }
    }
}

/// Normalizer for exploitation-framework console text.
///
/// Strips ANSI escape sequences, removes the echoed invocation boilerplate
/// handed in by the caller plus the first two newline separators, then
/// extracts every dotted-quad address from the cleaned text.
pub struct AnsiNormalizer {
    boilerplate: Vec<String>,
    ansi: Regex,
    ipv4: Regex,
}

impl AnsiNormalizer {
    /// Build a normalizer for one invocation. `boilerplate` carries the
    /// exact header fragments the framework echoes back, e.g.
    /// `RPORT => 445` and `RHOSTS => file:/tmp/targets.txt`.
    pub fn new(boilerplate: Vec<String>) -> Result<Self> {
        Ok(Self {
            boilerplate,
            ansi: Regex::new(r"\x1b[^m]*m")?,
            ipv4: Regex::new(
                r"((25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)",
            )?,
        })
    }

    fn clean(&self, raw: &str) -> String {
        let mut text = self.ansi.replace_all(raw, "").into_owned();
        for fragment in &self.boilerplate {
            text = text.replace(fragment.as_str(), "");
        }
        text.replacen('\n', "", 2)
    }
}

impl Normalizer for AnsiNormalizer {
    fn normalize(&self, raw: &str, module: &str) -> Normalized {
        let cleaned = self.clean(raw);

        let mut findings = Vec::new();
        for capture in self.ipv4.find_iter(&cleaned) {
            if let Ok(finding) =
                Finding::new(capture.as_str(), Category::Exploit, module, module)
            {
                findings.push(finding);
            }
        }

        Normalized {
            findings,
            audit: cleaned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_normalizer_parses_list_output() {
        let raw = "#masscan\n\
                   open tcp 445 10.0.0.5 1631886788\n\
                   open tcp 445 999.0.0.5 1631886788\n\
                   open tcp notaport 10.0.0.6 1631886788\n\
                   open tcp 80 10.0.0.9 1631886790\n";

        let normalized = LineNormalizer.normalize(raw, "smb");
        assert_eq!(normalized.findings.len(), 2);

        let first = &normalized.findings[0];
        assert_eq!(first.host, "10.0.0.5");
        assert_eq!(first.port, Some(445));
        assert_eq!(first.protocol.as_deref(), Some("tcp"));
        assert_eq!(first.module, "smb");
        assert_eq!(first.detail, "open");

        assert_eq!(normalized.findings[1].host, "10.0.0.9");
        assert_eq!(normalized.audit, raw);
    }

    #[test]
    fn test_line_normalizer_empty_on_no_matches() {
        let normalized = LineNormalizer.normalize("# nothing here\n", "smb");
        assert!(normalized.findings.is_empty());
    }

    #[test]
    fn test_nse_normalizer_excludes_benign_output() {
        let xml = r#"<nmaprun>
            <host>
                <address addr="10.0.0.5" addrtype="ipv4"/>
                <ports>
                    <port protocol="tcp" portid="445">
                        <script id="smb2-security-mode" output="Message signing enabled and required"/>
                        <script id="smb-vuln-ms17-010" output="potential-issue"/>
                    </port>
                </ports>
            </host>
        </nmaprun>"#;

        let normalizer = NseNormalizer::new(vec![
            "Message signing enabled and required".to_string(),
            "required".to_string(),
        ]);
        let normalized = normalizer.normalize(xml, "smb-vuln-ms17-010");

        assert_eq!(normalized.findings.len(), 1);
        assert_eq!(normalized.findings[0].host, "10.0.0.5");
        assert_eq!(normalized.findings[0].port, Some(445));
        assert_eq!(normalized.findings[0].detail, "potential-issue");

        // Both entries reach the audit log, benign one included
        assert!(normalized.audit.contains("MESSAGE SIGNING ENABLED AND REQUIRED"));
        assert!(normalized.audit.contains("POTENTIAL-ISSUE"));
    }

    #[test]
    fn test_nse_normalizer_unparseable_xml_yields_nothing() {
        let normalizer = NseNormalizer::new(Vec::new());
        let normalized = normalizer.normalize("not xml at all", "smb2-security-mode");
        assert!(normalized.findings.is_empty());
        assert!(normalized.audit.is_empty());
    }

    #[test]
    fn test_ansi_normalizer_extracts_hosts_from_cleaned_text() {
        let raw = "\x1b[31mRHOSTS => file:/tmp/t.txt\n\n192.168.1.10 open\x1b[0m";
        let normalizer = AnsiNormalizer::new(vec![
            "RPORT => 445".to_string(),
            "RHOSTS => file:/tmp/t.txt".to_string(),
        ])
        .unwrap();

        let normalized = normalizer.normalize(raw, "smb_ms17_010");

        assert_eq!(normalized.findings.len(), 1);
        assert_eq!(normalized.findings[0].host, "192.168.1.10");
        assert_eq!(normalized.findings[0].module, "smb_ms17_010");
        assert_eq!(normalized.findings[0].detail, "smb_ms17_010");
        assert_eq!(normalized.findings[0].port, None);
    }

    #[test]
    fn test_ansi_normalizer_strips_escape_and_boilerplate() {
        let raw = "\x1b[1mRPORT => 445\x1b[0m\nRHOSTS => file:/tmp/t.txt\nrunning\n10.0.0.7\n";
        let normalizer = AnsiNormalizer::new(vec![
            "RPORT => 445".to_string(),
            "RHOSTS => file:/tmp/t.txt".to_string(),
        ])
        .unwrap();

        let normalized = normalizer.normalize(raw, "smb_ms17_010");

        assert!(!normalized.audit.contains('\x1b'));
        assert!(!normalized.audit.contains("RPORT"));
        assert!(!normalized.audit.contains("RHOSTS"));
        assert_eq!(normalized.findings.len(), 1);
        assert_eq!(normalized.findings[0].host, "10.0.0.7");
    }
}
