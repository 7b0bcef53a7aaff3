//! Merge engine: joins open ports with vulnerability and exploit records into
//! the canonical bundle consumed by ingestion.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::Result,
    parser::{parse_results_dir, ExploitRecord, ParsedScan, VulnRecord},
};

pub const BUNDLE_FILE: &str = "final.json";

/// One open port after merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalServiceRecord {
    pub port: u16,
    #[serde(default)]
    pub protocol: String,
    pub service: String,
    pub version: Option<String>,
    pub nuclei: Vec<String>,
    pub exploits: Vec<String>,
    #[serde(default)]
    pub raw_nuclei: Vec<VulnRecord>,
    #[serde(default)]
    pub raw_exploits: Vec<ExploitRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSummary {
    pub total_services: usize,
    pub total_vulnerabilities: usize,
    pub total_exploits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalBundle {
    pub target: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub nikto_findings: Vec<String>,
    pub findings: Vec<CanonicalServiceRecord>,
    #[serde(default)]
    pub summary: BundleSummary,
}

/// The port number appears anywhere in the matched URL.
///
/// Over-matches when the digits show up elsewhere (port 22 vs `:8022`, or an
/// address octet); never misses a URL that names the port explicitly.
pub fn port_in_url(port: u16, url: &str) -> bool {
    url.contains(&port.to_string())
}

/// The service name appears in the template identifier, ignoring case.
///
/// Catches service-specific templates (`ssh-*` for `ssh`) but also any template
/// that merely embeds the name (`http` inside `https-*`). A port without a
/// service name matches every template.
pub fn service_in_template(service: &str, template: &str) -> bool {
    template.to_lowercase().contains(&service.to_lowercase())
}

/// The product/version string appears in the exploit title, ignoring case.
///
/// Without a version nothing is attributed: a bare service name would pull in
/// every exploit ever filed against that product.
pub fn version_in_title(version: Option<&str>, title: &str) -> bool {
    match version {
        Some(v) if !v.trim().is_empty() => title.to_lowercase().contains(&v.to_lowercase()),
        _ => false,
    }
}

pub fn merge(target: &str, parsed: ParsedScan) -> CanonicalBundle {
    let ParsedScan {
        services,
        tech_stack,
        vulnerabilities,
        server_findings,
        exploits,
    } = parsed;

    let findings: Vec<CanonicalServiceRecord> = services
        .iter()
        .map(|svc| {
            let raw_nuclei: Vec<VulnRecord> = vulnerabilities
                .iter()
                .filter(|v| port_in_url(svc.port, &v.url) || service_in_template(&svc.service, &v.template))
                .cloned()
                .collect();
            let raw_exploits: Vec<ExploitRecord> = exploits
                .iter()
                .filter(|e| version_in_title(svc.product.as_deref(), &e.title))
                .cloned()
                .collect();

            CanonicalServiceRecord {
                port: svc.port,
                protocol: svc.protocol.clone(),
                service: svc.service.clone(),
                version: svc.product.clone(),
                nuclei: raw_nuclei.iter().map(|v| v.title.clone()).collect(),
                exploits: raw_exploits.iter().map(|e| e.title.clone()).collect(),
                raw_nuclei,
                raw_exploits,
            }
        })
        .collect();

    CanonicalBundle {
        target: target.to_string(),
        tech_stack,
        nikto_findings: server_findings,
        summary: BundleSummary {
            total_services: services.len(),
            total_vulnerabilities: vulnerabilities.len(),
            total_exploits: exploits.len(),
        },
        findings,
    }
}

/// Parses every scanner file in `dir` and merges the results for `target`.
pub fn normalize_dir(target: &str, dir: &Path) -> CanonicalBundle {
    let bundle = merge(target, parse_results_dir(dir));
    info!(
        target,
        services = bundle.summary.total_services,
        vulnerabilities = bundle.summary.total_vulnerabilities,
        exploits = bundle.summary.total_exploits,
        "normalized scanner output"
    );
    bundle
}

pub fn write_bundle(bundle: &CanonicalBundle, path: &Path) -> Result<()> {
    let mut body = serde_json::to_string_pretty(bundle)?;
    body.push('\n');
    fs::write(path, body)?;
    Ok(())
}

pub fn read_bundle(path: &Path) -> Result<CanonicalBundle> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        models::Severity,
        parser::{sample, ServicePort},
    };

    fn ssh_service(product: Option<&str>) -> ServicePort {
        ServicePort {
            port: 22,
            protocol: "tcp".to_string(),
            service: "ssh".to_string(),
            product: product.map(ToString::to_string),
        }
    }

    fn vuln(template: &str, url: &str) -> VulnRecord {
        VulnRecord {
            template: template.to_string(),
            kind: "network".to_string(),
            severity: Severity::Medium,
            title: format!("{template} finding"),
            description: String::new(),
            url: url.to_string(),
            raw: json!({"template": template}),
        }
    }

    fn exploit(title: &str) -> ExploitRecord {
        ExploitRecord {
            title: title.to_string(),
            path: "/e/1.py".to_string(),
            kind: "remote".to_string(),
            cve: None,
        }
    }

    #[test]
    fn zero_open_ports_gives_empty_bundle() {
        let bundle = merge("10.0.0.9", ParsedScan::default());
        assert!(bundle.findings.is_empty());
        assert_eq!(bundle.summary, BundleSummary::default());
    }

    #[test]
    fn service_less_port_collects_every_template() {
        let parsed = ParsedScan {
            services: vec![ServicePort {
                port: 161,
                protocol: "udp".to_string(),
                service: String::new(),
                product: None,
            }],
            vulnerabilities: vec![vuln("apache-detect", "http://h:80/")],
            ..Default::default()
        };
        let bundle = merge("h", parsed);
        assert_eq!(bundle.findings[0].nuclei, vec!["apache-detect finding"]);
    }

    #[test]
    fn missing_version_never_attaches_exploits() {
        let parsed = ParsedScan {
            services: vec![ssh_service(None)],
            exploits: vec![exploit("OpenSSH 7.2 - Remote Overflow"), exploit("ssh anything")],
            ..Default::default()
        };
        let bundle = merge("h", parsed);
        assert_eq!(bundle.findings.len(), 1);
        assert!(bundle.findings[0].exploits.is_empty());
        assert!(bundle.findings[0].raw_exploits.is_empty());
        assert_eq!(bundle.summary.total_exploits, 2);
    }

    #[test]
    fn ssh_scenario_attaches_one_vuln_and_one_exploit() {
        let parsed = ParsedScan {
            services: vec![ssh_service(Some("OpenSSH 7.2"))],
            vulnerabilities: vec![
                vuln("weak-cipher", "10.0.0.5:22"),
                vuln("wordpress-login", "http://10.0.0.5/wp-login.php"),
            ],
            exploits: vec![
                exploit("OpenSSH 7.2 — Remote Overflow"),
                exploit("ProFTPd 1.3.5 - File Copy"),
            ],
            ..Default::default()
        };
        let bundle = merge("10.0.0.5", parsed);
        let rec = &bundle.findings[0];
        assert_eq!(rec.port, 22);
        assert_eq!(rec.nuclei, vec!["weak-cipher finding"]);
        assert_eq!(rec.exploits, vec!["OpenSSH 7.2 — Remote Overflow"]);
        assert_eq!(rec.raw_nuclei[0].url, "10.0.0.5:22");
        assert_eq!(bundle.summary.total_services, 1);
        assert_eq!(bundle.summary.total_vulnerabilities, 2);
        assert_eq!(bundle.summary.total_exploits, 2);
    }

    #[test]
    fn predicates_keep_substring_semantics() {
        assert!(port_in_url(22, "http://h:8022/"));
        assert!(!port_in_url(443, "http://h:80/"));
        assert!(service_in_template("SSH", "network/ssh-weak-algo"));
        assert!(service_in_template("http", "https-redirect"));
        assert!(service_in_template("", "anything"));
        assert!(!service_in_template("ftp", "http-missing-headers"));
        assert!(version_in_title(Some("openssh 7.2"), "OpenSSH 7.2p1 - Enum"));
        assert!(!version_in_title(Some("  "), "OpenSSH"));
        assert!(!version_in_title(None, "OpenSSH"));
    }

    #[test]
    fn sample_directory_merges_per_port() {
        let bundle = normalize_dir("10.0.0.5", &sample(""));
        assert_eq!(bundle.findings.len(), 2);

        let ssh = &bundle.findings[0];
        assert_eq!(ssh.nuclei, vec!["SSH Weak Algorithms Supported"]);
        assert_eq!(ssh.exploits, vec!["OpenSSH 7.2 - Remote Overflow"]);

        let http = &bundle.findings[1];
        assert_eq!(http.nuclei, vec!["Apache Detection"]);
        assert!(http.exploits.is_empty());

        assert_eq!(bundle.nikto_findings.len(), 3);
        assert_eq!(
            bundle.summary,
            BundleSummary {
                total_services: 2,
                total_vulnerabilities: 3,
                total_exploits: 2
            }
        );
    }

    #[test]
    fn normalizing_twice_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");

        write_bundle(&normalize_dir("10.0.0.5", &sample("")), &first).unwrap();
        write_bundle(&normalize_dir("10.0.0.5", &sample("")), &second).unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
        assert_eq!(read_bundle(&first).unwrap().target, "10.0.0.5");
    }
}
