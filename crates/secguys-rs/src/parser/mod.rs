//! Scanner output parsers.
//!
//! Every parser reads one fixed file inside a target's results directory and
//! fails soft: a missing file yields an empty result and a malformed record is
//! logged and skipped. Nothing in here returns an error to the caller.

mod nikto;
mod nmap;
mod nuclei;
mod searchsploit;
mod whatweb;

use std::{fs, io::ErrorKind, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::ParseError, models::Severity};

pub use nikto::{parse_nikto_file, parse_nikto_text};
pub use nmap::{parse_nmap_file, parse_nmap_xml};
pub use nuclei::{parse_nuclei_file, parse_nuclei_line};
pub use searchsploit::{parse_searchsploit_file, parse_searchsploit_text};
pub use whatweb::{parse_whatweb_file, parse_whatweb_text};

pub const NMAP_FILE: &str = "nmap.xml";
pub const WHATWEB_FILE: &str = "whatweb.json";
pub const NUCLEI_FILE: &str = "nuclei.json";
pub const NIKTO_FILE: &str = "nikto.txt";
pub const SEARCHSPLOIT_FILE: &str = "exploits_raw.json";

pub const SCANNER_FILES: [&str; 5] = [
    WHATWEB_FILE,
    NIKTO_FILE,
    NMAP_FILE,
    NUCLEI_FILE,
    SEARCHSPLOIT_FILE,
];

/// One open port reported by the host/service scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    pub protocol: String,
    pub service: String,
    pub product: Option<String>,
}

/// One web-vulnerability template hit. `raw` keeps the whole source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnRecord {
    pub template: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub url: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitRecord {
    pub title: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub cve: Option<String>,
}

/// Everything the five parsers extracted from one results directory.
#[derive(Debug, Clone, Default)]
pub struct ParsedScan {
    pub services: Vec<ServicePort>,
    pub tech_stack: Vec<String>,
    pub vulnerabilities: Vec<VulnRecord>,
    pub server_findings: Vec<String>,
    pub exploits: Vec<ExploitRecord>,
}

pub fn parse_results_dir(dir: &Path) -> ParsedScan {
    ParsedScan {
        services: parse_nmap_file(&dir.join(NMAP_FILE)),
        tech_stack: parse_whatweb_file(&dir.join(WHATWEB_FILE)),
        vulnerabilities: parse_nuclei_file(&dir.join(NUCLEI_FILE)),
        server_findings: parse_nikto_file(&dir.join(NIKTO_FILE)),
        exploits: parse_searchsploit_file(&dir.join(SEARCHSPLOIT_FILE)),
    }
}

/// Reads a scanner file; a missing or unreadable file is treated as empty output.
pub(crate) fn read_optional(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "scanner output not present");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "scanner output unreadable");
            None
        }
    }
}

/// Applies `parse` to every non-blank line, logging and skipping lines that fail.
pub(crate) fn parse_lines<T>(
    source: &str,
    content: &str,
    mut parse: impl FnMut(&str) -> Result<Vec<T>, ParseError>,
) -> Vec<T> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse(line) {
            Ok(records) => out.extend(records),
            Err(e) => warn!(source, line = idx + 1, error = %e, "skipping malformed record"),
        }
    }
    out
}

pub(crate) fn as_object(
    value: &serde_json::Value,
) -> Result<&serde_json::Map<String, serde_json::Value>, ParseError> {
    value.as_object().ok_or(ParseError::NotAnObject)
}

#[cfg(test)]
pub(crate) fn sample(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("samples").join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_yields_empty_parse() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = parse_results_dir(&dir.path().join("nothing-here"));
        assert!(parsed.services.is_empty());
        assert!(parsed.tech_stack.is_empty());
        assert!(parsed.vulnerabilities.is_empty());
        assert!(parsed.server_findings.is_empty());
        assert!(parsed.exploits.is_empty());
    }

    #[test]
    fn sample_directory_parses_every_tool() {
        let parsed = parse_results_dir(&sample(""));
        assert_eq!(parsed.services.len(), 2);
        assert_eq!(parsed.tech_stack, vec!["Apache", "HTTPServer", "PHP"]);
        assert_eq!(parsed.vulnerabilities.len(), 3);
        assert_eq!(parsed.server_findings.len(), 3);
        assert_eq!(parsed.exploits.len(), 2);
    }
}
