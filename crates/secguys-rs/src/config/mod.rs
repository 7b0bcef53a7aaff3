use std::{env, fs, path::PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub results_dir: PathBuf,
    pub scanner_command: String,
    pub scanner_args: Vec<String>,
    pub scan_timeout_secs: u64,
    pub required_tools: Vec<String>,
    pub scope_allowlist: Vec<String>,
    pub semantic_enabled: bool,
    pub semantic_threshold: f32,
    pub report_command: Option<String>,
    pub report_timeout_secs: u64,
    pub dns_timeout_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var("SECGUYS_CONFIG").unwrap_or_else(|_| "config.json".to_string());
        let file_cfg: Option<AppConfig> = fs::read_to_string(&path)
            .ok()
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .with_context(|| format!("failed to parse {path}"))?;

        let mut cfg = file_cfg.unwrap_or_default();

        if let Ok(v) = env::var("SECGUYS_DB_PATH") {
            cfg.database_path = v.into();
        }
        if let Ok(v) = env::var("SECGUYS_SCAN_RESULTS") {
            cfg.results_dir = v.into();
        }
        if let Ok(v) = env::var("SECGUYS_SCANNER_CMD") {
            cfg.scanner_command = v;
        }
        if let Ok(v) = env::var("SECGUYS_SCAN_TIMEOUT") {
            cfg.scan_timeout_secs = v.parse().unwrap_or(cfg.scan_timeout_secs);
        }
        if let Ok(v) = env::var("SECGUYS_SCOPE_ALLOWLIST") {
            cfg.scope_allowlist = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = env::var("SEMANTIC_ENABLED") {
            cfg.semantic_enabled = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("SECGUYS_REPORT_CMD") {
            cfg.report_command = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            cfg.log_level = v;
        }

        Ok(cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("security_analysis.db"),
            results_dir: PathBuf::from("output"),
            scanner_command: "bash".to_string(),
            scanner_args: vec!["tools/scanner.sh".to_string()],
            scan_timeout_secs: 3600,
            required_tools: ["nmap", "nikto", "nuclei", "whatweb", "searchsploit"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            scope_allowlist: vec![],
            semantic_enabled: true,
            semantic_threshold: 0.65,
            report_command: None,
            report_timeout_secs: 600,
            dns_timeout_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn partial_config_file_keeps_defaults_for_missing_keys() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"results_dir": "/tmp/scans", "scan_timeout_secs": 30}"#)
                .expect("partial config should parse");
        assert_eq!(cfg.results_dir.to_str(), Some("/tmp/scans"));
        assert_eq!(cfg.scan_timeout_secs, 30);
        assert_eq!(cfg.required_tools.len(), 5);
        assert!(cfg.semantic_enabled);
        assert!(cfg.scope_allowlist.is_empty());
    }
}
