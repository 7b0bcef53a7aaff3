//! Evidence bundle handed to the external report generator.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{
    db::Store,
    error::{Result, ValidationError},
    models::{Asset, AssetIdentifier, Finding, ScanRun, Severity, Source},
    security::run_command_allowlisted,
};

pub const EVIDENCE_FILE: &str = "evidence.json";
pub const REPORT_FILE: &str = "report.md";
pub const MAX_FINDINGS_PER_SOURCE: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceFinding {
    pub source: Source,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub cve: Option<String>,
    pub cwe: Option<String>,
    pub raw: Value,
}

impl From<&Finding> for EvidenceFinding {
    fn from(f: &Finding) -> Self {
        Self {
            source: f.source,
            severity: f.severity,
            title: f.title.clone(),
            description: f.description.clone(),
            cve: f.cve.clone(),
            cwe: f.cwe.clone(),
            raw: f.raw.0.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceBundle {
    pub scan: ScanRun,
    pub asset: Asset,
    pub identifiers: Vec<AssetIdentifier>,
    pub severity_summary: BTreeMap<Severity, usize>,
    pub findings_by_source: BTreeMap<Source, Vec<EvidenceFinding>>,
    /// `"service:port"` -> finding titles, from the raw service context.
    pub service_exposure: BTreeMap<String, Vec<String>>,
    pub total_findings: usize,
}

fn exposure_key(raw: &Value) -> Option<String> {
    let port = raw.get("port").filter(|v| !v.is_null());
    let service = raw.get("service").and_then(Value::as_str);
    if port.is_none() && service.is_none() {
        return None;
    }
    let port = port.map(ToString::to_string).unwrap_or_default();
    Some(format!("{}:{}", service.unwrap_or_default(), port))
}

pub async fn build_evidence(store: &Store, scan_id: &str) -> Result<EvidenceBundle> {
    let scan = store
        .get_scan(scan_id)
        .await?
        .ok_or_else(|| ValidationError::new(format!("scan {scan_id} not found")))?;
    let asset = store.get_asset(&scan.asset_id).await?.ok_or_else(|| {
        ValidationError::new(format!("asset {} of scan {scan_id} not found", scan.asset_id))
    })?;
    let identifiers = store.list_identifiers(&asset.asset_id).await?;

    let mut findings = store.query_findings(scan_id).await?;
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));

    let mut severity_summary = BTreeMap::new();
    let mut findings_by_source: BTreeMap<Source, Vec<EvidenceFinding>> = BTreeMap::new();
    let mut service_exposure: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for finding in &findings {
        *severity_summary.entry(finding.severity).or_insert(0) += 1;

        let bucket = findings_by_source.entry(finding.source).or_default();
        if bucket.len() < MAX_FINDINGS_PER_SOURCE {
            bucket.push(finding.into());
        }

        if let Some(key) = exposure_key(&finding.raw.0) {
            service_exposure
                .entry(key)
                .or_default()
                .push(finding.title.clone());
        }
    }

    Ok(EvidenceBundle {
        scan,
        asset,
        identifiers,
        severity_summary,
        findings_by_source,
        service_exposure,
        total_findings: findings.len(),
    })
}

pub fn write_evidence(bundle: &EvidenceBundle, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(EVIDENCE_FILE);
    fs::write(&path, serde_json::to_string_pretty(bundle)?)?;
    info!(path = %path.display(), findings = bundle.total_findings, "evidence bundle written");
    Ok(path)
}

/// Hands the evidence file to the configured report generator and stores
/// whatever it prints as `report.md` next to the evidence.
pub async fn generate_report(
    command: &str,
    evidence_path: &Path,
    timeout_secs: u64,
) -> Result<PathBuf> {
    let args = vec![evidence_path.display().to_string()];
    let body = run_command_allowlisted(command, &args, &[command], timeout_secs).await?;

    let report_path = evidence_path.with_file_name(REPORT_FILE);
    let header = format!(
        "# Security Assessment Report\nGenerated: {} UTC\n\n---\n\n",
        Utc::now().format("%Y-%m-%dT%H:%M:%S")
    );
    fs::write(&report_path, header + &body)?;
    info!(path = %report_path.display(), "report written");
    Ok(report_path)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        db::test_support::migrated_store,
        models::{IdentifierType, NewFinding, ScanStatus},
    };

    fn finding(source: Source, severity: Severity, title: &str, raw: Value) -> NewFinding {
        NewFinding {
            source,
            severity,
            title: title.to_string(),
            description: None,
            cve: None,
            cwe: None,
            raw,
        }
    }

    #[tokio::test]
    async fn evidence_groups_and_caps_findings() {
        let (dir, store) = migrated_store().await;
        let asset = store.create_asset("10.0.0.5").await.unwrap();
        store
            .add_identifier(&asset.asset_id, IdentifierType::Ip, "10.0.0.5")
            .await
            .unwrap();
        let scan = store.start_scan(&asset.asset_id, "aggregated_scan").await.unwrap();

        for i in 0..12 {
            let f = finding(Source::Nikto, Severity::Low, &format!("nikto {i}"), json!({"tool": "nikto"}));
            store.insert_finding(&asset.asset_id, &scan.scan_id, &f).await.unwrap();
        }
        let ssh = json!({"port": 22, "service": "ssh", "version": "OpenSSH 7.2"});
        for (source, severity, title) in [
            (Source::Nuclei, Severity::Medium, "Weak Cipher Suites"),
            (Source::Searchsploit, Severity::High, "OpenSSH 7.2 - Remote Overflow"),
        ] {
            let f = finding(source, severity, title, ssh.clone());
            store.insert_finding(&asset.asset_id, &scan.scan_id, &f).await.unwrap();
        }
        store.end_scan(&scan.scan_id, ScanStatus::Completed).await.unwrap();

        let evidence = build_evidence(&store, &scan.scan_id).await.unwrap();
        assert_eq!(evidence.total_findings, 14);
        assert_eq!(evidence.identifiers.len(), 1);
        assert_eq!(evidence.severity_summary[&Severity::Low], 12);
        assert_eq!(evidence.findings_by_source[&Source::Nikto].len(), MAX_FINDINGS_PER_SOURCE);
        assert_eq!(
            evidence.service_exposure["ssh:22"],
            vec!["OpenSSH 7.2 - Remote Overflow", "Weak Cipher Suites"]
        );

        let path = write_evidence(&evidence, dir.path()).unwrap();
        let doc: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc["severity_summary"]["high"], 1);
        assert_eq!(doc["asset"]["primary_identifier"], "10.0.0.5");
    }

    #[tokio::test]
    async fn unknown_scan_is_a_validation_error() {
        let (_dir, store) = migrated_store().await;
        let err = build_evidence(&store, "nope").await.unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::Validation(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn report_command_output_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = dir.path().join(EVIDENCE_FILE);
        fs::write(&evidence, "{}").unwrap();

        let report = generate_report("cat", &evidence, 5).await.unwrap();
        let body = fs::read_to_string(report).unwrap();
        assert!(body.starts_with("# Security Assessment Report"));
        assert!(body.ends_with("{}"));
    }
}
