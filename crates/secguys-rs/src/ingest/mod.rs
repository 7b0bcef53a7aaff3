//! Turns a canonical bundle into persisted findings under a fresh scan run.

use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    db::Store,
    error::Result,
    models::{NewFinding, Severity, Source},
    normalize::CanonicalBundle,
    resolver::AssetResolver,
    scans::{ScanLifecycle, AGGREGATED_TOOL},
};

pub const MAX_TITLE_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub asset_id: String,
    pub scan_id: String,
    pub nuclei: usize,
    pub exploits: usize,
    pub nikto: usize,
}

impl IngestSummary {
    pub fn total(&self) -> usize {
        self.nuclei + self.exploits + self.nikto
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Flattens a bundle into findings: attached template hits are `medium`,
/// attached exploits are `high`, web-server lines are `low`.
pub fn bundle_findings(bundle: &CanonicalBundle) -> Vec<NewFinding> {
    let mut out = Vec::new();

    for svc in &bundle.findings {
        let context = json!({
            "port": svc.port,
            "service": svc.service,
            "version": svc.version,
        });

        for title in &svc.nuclei {
            out.push(NewFinding {
                source: Source::Nuclei,
                severity: Severity::Medium,
                title: title.clone(),
                description: Some(format!("{} service on port {}", svc.service, svc.port)),
                cve: None,
                cwe: None,
                raw: context.clone(),
            });
        }

        for title in &svc.exploits {
            let cve = svc
                .raw_exploits
                .iter()
                .find(|e| &e.title == title)
                .and_then(|e| e.cve.clone());
            out.push(NewFinding {
                source: Source::Searchsploit,
                severity: Severity::High,
                title: title.clone(),
                description: Some(format!(
                    "Exploit related to {} on port {}",
                    svc.service, svc.port
                )),
                cve,
                cwe: None,
                raw: context.clone(),
            });
        }
    }

    for line in &bundle.nikto_findings {
        out.push(NewFinding {
            source: Source::Nikto,
            severity: Severity::Low,
            title: truncate_chars(line, MAX_TITLE_CHARS),
            description: Some(line.clone()),
            cve: None,
            cwe: None,
            raw: json!({"tool": "nikto"}),
        });
    }

    out
}

/// Resolves the bundle's target, opens a scan run and writes every finding.
///
/// Any insert failure marks the scan `failed` and returns the error; rows
/// already written stay behind under the failed scan.
pub async fn ingest_bundle(
    store: &Store,
    resolver: &AssetResolver,
    bundle: &CanonicalBundle,
) -> Result<IngestSummary> {
    let asset_id = resolver.resolve(&bundle.target).await?;
    let lifecycle = ScanLifecycle::new(store.clone());
    let scan = lifecycle.start(&asset_id, AGGREGATED_TOOL).await?;

    let findings = bundle_findings(bundle);
    let mut summary = IngestSummary {
        asset_id: asset_id.clone(),
        scan_id: scan.scan_id.clone(),
        nuclei: 0,
        exploits: 0,
        nikto: 0,
    };

    for finding in &findings {
        if let Err(e) = store.insert_finding(&asset_id, &scan.scan_id, finding).await {
            error!(scan_id = %scan.scan_id, error = %e, "finding insert failed; marking scan failed");
            if let Err(end_err) = lifecycle.fail(&scan.scan_id).await {
                error!(scan_id = %scan.scan_id, error = %end_err, "could not mark scan failed");
            }
            return Err(e);
        }
        match finding.source {
            Source::Nuclei => summary.nuclei += 1,
            Source::Searchsploit => summary.exploits += 1,
            _ => summary.nikto += 1,
        }
    }

    lifecycle.complete(&scan.scan_id).await?;
    info!(
        target = %bundle.target,
        scan_id = %scan.scan_id,
        nuclei = summary.nuclei,
        exploits = summary.exploits,
        nikto = summary.nikto,
        "ingested canonical bundle"
    );
    Ok(summary)
}
