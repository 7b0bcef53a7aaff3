//! Phase-boundary checks. Each returns a [`ValidationError`] carrying a
//! remediation hint instead of doing any repair work itself.

use std::{fs, path::Path};

use serde_json::Value;
use tracing::debug;

use crate::{
    adapters::tool_available,
    db::Store,
    error::ValidationError,
    models::ScanStatus,
    parser::SCANNER_FILES,
    security::in_scope,
};

pub type Validation = std::result::Result<(), ValidationError>;

const MIGRATE_HINT: &str = "run the migration step (Setup phase, without --skip-setup)";

pub fn validate_targets(targets: &[String], allowlist: &[String]) -> Validation {
    if targets.is_empty() {
        return Err(ValidationError::new("no targets provided"));
    }
    if let Some(blank) = targets.iter().find(|t| t.trim().is_empty()) {
        return Err(ValidationError::new(format!("invalid target: '{blank}'")));
    }
    let out_of_scope: Vec<&str> = targets
        .iter()
        .filter(|t| !in_scope(t, allowlist))
        .map(String::as_str)
        .collect();
    if !out_of_scope.is_empty() {
        return Err(ValidationError::new(format!(
            "targets outside the scope allowlist: {}",
            out_of_scope.join(", ")
        ))
        .with_hint("add them to scope_allowlist or remove them from the run"));
    }
    debug!(count = targets.len(), "targets validated");
    Ok(())
}

pub fn validate_required_tools(tools: &[String]) -> Validation {
    let missing: Vec<&str> = tools
        .iter()
        .filter(|t| !tool_available(t))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(
        ValidationError::new(format!("missing required tools: {}", missing.join(", ")))
            .with_hint("run: bash setup.sh"),
    )
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// At least one scanner produced non-empty output in `dir`.
pub fn validate_scan_results_exist(dir: &Path) -> Validation {
    if !dir.is_dir() {
        return Err(ValidationError::new(format!(
            "scan results directory {} does not exist",
            dir.display()
        ))
        .with_hint("run the Scan phase first"));
    }
    if SCANNER_FILES.iter().any(|f| non_empty_file(&dir.join(f))) {
        return Ok(());
    }
    Err(ValidationError::new(format!(
        "no scanner output in {} (expected one of: {})",
        dir.display(),
        SCANNER_FILES.join(", ")
    ))
    .with_hint("check the scanner logs; every tool may have failed"))
}

pub fn validate_canonical_bundle(path: &Path) -> Validation {
    let raw = fs::read_to_string(path).map_err(|e| {
        ValidationError::new(format!("canonical bundle {} unreadable: {e}", path.display()))
            .with_hint("run the Normalize phase first")
    })?;
    let doc: Value = serde_json::from_str(&raw).map_err(|e| {
        ValidationError::new(format!("canonical bundle {} is not JSON: {e}", path.display()))
    })?;
    if !doc.get("target").is_some_and(Value::is_string) {
        return Err(ValidationError::new("canonical bundle has no 'target'"));
    }
    if !doc.get("findings").is_some_and(Value::is_array) {
        return Err(ValidationError::new("canonical bundle has no 'findings' array"));
    }
    Ok(())
}

/// Database file exists and carries the full schema, enrichment columns included.
pub async fn validate_database_initialized(path: &Path) -> Validation {
    if !path.is_file() {
        return Err(ValidationError::new(format!(
            "database {} does not exist",
            path.display()
        ))
        .with_hint(MIGRATE_HINT));
    }
    let inspect_err = |e: crate::error::PipelineError| {
        ValidationError::new(format!("cannot inspect database {}: {e}", path.display()))
    };
    let store = Store::open(path, false).await.map_err(inspect_err)?;

    let tables = store.missing_tables().await.map_err(inspect_err)?;
    if !tables.is_empty() {
        return Err(ValidationError::new(format!(
            "database is missing tables: {}",
            tables.join(", ")
        ))
        .with_hint(MIGRATE_HINT));
    }
    let columns = store.missing_enrichment_columns().await.map_err(inspect_err)?;
    if !columns.is_empty() {
        return Err(ValidationError::new(format!(
            "database schema is outdated, findings lacks: {}",
            columns.join(", ")
        ))
        .with_hint(MIGRATE_HINT));
    }
    store.pool().close().await;
    Ok(())
}

pub async fn validate_completed_scan(store: &Store, scan_id: &str) -> Validation {
    let scan = store
        .get_scan(scan_id)
        .await
        .map_err(|e| ValidationError::new(format!("cannot load scan {scan_id}: {e}")))?;
    match scan {
        Some(scan) if scan.status == ScanStatus::Completed => Ok(()),
        Some(scan) => Err(ValidationError::new(format!(
            "scan {scan_id} is {} rather than completed",
            scan.status.as_str()
        ))),
        None => Err(ValidationError::new(format!("scan {scan_id} not found"))),
    }
}

pub async fn validate_findings_enriched(store: &Store, scan_id: &str) -> Validation {
    let pending = store
        .query_unclassified_findings(scan_id)
        .await
        .map_err(|e| ValidationError::new(format!("cannot load findings of {scan_id}: {e}")))?;
    if pending.is_empty() {
        return Ok(());
    }
    Err(ValidationError::new(format!(
        "{} finding(s) of scan {scan_id} are still unclassified",
        pending.len()
    ))
    .with_hint("re-run the Semantic phase"))
}
