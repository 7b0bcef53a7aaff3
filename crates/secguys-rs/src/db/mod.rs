use std::{path::Path, time::Duration};

use chrono::Utc;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
    SqlitePool,
};
use uuid::Uuid;

use crate::{
    error::{Result, ValidationError},
    models::{
        Asset, AssetIdentifier, Finding, IdentifierType, NewFinding, ScanRun, ScanStatus,
        SemanticEnrichment,
    },
};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const REQUIRED_TABLES: [&str; 4] = ["assets", "asset_identifiers", "scans", "findings"];

pub const ENRICHMENT_COLUMNS: [&str; 5] = [
    "semantic_classification",
    "semantic_cvss",
    "attack_capability",
    "mitre_tactic",
    "mitre_technique",
];

const FINDING_COLUMNS: &str = "finding_id, asset_id, scan_id, source, severity, confidence, title, description, cve, cwe, raw, semantic_classification, semantic_cvss, attack_capability, mitre_tactic, mitre_technique";

const SCAN_COLUMNS: &str = "scan_id, asset_id, tool, status, started_at, completed_at";

pub async fn create_pool(path: &Path, create_if_missing: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create_if_missing)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(0)
        .idle_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// Persistence interface over the relational store. Every call checks out its
/// own connection; nothing holds a transaction across findings.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(path: &Path, create_if_missing: bool) -> Result<Self> {
        Ok(Self::new(create_pool(path, create_if_missing).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_asset(&self, primary_identifier: &str) -> Result<Asset> {
        let asset = Asset {
            asset_id: Uuid::new_v4().to_string(),
            asset_type: "host".to_string(),
            primary_identifier: primary_identifier.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO assets(asset_id, asset_type, primary_identifier, created_at) VALUES(?, ?, ?, ?)",
        )
        .bind(&asset.asset_id)
        .bind(&asset.asset_type)
        .bind(&asset.primary_identifier)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;
        Ok(asset)
    }

    pub async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        let row = sqlx::query_as::<_, Asset>(
            "SELECT asset_id, asset_type, primary_identifier, created_at FROM assets WHERE asset_id = ?",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Owning asset of an identifier value, if any asset already claims it.
    pub async fn get_asset_by_identifier_value(&self, value: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT asset_id FROM asset_identifiers WHERE value = ? LIMIT 1")
                .bind(value)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Returns `false` when the value already belongs to some asset and the insert was ignored.
    pub async fn add_identifier(
        &self,
        asset_id: &str,
        kind: IdentifierType,
        value: &str,
    ) -> Result<bool> {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO asset_identifiers(asset_id, type, value) VALUES(?, ?, ?)",
        )
        .bind(asset_id)
        .bind(kind)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn list_identifiers(&self, asset_id: &str) -> Result<Vec<AssetIdentifier>> {
        let rows = sqlx::query_as::<_, AssetIdentifier>(
            "SELECT asset_id, type, value FROM asset_identifiers WHERE asset_id = ? ORDER BY id",
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_assets(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM assets")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn start_scan(&self, asset_id: &str, tool: &str) -> Result<ScanRun> {
        let scan = ScanRun {
            scan_id: Uuid::new_v4().to_string(),
            asset_id: asset_id.to_string(),
            tool: tool.to_string(),
            status: ScanStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
        };
        sqlx::query(
            "INSERT INTO scans(scan_id, asset_id, tool, status, started_at, completed_at) VALUES(?, ?, ?, ?, ?, NULL)",
        )
        .bind(&scan.scan_id)
        .bind(&scan.asset_id)
        .bind(&scan.tool)
        .bind(scan.status)
        .bind(scan.started_at)
        .execute(&self.pool)
        .await?;
        Ok(scan)
    }

    /// Moves a running scan to a terminal status. Returns `false` when the scan
    /// was not `running` (unknown id or already terminal) and nothing changed.
    pub async fn end_scan(&self, scan_id: &str, status: ScanStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Err(ValidationError::new(format!(
                "cannot end scan {scan_id} with non-terminal status '{}'",
                status.as_str()
            ))
            .into());
        }
        let res = sqlx::query(
            "UPDATE scans SET status = ?, completed_at = ? WHERE scan_id = ? AND status = 'running'",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(scan_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn get_scan(&self, scan_id: &str) -> Result<Option<ScanRun>> {
        let row = sqlx::query_as::<_, ScanRun>(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans WHERE scan_id = ?"
        ))
        .bind(scan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Most recently completed scan. `running` and `failed` scans are never returned.
    pub async fn query_latest_completed_scan(&self) -> Result<Option<ScanRun>> {
        let row = sqlx::query_as::<_, ScanRun>(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans WHERE status = 'completed' ORDER BY completed_at DESC, rowid DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_scans_for_asset(&self, asset_id: &str) -> Result<Vec<ScanRun>> {
        let rows = sqlx::query_as::<_, ScanRun>(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans WHERE asset_id = ? ORDER BY started_at DESC, rowid DESC"
        ))
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert_finding(
        &self,
        asset_id: &str,
        scan_id: &str,
        finding: &NewFinding,
    ) -> Result<String> {
        let finding_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO findings(finding_id, asset_id, scan_id, source, severity, confidence, title, description, cve, cwe, raw, created_at) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&finding_id)
        .bind(asset_id)
        .bind(scan_id)
        .bind(finding.source)
        .bind(finding.severity)
        .bind(finding.confidence())
        .bind(&finding.title)
        .bind(&finding.description)
        .bind(&finding.cve)
        .bind(&finding.cwe)
        .bind(Json(&finding.raw))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(finding_id)
    }

    pub async fn query_findings(&self, scan_id: &str) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, Finding>(&format!(
            "SELECT {FINDING_COLUMNS} FROM findings WHERE scan_id = ? ORDER BY rowid"
        ))
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn query_unclassified_findings(&self, scan_id: &str) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, Finding>(&format!(
            "SELECT {FINDING_COLUMNS} FROM findings WHERE scan_id = ? AND semantic_classification IS NULL ORDER BY rowid"
        ))
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_findings(&self, scan_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM findings WHERE scan_id = ?")
            .bind(scan_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Writes the enrichment columns once. Returns `false` if the finding was
    /// already classified (or does not exist) and the row was left untouched.
    pub async fn update_finding_semantics(
        &self,
        finding_id: &str,
        enrichment: &SemanticEnrichment,
    ) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE findings SET semantic_classification = ?, semantic_cvss = ?, attack_capability = ?, mitre_tactic = ?, mitre_technique = ? WHERE finding_id = ? AND semantic_classification IS NULL",
        )
        .bind(&enrichment.classification)
        .bind(enrichment.cvss)
        .bind(&enrichment.capability)
        .bind(&enrichment.mitre_tactic)
        .bind(&enrichment.mitre_technique)
        .bind(finding_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn missing_tables(&self) -> Result<Vec<&'static str>> {
        let mut missing = Vec::new();
        for table in REQUIRED_TABLES {
            let found: Option<(String,)> =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                    .bind(table)
                    .fetch_optional(&self.pool)
                    .await?;
            if found.is_none() {
                missing.push(table);
            }
        }
        Ok(missing)
    }

    pub async fn missing_enrichment_columns(&self) -> Result<Vec<&'static str>> {
        let existing: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info('findings')")
            .fetch_all(&self.pool)
            .await?;
        Ok(ENRICHMENT_COLUMNS
            .into_iter()
            .filter(|col| !existing.iter().any(|(name,)| name == *col))
            .collect())
    }
}
