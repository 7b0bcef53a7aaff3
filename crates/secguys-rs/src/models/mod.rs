use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum IdentifierType {
    Ip,
    Domain,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub asset_id: String,
    pub asset_type: String,
    pub primary_identifier: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AssetIdentifier {
    pub asset_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: IdentifierType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ScanStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanRun {
    pub scan_id: String,
    pub asset_id: String,
    pub tool: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Fixed severity to confidence lookup applied to every ingested finding.
    pub fn confidence(self) -> f64 {
        match self {
            Severity::Critical => 0.95,
            Severity::High => 0.90,
            Severity::Medium => 0.75,
            Severity::Low => 0.60,
            Severity::Info => 0.40,
        }
    }

    /// Unknown or empty labels degrade to `Info`.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or(Severity::Info)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" | "informational" => Ok(Severity::Info),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Source {
    Nmap,
    Nikto,
    Nuclei,
    Searchsploit,
    Whatweb,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Nmap => "nmap",
            Source::Nikto => "nikto",
            Source::Nuclei => "nuclei",
            Source::Searchsploit => "searchsploit",
            Source::Whatweb => "whatweb",
        }
    }

    /// Searchsploit output is the exploit database.
    pub fn is_exploit_db(self) -> bool {
        matches!(self, Source::Searchsploit)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finding ready to be written; confidence is derived from severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFinding {
    pub source: Source,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub cve: Option<String>,
    pub cwe: Option<String>,
    pub raw: serde_json::Value,
}

impl NewFinding {
    pub fn confidence(&self) -> f64 {
        self.severity.confidence()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Finding {
    pub finding_id: String,
    pub asset_id: String,
    pub scan_id: String,
    pub source: Source,
    pub severity: Severity,
    pub confidence: f64,
    pub title: String,
    pub description: Option<String>,
    pub cve: Option<String>,
    pub cwe: Option<String>,
    pub raw: Json<serde_json::Value>,
    pub semantic_classification: Option<String>,
    pub semantic_cvss: Option<f64>,
    pub attack_capability: Option<String>,
    pub mitre_tactic: Option<String>,
    pub mitre_technique: Option<String>,
}

impl Finding {
    pub fn is_classified(&self) -> bool {
        self.semantic_classification.is_some()
    }

    /// Text handed to the classifier: the title, or the description when the title is blank.
    pub fn classification_text(&self) -> &str {
        if !self.title.trim().is_empty() {
            &self.title
        } else {
            self.description.as_deref().unwrap_or_default()
        }
    }
}

/// Enrichment columns written once per finding by the semantic classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEnrichment {
    pub classification: String,
    pub cvss: f64,
    pub capability: String,
    pub mitre_tactic: String,
    pub mitre_technique: String,
}
