//! Attack-type classification, MITRE mapping and CVSS-like scoring of findings.
//!
//! Precedence is fixed: keyword rules, then (only when an [`Embedder`] is
//! injected) nearest reference definition above the similarity threshold,
//! then `Informational`.

mod knowledge;
mod scoring;

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    db::Store,
    error::Result,
    models::{Finding, SemanticEnrichment, Severity, Source},
};

pub use knowledge::{match_rules, AttackType, RULE_ORDER};
pub use scoring::{
    estimate_cvss, risk_level, risk_score, CvssEstimate, QualitativeSeverity, CVSS_VECTOR,
};

pub const EXPORT_FILE: &str = "semantic_analysis.json";
pub const DEFAULT_THRESHOLD: f32 = 0.65;

/// Injected text-embedding capability.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ConfidenceLabel {
    Rule,
    Embedding { similarity: f32 },
    Fallback,
}

impl fmt::Display for ConfidenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule => f.write_str("Very High (Rule)"),
            Self::Embedding { similarity } => write!(f, "AI ({similarity:.2})"),
            Self::Fallback => f.write_str("Low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub attack_type: AttackType,
    pub capability: &'static str,
    pub mitre_tactic: &'static str,
    pub mitre_technique: &'static str,
    pub confidence: ConfidenceLabel,
}

impl Classification {
    fn of(attack_type: AttackType, confidence: ConfidenceLabel) -> Self {
        let (mitre_tactic, mitre_technique) = attack_type.mitre();
        Self {
            attack_type,
            capability: attack_type.capability(),
            mitre_tactic,
            mitre_technique,
            confidence,
        }
    }

    pub fn enrichment(&self, source: Source) -> SemanticEnrichment {
        SemanticEnrichment {
            classification: self.attack_type.label().to_string(),
            cvss: estimate_cvss(self.attack_type, source).score,
            capability: self.capability.to_string(),
            mitre_tactic: self.mitre_tactic.to_string(),
            mitre_technique: self.mitre_technique.to_string(),
        }
    }
}

struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    references: Vec<(AttackType, Vec<f32>)>,
    threshold: f32,
}

pub struct Classifier {
    embeddings: Option<EmbeddingIndex>,
}

impl Classifier {
    pub fn rules_only() -> Self {
        Self { embeddings: None }
    }

    /// Embeds every reference definition up front.
    pub async fn with_embedder(embedder: Arc<dyn Embedder>, threshold: f32) -> anyhow::Result<Self> {
        let mut references = Vec::with_capacity(RULE_ORDER.len());
        for attack in RULE_ORDER {
            if let Some(definition) = attack.definition() {
                references.push((attack, embedder.embed(definition).await?));
            }
        }
        Ok(Self {
            embeddings: Some(EmbeddingIndex {
                embedder,
                references,
                threshold,
            }),
        })
    }

    pub fn has_embeddings(&self) -> bool {
        self.embeddings.is_some()
    }

    pub async fn classify(&self, text: &str) -> Classification {
        if let Some(attack) = match_rules(text) {
            return Classification::of(attack, ConfidenceLabel::Rule);
        }
        if let Some((attack, similarity)) = self.nearest_definition(text).await {
            return Classification::of(attack, ConfidenceLabel::Embedding { similarity });
        }
        Classification::of(AttackType::Informational, ConfidenceLabel::Fallback)
    }

    async fn nearest_definition(&self, text: &str) -> Option<(AttackType, f32)> {
        let index = self.embeddings.as_ref()?;
        let vector = match index.embedder.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "embedding failed; using fallback classification");
                return None;
            }
        };
        index
            .references
            .iter()
            .map(|(attack, reference)| (*attack, cosine_similarity(&vector, reference)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .filter(|(_, similarity)| *similarity >= index.threshold)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichSummary {
    pub total: usize,
    pub enriched: usize,
    pub already_classified: usize,
}

/// Classifies every not-yet-classified finding of a scan. Findings that
/// already carry a classification are left alone.
pub async fn enrich_scan(
    store: &Store,
    classifier: &Classifier,
    scan_id: &str,
) -> Result<EnrichSummary> {
    let total = store.count_findings(scan_id).await?;
    let pending = store.query_unclassified_findings(scan_id).await?;
    let mut summary = EnrichSummary {
        total: usize::try_from(total).unwrap_or_default(),
        enriched: 0,
        already_classified: 0,
    };

    for finding in &pending {
        let classification = classifier.classify(finding.classification_text()).await;
        let enrichment = classification.enrichment(finding.source);
        if store
            .update_finding_semantics(&finding.finding_id, &enrichment)
            .await?
        {
            summary.enriched += 1;
        }
    }
    summary.already_classified = summary.total - summary.enriched;

    info!(
        scan_id,
        total = summary.total,
        enriched = summary.enriched,
        already_classified = summary.already_classified,
        "semantic enrichment finished"
    );
    Ok(summary)
}

#[derive(Debug, Serialize)]
struct ExportedSemantics {
    classification: Option<String>,
    cvss_score: Option<f64>,
    cvss_severity: Option<&'static str>,
    attack_capability: Option<String>,
    mitre_tactic: Option<String>,
    mitre_technique: Option<String>,
    risk_score: Option<u8>,
    risk_level: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ExportedFinding {
    finding_id: String,
    source: Source,
    severity: Severity,
    title: String,
    description: Option<String>,
    semantic: ExportedSemantics,
}

#[derive(Debug, Serialize)]
struct SemanticExport {
    export_timestamp: DateTime<Utc>,
    scan_id: String,
    total_findings: usize,
    findings: Vec<ExportedFinding>,
}

impl From<Finding> for ExportedFinding {
    fn from(f: Finding) -> Self {
        let attack = f
            .semantic_classification
            .as_deref()
            .and_then(|c| c.parse::<AttackType>().ok());
        let risk = attack.map(|a| risk_score(a, f.source));
        Self {
            semantic: ExportedSemantics {
                cvss_severity: f.semantic_cvss.map(|s| QualitativeSeverity::from_score(s).as_str()),
                classification: f.semantic_classification,
                cvss_score: f.semantic_cvss,
                attack_capability: f.attack_capability,
                mitre_tactic: f.mitre_tactic,
                mitre_technique: f.mitre_technique,
                risk_score: risk,
                risk_level: risk.map(risk_level),
            },
            finding_id: f.finding_id,
            source: f.source,
            severity: f.severity,
            title: f.title,
            description: f.description,
        }
    }
}

/// Copies an existing export aside as `semantic_analysis.backup_<UTC timestamp>.json`.
fn backup_previous(path: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let backup = path.with_file_name(format!("semantic_analysis.backup_{stamp}.json"));
    match fs::copy(path, &backup) {
        Ok(_) => {
            info!(backup = %backup.display(), "backed up previous semantic export");
            Some(backup)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to back up previous semantic export");
            None
        }
    }
}

pub async fn export_semantic_analysis(store: &Store, scan_id: &str, dir: &Path) -> Result<PathBuf> {
    let findings: Vec<ExportedFinding> = store
        .query_findings(scan_id)
        .await?
        .into_iter()
        .map(ExportedFinding::from)
        .collect();

    let export = SemanticExport {
        export_timestamp: Utc::now(),
        scan_id: scan_id.to_string(),
        total_findings: findings.len(),
        findings,
    };

    fs::create_dir_all(dir)?;
    let path = dir.join(EXPORT_FILE);
    backup_previous(&path);
    fs::write(&path, serde_json::to_string_pretty(&export)?)?;
    info!(path = %path.display(), findings = export.total_findings, "semantic analysis exported");
    Ok(path)
}
