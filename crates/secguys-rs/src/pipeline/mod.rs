//! Six-phase orchestrator: Setup, Scan, Normalize, Ingest, Analyze, Semantic.
//!
//! Each phase validates its pre-conditions, does its work, then validates its
//! post-conditions. The first failing phase halts the run.

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    adapters::{ScanRequest, ToolAdapter},
    analysis::{build_evidence, generate_report, write_evidence},
    config::AppConfig,
    db::{run_migrations, Store},
    error::{PipelineError, Result, ValidationError},
    ingest::{ingest_bundle, IngestSummary},
    normalize::{normalize_dir, read_bundle, write_bundle, BUNDLE_FILE},
    resolver::{AssetResolver, HostResolver},
    scans::ScanSlot,
    semantic::{enrich_scan, export_semantic_analysis, Classifier, Embedder},
    validator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Setup,
    Scan,
    Normalize,
    Ingest,
    Analyze,
    Semantic,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Setup,
        Phase::Scan,
        Phase::Normalize,
        Phase::Ingest,
        Phase::Analyze,
        Phase::Semantic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Setup => "Setup",
            Phase::Scan => "Scan",
            Phase::Normalize => "Normalize",
            Phase::Ingest => "Ingest",
            Phase::Analyze => "Analyze",
            Phase::Semantic => "Semantic",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PhaseOutcome {
    Passed,
    Skipped(String),
    Failed(String),
}

impl PhaseOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseOutcome::Passed => "PASSED",
            PhaseOutcome::Skipped(_) => "SKIPPED",
            PhaseOutcome::Failed(_) => "FAILED",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub skip_setup: bool,
    pub skip_scan: bool,
    pub skip_analyze: bool,
    pub skip_semantic: bool,
    pub check_tools: bool,
}

/// Per-target state carried between phases.
#[derive(Debug, Clone)]
pub struct TargetRun {
    pub target: String,
    pub results_dir: PathBuf,
    pub ingest: Option<IngestSummary>,
}

/// Directory-safe name for a target: anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn slug(target: &str) -> String {
    let slug: String = target
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if slug.chars().all(|c| c == '.') {
        format!("_{slug}")
    } else {
        slug
    }
}

pub struct RunContext {
    pub config: Arc<AppConfig>,
    pub options: PipelineOptions,
    pub targets: Vec<TargetRun>,
    adapter: Arc<dyn ToolAdapter>,
    dns: Arc<dyn HostResolver>,
    embedder: Option<Arc<dyn Embedder>>,
    slot: ScanSlot,
    store: Option<Store>,
}

impl RunContext {
    pub fn new(
        config: Arc<AppConfig>,
        targets: Vec<String>,
        options: PipelineOptions,
        adapter: Arc<dyn ToolAdapter>,
        dns: Arc<dyn HostResolver>,
    ) -> Self {
        let targets = targets
            .into_iter()
            .map(|target| TargetRun {
                results_dir: target_dir(&config.results_dir, &target),
                target,
                ingest: None,
            })
            .collect();
        Self {
            config,
            options,
            targets,
            adapter,
            dns,
            embedder: None,
            slot: ScanSlot::new(),
            store: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_slot(mut self, slot: ScanSlot) -> Self {
        self.slot = slot;
        self
    }

    /// Opens the store on first use. Never creates the database file.
    async fn store(&mut self) -> Result<Store> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        let store = Store::open(&self.config.database_path, false).await?;
        self.store = Some(store.clone());
        Ok(store)
    }

    fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.target.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub phases: Vec<(Phase, PhaseOutcome)>,
    pub scans: Vec<IngestSummary>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        !self.phases.is_empty() && !self.phases.iter().any(|(_, o)| o.is_failed())
    }

    pub fn failed_phase(&self) -> Option<(Phase, &str)> {
        self.phases.iter().find_map(|(phase, outcome)| match outcome {
            PhaseOutcome::Failed(reason) => Some((*phase, reason.as_str())),
            _ => None,
        })
    }

    pub fn outcome(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, o)| o)
    }
}

/// Runs every phase in order. An invalid target list is rejected before any phase starts.
pub async fn run_pipeline(
    ctx: &mut RunContext,
) -> std::result::Result<PipelineReport, ValidationError> {
    info!(targets = ctx.targets.len(), "pipeline started");
    validator::validate_targets(&ctx.target_names(), &ctx.config.scope_allowlist)?;
    check_distinct_dirs(&ctx.targets)?;

    let mut report = PipelineReport::default();
    for (idx, phase) in Phase::ALL.into_iter().enumerate() {
        info!(step = idx + 1, phase = phase.name(), "phase started");
        let outcome = match run_phase(phase, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => PhaseOutcome::Failed(e.to_string()),
        };
        match &outcome {
            PhaseOutcome::Passed => info!(phase = phase.name(), "phase passed"),
            PhaseOutcome::Skipped(why) => info!(phase = phase.name(), reason = %why, "phase skipped"),
            PhaseOutcome::Failed(why) => {
                error!(phase = phase.name(), reason = %why, "pipeline halted")
            }
        }
        let halt = outcome.is_failed();
        report.phases.push((phase, outcome));
        if halt {
            break;
        }
    }

    report.scans = ctx.targets.iter().filter_map(|t| t.ingest.clone()).collect();
    for (phase, outcome) in &report.phases {
        info!(phase = phase.name(), status = outcome.label(), "pipeline summary");
    }
    if report.succeeded() {
        info!(
            database = %ctx.config.database_path.display(),
            results = %ctx.config.results_dir.display(),
            scans = report.scans.len(),
            "pipeline finished"
        );
    }
    Ok(report)
}

async fn run_phase(phase: Phase, ctx: &mut RunContext) -> Result<PhaseOutcome> {
    match phase {
        Phase::Setup => setup(ctx).await,
        Phase::Scan => scan(ctx).await,
        Phase::Normalize => normalize(ctx),
        Phase::Ingest => ingest(ctx).await,
        Phase::Analyze => analyze(ctx).await,
        Phase::Semantic => semantic(ctx).await,
    }
}

/// Two targets sharing a results directory would overwrite each other's files.
fn check_distinct_dirs(targets: &[TargetRun]) -> std::result::Result<(), ValidationError> {
    let mut seen: HashMap<&Path, &str> = HashMap::new();
    for run in targets {
        if let Some(first) = seen.insert(&run.results_dir, &run.target) {
            return Err(ValidationError::new(format!(
                "targets '{first}' and '{}' share results directory {}",
                run.target,
                run.results_dir.display()
            ))
            .with_hint("list each target once"));
        }
    }
    Ok(())
}

fn skipped(flag: &str) -> Result<PhaseOutcome> {
    Ok(PhaseOutcome::Skipped(format!("{flag} given")))
}

async fn setup(ctx: &mut RunContext) -> Result<PhaseOutcome> {
    if ctx.options.skip_setup {
        return skipped("--skip-setup");
    }
    if ctx.options.check_tools {
        validator::validate_required_tools(&ctx.config.required_tools)?;
    }

    fs::create_dir_all(&ctx.config.results_dir)?;
    if let Some(parent) = ctx
        .config
        .database_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)?;
    }

    let store = Store::open(&ctx.config.database_path, true).await?;
    run_migrations(store.pool()).await?;
    ctx.store = Some(store);

    validator::validate_database_initialized(&ctx.config.database_path).await?;
    Ok(PhaseOutcome::Passed)
}

async fn scan(ctx: &mut RunContext) -> Result<PhaseOutcome> {
    if ctx.options.skip_scan {
        return skipped("--skip-scan");
    }
    // Setup already checked the tools unless it was skipped.
    if ctx.options.check_tools && ctx.options.skip_setup {
        validator::validate_required_tools(&ctx.config.required_tools)?;
    }

    for run in &ctx.targets {
        let _guard = ctx.slot.try_acquire(&run.target)?;
        fs::create_dir_all(&run.results_dir)?;
        let req = ScanRequest {
            target: run.target.clone(),
            output_dir: run.results_dir.clone(),
        };
        info!(target = %run.target, tool = ctx.adapter.name(), "scanning target");
        match ctx.adapter.run(&req).await {
            Ok(()) => {}
            Err(e @ PipelineError::ToolFailed { .. }) => {
                warn!(target = %run.target, error = %e, "scanner exited with an error");
            }
            Err(e) => return Err(e),
        }
    }

    for run in &ctx.targets {
        validator::validate_scan_results_exist(&run.results_dir)?;
    }
    Ok(PhaseOutcome::Passed)
}

fn bundle_path(run: &TargetRun) -> PathBuf {
    run.results_dir.join(BUNDLE_FILE)
}

fn normalize(ctx: &mut RunContext) -> Result<PhaseOutcome> {
    for run in &ctx.targets {
        validator::validate_scan_results_exist(&run.results_dir)?;
    }
    for run in &ctx.targets {
        let bundle = normalize_dir(&run.target, &run.results_dir);
        write_bundle(&bundle, &bundle_path(run))?;
    }
    for run in &ctx.targets {
        validator::validate_canonical_bundle(&bundle_path(run))?;
    }
    Ok(PhaseOutcome::Passed)
}

async fn ingest(ctx: &mut RunContext) -> Result<PhaseOutcome> {
    validator::validate_database_initialized(&ctx.config.database_path).await?;
    for run in &ctx.targets {
        validator::validate_canonical_bundle(&bundle_path(run))?;
    }

    let store = ctx.store().await?;
    let resolver = AssetResolver::new(store.clone(), ctx.dns.clone());
    for run in ctx.targets.iter_mut() {
        let bundle = read_bundle(&bundle_path(run))?;
        run.ingest = Some(ingest_bundle(&store, &resolver, &bundle).await?);
    }

    for run in &ctx.targets {
        if let Some(summary) = &run.ingest {
            validator::validate_completed_scan(&store, &summary.scan_id).await?;
            let stored = store.count_findings(&summary.scan_id).await?;
            info!(target = %run.target, scan_id = %summary.scan_id, findings = stored, "findings ingested");
        }
    }
    Ok(PhaseOutcome::Passed)
}

fn ingested_scan(run: &TargetRun) -> Result<&str> {
    run.ingest
        .as_ref()
        .map(|s| s.scan_id.as_str())
        .ok_or_else(|| {
            ValidationError::new(format!("no completed scan for {} in this run", run.target))
                .with_hint("run the Ingest phase first")
                .into()
        })
}

async fn analyze(ctx: &mut RunContext) -> Result<PhaseOutcome> {
    if ctx.options.skip_analyze {
        return skipped("--skip-analyze");
    }
    validator::validate_database_initialized(&ctx.config.database_path).await?;
    let store = ctx.store().await?;

    for run in &ctx.targets {
        let scan_id = ingested_scan(run)?;
        validator::validate_completed_scan(&store, scan_id).await?;

        let evidence = build_evidence(&store, scan_id).await?;
        let path = write_evidence(&evidence, &run.results_dir)?;
        if let Some(cmd) = &ctx.config.report_command {
            generate_report(cmd, &path, ctx.config.report_timeout_secs).await?;
        }
    }

    for run in &ctx.targets {
        let evidence = run.results_dir.join(crate::analysis::EVIDENCE_FILE);
        if !evidence.is_file() {
            return Err(ValidationError::new(format!(
                "evidence bundle {} was not written",
                evidence.display()
            ))
            .into());
        }
    }
    Ok(PhaseOutcome::Passed)
}

async fn build_classifier(ctx: &RunContext) -> Classifier {
    let Some(embedder) = ctx.embedder.clone() else {
        return Classifier::rules_only();
    };
    match Classifier::with_embedder(embedder, ctx.config.semantic_threshold).await {
        Ok(classifier) => classifier,
        Err(e) => {
            warn!(error = %e, "embedding model unavailable; falling back to rule-based classification");
            Classifier::rules_only()
        }
    }
}

async fn semantic(ctx: &mut RunContext) -> Result<PhaseOutcome> {
    if ctx.options.skip_semantic {
        return skipped("--skip-semantic");
    }
    if !ctx.config.semantic_enabled {
        return Ok(PhaseOutcome::Skipped("semantic analysis disabled".to_string()));
    }
    validator::validate_database_initialized(&ctx.config.database_path).await?;
    let store = ctx.store().await?;
    let classifier = build_classifier(ctx).await;

    for run in &ctx.targets {
        let scan_id = ingested_scan(run)?;
        validator::validate_completed_scan(&store, scan_id).await?;
        enrich_scan(&store, &classifier, scan_id).await?;
        export_semantic_analysis(&store, scan_id, &run.results_dir).await?;
    }

    for run in &ctx.targets {
        validator::validate_findings_enriched(&store, ingested_scan(run)?).await?;
    }
    Ok(PhaseOutcome::Passed)
}

/// Default location of a target's scanner files.
pub fn target_dir(results_dir: &Path, target: &str) -> PathBuf {
    results_dir.join(slug(target))
}
