use std::{fs, net::IpAddr, path::Path, sync::Arc};

use secguys::{
    adapters::{ScanRequest, ToolAdapter},
    config::AppConfig,
    db::Store,
    error::{PipelineError, Result},
    models::{ScanStatus, Source},
    parser::SCANNER_FILES,
    pipeline::{run_pipeline, Phase, PhaseOutcome, PipelineOptions, RunContext},
    resolver::HostResolver,
    scans::ScanSlot,
};
use serde_json::Value;
use tempfile::TempDir;

/// Copies the bundled scanner fixtures instead of running real tools.
struct FixtureAdapter;

#[async_trait::async_trait]
impl ToolAdapter for FixtureAdapter {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn run(&self, req: &ScanRequest) -> Result<()> {
        let samples = Path::new(env!("CARGO_MANIFEST_DIR")).join("samples");
        for file in SCANNER_FILES {
            fs::copy(samples.join(file), req.output_dir.join(file))?;
        }
        Ok(())
    }
}

/// Scanner that finishes without writing anything.
struct SilentAdapter;

#[async_trait::async_trait]
impl ToolAdapter for SilentAdapter {
    fn name(&self) -> &str {
        "silent"
    }

    async fn run(&self, _req: &ScanRequest) -> Result<()> {
        Ok(())
    }
}

/// Scanner that exceeds its time budget.
struct StalledAdapter;

#[async_trait::async_trait]
impl ToolAdapter for StalledAdapter {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn run(&self, _req: &ScanRequest) -> Result<()> {
        Err(PipelineError::ToolTimeout {
            tool: "scanner.sh".to_string(),
            secs: 1,
        })
    }
}

struct NoDns;

#[async_trait::async_trait]
impl HostResolver for NoDns {
    async fn lookup_ips(&self, name: &str) -> Result<Vec<IpAddr>> {
        Err(PipelineError::Resolver(format!("no records for {name}")))
    }

    async fn reverse_lookup(&self, _ip: IpAddr) -> Result<Option<String>> {
        Ok(None)
    }
}

fn config(dir: &TempDir) -> Arc<AppConfig> {
    Arc::new(AppConfig {
        database_path: dir.path().join("data").join("secguys.db"),
        results_dir: dir.path().join("output"),
        required_tools: vec![],
        ..AppConfig::default()
    })
}

fn options() -> PipelineOptions {
    PipelineOptions {
        check_tools: false,
        ..PipelineOptions::default()
    }
}

fn context(
    cfg: Arc<AppConfig>,
    targets: &[&str],
    options: PipelineOptions,
    adapter: Arc<dyn ToolAdapter>,
) -> RunContext {
    RunContext::new(
        cfg,
        targets.iter().map(ToString::to_string).collect(),
        options,
        adapter,
        Arc::new(NoDns),
    )
}

#[tokio::test]
async fn full_run_passes_every_phase() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let mut ctx = context(cfg.clone(), &["10.0.0.5"], options(), Arc::new(FixtureAdapter));

    let report = run_pipeline(&mut ctx).await.unwrap();
    assert!(report.succeeded(), "{:?}", report.phases);
    assert_eq!(report.phases.len(), 6);
    assert!(report.phases.iter().all(|(_, o)| *o == PhaseOutcome::Passed));
    assert_eq!(report.scans.len(), 1);
    assert_eq!(report.scans[0].total(), 6);

    let target_dir = cfg.results_dir.join("10.0.0.5");
    for file in ["final.json", "evidence.json", "semantic_analysis.json"] {
        assert!(target_dir.join(file).is_file(), "{file} missing");
    }

    let store = Store::open(&cfg.database_path, false).await.unwrap();
    let scan = store.query_latest_completed_scan().await.unwrap().unwrap();
    assert_eq!(scan.scan_id, report.scans[0].scan_id);
    assert_eq!(scan.status, ScanStatus::Completed);

    let findings = store.query_findings(&scan.scan_id).await.unwrap();
    assert_eq!(findings.len(), 6);
    assert!(findings.iter().all(|f| f.is_classified()));
    let exploit = findings
        .iter()
        .find(|f| f.source == Source::Searchsploit)
        .unwrap();
    assert_eq!(exploit.title, "OpenSSH 7.2 - Remote Overflow");
    assert_eq!(exploit.semantic_classification.as_deref(), Some("Denial of Service"));
    assert_eq!(exploit.semantic_cvss, Some(8.3));

    let export: Value = serde_json::from_str(
        &fs::read_to_string(target_dir.join("semantic_analysis.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(export["total_findings"], 6);
}

#[tokio::test]
async fn rerun_appends_history_for_the_same_asset() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);

    let mut first = context(cfg.clone(), &["10.0.0.5"], options(), Arc::new(FixtureAdapter));
    assert!(run_pipeline(&mut first).await.unwrap().succeeded());

    let rerun_opts = PipelineOptions {
        skip_setup: true,
        skip_scan: true,
        skip_analyze: true,
        ..options()
    };
    let mut second = context(cfg.clone(), &["10.0.0.5"], rerun_opts, Arc::new(SilentAdapter));
    let report = run_pipeline(&mut second).await.unwrap();
    assert!(report.succeeded(), "{:?}", report.phases);
    assert!(matches!(
        report.outcome(Phase::Scan),
        Some(PhaseOutcome::Skipped(_))
    ));

    let store = Store::open(&cfg.database_path, false).await.unwrap();
    assert_eq!(store.count_assets().await.unwrap(), 1);
    let asset_id = report.scans[0].asset_id.clone();
    assert_eq!(store.list_scans_for_asset(&asset_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn missing_database_halts_at_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let opts = PipelineOptions {
        skip_setup: true,
        ..options()
    };
    let mut ctx = context(cfg.clone(), &["example.com"], opts, Arc::new(FixtureAdapter));

    let report = run_pipeline(&mut ctx).await.unwrap();
    assert!(!report.succeeded());
    let (phase, reason) = report.failed_phase().unwrap();
    assert_eq!(phase, Phase::Ingest);
    assert!(reason.contains("migration"), "{reason}");
    assert!(report.outcome(Phase::Analyze).is_none());
    assert!(!cfg.database_path.exists());
}

#[tokio::test]
async fn empty_scan_output_fails_the_scan_phase() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let mut ctx = context(cfg, &["10.0.0.9"], options(), Arc::new(SilentAdapter));

    let report = run_pipeline(&mut ctx).await.unwrap();
    assert_eq!(report.failed_phase().map(|(p, _)| p), Some(Phase::Scan));
    assert_eq!(report.phases.len(), 2);
}

#[tokio::test]
async fn busy_scan_slot_fails_the_scan_phase() {
    let dir = tempfile::tempdir().unwrap();
    let slot = ScanSlot::default();
    let held = slot.try_acquire("10.0.0.1").unwrap();

    let mut ctx = context(config(&dir), &["10.0.0.5"], options(), Arc::new(FixtureAdapter))
        .with_slot(slot.clone());
    let report = run_pipeline(&mut ctx).await.unwrap();
    let (phase, reason) = report.failed_phase().unwrap();
    assert_eq!(phase, Phase::Scan);
    assert!(reason.contains("already in progress"), "{reason}");

    drop(held);
    assert!(!slot.is_busy());
}

#[tokio::test]
async fn scanner_timeout_halts_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(config(&dir), &["10.0.0.5"], options(), Arc::new(StalledAdapter));

    let report = run_pipeline(&mut ctx).await.unwrap();
    let (phase, reason) = report.failed_phase().unwrap();
    assert_eq!(phase, Phase::Scan);
    assert!(reason.contains("timed out"), "{reason}");
    assert_eq!(report.phases.len(), 2);
    assert!(report.scans.is_empty());
}

#[tokio::test]
async fn missing_tool_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Arc::new(AppConfig {
        required_tools: vec!["secguys-no-such-scanner".to_string()],
        ..(*config(&dir)).clone()
    });
    let opts = PipelineOptions {
        check_tools: true,
        ..options()
    };
    let mut ctx = context(cfg, &["10.0.0.5"], opts, Arc::new(FixtureAdapter));

    let report = run_pipeline(&mut ctx).await.unwrap();
    assert_eq!(report.phases.len(), 1);
    let (phase, reason) = report.failed_phase().unwrap();
    assert_eq!(phase, Phase::Setup);
    assert!(reason.contains("secguys-no-such-scanner"), "{reason}");
}

#[tokio::test]
async fn targets_sharing_a_directory_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(config(&dir), &["a b", "a_b"], options(), Arc::new(FixtureAdapter));
    let err = run_pipeline(&mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("share results directory"), "{err}");

    let mut repeated = context(
        config(&dir),
        &["10.0.0.5", "10.0.0.5"],
        options(),
        Arc::new(FixtureAdapter),
    );
    assert!(run_pipeline(&mut repeated).await.is_err());
}

#[tokio::test]
async fn blank_target_is_rejected_before_any_phase() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(config(&dir), &["10.0.0.5", " "], options(), Arc::new(FixtureAdapter));
    assert!(run_pipeline(&mut ctx).await.is_err());
}
