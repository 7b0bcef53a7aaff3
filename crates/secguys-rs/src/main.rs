use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use secguys::{
    adapters::ScriptAdapter,
    cli::{expand_targets, Args},
    config::AppConfig,
    pipeline::{run_pipeline, RunContext},
    resolver::DnsResolver,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log_level, args.json_logs);

    match run(args, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "pipeline aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: AppConfig) -> anyhow::Result<bool> {
    let targets = expand_targets(&args.targets).context("failed to read target file")?;
    let config = Arc::new(config);

    let adapter = Arc::new(ScriptAdapter::from_config(&config));
    let dns = Arc::new(
        DnsResolver::from_system(Duration::from_secs(config.dns_timeout_secs))
            .context("failed to initialise DNS resolver")?,
    );

    let mut ctx = RunContext::new(config, targets, args.options(), adapter, dns);
    let report = run_pipeline(&mut ctx).await?;

    if let Some((phase, reason)) = report.failed_phase() {
        error!(%phase, %reason, "pipeline failed");
        return Ok(false);
    }
    info!(phases = report.phases.len(), "pipeline succeeded");
    Ok(report.succeeded())
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
