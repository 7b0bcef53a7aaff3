use std::{fs, path::Path};

use clap::Parser;

use crate::pipeline::PipelineOptions;

#[derive(Parser, Debug)]
#[command(name = "secguys")]
#[command(about = "Phase-gated security scanning, normalization and ingestion pipeline")]
#[command(version)]
pub struct Args {
    /// Targets to scan (IP, domain, or a file with one target per line)
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Skip environment setup and database migrations
    #[arg(long)]
    pub skip_setup: bool,

    /// Skip running the scanners and reuse existing results
    #[arg(long)]
    pub skip_scan: bool,

    /// Skip building the evidence bundle and report
    #[arg(long)]
    pub skip_analyze: bool,

    /// Skip semantic enrichment
    #[arg(long)]
    pub skip_semantic: bool,

    /// Skip tool availability checks
    #[arg(long)]
    pub no_tool_check: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl Args {
    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            skip_setup: self.skip_setup,
            skip_scan: self.skip_scan,
            skip_analyze: self.skip_analyze,
            skip_semantic: self.skip_semantic,
            check_tools: !self.no_tool_check,
        }
    }
}

/// An argument naming an existing file expands to that file's non-blank lines.
pub fn expand_targets(args: &[String]) -> std::io::Result<Vec<String>> {
    let mut targets = Vec::new();
    for arg in args {
        if Path::new(arg).is_file() {
            let content = fs::read_to_string(arg)?;
            targets.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(ToString::to_string),
            );
        } else {
            targets.push(arg.clone());
        }
    }
    Ok(targets)
}
