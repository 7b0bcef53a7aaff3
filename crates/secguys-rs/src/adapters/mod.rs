use std::{
    env,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{config::AppConfig, error::Result, security::run_command_allowlisted};

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub target: String,
    pub output_dir: PathBuf,
}

/// Produces the fixed-format scanner files for one target inside `output_dir`.
#[async_trait::async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, req: &ScanRequest) -> Result<()>;
}

/// Runs the configured scanner wrapper script as
/// `<command> <args>... <target> <output_dir>`.
#[derive(Debug, Clone)]
pub struct ScriptAdapter {
    command: String,
    args: Vec<String>,
    timeout_secs: u64,
}

impl ScriptAdapter {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            args,
            timeout_secs,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.scanner_command.clone(),
            cfg.scanner_args.clone(),
            cfg.scan_timeout_secs,
        )
    }
}

#[async_trait::async_trait]
impl ToolAdapter for ScriptAdapter {
    fn name(&self) -> &str {
        &self.command
    }

    async fn run(&self, req: &ScanRequest) -> Result<()> {
        let mut args = self.args.clone();
        args.push(req.target.clone());
        args.push(req.output_dir.display().to_string());

        let stdout =
            run_command_allowlisted(&self.command, &args, &[&self.command], self.timeout_secs)
                .await?;
        info!(
            target = %req.target,
            output_dir = %req.output_dir.display(),
            stdout_bytes = stdout.len(),
            "scanner finished"
        );
        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Looks `name` up on `PATH` the way a shell would.
pub fn tool_available(name: &str) -> bool {
    if name.contains(std::path::MAIN_SEPARATOR) {
        return is_executable(Path::new(name));
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| is_executable(&dir.join(name))))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn shell_is_found_and_nonsense_is_not() {
        assert!(tool_available("sh"));
        assert!(tool_available("/bin/sh"));
        assert!(!tool_available("definitely-not-a-scanner-xyz"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_receives_target_and_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"printf '+ seen %s\n' "$0" > "$1/nikto.txt""#;
        let adapter = ScriptAdapter::new("sh", vec!["-c".to_string(), script.to_string()], 10);

        adapter
            .run(&ScanRequest {
                target: "10.0.0.5".to_string(),
                output_dir: dir.path().to_path_buf(),
            })
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("nikto.txt")).unwrap();
        assert_eq!(written, "+ seen 10.0.0.5\n");
    }
}
