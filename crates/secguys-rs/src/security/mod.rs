use std::{collections::HashSet, net::IpAddr, path::Path, process::Stdio, str::FromStr, time::Duration};

use ipnet::IpNet;
use tokio::{process::Command, time::timeout};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// An empty allowlist means every target is in scope.
pub fn in_scope(target: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }

    if allowlist
        .iter()
        .any(|item| item.eq_ignore_ascii_case(target))
    {
        return true;
    }

    if let Ok(ip) = IpAddr::from_str(target) {
        return allowlist.iter().any(|entry| {
            IpNet::from_str(entry)
                .map(|net| net.contains(&ip))
                .unwrap_or(false)
        });
    }

    false
}

fn command_name(cmd: &str) -> &str {
    Path::new(cmd)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(cmd)
}

/// Runs an external tool whose name is on `allowed`, killing it once
/// `timeout_secs` elapse. Returns stdout on a zero exit status.
pub async fn run_command_allowlisted(
    cmd: &str,
    args: &[String],
    allowed: &[&str],
    timeout_secs: u64,
) -> Result<String> {
    let allowed_set: HashSet<&str> = allowed.iter().map(|c| command_name(c)).collect();
    if !allowed_set.contains(command_name(cmd)) {
        return Err(PipelineError::ToolNotAllowed(cmd.to_string()));
    }

    info!(command = cmd, ?args, timeout_secs, "audit: launching external tool");
    let child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::tool_failed(cmd.to_string(), format!("failed to spawn: {e}")))?;

    let out = match timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
        Ok(out) => out?,
        Err(_) => {
            warn!(command = cmd, timeout_secs, "external tool timed out; killed");
            return Err(PipelineError::ToolTimeout {
                tool: cmd.to_string(),
                secs: timeout_secs,
            });
        }
    };

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(PipelineError::tool_failed(
            cmd.to_string(),
            format!("exited with {}: {}", out.status, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_matches_hosts_and_networks() {
        let allow = vec!["10.0.0.0/24".to_string(), "Example.com".to_string()];
        assert!(in_scope("10.0.0.5", &allow));
        assert!(in_scope("example.com", &allow));
        assert!(!in_scope("10.0.1.5", &allow));
        assert!(!in_scope("other.com", &allow));
        assert!(in_scope("anything", &[]));
    }

    #[tokio::test]
    async fn command_outside_allowlist_is_refused() {
        let err = run_command_allowlisted("rm", &["-rf".to_string()], &["bash"], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolNotAllowed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let err = run_command_allowlisted("sleep", &["5".to_string()], &["sleep"], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolTimeout { secs: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let args = vec!["-c".to_string(), "echo nope >&2; exit 3".to_string()];
        let err = run_command_allowlisted("/bin/sh", &args, &["sh"], 5)
            .await
            .unwrap_err();
        match err {
            PipelineError::ToolFailed { message, .. } => assert!(message.contains("nope")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
