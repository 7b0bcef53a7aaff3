use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::{
    db::Store,
    error::{PipelineError, Result, ValidationError},
    models::{ScanRun, ScanStatus},
};

/// Tool label recorded on scan runs created by ingestion.
pub const AGGREGATED_TOOL: &str = "aggregated_scan";

/// Scan-run state transitions: `running` on start, then exactly one terminal status.
#[derive(Debug, Clone)]
pub struct ScanLifecycle {
    store: Store,
}

impl ScanLifecycle {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn start(&self, asset_id: &str, tool: &str) -> Result<ScanRun> {
        let scan = self.store.start_scan(asset_id, tool).await?;
        info!(scan_id = %scan.scan_id, asset_id, tool, "scan started");
        Ok(scan)
    }

    /// Rejects a second transition out of a terminal status.
    pub async fn end(&self, scan_id: &str, status: ScanStatus) -> Result<()> {
        if self.store.end_scan(scan_id, status).await? {
            info!(scan_id, status = status.as_str(), "scan ended");
            return Ok(());
        }
        let current = self.store.get_scan(scan_id).await?;
        let message = match current {
            Some(scan) => format!(
                "scan {scan_id} is already {} and cannot become {}",
                scan.status.as_str(),
                status.as_str()
            ),
            None => format!("scan {scan_id} does not exist"),
        };
        warn!(scan_id, "{message}");
        Err(ValidationError::new(message).into())
    }

    pub async fn complete(&self, scan_id: &str) -> Result<()> {
        self.end(scan_id, ScanStatus::Completed).await
    }

    pub async fn fail(&self, scan_id: &str) -> Result<()> {
        self.end(scan_id, ScanStatus::Failed).await
    }
}

/// At most one scan invocation at a time. A second caller is turned away, not queued.
#[derive(Debug, Clone, Default)]
pub struct ScanSlot {
    inner: Arc<Mutex<Option<String>>>,
}

/// Holds the slot until dropped.
#[derive(Debug)]
pub struct ScanGuard {
    guard: OwnedMutexGuard<Option<String>>,
}

impl ScanGuard {
    pub fn target(&self) -> Option<&str> {
        self.guard.as_deref()
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}

impl ScanSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, target: &str) -> Result<ScanGuard> {
        let mut guard = self
            .inner
            .clone()
            .try_lock_owned()
            .map_err(|_| PipelineError::ScanInProgress)?;
        *guard = Some(target.to_string());
        Ok(ScanGuard { guard })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
