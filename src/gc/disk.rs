//! Disk usage of the volume holding the workspace root.

use crate::context::ExecutionContext;
use serde::Serialize;
use std::path::Path;

const MEGABYTE: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    pub fn inspect(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            total_bytes: fs2::total_space(path)?,
            available_bytes: fs2::available_space(path)?,
        })
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

/// Report disk usage through the context. Failure is a warning, never an error.
pub fn report_disk_usage(ctx: &dyn ExecutionContext, root: &Path) -> Option<DiskUsage> {
    ctx.output(&format!("Disk usage for working directory: {}", root.display()));
    match DiskUsage::inspect(root) {
        Ok(usage) => {
            ctx.output(&format!(
                "Total size: '{:.2} MB'",
                usage.total_bytes as f64 / MEGABYTE
            ));
            ctx.output(&format!(
                "Available space: '{:.2} MB'",
                usage.available_bytes as f64 / MEGABYTE
            ));
            Some(usage)
        }
        Err(e) => {
            ctx.warning(&format!(
                "Unable to inspect disk usage for working directory {}.",
                root.display()
            ));
            ctx.debug(&e.to_string());
            None
        }
    }
}
