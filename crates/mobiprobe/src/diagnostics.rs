//! Diagnostic bundles written when a step fails.
//!
//! A bundle is the current page source and a screenshot, stored under a
//! directory named after the device so runs on several devices do not
//! overwrite each other. Capture is best effort and never fails the caller.

use crate::driver::AutomationDriver;
use crate::result::ProbeResult;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Page source file name inside a bundle
pub const SOURCE_FILE: &str = "source.xml";

/// Screenshot file name inside a bundle
pub const SCREENSHOT_FILE: &str = "screenshot.png";

static LABEL_UNSAFE: OnceLock<Option<Regex>> = OnceLock::new();

/// Replace every character outside `[a-zA-Z0-9]` with `_`
#[must_use]
pub fn sanitize(label: &str) -> String {
    match LABEL_UNSAFE.get_or_init(|| Regex::new("[^a-zA-Z0-9]").ok()) {
        Some(re) => re.replace_all(label, "_").into_owned(),
        None => label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect(),
    }
}

/// Bundle directory for a device
#[must_use]
pub fn bundle_dir(root: &Path, device_name: &str, platform_version: &str) -> PathBuf {
    root.join(sanitize(&format!("{device_name} {platform_version}")))
}

/// Write a bundle into `dir`; returns the directory on success
pub async fn capture<D: AutomationDriver + ?Sized>(driver: &mut D, dir: &Path) -> Option<PathBuf> {
    match write_bundle(driver, dir).await {
        Ok(()) => {
            info!(dir = %dir.display(), "saved source and screenshot for debugging");
            Some(dir.to_path_buf())
        }
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot save debug bundle");
            None
        }
    }
}

async fn write_bundle<D: AutomationDriver + ?Sized>(driver: &mut D, dir: &Path) -> ProbeResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    let source = driver.page_source().await?;
    tokio::fs::write(dir.join(SOURCE_FILE), source).await?;
    let png = driver.screenshot().await?;
    tokio::fs::write(dir.join(SCREENSHOT_FILE), png).await?;
    Ok(())
}
