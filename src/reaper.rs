//! Optional TTL-based cleanup of stored uploads and outputs.
//!
//! The conversion pipeline never deletes its files. When a retention period
//! is configured, [`spawn`] starts a background task that periodically removes
//! files older than that period from the storage directories.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Longest pause between sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawns the reaper loop over `dirs`.
pub fn spawn(dirs: Vec<PathBuf>, retention: Duration) -> JoinHandle<()> {
    let interval = retention.min(MAX_SWEEP_INTERVAL).max(Duration::from_secs(1));
    info!(
        retention_secs = retention.as_secs(),
        interval_secs = interval.as_secs(),
        "storage reaper started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for dir in &dirs {
                match sweep(dir, retention).await {
                    Ok(0) => {}
                    Ok(removed) => info!(dir = %dir.display(), removed, "expired files removed"),
                    Err(e) => warn!(dir = %dir.display(), error = %e, "storage sweep failed"),
                }
            }
        }
    })
}

/// Removes regular files in `dir` whose modification age is at least `retention`.
///
/// Returns the number of files removed. Per-file failures are logged and skipped.
pub async fn sweep(dir: &Path, retention: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < retention {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), age_secs = age.as_secs(), "removed expired file");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove expired file"),
        }
    }

    Ok(removed)
}
