//! Entry-module change detection.
//!
//! A modification-time poller rather than a platform watcher: the entry file
//! is a single path, editors replace it atomically, and a 500ms poll is
//! indistinguishable from inotify at dev-loop timescales.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Spawn a poller for `path`; the returned receiver is notified on every
/// observed mtime change. The task ends when the receiver side is dropped.
pub fn spawn_entry_watch(path: PathBuf) -> watch::Receiver<()> {
    let (tx, rx) = watch::channel(());
    // Baseline taken before the task is scheduled, so edits racing the spawn
    // are still observed.
    let mut last = mtime(&path);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            interval.tick().await;
            let current = mtime(&path);
            if current != last {
                debug!(path = %path.display(), "entry module changed");
                last = current;
                if tx.send(()).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

/// `None` while the file is absent; reappearing with any timestamp counts as
/// a change.
fn mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn mtime_change_notifies_receiver() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("server.ts");
        std::fs::write(&entry, "export default handler;").unwrap();

        let mut rx = spawn_entry_watch(entry.clone());

        // Backdate, then rewrite: the poller compares timestamps, not content.
        std::fs::write(&entry, "export default handler2;").unwrap();
        let backdated = SystemTime::now() - Duration::from_secs(60);
        filetime_set(&entry, backdated);

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("poller never fired")
            .unwrap();
    }

    fn filetime_set(path: &std::path::Path, to: SystemTime) {
        let file = std::fs::File::options().append(true).open(path).unwrap();
        file.set_modified(to).unwrap();
    }
}
