//! Backing-store watcher: keeps the view fresh without explicit rescans.
//!
//! Change notifications are reduced to a stream of touched paths; a worker
//! blocks on the first one, absorbs follow-ups until the stream stays quiet
//! for the configured window, then invalidates the affected subtrees and
//! re-enumerates the file set so layer indexes pick up creations and
//! deletions.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use shadowfs_core::ops::ShadowFs;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Start watching the source roots. `quiet` is how long the event stream
/// must stay silent before a batch of changes is applied. Returns the
/// watcher handle — dropping it stops the watcher.
pub fn start_watcher(
    fs: Arc<ShadowFs>,
    roots: Vec<PathBuf>,
    quiet: Duration,
) -> Option<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<PathBuf>();

    // Reduce events to touched paths at the source; only mutations matter.
    let on_event = move |res: notify::Result<Event>| {
        let Ok(event) = res else { return };
        if is_mutation(&event.kind) {
            for path in event.paths {
                let _ = tx.send(path);
            }
        }
    };
    let mut watcher = match RecommendedWatcher::new(on_event, notify::Config::default()) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "failed to create file watcher");
            return None;
        }
    };

    let mut watched = 0usize;
    for root in &roots {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                debug!(root = %root.display(), "watching source root");
                watched += 1;
            }
            Err(e) => warn!(root = %root.display(), error = %e, "failed to watch source root"),
        }
    }
    if watched == 0 {
        return None;
    }

    std::thread::spawn(move || {
        // Block for the first change of a batch, then keep absorbing until
        // the channel yields nothing for a full quiet window.
        while let Ok(first) = rx.recv() {
            let mut batch = BTreeSet::from([first]);
            while let Ok(more) = rx.recv_timeout(quiet) {
                batch.insert(more);
            }
            apply_batch(&fs, &roots, batch);
        }
    });
    Some(watcher)
}

fn is_mutation(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

/// Invalidate each changed subtree, then refresh the file set once per
/// batch so stale layer indexes rebuild against reality.
fn apply_batch(fs: &Arc<ShadowFs>, roots: &[PathBuf], batch: BTreeSet<PathBuf>) {
    let mut touched = 0usize;
    for abs in &batch {
        let Some(rel) = mount_relative(roots, abs) else { continue };
        if fs.invalidate(&rel).is_ok() {
            touched += 1;
        }
    }
    if touched > 0 {
        fs.rescan();
        debug!(changed = touched, "watcher refreshed view");
    }
}

/// Strip whichever root owns the path, yielding the mount-relative form.
fn mount_relative(roots: &[PathBuf], abs: &Path) -> Option<String> {
    roots.iter().find_map(|root| {
        let rel = abs.strip_prefix(root).ok()?;
        Some(rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
    })
}
