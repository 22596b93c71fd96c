//! Debounced auto-save: one background task per review, saving after a
//! quiet interval and surviving store failures.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::review::SharedReview;
use crate::store::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Saved,
    Unsaved,
    Saving,
}

enum Control {
    Dirty,
    SaveNow,
    Shutdown,
}

/// Handle to the auto-save task.
pub struct AutoSaveCoordinator {
    control: mpsc::Sender<Control>,
    status_rx: watch::Receiver<SaveStatus>,
    task: JoinHandle<()>,
}

impl AutoSaveCoordinator {
    /// Start the coordinator. Nothing counts as persisted until the first
    /// save goes through, so the first triggered save always writes.
    pub fn spawn<S: SnapshotStore>(store: S, review: SharedReview, quiet: Duration) -> Self {
        let (control_tx, control_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(SaveStatus::Saved);
        let task = tokio::spawn(run_loop(store, review, quiet, control_rx, status_tx));
        Self {
            control: control_tx,
            status_rx,
            task,
        }
    }

    /// Note a mutation. Restarts the quiet window; cheap to call often.
    pub fn mark_dirty(&self) {
        // A full queue already carries a pending dirty signal
        let _ = self.control.try_send(Control::Dirty);
    }

    /// Save without waiting for the quiet window.
    pub async fn save_now(&self) {
        let _ = self.control.send(Control::SaveNow).await;
    }

    pub fn status(&self) -> SaveStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.status_rx.clone()
    }

    /// Flush any pending state and stop the task.
    pub async fn shutdown(self) {
        let _ = self.control.send(Control::Shutdown).await;
        let _ = self.task.await;
    }
}

async fn run_loop<S: SnapshotStore>(
    store: S,
    review: SharedReview,
    quiet: Duration,
    mut control_rx: mpsc::Receiver<Control>,
    status_tx: watch::Sender<SaveStatus>,
) {
    // No baseline: reading the revision here would run at the task's first
    // poll, silently treating anything mutated before then as persisted.
    let mut last_saved: Option<u64> = None;
    let mut dirty = false;

    loop {
        let message = if dirty {
            // A fresh sleep each iteration: every Dirty restarts the window
            tokio::select! {
                m = control_rx.recv() => match m {
                    Some(c) => Some(c),
                    None => Some(Control::Shutdown),
                },
                _ = tokio::time::sleep(quiet) => None,
            }
        } else {
            match control_rx.recv().await {
                Some(c) => Some(c),
                None => Some(Control::Shutdown),
            }
        };

        match message {
            Some(Control::Dirty) => {
                dirty = true;
                let _ = status_tx.send(SaveStatus::Unsaved);
            }
            Some(Control::SaveNow) | None => {
                dirty = save(&store, &review, &status_tx, &mut last_saved).await;
            }
            Some(Control::Shutdown) => {
                if dirty {
                    save(&store, &review, &status_tx, &mut last_saved).await;
                }
                debug!("Auto-save task stopping");
                return;
            }
        }
    }
}

/// Attempt one save. Returns whether the review is still dirty afterwards
/// (save failed, or mutations arrived while saving).
async fn save<S: SnapshotStore>(
    store: &S,
    review: &SharedReview,
    status_tx: &watch::Sender<SaveStatus>,
    last_saved: &mut Option<u64>,
) -> bool {
    let (game_id, revision, snapshot) = {
        let review = review.lock().await;
        (review.game_id.clone(), review.revision(), review.snapshot_json())
    };

    if *last_saved == Some(revision) {
        let _ = status_tx.send(SaveStatus::Saved);
        return false;
    }

    let snapshot = match snapshot {
        Ok(s) => s,
        Err(e) => {
            warn!(game_id = %game_id, error = %e, "Snapshot serialization failed");
            let _ = status_tx.send(SaveStatus::Unsaved);
            return true;
        }
    };

    let _ = status_tx.send(SaveStatus::Saving);
    match store.save(game_id.clone(), snapshot).await {
        Ok(()) => {
            *last_saved = Some(revision);
            let now = review.lock().await.revision();
            if now == revision {
                info!(game_id = %game_id, revision, "Snapshot saved");
                let _ = status_tx.send(SaveStatus::Saved);
                false
            } else {
                // The saved snapshot is already stale
                let _ = status_tx.send(SaveStatus::Unsaved);
                true
            }
        }
        Err(e) => {
            warn!(game_id = %game_id, error = %e, "Snapshot save failed, will retry");
            let _ = status_tx.send(SaveStatus::Unsaved);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{shared, GameReview};
    use crate::store::MemoryStore;

    const QUIET: Duration = Duration::from_secs(2);

    fn setup() -> (SharedReview, MemoryStore) {
        let review = GameReview::from_pgn("g1", "1. e4 e5 *").unwrap();
        (shared(review), MemoryStore::new())
    }

    /// Bump the revision by adding a fresh root variation.
    async fn mutate(review: &SharedReview) {
        let mut review = review.lock().await;
        let alternates = ["a2a3", "b2b3", "c2c3", "d2d3", "g2g3", "h2h3"];
        let root = review.tree.root();
        let idx = (review.tree.revision() as usize) % alternates.len();
        review.tree.add_move(root, alternates[idx]).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_fires_after_quiet_window() {
        let (review, store) = setup();
        let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), QUIET);

        mutate(&review).await;
        saver.mark_dirty();
        tokio::time::sleep(QUIET + Duration::from_millis(100)).await;

        assert_eq!(store.saves(), 1);
        assert_eq!(saver.status(), SaveStatus::Saved);
        assert!(store.get("g1").is_some());
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_mutation_resets_the_window() {
        let (review, store) = setup();
        let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), QUIET);

        mutate(&review).await;
        saver.mark_dirty();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(store.saves(), 0);

        mutate(&review).await;
        saver.mark_dirty();
        // 2.6s after the first dirty, 1.1s after the second: still quiet
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(store.saves(), 0);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(store.saves(), 1);
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_retries_next_window() {
        let (review, store) = setup();
        store.fail_next(1);
        let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), QUIET);

        mutate(&review).await;
        saver.mark_dirty();
        tokio::time::sleep(QUIET + Duration::from_millis(100)).await;
        assert_eq!(store.attempts(), 1);
        assert_eq!(store.saves(), 0);
        assert_eq!(saver.status(), SaveStatus::Unsaved);

        // Retried after another quiet interval, not in a tight loop
        tokio::time::sleep(QUIET + Duration::from_millis(100)).await;
        assert_eq!(store.attempts(), 2);
        assert_eq!(store.saves(), 1);
        assert_eq!(saver.status(), SaveStatus::Saved);
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_now_skips_the_window() {
        let (review, store) = setup();
        let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), QUIET);

        mutate(&review).await;
        saver.save_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.saves(), 1);
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_now_writes_baseline_then_is_a_noop() {
        let (review, store) = setup();
        let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), QUIET);

        // First explicit save persists even without a mutation
        saver.save_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.attempts(), 1);
        assert_eq!(saver.status(), SaveStatus::Saved);

        // Unchanged revision afterwards: nothing to write
        saver.save_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.attempts(), 1);
        assert_eq!(saver.status(), SaveStatus::Saved);
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_racing_task_startup_is_persisted() {
        let (review, store) = setup();
        let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), QUIET);

        // Mutate before the background task has had a chance to run
        mutate(&review).await;
        saver.mark_dirty();
        tokio::time::sleep(QUIET + Duration::from_millis(100)).await;

        assert_eq!(store.saves(), 1);
        let json = store.get("g1").unwrap();
        let children = json
            .get("children")
            .and_then(|c| c.as_array())
            .map(|c| c.len());
        // e4 plus the fresh root variation
        assert_eq!(children, Some(2));
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_during_save_leaves_unsaved_then_catches_up() {
        let (review, store) = setup();
        store.set_delay(Duration::from_millis(500));
        let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), QUIET);

        mutate(&review).await;
        saver.mark_dirty();
        tokio::time::sleep(QUIET + Duration::from_millis(100)).await;
        // Save is in flight now; mutate underneath it
        assert_eq!(saver.status(), SaveStatus::Saving);
        mutate(&review).await;
        saver.mark_dirty();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(saver.status(), SaveStatus::Unsaved);

        // Exactly one follow-up save picks up the missed mutation
        tokio::time::sleep(QUIET + Duration::from_millis(100)).await;
        assert_eq!(store.saves(), 2);
        assert_eq!(saver.status(), SaveStatus::Saved);
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_dirty_state() {
        let (review, store) = setup();
        let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), QUIET);

        mutate(&review).await;
        saver.mark_dirty();
        tokio::time::sleep(Duration::from_millis(10)).await;
        saver.shutdown().await;
        assert_eq!(store.saves(), 1);
    }
}
