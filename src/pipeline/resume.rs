//! Resumable jobs
//!
//! A job freezes its targets in a [`SelectionWindow`] and walks them with a
//! [`JobCursor`]. Both are persisted, so a job interrupted after unit `k`
//! picks up at `k + 1` on the next invocation. The window is reused until it
//! expires; a fresh selection always starts a fresh cursor.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::PipelineError;
use crate::models::{JobCursor, SelectionWindow};
use crate::storage::{SharedStore, StateStore};

pub struct ResumableJob {
    store: SharedStore,
    window: SelectionWindow,
    cursor: JobCursor,
}

impl ResumableJob {
    /// Resume the job's live window, or run `select` and persist a new one
    pub async fn open<F, Fut>(
        store: &SharedStore,
        job: &str,
        ttl: Duration,
        now: DateTime<Utc>,
        select: F,
    ) -> Result<Self, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>, PipelineError>>,
    {
        if let Some(window) = store.load_window(job).await? {
            if !window.is_expired(now) {
                let mut cursor = store
                    .load_cursor(job)
                    .await?
                    .unwrap_or_else(|| JobCursor::start(job));
                cursor.index = cursor.index.min(window.ids.len() as u64);

                if cursor.index > 0 {
                    info!(
                        job = %job,
                        index = cursor.index,
                        total = window.ids.len(),
                        last_id = ?cursor.last_id,
                        "Resuming job from cursor"
                    );
                }

                return Ok(Self {
                    store: store.clone(),
                    window,
                    cursor,
                });
            }
            debug!(window = %window, "Selection window expired");
        }

        let ids = select().await?;
        let window = SelectionWindow {
            job: job.to_string(),
            ids,
            created_at: now,
            expires_at: now + ttl,
        };
        store.save_window(&window).await?;
        store.delete_cursor(job).await?;

        debug!(window = %window, "Selection window created");

        Ok(Self {
            store: store.clone(),
            window,
            cursor: JobCursor::start(job),
        })
    }

    pub fn name(&self) -> &str {
        &self.window.job
    }

    pub fn total(&self) -> usize {
        self.window.ids.len()
    }

    /// Units already completed
    pub fn position(&self) -> usize {
        self.cursor.index as usize
    }

    pub fn is_complete(&self) -> bool {
        self.position() >= self.total()
    }

    /// Targets not yet completed, in selection order
    pub fn remaining(&self) -> Vec<String> {
        self.window.ids[self.position().min(self.total())..].to_vec()
    }

    /// Record one completed unit
    ///
    /// The cursor write is best effort: on failure the unit is redone on
    /// resume, which the upserts make harmless.
    pub async fn complete(&mut self, id: &str) {
        self.cursor.advance(id);
        if let Err(e) = self.store.save_cursor(&self.cursor).await {
            warn!(job = %self.window.job, id = %id, error = %e, "Failed to persist cursor");
        }
    }

    /// Drop cursor and window once the whole selection is consumed
    pub async fn finish(self) -> Result<(), PipelineError> {
        self.store.delete_cursor(&self.window.job).await?;
        self.store.delete_window(&self.window.job).await?;
        debug!(job = %self.window.job, total = self.total(), "Job finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use std::sync::Arc;

    fn store() -> SharedStore {
        Arc::new(SqliteStore::in_memory().unwrap())
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resume_skips_completed_units() {
        let store = store();
        let now = Utc::now();

        let mut job = ResumableJob::open(&store, "backfill:empty", Duration::hours(6), now, || async {
            Ok(ids(&["a", "b", "c"]))
        })
        .await
        .unwrap();
        job.complete("a").await;
        drop(job);

        // A second open reuses the window and never calls the selector.
        let job = ResumableJob::open(&store, "backfill:empty", Duration::hours(6), now, || async {
            Err(PipelineError::Store(anyhow::anyhow!("selector must not run")))
        })
        .await
        .unwrap();
        assert_eq!(job.position(), 1);
        assert_eq!(job.remaining(), ids(&["b", "c"]));
    }

    #[tokio::test]
    async fn test_expired_window_restarts_selection() {
        let store = store();
        let now = Utc::now();

        let mut job = ResumableJob::open(&store, "refresh:US", Duration::hours(1), now, || async {
            Ok(ids(&["a", "b"]))
        })
        .await
        .unwrap();
        job.complete("a").await;

        let later = now + Duration::hours(2);
        let job = ResumableJob::open(&store, "refresh:US", Duration::hours(1), later, || async {
            Ok(ids(&["x", "y", "z"]))
        })
        .await
        .unwrap();
        assert_eq!(job.position(), 0);
        assert_eq!(job.total(), 3);
    }

    #[tokio::test]
    async fn test_finish_clears_state() {
        let store = store();
        let now = Utc::now();

        let mut job = ResumableJob::open(&store, "fetch:GB", Duration::hours(6), now, || async {
            Ok(ids(&["a"]))
        })
        .await
        .unwrap();
        job.complete("a").await;
        assert!(job.is_complete());
        job.finish().await.unwrap();

        assert!(store.load_cursor("fetch:GB").await.unwrap().is_none());
        assert!(store.load_window("fetch:GB").await.unwrap().is_none());
    }
}
