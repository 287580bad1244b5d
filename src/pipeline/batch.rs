//! Batched track and link writes
//!
//! Rows accumulate until `batch_size` links are pending, then tracks are
//! written before the links that reference them. Each write runs under a
//! timeout; a failed or timed-out batch is logged and dropped without
//! aborting the playlist being ingested.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::models::{TrackLink, TrackRecord};
use crate::storage::{CatalogStore, SharedStore};

/// Rows written by one writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub tracks: usize,
    pub links: usize,
    pub failed_batches: usize,
}

pub struct BatchWriter {
    store: SharedStore,
    batch_size: usize,
    timeout: Duration,
    tracks: Vec<TrackRecord>,
    links: Vec<TrackLink>,
    stats: BatchStats,
}

impl BatchWriter {
    pub fn new(store: SharedStore, batch_size: usize, timeout: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            timeout,
            tracks: Vec::new(),
            links: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    /// Queue one mapped item, flushing when the batch is full
    pub async fn push(&mut self, track: TrackRecord, link: TrackLink) {
        self.tracks.push(track);
        self.links.push(link);
        if self.links.len() >= self.batch_size {
            self.flush().await;
        }
    }

    pub fn pending(&self) -> usize {
        self.links.len()
    }

    /// Write everything pending
    pub async fn flush(&mut self) {
        if self.links.is_empty() && self.tracks.is_empty() {
            return;
        }

        let tracks = dedup_tracks(std::mem::take(&mut self.tracks));
        let links = dedup_links(std::mem::take(&mut self.links));

        match tokio::time::timeout(self.timeout, self.store.upsert_tracks(&tracks)).await {
            Ok(Ok(n)) => {
                self.stats.tracks += n;
                crate::metrics::record_rows_upserted("tracks", n);
            }
            Ok(Err(e)) => {
                warn!(rows = tracks.len(), error = %e, "Track batch failed");
                self.stats.failed_batches += 1;
                // Links would point at rows that may not exist.
                return;
            }
            Err(_) => {
                warn!(rows = tracks.len(), timeout = ?self.timeout, "Track batch timed out");
                self.stats.failed_batches += 1;
                return;
            }
        }

        match tokio::time::timeout(self.timeout, self.store.upsert_links(&links)).await {
            Ok(Ok(n)) => {
                self.stats.links += n;
                crate::metrics::record_rows_upserted("playlist_tracks", n);
                debug!(tracks = tracks.len(), links = n, "Batch written");
            }
            Ok(Err(e)) => {
                warn!(rows = links.len(), error = %e, "Link batch failed");
                self.stats.failed_batches += 1;
            }
            Err(_) => {
                warn!(rows = links.len(), timeout = ?self.timeout, "Link batch timed out");
                self.stats.failed_batches += 1;
            }
        }
    }

    /// Flush and return the totals
    pub async fn finish(mut self) -> BatchStats {
        self.flush().await;
        self.stats
    }
}

/// Last occurrence of each track wins, first-seen order kept
fn dedup_tracks(tracks: Vec<TrackRecord>) -> Vec<TrackRecord> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(tracks.len());
    let mut out: Vec<TrackRecord> = Vec::with_capacity(tracks.len());

    for track in tracks {
        match slots.get(&track.external_id) {
            Some(&i) => out[i] = track,
            None => {
                slots.insert(track.external_id.clone(), out.len());
                out.push(track);
            }
        }
    }
    out
}

/// One link per `(playlist_id, track_id)`, the last position winning
pub fn dedup_links(links: Vec<TrackLink>) -> Vec<TrackLink> {
    let mut slots: HashMap<(String, String), usize> = HashMap::with_capacity(links.len());
    let mut out: Vec<TrackLink> = Vec::with_capacity(links.len());

    for link in links {
        let key = (link.playlist_id.clone(), link.track_id.clone());
        match slots.get(&key) {
            Some(&i) => out[i].position = link.position,
            None => {
                slots.insert(key, out.len());
                out.push(link);
            }
        }
    }
    out
}
