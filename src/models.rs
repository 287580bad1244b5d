// Persisted records of the harvester

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Catalog rows
// ============================================================================

/// Raw search hit, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryHit {
    pub playlist_id: String,
    pub region: String,
    pub query: String,
    pub category: String, // genre of the seed query
    pub title: String,
    pub channel_title: String,
    pub discovered_at: DateTime<Utc>,
    pub checked_at: Option<DateTime<Utc>>,
    pub validated: bool,
}

/// Canonical playlist row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub cover_url: Option<String>,
    pub region: String,
    pub category: Option<String>,
    pub is_public: bool,
    pub item_count: u64,
    pub channel_title: String,
    pub etag: Option<String>,
    pub validated: bool,
    pub fetched_on: DateTime<Utc>,
    pub last_refreshed_on: DateTime<Utc>,
}

/// Column set written for playlists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowShape {
    #[default]
    Full,
    Minimal,
}

impl FromStr for RowShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "minimal" => Ok(Self::Minimal),
            other => Err(format!("unknown row shape '{other}' (expected full|minimal)")),
        }
    }
}

/// Identity columns only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistIdentity {
    pub external_id: String,
    pub title: String,
    pub region: String,
    /// Content fingerprint, kept so refreshes can skip unchanged playlists
    pub etag: Option<String>,
    pub validated: bool,
    pub fetched_on: DateTime<Utc>,
    pub last_refreshed_on: DateTime<Utc>,
}

/// One playlist upsert in either row shape
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistWrite {
    Full(PlaylistRecord),
    Identity(PlaylistIdentity),
}

impl PlaylistWrite {
    pub fn new(record: PlaylistRecord, shape: RowShape) -> Self {
        match shape {
            RowShape::Full => Self::Full(record),
            RowShape::Minimal => Self::Identity(PlaylistIdentity {
                external_id: record.external_id,
                title: record.title,
                region: record.region,
                etag: record.etag,
                validated: record.validated,
                fetched_on: record.fetched_on,
                last_refreshed_on: record.last_refreshed_on,
            }),
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            Self::Full(r) => &r.external_id,
            Self::Identity(r) => &r.external_id,
        }
    }
}

/// Track row, keyed by the source platform's video id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub external_id: String,
    pub title: String,
    pub artist: String,
    pub cover_url: Option<String>,
    pub sync_status: String,
}

/// Playlist membership with ordinal position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackLink {
    pub playlist_id: String,
    pub track_id: String,
    pub position: u32,
}

/// Stale playlist selected for refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalePlaylist {
    pub external_id: String,
    pub etag: Option<String>,
    pub last_refreshed_on: DateTime<Utc>,
}

/// Row counts for status output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub discovered: u64,
    pub playlists: u64,
    pub tracks: u64,
    pub links: u64,
}

// ============================================================================
// Resumable jobs
// ============================================================================

/// Resumption point of a resumable job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCursor {
    pub job: String,
    /// Number of units of the selection already completed
    pub index: u64,
    pub last_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobCursor {
    pub fn start(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            index: 0,
            last_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Record one more completed unit
    pub fn advance(&mut self, id: &str) {
        self.index += 1;
        self.last_id = Some(id.to_string());
        self.updated_at = Utc::now();
    }
}

/// Frozen target set of a job, valid until it expires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionWindow {
    pub job: String,
    pub ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SelectionWindow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Display for SelectionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} targets, expires {})",
            self.job,
            self.ids.len(),
            self.expires_at.format("%Y-%m-%d %H:%M")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> PlaylistRecord {
        let now = Utc::now();
        PlaylistRecord {
            external_id: "PL1".into(),
            title: "Chill".into(),
            description: "desc".into(),
            cover_url: Some("http://img".into()),
            region: "US".into(),
            category: Some("jazz".into()),
            is_public: true,
            item_count: 3,
            channel_title: "chan".into(),
            etag: Some("e1".into()),
            validated: true,
            fetched_on: now,
            last_refreshed_on: now,
        }
    }

    #[test]
    fn test_row_shape_parse() {
        assert_eq!("full".parse::<RowShape>().unwrap(), RowShape::Full);
        assert_eq!(" Minimal ".parse::<RowShape>().unwrap(), RowShape::Minimal);
        assert!("rich".parse::<RowShape>().is_err());
    }

    #[test]
    fn test_minimal_write_keeps_identity() {
        let write = PlaylistWrite::new(record(), RowShape::Minimal);
        match &write {
            PlaylistWrite::Identity(id) => {
                assert_eq!(id.external_id, "PL1");
                assert_eq!(id.region, "US");
                assert_eq!(id.etag.as_deref(), Some("e1"));
                assert!(id.validated);
            }
            PlaylistWrite::Full(_) => panic!("expected identity row"),
        }
        assert_eq!(write.external_id(), "PL1");
    }

    #[test]
    fn test_cursor_advance() {
        let mut cursor = JobCursor::start("fetch:US");
        cursor.advance("PL1");
        cursor.advance("PL2");
        assert_eq!(cursor.index, 2);
        assert_eq!(cursor.last_id.as_deref(), Some("PL2"));
    }

    #[test]
    fn test_window_expiry() {
        let now = Utc::now();
        let window = SelectionWindow {
            job: "backfill:empty".into(),
            ids: vec!["PL1".into()],
            created_at: now,
            expires_at: now + Duration::hours(6),
        };
        assert!(!window.is_expired(now));
        assert!(window.is_expired(now + Duration::hours(6)));
    }
}
