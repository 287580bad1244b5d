//! API resources to catalog rows

use chrono::{DateTime, Utc};

use crate::api::{PlaylistItemResource, PlaylistResource};
use crate::models::{PlaylistRecord, TrackLink, TrackRecord};

/// Suffix of auto-generated artist channels
const TOPIC_SUFFIX: &str = " - Topic";

pub const PENDING_SYNC: &str = "pending";

/// Owner channel title without the auto-generated channel suffix
pub fn artist_name(channel_title: &str) -> String {
    let trimmed = channel_title.trim();
    trimmed
        .strip_suffix(TOPIC_SUFFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Map one playlist item to a track row and its link
///
/// Deleted and private entries carry no video id or no owner channel and
/// are skipped. `fallback_position` is used when the item has no position.
pub fn map_item(
    playlist_id: &str,
    item: &PlaylistItemResource,
    fallback_position: u32,
) -> Option<(TrackRecord, TrackLink)> {
    let video_id = item.video_id()?;
    let owner = item
        .snippet
        .video_owner_channel_title
        .as_deref()
        .filter(|o| !o.trim().is_empty())?;

    let track = TrackRecord {
        external_id: video_id.to_string(),
        title: item.snippet.title.trim().to_string(),
        artist: artist_name(owner),
        cover_url: item.snippet.thumbnails.best(),
        sync_status: PENDING_SYNC.to_string(),
    };
    let link = TrackLink {
        playlist_id: playlist_id.to_string(),
        track_id: video_id.to_string(),
        position: item.snippet.position.unwrap_or(fallback_position),
    };

    Some((track, link))
}

/// Canonical row for a fetched playlist
pub fn playlist_record(
    resource: &PlaylistResource,
    region: &str,
    category: Option<&str>,
    now: DateTime<Utc>,
) -> PlaylistRecord {
    PlaylistRecord {
        external_id: resource.id.clone(),
        title: resource.snippet.title.trim().to_string(),
        description: resource.snippet.description.clone(),
        cover_url: resource.snippet.thumbnails.best(),
        region: region.to_string(),
        category: category.map(str::to_string),
        is_public: resource.status.privacy_status == "public",
        item_count: resource.content_details.item_count,
        channel_title: resource.snippet.channel_title.clone(),
        etag: resource.etag.clone(),
        validated: resource.is_valid(),
        fetched_on: now,
        last_refreshed_on: now,
    }
}
