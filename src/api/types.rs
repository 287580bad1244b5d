//! Request and response types of the video API

use crate::credentials::ApiOperation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum ids per `playlists.list` call and items per page
pub const MAX_PAGE_SIZE: usize = 50;

/// One logical list call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    /// Playlist search; `region = None` omits the region filter
    Search {
        query: String,
        region: Option<String>,
        language: Option<String>,
        page_token: Option<String>,
    },
    /// Playlist details for up to [`MAX_PAGE_SIZE`] ids
    Playlists { ids: Vec<String> },
    /// One page of playlist members
    PlaylistItems {
        playlist_id: String,
        page_token: Option<String>,
    },
}

impl ApiRequest {
    pub fn operation(&self) -> ApiOperation {
        match self {
            Self::Search { .. } => ApiOperation::Search,
            Self::Playlists { .. } => ApiOperation::ListPlaylists,
            Self::PlaylistItems { .. } => ApiOperation::ListPlaylistItems,
        }
    }

    /// Same request positioned at another page
    pub fn with_page_token(&self, token: Option<String>) -> Self {
        match self.clone() {
            Self::Search {
                query,
                region,
                language,
                ..
            } => Self::Search {
                query,
                region,
                language,
                page_token: token,
            },
            Self::PlaylistItems { playlist_id, .. } => Self::PlaylistItems {
                playlist_id,
                page_token: token,
            },
            other => other,
        }
    }

    /// URL path (relative to the API base) and query parameters, without the key
    pub fn to_query(&self) -> (&'static str, Vec<(&'static str, String)>) {
        let max = MAX_PAGE_SIZE.to_string();
        match self {
            Self::Search {
                query,
                region,
                language,
                page_token,
            } => {
                let mut params = vec![
                    ("part", "snippet".to_string()),
                    ("type", "playlist".to_string()),
                    ("maxResults", max),
                    ("q", query.clone()),
                ];
                if let Some(region) = region {
                    params.push(("regionCode", region.clone()));
                }
                if let Some(lang) = language {
                    params.push(("relevanceLanguage", lang.clone()));
                }
                if let Some(token) = page_token {
                    params.push(("pageToken", token.clone()));
                }
                ("search", params)
            }
            Self::Playlists { ids } => (
                "playlists",
                vec![
                    ("part", "snippet,contentDetails,status".to_string()),
                    ("id", ids.join(",")),
                    ("maxResults", max),
                ],
            ),
            Self::PlaylistItems {
                playlist_id,
                page_token,
            } => {
                let mut params = vec![
                    ("part", "snippet,contentDetails".to_string()),
                    ("maxResults", max),
                    ("playlistId", playlist_id.clone()),
                ];
                if let Some(token) = page_token {
                    params.push(("pageToken", token.clone()));
                }
                ("playlistItems", params)
            }
        }
    }
}

/// One page of raw items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPage {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub page_info: Option<PageInfo>,
}

impl ApiPage {
    pub fn total_results(&self) -> Option<u64> {
        self.page_info.as_ref().and_then(|p| p.total_results)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total_results: Option<u64>,
    pub results_per_page: Option<u64>,
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnails {
    #[serde(default)]
    pub default: Option<Thumbnail>,
    #[serde(default)]
    pub medium: Option<Thumbnail>,
    #[serde(default)]
    pub high: Option<Thumbnail>,
    #[serde(default)]
    pub standard: Option<Thumbnail>,
    #[serde(default)]
    pub maxres: Option<Thumbnail>,
}

impl Thumbnails {
    /// Largest available thumbnail URL
    pub fn best(&self) -> Option<String> {
        [
            &self.maxres,
            &self.standard,
            &self.high,
            &self.medium,
            &self.default,
        ]
        .into_iter()
        .flatten()
        .map(|t| t.url.clone())
        .find(|u| !u.is_empty())
    }
}

/// Search hit (`search.list` item)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: SearchId,
    #[serde(default)]
    pub snippet: Option<SearchSnippet>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchId {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub playlist_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel_title: String,
}

/// Playlist resource (`playlists.list` item)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistResource {
    pub id: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub snippet: PlaylistSnippet,
    #[serde(default)]
    pub content_details: PlaylistContentDetails,
    #[serde(default)]
    pub status: PlaylistStatus,
}

impl PlaylistResource {
    /// Public and non-empty: eligible for the canonical table
    pub fn is_valid(&self) -> bool {
        self.status.privacy_status == "public" && self.content_details.item_count > 0
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_title: String,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistContentDetails {
    #[serde(default)]
    pub item_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistStatus {
    #[serde(default)]
    pub privacy_status: String,
}

/// Playlist member (`playlistItems.list` item)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemResource {
    #[serde(default)]
    pub snippet: PlaylistItemSnippet,
    #[serde(default)]
    pub content_details: Option<PlaylistItemContentDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    #[serde(default)]
    pub video_owner_channel_title: Option<String>,
    #[serde(default)]
    pub video_owner_channel_id: Option<String>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemContentDetails {
    #[serde(default)]
    pub video_id: Option<String>,
}

impl PlaylistItemResource {
    pub fn video_id(&self) -> Option<&str> {
        self.content_details
            .as_ref()
            .and_then(|c| c.video_id.as_deref())
            .or_else(|| {
                self.snippet
                    .resource_id
                    .as_ref()
                    .and_then(|r| r.video_id.as_deref())
            })
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_query_omits_global_region() {
        let req = ApiRequest::Search {
            query: "chill jazz playlist".into(),
            region: None,
            language: None,
            page_token: None,
        };
        let (path, params) = req.to_query();
        assert_eq!(path, "search");
        assert!(params.iter().all(|(k, _)| *k != "regionCode"));
        assert!(params.contains(&("type", "playlist".to_string())));
    }

    #[test]
    fn test_with_page_token() {
        let req = ApiRequest::PlaylistItems {
            playlist_id: "PL1".into(),
            page_token: None,
        };
        let next = req.with_page_token(Some("tok".into()));
        let (_, params) = next.to_query();
        assert!(params.contains(&("pageToken", "tok".to_string())));
        assert_eq!(next.operation(), ApiOperation::ListPlaylistItems);
    }

    #[test]
    fn test_best_thumbnail() {
        let thumbs: Thumbnails = serde_json::from_value(json!({
            "default": {"url": "d"},
            "high": {"url": "h"}
        }))
        .unwrap();
        assert_eq!(thumbs.best().as_deref(), Some("h"));
        assert_eq!(Thumbnails::default().best(), None);
    }

    #[test]
    fn test_playlist_validity() {
        let valid: PlaylistResource = serde_json::from_value(json!({
            "id": "PL1",
            "status": {"privacyStatus": "public"},
            "contentDetails": {"itemCount": 3}
        }))
        .unwrap();
        assert!(valid.is_valid());

        let empty: PlaylistResource = serde_json::from_value(json!({
            "id": "PL2",
            "status": {"privacyStatus": "public"},
            "contentDetails": {"itemCount": 0}
        }))
        .unwrap();
        assert!(!empty.is_valid());
    }

    #[test]
    fn test_item_video_id_fallback() {
        let item: PlaylistItemResource = serde_json::from_value(json!({
            "snippet": {"title": "t", "resourceId": {"videoId": "v1"}}
        }))
        .unwrap();
        assert_eq!(item.video_id(), Some("v1"));
    }
}
