//! Common test utilities
//!
//! [`FakeApi`] is a scripted, in-process video API: playlists, their items
//! and search hits are registered up front, keys can be marked out of quota,
//! and every request is recorded.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use playlist_harvester::api::{
    ApiError, ApiPage, ApiRequest, ApiResult, PagingClient, PagingSettings, VideoApi,
};
use playlist_harvester::credentials::{ApiOperation, CredentialPool, PoolSettings, QuotaCostTable};
use playlist_harvester::pipeline::{Pipeline, PipelineSettings, RegionTask};
use playlist_harvester::scheduler::Mode;
use playlist_harvester::storage::{SharedStore, SqliteStore};
use playlist_harvester::utils::retry::RetryConfig;

// ============================================================================
// Fake API
// ============================================================================

#[derive(Default)]
struct FakeState {
    search_hits: Vec<String>,
    playlists: HashMap<String, Value>,
    items: HashMap<String, Vec<Value>>,
    exhausted_keys: HashSet<String>,
    failing_items: HashSet<String>,
    calls: Vec<(String, ApiRequest)>,
}

pub struct FakeApi {
    state: Mutex<FakeState>,
    /// Searches in these region codes stall before answering
    search_delays: Mutex<HashMap<String, Duration>>,
    panic_on_search: AtomicBool,
    page_size: usize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::with_page_size(2)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            search_delays: Mutex::new(HashMap::new()),
            panic_on_search: AtomicBool::new(false),
            page_size: page_size.max(1),
        }
    }

    /// Playlist ids returned by every search
    pub fn set_search_hits(&self, ids: &[&str]) {
        self.state.lock().unwrap().search_hits = ids.iter().map(|s| s.to_string()).collect();
    }

    /// Register a playlist with one item per track id
    pub fn add_playlist(&self, id: &str, etag: &str, privacy: &str, tracks: &[&str]) {
        let items = tracks
            .iter()
            .enumerate()
            .map(|(i, t)| item_json(t, i as u32, "Artist - Topic"))
            .collect::<Vec<_>>();

        let mut state = self.state.lock().unwrap();
        state
            .playlists
            .insert(id.to_string(), playlist_json(id, etag, privacy, tracks.len() as u64));
        state.items.insert(id.to_string(), items);
    }

    /// Every call made with `key` fails with a quota error
    pub fn exhaust_key(&self, key: &str) {
        self.state.lock().unwrap().exhausted_keys.insert(key.to_string());
    }

    /// Item listing of `playlist_id` fails permanently
    pub fn fail_items(&self, playlist_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_items
            .insert(playlist_id.to_string());
    }

    /// Searches for `region` sleep `delay` before answering
    pub fn delay_region(&self, region: &str, delay: Duration) {
        self.search_delays
            .lock()
            .unwrap()
            .insert(region.to_string(), delay);
    }

    pub fn clear_delays(&self) {
        self.search_delays.lock().unwrap().clear();
    }

    /// Every search panics inside the API call
    pub fn panic_on_search(&self) {
        self.panic_on_search.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, ApiRequest)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: ApiOperation) -> usize {
        self.calls()
            .iter()
            .filter(|(_, r)| r.operation() == op)
            .count()
    }

    /// Item page requests for one playlist
    pub fn item_calls(&self, playlist_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(_, r)| {
                matches!(r, ApiRequest::PlaylistItems { playlist_id: p, .. } if p == playlist_id)
            })
            .count()
    }
}

#[async_trait]
impl VideoApi for FakeApi {
    async fn fetch(&self, key: &str, request: &ApiRequest) -> ApiResult<ApiPage> {
        if let ApiRequest::Search { region, .. } = request {
            if self.panic_on_search.load(Ordering::SeqCst) {
                panic!("search backend crashed");
            }
            let delay = region
                .as_deref()
                .and_then(|r| self.search_delays.lock().unwrap().get(r).copied());
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push((key.to_string(), request.clone()));

        if state.exhausted_keys.contains(key) {
            return Err(ApiError::QuotaExceeded {
                reason: "quotaExceeded".to_string(),
            });
        }

        match request {
            ApiRequest::Search { .. } => Ok(ApiPage {
                items: state
                    .search_hits
                    .iter()
                    .map(|id| {
                        json!({
                            "id": {"kind": "youtube#playlist", "playlistId": id},
                            "snippet": {"title": format!("title {id}"), "channelTitle": "chan"}
                        })
                    })
                    .collect(),
                ..Default::default()
            }),
            ApiRequest::Playlists { ids } => Ok(ApiPage {
                items: ids
                    .iter()
                    .filter_map(|id| state.playlists.get(id).cloned())
                    .collect(),
                ..Default::default()
            }),
            ApiRequest::PlaylistItems {
                playlist_id,
                page_token,
            } => {
                if state.failing_items.contains(playlist_id) {
                    return Err(ApiError::Permanent {
                        status: 404,
                        message: "playlistNotFound".to_string(),
                    });
                }

                let all = state.items.get(playlist_id).cloned().unwrap_or_default();
                let page: usize = page_token
                    .as_deref()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(0);
                let start = (page * self.page_size).min(all.len());
                let end = (start + self.page_size).min(all.len());

                Ok(ApiPage {
                    items: all[start..end].to_vec(),
                    next_page_token: (end < all.len()).then(|| (page + 1).to_string()),
                    page_info: None,
                })
            }
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn playlist_json(id: &str, etag: &str, privacy: &str, item_count: u64) -> Value {
    json!({
        "id": id,
        "etag": etag,
        "snippet": {
            "title": format!("Playlist {id}"),
            "description": "fixture",
            "channelId": "UC1",
            "channelTitle": "Fixture Channel",
            "thumbnails": {"high": {"url": format!("http://img/{id}")}}
        },
        "contentDetails": {"itemCount": item_count},
        "status": {"privacyStatus": privacy}
    })
}

pub fn item_json(video_id: &str, position: u32, owner: &str) -> Value {
    json!({
        "snippet": {
            "title": format!("Track {video_id}"),
            "position": position,
            "videoOwnerChannelTitle": owner,
            "resourceId": {"videoId": video_id},
            "thumbnails": {"default": {"url": format!("http://img/{video_id}")}}
        },
        "contentDetails": {"videoId": video_id}
    })
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn cycle_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

pub fn task(region: &str, mode: Mode) -> RegionTask {
    RegionTask {
        region: region.to_string(),
        position: 0,
        mode,
        cycle_start: cycle_start(),
        day: 1,
        hour: 0,
    }
}

/// Pool settings without waits
pub fn pool_settings(daily_limit: u64) -> PoolSettings {
    PoolSettings {
        daily_limit,
        min_gap: Duration::ZERO,
        exhausted_wait: Duration::from_millis(1),
        max_consecutive_uses: 0,
        ..Default::default()
    }
}

/// Paging settings without delays, accepting any search yield
pub fn paging_settings() -> PagingSettings {
    PagingSettings {
        retry: RetryConfig::with_delays(1, 1, 5),
        page_delay: Duration::ZERO,
        max_item_pages: 20,
        max_search_pages: 1,
        min_search_results: 1,
    }
}

pub fn pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        min_cached_candidates: 1,
        queries_per_region: 2,
        batch_size: 3,
        ..PipelineSettings::default()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub store: SharedStore,
    pub pool: Arc<CredentialPool>,
    pub pipeline: Arc<Pipeline>,
}

pub fn harness(api: FakeApi) -> Harness {
    harness_with(api, &["key-a", "key-b"], 10_000, pipeline_settings())
}

pub fn harness_with(
    api: FakeApi,
    keys: &[&str],
    daily_limit: u64,
    settings: PipelineSettings,
) -> Harness {
    let api = Arc::new(api);
    let store: SharedStore = Arc::new(SqliteStore::in_memory().unwrap());
    let pool = Arc::new(
        CredentialPool::new(
            keys.iter().map(|k| k.to_string()),
            QuotaCostTable::default(),
            pool_settings(daily_limit),
        )
        .unwrap(),
    );
    let client = Arc::new(PagingClient::new(api.clone(), pool.clone(), paging_settings()));
    let pipeline = Arc::new(Pipeline::new(client, store.clone(), settings));

    Harness {
        api,
        store,
        pool,
        pipeline,
    }
}
