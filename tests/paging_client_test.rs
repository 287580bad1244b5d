//! Integration tests for the paging client over HTTP using wiremock
//!
//! These tests drive the real reqwest transport against a mock API root.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{paging_settings, pool_settings};
use playlist_harvester::api::{ApiError, ApiRequest, HttpVideoApi, PagingClient, PagingSettings};
use playlist_harvester::credentials::{ApiOperation, CredentialPool, QuotaCostTable, TickBudget};

fn client(server: &MockServer, keys: &[&str], settings: PagingSettings) -> PagingClient {
    let api = HttpVideoApi::with_base_url(&server.uri(), 100, Duration::from_secs(5)).unwrap();
    let pool = CredentialPool::new(
        keys.iter().map(|k| k.to_string()),
        QuotaCostTable::default(),
        pool_settings(10_000),
    )
    .unwrap();
    PagingClient::new(Arc::new(api), Arc::new(pool), settings)
}

fn search_body(ids: &[&str]) -> serde_json::Value {
    json!({
        "items": ids.iter().map(|id| json!({
            "id": {"kind": "youtube#playlist", "playlistId": id},
            "snippet": {"title": format!("title {id}"), "channelTitle": "chan"}
        })).collect::<Vec<_>>(),
        "pageInfo": {"totalResults": ids.len(), "resultsPerPage": 50}
    })
}

fn quota_body(reason: &str) -> serde_json::Value {
    json!({
        "error": {
            "code": 403,
            "message": "The request cannot be completed because you have exceeded your quota.",
            "errors": [{"reason": reason, "domain": "youtube.quota"}]
        }
    })
}

/// Search sends the playlist filter, region and key
#[tokio::test]
async fn test_search_request_parameters() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("type", "playlist"))
        .and(query_param("part", "snippet"))
        .and(query_param("q", "lofi jazz"))
        .and(query_param("regionCode", "DE"))
        .and(query_param("relevanceLanguage", "de"))
        .and(query_param("key", "key-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["PL1", "PL2"])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a"], paging_settings());
    let budget = TickBudget::unlimited();
    let hits = client
        .search_playlists("Lofi  Jazz!", Some("DE"), Some("de"), &budget)
        .await
        .unwrap();

    let ids: Vec<&str> = hits.iter().map(|h| h.playlist_id.as_str()).collect();
    assert_eq!(ids, vec!["PL1", "PL2"]);
    assert_eq!(hits[0].channel_title, "chan");
    assert_eq!(budget.spent(), 100);
}

/// A search below the yield threshold returns nothing but still costs
#[tokio::test]
async fn test_low_yield_search_discarded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["PL1", "PL2"])))
        .mount(&mock_server)
        .await;

    let settings = PagingSettings {
        min_search_results: 10,
        ..paging_settings()
    };
    let client = client(&mock_server, &["key-a"], settings);
    let budget = TickBudget::unlimited();
    let hits = client
        .search_playlists("lofi", None, None, &budget)
        .await
        .unwrap();

    assert!(hits.is_empty());
    assert_eq!(budget.spent(), 100);
    assert_eq!(client.pool().snapshot()[0].used_units, 100);
}

/// A quota failure cools the key down and the call moves to the next key
#[tokio::test]
async fn test_quota_failure_rotates_credential() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("key", "key-a"))
        .respond_with(ResponseTemplate::new(403).set_body_json(quota_body("quotaExceeded")))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("key", "key-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["PL1"])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a", "key-b"], paging_settings());
    let budget = TickBudget::unlimited();

    let hits = client
        .search_playlists("lofi", None, None, &budget)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(client.pool().cooling_count(), 1);

    // The cooling key is passed over on the next call.
    client
        .search_playlists("jazz", None, None, &budget)
        .await
        .unwrap();

    let snapshot = client.pool().snapshot();
    assert!(snapshot[0].cooling_until.is_some());
    assert_eq!(snapshot[0].quota_failures, 1);
    assert_eq!(snapshot[0].used_units, 0);
    assert_eq!(snapshot[1].used_units, 200);
}

/// Refused attempts do not eat into the tick budget
#[tokio::test]
async fn test_quota_rotation_keeps_tick_budget() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("key", "key-a"))
        .respond_with(ResponseTemplate::new(403).set_body_json(quota_body("quotaExceeded")))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("key", "key-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["PL1"])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a", "key-b"], paging_settings());
    // Room for exactly one search.
    let budget = TickBudget::new(150);

    let hits = client
        .search_playlists("lofi", None, None, &budget)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(budget.spent(), 100);

    let snapshot = client.pool().snapshot();
    assert_eq!(snapshot[0].used_units, 0);
    assert_eq!(snapshot[1].used_units, 100);
}

/// With every key out of quota the call reports depletion
#[tokio::test]
async fn test_all_credentials_exhausted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/playlists"))
        .respond_with(ResponseTemplate::new(403).set_body_json(quota_body("dailyLimitExceeded")))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a", "key-b"], paging_settings());
    let budget = TickBudget::unlimited();
    let ids = vec!["PL1".to_string()];

    let err = client.playlist_details(&ids, &budget).await.unwrap_err();
    assert_eq!(
        err,
        ApiError::QuotaDepleted {
            operation: ApiOperation::ListPlaylists
        }
    );

    // Depleted pools fail fast without touching the network.
    let err = client.playlist_details(&ids, &budget).await.unwrap_err();
    assert!(err.is_depleted());
}

/// Server errors are retried on the same key
#[tokio::test]
async fn test_transient_error_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/playlistItems"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/playlistItems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"snippet": {"title": "t", "resourceId": {"videoId": "v1"}}}]
        })))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a"], paging_settings());
    let request = ApiRequest::PlaylistItems {
        playlist_id: "PL1".into(),
        page_token: None,
    };
    let page = client
        .call(&request, &TickBudget::unlimited())
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    let snapshot = client.pool().snapshot();
    assert_eq!(snapshot[0].failures, 1);
    assert_eq!(snapshot[0].successes, 1);
}

/// Test 404 does not retry
#[tokio::test]
async fn test_not_found_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/playlistItems"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "code": 404,
                "message": "Playlist not found",
                "errors": [{"reason": "playlistNotFound"}]
            }
        })))
        .expect(1) // Should only be called once (no retry)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a", "key-b"], paging_settings());
    let request = ApiRequest::PlaylistItems {
        playlist_id: "PL404".into(),
        page_token: None,
    };
    let err = client
        .call(&request, &TickBudget::unlimited())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::Permanent {
            status: 404,
            message: "Playlist not found".into()
        }
    );
    assert_eq!(client.pool().cooling_count(), 0);
}

/// The pager follows next-page tokens until the last page
#[tokio::test]
async fn test_pager_follows_tokens() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/playlistItems"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"snippet": {"title": "c", "resourceId": {"videoId": "v3"}}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/playlistItems"))
        .and(query_param("playlistId", "PL1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"snippet": {"title": "a", "resourceId": {"videoId": "v1"}}},
                {"snippet": {"title": "b", "resourceId": {"videoId": "v2"}}}
            ],
            "nextPageToken": "p2"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a"], paging_settings());
    let budget = TickBudget::unlimited();
    let request = ApiRequest::PlaylistItems {
        playlist_id: "PL1".into(),
        page_token: None,
    };

    let mut pager = client.pages(request, 20);
    let mut items = 0;
    while let Some(page) = pager.next_page(&budget).await.unwrap() {
        items += page.items.len();
    }

    assert_eq!(items, 3);
    assert_eq!(pager.pages_fetched(), 2);
    assert_eq!(budget.spent(), 2);
}

/// The page ceiling stops a walk even when more pages exist
#[tokio::test]
async fn test_pager_respects_page_ceiling() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/playlistItems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"snippet": {"title": "a", "resourceId": {"videoId": "v1"}}}],
            "nextPageToken": "more"
        })))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a"], paging_settings());
    let request = ApiRequest::PlaylistItems {
        playlist_id: "PL1".into(),
        page_token: None,
    };

    let items = client
        .collect(request, 3, &TickBudget::unlimited())
        .await
        .unwrap();
    assert_eq!(items.len(), 3);
}

/// A call the tick budget cannot cover is never sent
#[tokio::test]
async fn test_budget_blocks_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["PL1"])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, &["key-a"], paging_settings());
    let budget = TickBudget::new(50);
    let err = client
        .search_playlists("lofi", None, None, &budget)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::BudgetExhausted {
            cost: 100,
            remaining: 50
        }
    );
    assert_eq!(budget.spent(), 0);
    assert_eq!(client.pool().snapshot()[0].used_units, 0);
}
