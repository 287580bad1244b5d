//! Resumable paging client
//!
//! Wraps every external list call with credential selection, transient
//! retry and quota rotation:
//!
//! - transient failures retry on the same credential with exponential backoff
//! - quota failures cool the credential down and move to another one, at most
//!   once per credential in the pool
//! - permanent failures propagate untouched
//!
//! When every credential is cooling down or out of daily quota the call
//! fails with [`ApiError::QuotaDepleted`] instead of trying at all.

use super::client::VideoApi;
use super::error::{ApiError, ApiResult};
use super::types::{ApiPage, ApiRequest, PlaylistResource, SearchResult, MAX_PAGE_SIZE};
use crate::credentials::{Credential, CredentialPool, TickBudget};
use crate::utils::retry::{with_retry_if, RetryConfig};
use crate::utils::sanitize_query;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Paging and retry limits
#[derive(Debug, Clone)]
pub struct PagingSettings {
    pub retry: RetryConfig,
    /// Pause between consecutive pages of one listing
    pub page_delay: Duration,
    /// Page ceiling for one playlist walk
    pub max_item_pages: usize,
    /// Page ceiling for one discovery search
    pub max_search_pages: usize,
    /// Searches yielding fewer results than this are discarded
    pub min_search_results: usize,
}

impl Default for PagingSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            page_delay: Duration::from_millis(250),
            max_item_pages: 20,
            max_search_pages: 1,
            min_search_results: 10,
        }
    }
}

/// A discovery search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub playlist_id: String,
    pub title: String,
    pub channel_title: String,
}

/// Quota-aware client over a [`VideoApi`]
pub struct PagingClient {
    api: Arc<dyn VideoApi>,
    pool: Arc<CredentialPool>,
    settings: PagingSettings,
}

impl PagingClient {
    pub fn new(api: Arc<dyn VideoApi>, pool: Arc<CredentialPool>, settings: PagingSettings) -> Self {
        Self {
            api,
            pool,
            settings,
        }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn settings(&self) -> &PagingSettings {
        &self.settings
    }

    /// Issue one request, rotating credentials on quota failures
    pub async fn call(&self, request: &ApiRequest, budget: &TickBudget) -> ApiResult<ApiPage> {
        let op = request.operation();
        let cooldown = self.pool.settings().cooldown;

        for attempt in 0..self.pool.len() {
            if self.pool.is_depleted(op) {
                return Err(ApiError::QuotaDepleted { operation: op });
            }

            let credential = self.pool.select(op).await;
            let result = with_retry_if(
                &self.settings.retry,
                || self.fetch_once(&credential, request, budget),
                ApiError::is_transient,
            )
            .await;

            match result {
                Err(ApiError::QuotaExceeded { reason }) => {
                    debug!(
                        operation = %op,
                        credential = %credential,
                        attempt = attempt,
                        reason = %reason,
                        "Rotating credential after quota failure"
                    );
                    self.pool.record_quota_failure(&credential, cooldown);
                }
                other => return other,
            }
        }

        if self.pool.is_depleted(op) {
            Err(ApiError::QuotaDepleted { operation: op })
        } else {
            Err(ApiError::QuotaExceeded {
                reason: format!("{} credentials tried", self.pool.len()),
            })
        }
    }

    async fn fetch_once(
        &self,
        credential: &Credential,
        request: &ApiRequest,
        budget: &TickBudget,
    ) -> ApiResult<ApiPage> {
        let op = request.operation();
        let cost = self.pool.costs().cost(op);

        if !budget.try_reserve(cost) {
            return Err(ApiError::BudgetExhausted {
                cost,
                remaining: budget.remaining(),
            });
        }

        let result = self.api.fetch(credential.key(), request).await;

        match &result {
            Ok(_) => {
                self.pool.record_usage(credential, op, true);
                crate::metrics::record_api_call(op.as_str(), "ok");
            }
            Err(e) => {
                // A quota refusal spends nothing on either side.
                if e.is_quota_exceeded() {
                    budget.release(cost);
                } else {
                    self.pool.record_usage(credential, op, false);
                }
                crate::metrics::record_api_call(op.as_str(), e.kind());
            }
        }

        result
    }

    /// Page through a listing, one page per call
    pub fn pages(&self, request: ApiRequest, max_pages: usize) -> Pager<'_> {
        Pager {
            client: self,
            request,
            max_pages,
            fetched: 0,
            done: false,
        }
    }

    /// Collect every item of a listing up to the page ceiling
    pub async fn collect(
        &self,
        request: ApiRequest,
        max_pages: usize,
        budget: &TickBudget,
    ) -> ApiResult<Vec<Value>> {
        let mut pager = self.pages(request, max_pages);
        let mut items = Vec::new();
        while let Some(page) = pager.next_page(budget).await? {
            items.extend(page.items);
        }
        Ok(items)
    }

    /// Discovery search with the low-yield guard
    ///
    /// Returns no hits when the accumulated result count is below the
    /// configured minimum.
    pub async fn search_playlists(
        &self,
        query: &str,
        region: Option<&str>,
        language: Option<&str>,
        budget: &TickBudget,
    ) -> ApiResult<Vec<SearchHit>> {
        let query = sanitize_query(query);
        let request = ApiRequest::Search {
            query: query.clone(),
            region: region.map(str::to_string),
            language: language.map(str::to_string),
            page_token: None,
        };

        let items = self
            .collect(request, self.settings.max_search_pages, budget)
            .await?;

        if items.len() < self.settings.min_search_results {
            debug!(
                query = %query,
                results = items.len(),
                minimum = self.settings.min_search_results,
                "Discarding low-yield search"
            );
            return Ok(Vec::new());
        }

        let hits: Vec<SearchHit> = decode_items::<SearchResult>(items)
            .into_iter()
            .filter_map(|r| {
                let playlist_id = r.id.playlist_id.filter(|id| !id.is_empty())?;
                let snippet = r.snippet.unwrap_or_default();
                Some(SearchHit {
                    playlist_id,
                    title: snippet.title,
                    channel_title: snippet.channel_title,
                })
            })
            .collect();

        info!(query = %query, hits = hits.len(), "Search completed");
        Ok(hits)
    }

    /// Playlist details in chunks of [`MAX_PAGE_SIZE`] ids
    pub async fn playlist_details(
        &self,
        ids: &[String],
        budget: &TickBudget,
    ) -> ApiResult<Vec<PlaylistResource>> {
        let mut playlists = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_PAGE_SIZE) {
            let request = ApiRequest::Playlists {
                ids: chunk.to_vec(),
            };
            let page = self.call(&request, budget).await?;
            playlists.extend(decode_items::<PlaylistResource>(page.items));
        }

        Ok(playlists)
    }
}

/// Cursor over the pages of one listing
pub struct Pager<'a> {
    client: &'a PagingClient,
    request: ApiRequest,
    max_pages: usize,
    fetched: usize,
    done: bool,
}

impl Pager<'_> {
    /// Next page, or `None` past the last page or the page ceiling
    pub async fn next_page(&mut self, budget: &TickBudget) -> ApiResult<Option<ApiPage>> {
        if self.done || self.fetched >= self.max_pages {
            return Ok(None);
        }
        if self.fetched > 0 {
            tokio::time::sleep(self.client.settings.page_delay).await;
        }

        let page = self.client.call(&self.request, budget).await?;
        self.fetched += 1;

        match page.next_page_token.as_deref() {
            Some(token) if !token.is_empty() => {
                self.request = self.request.with_page_token(Some(token.to_string()));
            }
            _ => self.done = true,
        }

        Ok(Some(page))
    }

    pub fn pages_fetched(&self) -> usize {
        self.fetched
    }
}

/// Decode raw items, skipping (and logging) the ones that do not fit `T`
pub fn decode_items<T: DeserializeOwned>(items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable item");
                None
            }
        })
        .collect()
}

