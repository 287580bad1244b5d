//! Video API access
//!
//! - [`types`]: requests, pages and the resources decoded from them
//! - [`error`]: tagged failures (quota, transient, permanent, depleted)
//! - [`client`]: the [`VideoApi`] seam and its HTTP implementation
//! - [`paging`]: credential rotation, retry and page walking on top

pub mod client;
pub mod error;
pub mod paging;
pub mod types;

pub use client::{HttpVideoApi, VideoApi, DEFAULT_BASE_URL};
pub use error::{ApiError, ApiResult};
pub use paging::{decode_items, Pager, PagingClient, PagingSettings, SearchHit};
pub use types::{
    ApiPage, ApiRequest, PlaylistItemResource, PlaylistResource, Thumbnails, MAX_PAGE_SIZE,
};
