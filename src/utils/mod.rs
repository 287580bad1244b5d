//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod retry;

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    re.replace_all(text.trim(), " ").to_string()
}

/// Sanitize a search query before it is sent to the video API
///
/// Lower-cases, drops everything except letters, digits, spaces, `&` and `-`,
/// and collapses whitespace.
pub fn sanitize_query(query: &str) -> String {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();

    let re = DISALLOWED
        .get_or_init(|| Regex::new(r"[^\p{L}\p{N}\s&\-]").expect("Invalid regex pattern"));

    normalize_whitespace(&re.replace_all(&query.to_lowercase(), " "))
}

/// Mask an API key for logs and status output (`AIza…9xQk`)
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// Short, stable hex digest of a list of identifiers
pub fn digest_ids(ids: &[String]) -> String {
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize()).chars().take(16).collect()
}
