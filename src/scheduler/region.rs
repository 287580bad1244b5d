//! Region rotation
//!
//! Regions are processed in a fixed order; each tick starts just after the
//! last region it fully processed and wraps around the list.

/// Sentinel region meaning "no region filter"
pub const GLOBAL: &str = "GLOBAL";

pub fn is_global(region: &str) -> bool {
    region.eq_ignore_ascii_case(GLOBAL)
}

/// Region filter sent to the API, `None` for [`GLOBAL`]
pub fn api_region_code(region: &str) -> Option<&str> {
    (!is_global(region)).then_some(region)
}

/// Relevance language hint for markets with a dominant non-English language
pub fn relevance_language(region: &str) -> Option<&'static str> {
    let lang = match region.to_ascii_uppercase().as_str() {
        "BR" => "pt",
        "MX" | "ES" => "es",
        "DE" => "de",
        "FR" => "fr",
        "IT" => "it",
        "JP" => "ja",
        "KR" => "ko",
        "ID" => "id",
        "TR" => "tr",
        "SE" => "sv",
        _ => return None,
    };
    Some(lang)
}

/// Index of `region` in the rotation
pub fn position(regions: &[String], region: &str) -> Option<usize> {
    regions.iter().position(|r| r.eq_ignore_ascii_case(region))
}

/// The next `n` regions after `last`, wrapping around
///
/// An unknown or absent `last` starts at the first region. Never returns
/// more regions than the list holds.
pub fn next_regions(regions: &[String], last: Option<&str>, n: usize) -> Vec<String> {
    if regions.is_empty() {
        return Vec::new();
    }

    let start = last
        .and_then(|l| position(regions, l))
        .map_or(0, |i| (i + 1) % regions.len());

    regions
        .iter()
        .cycle()
        .skip(start)
        .take(n.min(regions.len()))
        .cloned()
        .collect()
}
