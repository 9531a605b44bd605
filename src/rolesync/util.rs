use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

/// Appends percent-encoded path segments to a REST api base.
pub fn api_url(api_base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(api_base).with_context(|| format!("invalid api base {api_base}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("api base {api_base} cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
