//! Shared utility functions.

use std::sync::OnceLock;

use regex::Regex;
use tokio::task::spawn_blocking;

use crate::{Error, Result};

const MAX_SLUG_LEN: usize = 60;

pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Directory-safe slug for a project title.
///
/// Falls back to `project` when fewer than three usable characters remain.
pub fn project_slug(title: &str) -> String {
    static NON_SLUG: OnceLock<Regex> = OnceLock::new();
    let re = NON_SLUG.get_or_init(|| Regex::new(r"[^a-zA-Z0-9\-]+").expect("valid slug regex"));

    let replaced = re.replace_all(title.trim(), "-");
    let slug: String = replaced
        .trim_matches('-')
        .chars()
        .take(MAX_SLUG_LEN)
        .collect::<String>()
        .trim_end_matches('-')
        .to_lowercase();

    if slug.len() >= 3 {
        slug
    } else {
        "project".to_string()
    }
}
