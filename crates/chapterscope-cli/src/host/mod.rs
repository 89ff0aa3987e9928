//! Document hosts: where the engine's queries get answered.
//!
//! A static host parses fetched (or local) HTML. The Chromium host drives a
//! headless browser so script-rendered readers and click pagination work.

pub mod chromium;

use std::path::Path;

use anyhow::{bail, Context, Result};
use chapterscope::{DocumentQuery, EngineConfig, HttpClient, ImageFetcher, StaticDocument};

pub use chromium::{find_chromium, ChromiumDocument};

/// Whether `target` names a remote page rather than a local file.
pub fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

/// Open `target` with the host selected by `render`.
///
/// `base_url` stands in for the document URL of local files.
pub async fn open(
    target: &str,
    base_url: Option<&str>,
    render: bool,
    config: &EngineConfig,
) -> Result<Box<dyn DocumentQuery>> {
    if render {
        if !is_remote(target) {
            bail!("--render needs an http(s) URL, got {target}");
        }
        let doc = ChromiumDocument::launch(target, config.fetch_timeout()).await?;
        return Ok(Box::new(doc));
    }
    Ok(Box::new(open_static(target, base_url, config).await?))
}

/// Fetch or read `target` into a [`StaticDocument`].
pub async fn open_static(
    target: &str,
    base_url: Option<&str>,
    config: &EngineConfig,
) -> Result<StaticDocument> {
    if is_remote(target) {
        let client = HttpClient::new(&config.user_agent);
        let resp = client
            .get(target, config.fetch_timeout())
            .await
            .with_context(|| format!("failed to fetch {target}"))?;
        if !(200..300).contains(&resp.status) {
            bail!("{target} answered HTTP {}", resp.status);
        }
        let html = String::from_utf8_lossy(&resp.bytes).into_owned();
        tracing::info!("Fetched {} ({} bytes)", target, html.len());
        let url = base_url.unwrap_or(target);
        return Ok(StaticDocument::new(url, html));
    }

    let path = Path::new(target);
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let url = match base_url {
        Some(u) => u.to_string(),
        None => {
            let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            format!("file://{}", abs.display())
        }
    };
    Ok(StaticDocument::new(url, html))
}
