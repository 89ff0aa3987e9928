//! Chromium-backed document host using chromiumoxide.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chapterscope::{DocumentQuery, DomQuery, QueryError};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

/// Snapshot script shared by every `Elements` query. `__SELECTOR__` is
/// replaced with a JSON string literal.
const ELEMENTS_JS: &str = r#"(() => {
  const all = Array.from(document.getElementsByTagName('*'));
  const order = new Map(all.map((el, i) => [el, i]));
  const attrs = el => Object.fromEntries(Array.from(el.attributes).map(a => [a.name, a.value]));
  const text = el => (el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim();
  return Array.from(document.querySelectorAll(__SELECTOR__)).map(el => {
    const r = el.getBoundingClientRect();
    const ancestors = [];
    for (let p = el.parentElement; p && ancestors.length < 6; p = p.parentElement) ancestors.push(p);
    const own = text(el);
    const ctx = ancestors.map(text).find(t => t && t !== own);
    return {
      tag: el.tagName.toLowerCase(),
      text: own,
      attributes: attrs(el),
      index: order.get(el) || 0,
      rect: { top: r.top + window.scrollY, left: r.left + window.scrollX, width: r.width, height: r.height },
      natural_width: el.naturalWidth || null,
      natural_height: el.naturalHeight || null,
      ancestors: ancestors.map(a => ({ tag: a.tagName.toLowerCase(), attributes: attrs(a) })),
      context_text: ctx ? ctx.slice(0, 300) : null,
      children: Array.from(el.children).map(c => ({
        tag: c.tagName.toLowerCase(),
        text: text(c),
        hrefs: [c.getAttribute('href')]
          .concat(Array.from(c.querySelectorAll('a[href]')).map(a => a.getAttribute('href')))
          .filter(Boolean)
      }))
    };
  });
})()"#;

const CLICK_JS: &str = r#"(() => {
  const el = document.querySelectorAll(__SELECTOR__)[__INDEX__];
  if (!el) return false;
  el.scrollIntoView({ block: 'center' });
  el.click();
  return true;
})()"#;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. CHAPTERSCOPE_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("CHAPTERSCOPE_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.chapterscope/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = [
            home.join(".chapterscope/chromium/chrome-linux64/chrome"),
            home.join(".chapterscope/chromium/chrome"),
        ];
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 3. System PATH
    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|bin| which::which(bin).ok())
        .or_else(|| {
            let mac = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
            (cfg!(target_os = "macos") && mac.exists()).then_some(mac)
        })
}

/// One loaded page in a private headless browser.
pub struct ChromiumDocument {
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumDocument {
    /// Launch Chromium and load `url`, waiting up to `timeout` for navigation.
    pub async fn launch(url: &str, timeout: Duration) -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set CHAPTERSCOPE_CHROMIUM_PATH or install Chrome.")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        let start = Instant::now();
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => {
                let _ = page.wait_for_navigation().await;
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout:?}"),
        }
        tracing::info!("Loaded {} in {:?}", url, start.elapsed());

        Ok(Self {
            _browser: browser,
            page,
            handler,
        })
    }

    async fn run_script(&self, script: &str) -> Result<Value, QueryError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| QueryError::Script(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| QueryError::Script(format!("failed to convert JS result: {e:?}")))
    }
}

impl Drop for ChromiumDocument {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Script answering `query`.
pub fn script_for(query: &DomQuery) -> Result<String, QueryError> {
    Ok(match query {
        DomQuery::Url => "window.location.href".to_string(),
        DomQuery::Html => "document.documentElement.outerHTML".to_string(),
        DomQuery::Text => "document.body ? document.body.innerText : ''".to_string(),
        DomQuery::Elements { selector } => {
            ELEMENTS_JS.replace("__SELECTOR__", &serde_json::to_string(selector)?)
        }
        DomQuery::Click { selector, index } => CLICK_JS
            .replace("__SELECTOR__", &serde_json::to_string(selector)?)
            .replace("__INDEX__", &index.to_string()),
    })
}

#[async_trait]
impl DocumentQuery for ChromiumDocument {
    async fn evaluate(&self, query: &DomQuery) -> Result<Value, QueryError> {
        let script = script_for(query)?;
        self.run_script(&script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_is_quoted() {
        let script = script_for(&DomQuery::Elements {
            selector: r#"a[href*="chapter"]"#.into(),
        })
        .unwrap();
        assert!(script.contains(r#"querySelectorAll("a[href*=\"chapter\"]")"#));
        assert!(!script.contains("__SELECTOR__"));
    }

    #[test]
    fn test_click_script_indexes() {
        let script = script_for(&DomQuery::Click {
            selector: "a, button".into(),
            index: 4,
        })
        .unwrap();
        assert!(script.contains(r#"querySelectorAll("a, button")[4]"#));
    }
}
