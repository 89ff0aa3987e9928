//! Image fetching, decoding and the in-memory image cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressEmitter, ProgressEventKind};
use crate::types::{EngineResult, ExtractionError, RankedImageSet};

/// Raw response of an image GET.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub status: u16,
    pub bytes: Vec<u8>,
}

/// Network seam for image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> EngineResult<FetchedBytes>;
}

/// `reqwest`-backed fetcher with cache-bypass headers.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for CDNs that reject HTTP/2.
    h1_client: reqwest::Client,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self { client, h1_client }
    }

    async fn get_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchedBytes, reqwest::Error> {
        let resp = client
            .get(url)
            .timeout(timeout)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .send()
            .await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?.to_vec();
        Ok(FetchedBytes { status, bytes })
    }
}

#[async_trait]
impl ImageFetcher for HttpClient {
    async fn get(&self, url: &str, timeout: Duration) -> EngineResult<FetchedBytes> {
        let result = match self.get_inner(&self.client, url, timeout).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.get_inner(&self.h1_client, url, timeout).await
                } else {
                    Err(e)
                }
            }
        };
        result.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Timeout(timeout)
            } else {
                ExtractionError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }
}

/// A fetched and decoded page image.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Original encoded bytes.
    pub bytes: Vec<u8>,
    pub image: DynamicImage,
}

/// Append-only URL → image map shared by all attempts of one target.
#[derive(Clone, Default)]
pub struct ImageCache {
    inner: Arc<RwLock<HashMap<String, Arc<DecodedImage>>>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<Arc<DecodedImage>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
    }

    /// Insert unless the URL is already cached. Returns the cached entry.
    pub fn insert(&self, image: DecodedImage) -> Arc<DecodedImage> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.entry(image.url.clone())
            .or_insert_with(|| Arc::new(image))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Only called when the pipeline moves to a new target.
    pub fn reset(&self) {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Decode `bytes` into an image, trusting the declared MIME type if known.
pub fn decode_image(url: &str, bytes: Vec<u8>, mime: Option<&str>) -> Option<DecodedImage> {
    let format = match mime {
        Some("image/png") => Some(ImageFormat::Png),
        Some("image/jpeg") | Some("image/jpg") => Some(ImageFormat::Jpeg),
        Some("image/webp") => Some(ImageFormat::WebP),
        Some("image/gif") => Some(ImageFormat::Gif),
        _ => None,
    };
    let decoded = match format {
        Some(fmt) => image::load_from_memory_with_format(&bytes, fmt),
        None => image::load_from_memory(&bytes),
    };
    match decoded {
        Ok(img) => {
            let (width, height) = img.dimensions();
            Some(DecodedImage {
                url: url.to_string(),
                width,
                height,
                bytes,
                image: img,
            })
        }
        Err(e) => {
            tracing::warn!("Failed to decode {}: {}", url, e);
            None
        }
    }
}

/// Split a `data:<mime>;base64,<payload>` URL.
pub fn parse_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    use base64::Engine;
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    Some((mime.to_ascii_lowercase(), bytes))
}

/// Result of downloading one ranked set.
#[derive(Debug, Clone, Default)]
pub struct DownloadOutcome {
    /// Decoded images in ranked order.
    pub images: Vec<Arc<DecodedImage>>,
    /// `(url, reason)` for every candidate not kept.
    pub skipped: Vec<(String, String)>,
    pub cancelled: bool,
}

/// Sequential downloader over a ranked set.
pub struct Downloader<'a> {
    pub fetcher: &'a dyn ImageFetcher,
    pub cache: &'a ImageCache,
    pub timeout: Duration,
    pub logo_max_width: u32,
    pub logo_max_height: u32,
}

impl Downloader<'_> {
    /// Whether a decoded size is small enough to be a logo.
    pub fn is_logo(&self, width: u32, height: u32) -> bool {
        width <= self.logo_max_width && height <= self.logo_max_height
    }

    /// Fetch and decode each image in order.
    ///
    /// Cancellation is checked before and after every item and keeps what
    /// was already decoded. Fails only when nothing decodes.
    pub async fn download_all(
        &self,
        ranked: &RankedImageSet,
        token: &CancellationToken,
        progress: &ProgressEmitter,
    ) -> EngineResult<DownloadOutcome> {
        let mut outcome = DownloadOutcome::default();
        let mut last_error: Option<ExtractionError> = None;

        for candidate in ranked.iter() {
            if token.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let url = candidate.url.as_str();
            let (entry, cached) = match self.cache.get(url) {
                Some(hit) => (Some(hit), true),
                None => match self.fetch_and_decode(url).await {
                    Ok(Some(decoded)) => (Some(self.cache.insert(decoded)), false),
                    Ok(None) => (None, false),
                    Err(e) => {
                        tracing::warn!("Download failed for {}: {}", url, e);
                        outcome.skipped.push((url.to_string(), e.to_string()));
                        progress.emit(ProgressEventKind::ImageSkipped {
                            url: url.to_string(),
                            reason: e.to_string(),
                        });
                        last_error = Some(e);
                        (None, false)
                    }
                },
            };

            if let Some(img) = entry {
                if self.is_logo(img.width, img.height) {
                    tracing::debug!("Skipping {}x{} image {}", img.width, img.height, url);
                    self.skip(&mut outcome, progress, url, "logo-sized");
                } else {
                    progress.emit(ProgressEventKind::ImageDecoded {
                        url: url.to_string(),
                        width: img.width,
                        height: img.height,
                        cached,
                    });
                    outcome.images.push(img);
                }
            } else if !outcome.skipped.iter().any(|(u, _)| u == url) {
                self.skip(&mut outcome, progress, url, "undecodable");
            }

            if token.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
        }

        tracing::info!(
            "Downloaded {} of {} images ({} skipped{})",
            outcome.images.len(),
            ranked.len(),
            outcome.skipped.len(),
            if outcome.cancelled { ", cancelled" } else { "" }
        );

        if outcome.images.is_empty() {
            return Err(if outcome.cancelled {
                ExtractionError::Cancelled
            } else {
                last_error.unwrap_or(ExtractionError::NoResultsFound)
            });
        }
        Ok(outcome)
    }

    fn skip(
        &self,
        outcome: &mut DownloadOutcome,
        progress: &ProgressEmitter,
        url: &str,
        reason: &str,
    ) {
        outcome.skipped.push((url.to_string(), reason.to_string()));
        progress.emit(ProgressEventKind::ImageSkipped {
            url: url.to_string(),
            reason: reason.to_string(),
        });
    }

    async fn fetch_and_decode(&self, url: &str) -> EngineResult<Option<DecodedImage>> {
        if url.starts_with("data:") {
            return Ok(parse_data_url(url)
                .and_then(|(mime, bytes)| decode_image(url, bytes, Some(mime.as_str()))));
        }
        let resp = self.fetcher.get(url, self.timeout).await?;
        if !(200..300).contains(&resp.status) {
            return Err(ExtractionError::Network {
                url: url.to_string(),
                message: format!("HTTP {}", resp.status),
            });
        }
        Ok(decode_image(url, resp.bytes, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PageImageCandidate, StrategyId};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Serves PNGs whose size is encoded in the URL: `.../WxH.png`.
    struct SizedFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageFetcher for SizedFetcher {
        async fn get(&self, url: &str, _timeout: Duration) -> EngineResult<FetchedBytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = url.rsplit('/').next().unwrap().trim_end_matches(".png");
            if name == "missing" {
                return Ok(FetchedBytes {
                    status: 404,
                    bytes: Vec::new(),
                });
            }
            let (w, h) = name.split_once('x').unwrap();
            Ok(FetchedBytes {
                status: 200,
                bytes: png(w.parse().unwrap(), h.parse().unwrap()),
            })
        }
    }

    fn ranked(urls: &[&str]) -> RankedImageSet {
        RankedImageSet {
            images: urls
                .iter()
                .enumerate()
                .map(|(i, u)| PageImageCandidate {
                    url: u.to_string(),
                    width: 0.0,
                    height: 0.0,
                    dom_position: i as f64,
                    source_strategy: StrategyId::DomDirect,
                })
                .collect(),
        }
    }

    fn downloader<'a>(fetcher: &'a SizedFetcher, cache: &'a ImageCache) -> Downloader<'a> {
        Downloader {
            fetcher,
            cache,
            timeout: Duration::from_secs(5),
            logo_max_width: 79,
            logo_max_height: 97,
        }
    }

    #[tokio::test]
    async fn test_logo_sized_images_excluded() {
        let fetcher = SizedFetcher {
            calls: AtomicUsize::new(0),
        };
        let cache = ImageCache::new();
        let set = ranked(&[
            "https://cdn.test/79x97.png",
            "https://cdn.test/80x97.png",
            "https://cdn.test/missing.png",
            "https://cdn.test/800x1200.png",
        ]);
        let out = downloader(&fetcher, &cache)
            .download_all(&set, &CancellationToken::new(), &ProgressEmitter::silent())
            .await
            .unwrap();
        let sizes: Vec<_> = out.images.iter().map(|i| (i.width, i.height)).collect();
        assert_eq!(sizes, vec![(80, 97), (800, 1200)]);
        assert_eq!(out.skipped.len(), 2);
        assert!(!out.cancelled);
    }

    #[tokio::test]
    async fn test_cache_hits_skip_network() {
        let fetcher = SizedFetcher {
            calls: AtomicUsize::new(0),
        };
        let cache = ImageCache::new();
        let set = ranked(&["https://cdn.test/300x400.png"]);
        let dl = downloader(&fetcher, &cache);
        let token = CancellationToken::new();
        dl.download_all(&set, &token, &ProgressEmitter::silent())
            .await
            .unwrap();
        dl.download_all(&set, &token, &ProgressEmitter::silent())
            .await
            .unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        cache.reset();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_data_url_decoded_inline() {
        use base64::Engine;
        let fetcher = SizedFetcher {
            calls: AtomicUsize::new(0),
        };
        let cache = ImageCache::new();
        let data = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png(200, 300))
        );
        let out = downloader(&fetcher, &cache)
            .download_all(
                &ranked(&[data.as_str()]),
                &CancellationToken::new(),
                &ProgressEmitter::silent(),
            )
            .await
            .unwrap();
        assert_eq!(out.images[0].width, 200);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nothing_decoded_is_error() {
        let fetcher = SizedFetcher {
            calls: AtomicUsize::new(0),
        };
        let cache = ImageCache::new();
        let err = downloader(&fetcher, &cache)
            .download_all(
                &ranked(&["https://cdn.test/10x10.png"]),
                &CancellationToken::new(),
                &ProgressEmitter::silent(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NoResultsFound));

        let token = CancellationToken::new();
        token.cancel();
        let err = downloader(&fetcher, &cache)
            .download_all(
                &ranked(&["https://cdn.test/500x500.png"]),
                &token,
                &ProgressEmitter::silent(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Cancelled));
    }

    #[test]
    fn test_parse_data_url() {
        let (mime, bytes) = parse_data_url("data:image/gif;base64,R0lGODlh").unwrap();
        assert_eq!(mime, "image/gif");
        assert_eq!(&bytes[..3], b"GIF");
        assert!(parse_data_url("data:text/plain,hello").is_none());
    }
}
