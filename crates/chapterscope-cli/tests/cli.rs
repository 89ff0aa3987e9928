//! Integration tests for the CLI support library.

use std::io::Cursor;
use std::sync::Arc;

use chapterscope::{DecodedImage, EngineConfig, PagePipeline};
use chapterscope_cli::{export, host, load_config, resolve_config_path};

// ─────────────────────── helpers ───────────────────────

fn png_image(url: &str, width: u32, height: u32) -> Arc<DecodedImage> {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    Arc::new(DecodedImage {
        url: url.to_string(),
        width,
        height,
        bytes,
        image,
    })
}

// ─────────────────────── config ───────────────────────

#[test]
fn test_explicit_config_wins() {
    let resolved = resolve_config_path(Some("/tmp/custom.json"));
    assert_eq!(resolved.unwrap().to_str(), Some("/tmp/custom.json"));
}

#[test]
fn test_load_config_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "max_walk_pages": 12 }"#).unwrap();

    let config = load_config(path.to_str()).unwrap();
    assert_eq!(config.max_walk_pages, 12);
    assert_eq!(config.escalation_threshold, 13);
}

#[test]
fn test_load_config_reports_bad_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = load_config(path.to_str()).unwrap_err();
    assert!(format!("{err:#}").contains("broken.json"));
}

// ─────────────────────── hosts ───────────────────────

#[test]
fn test_remote_detection() {
    assert!(host::is_remote("https://reader.test/title"));
    assert!(host::is_remote("http://reader.test/title"));
    assert!(!host::is_remote("./saved/title.html"));
}

#[tokio::test]
async fn test_local_file_with_base_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("title.html");
    std::fs::write(
        &path,
        r#"<html><body>
            <a href="/manga/night-owl/chapter-1">Chapter 1</a>
            <a href="/manga/night-owl/chapter-2">Chapter 2</a>
        </body></html>"#,
    )
    .unwrap();

    let config = EngineConfig::default();
    let doc = host::open(
        path.to_str().unwrap(),
        Some("https://reader.test/manga/night-owl"),
        false,
        &config,
    )
    .await
    .unwrap();

    let chapters = PagePipeline::new(config).discover_chapters(doc.as_ref()).await;
    let urls: Vec<&str> = chapters.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://reader.test/manga/night-owl/chapter-1",
            "https://reader.test/manga/night-owl/chapter-2",
        ]
    );
}

#[tokio::test]
async fn test_render_requires_url() {
    let err = host::open("title.html", None, true, &EngineConfig::default())
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("--render"));
}

// ─────────────────────── export ───────────────────────

#[test]
fn test_save_images_in_reading_order() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("ch-1");
    let images = vec![
        png_image("https://cdn.test/1.png", 400, 600),
        png_image("https://cdn.test/2.png", 400, 600),
    ];

    let saved = export::save_images(&out, &images).unwrap();
    let names: Vec<String> = saved
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["001.png", "002.png"]);
    assert_eq!(std::fs::read(&saved[0]).unwrap(), images[0].bytes);
}

#[test]
fn test_extension_for_unknown_bytes() {
    assert_eq!(export::extension_for(b"plain text"), "bin");
}
