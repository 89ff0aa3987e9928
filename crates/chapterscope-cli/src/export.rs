//! Writing decoded page images to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chapterscope::DecodedImage;

/// File extension for the encoded bytes, `bin` when unknown.
pub fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("bin")
}

/// Write `images` into `dir` as `001.jpg`, `002.png`, ... in reading order.
///
/// The original bytes are written unchanged.
pub fn save_images(dir: &Path, images: &[Arc<DecodedImage>]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    let width = images.len().to_string().len().max(3);

    images
        .iter()
        .enumerate()
        .map(|(i, img)| {
            let name = format!("{:0width$}.{}", i + 1, extension_for(&img.bytes));
            let path = dir.join(name);
            std::fs::write(&path, &img.bytes)
                .with_context(|| format!("cannot write {}", path.display()))?;
            Ok(path)
        })
        .collect()
}
