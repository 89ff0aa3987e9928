//! Configuration loading and resolution.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chapterscope::EngineConfig;

/// Resolve the engine config file path.
///
/// Order: explicit flag, `CHAPTERSCOPE_CONFIG`, `./.chapterscope/config.json`,
/// then `~/.chapterscope/config.json`. Returns `None` when nothing exists.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var("CHAPTERSCOPE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(".chapterscope/config.json");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    resolve_default_config_path().filter(|p| p.exists())
}

fn resolve_default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".chapterscope").join("config.json"))
}

/// Load the effective engine config, applying environment overrides.
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<EngineConfig> {
    let path = resolve_config_path(explicit);
    if let Some(p) = &path {
        tracing::debug!("Using config {}", p.display());
    }
    EngineConfig::resolve(path.as_deref())
        .with_context(|| format!("failed to load config {}", display(path.as_deref())))
}

fn display(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string())
}
