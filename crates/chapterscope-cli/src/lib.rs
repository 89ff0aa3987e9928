//! Chapterscope CLI: document hosts, config resolution and image export.

pub mod config;
pub mod export;
pub mod host;

pub use config::{load_config, resolve_config_path};
pub use host::{open, open_static, ChromiumDocument};
