//! Finding Discord's cache without being told where it is.
//!
//! Every Discord release channel keeps its Chromium profile under the
//! platform configuration directory (`%APPDATA%` on Windows, `~/.config` on
//! Linux, `~/Library/Application Support` on macOS). Newer builds nest the
//! HTTP cache one level deeper, in `Cache/Cache_Data`.

use directories::BaseDirs;
use std::path::{Path, PathBuf};

const CHANNELS: &[&str] = &["discord", "discordptb", "discordcanary"];

/// Directories that may hold a cache, most likely first.
pub fn candidates(config_dir: &Path) -> Vec<PathBuf> {
    CHANNELS
        .iter()
        .flat_map(|channel| {
            let cache = config_dir.join(channel).join("Cache");
            [cache.join("Cache_Data"), cache]
        })
        .collect()
}

/// The first candidate under `config_dir` holding a readable cache index.
pub fn find_in(config_dir: &Path) -> Option<PathBuf> {
    candidates(config_dir).into_iter().find(|dir| match newmonkey_diskcache::detect(dir) {
        Ok(format) => {
            tracing::debug!(path = %dir.display(), %format, "found cache");
            true
        },
        Err(_) => false,
    })
}

pub fn find_discord_cache() -> Option<PathBuf> {
    let dirs = BaseDirs::new()?;
    find_in(dirs.config_dir())
}
