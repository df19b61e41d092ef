//! Unified examdraft configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use examdraft_core::draft::DEFAULT_KEY_PREFIX;
use examdraft_core::lifecycle::LifecycleConfig;
use examdraft_grading::GradingConfig;

/// Top-level examdraft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamdraftConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub grading: GradingConfig,
}

/// The `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Questions shown per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Quiet period before a draft change is written.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    /// How often timed attempts check their limit.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Namespace for all stored keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_page_size() -> usize {
    5
}
fn default_save_debounce_ms() -> u64 {
    400
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            save_debounce_ms: default_save_debounce_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl EngineConfig {
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            page_size: self.page_size,
            save_debounce: Duration::from_millis(self.save_debounce_ms),
            // A zero interval would make the ticker spin.
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
        }
    }
}

/// Where drafts are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process memory; drafts last as long as the process.
    #[default]
    Memory,
    /// A per-session directory on disk.
    File,
}

/// The `[store]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type", default)]
    pub kind: StoreKind,
    /// Root under which file sessions are created. A temporary directory is
    /// used when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub quota_bytes: Option<u64>,
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `examdraft.toml` in the current directory
/// 2. `~/.config/examdraft/config.toml`
///
/// Environment variable overrides: `EXAMDRAFT_GRADING_KEY`, `EXAMDRAFT_STORE_DIR`.
pub fn load_config() -> Result<ExamdraftConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ExamdraftConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("examdraft.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            let config = toml::from_str::<ExamdraftConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded configuration");
            config
        }
        None => ExamdraftConfig::default(),
    };

    // Apply env var overrides
    if let Ok(key) = std::env::var("EXAMDRAFT_GRADING_KEY") {
        config.grading.api_key = key;
    }
    if let Ok(dir) = std::env::var("EXAMDRAFT_STORE_DIR") {
        config.store.kind = StoreKind::File;
        config.store.dir = Some(PathBuf::from(dir));
    }

    config.grading = config.grading.resolved();
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("examdraft"))
}
