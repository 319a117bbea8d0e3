//! Engine configuration with TOML + environment layering.
//!
//! The wish list drives prompt assembly: each named content source
//! carries an enabled flag, a priority (higher = allocated first, ties
//! broken by insertion order), a `max_percent` cap over the remaining
//! budget, and source-specific extended options. Priorities are only
//! compared relative to each other within one request.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Static, process-wide engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Full prompt-engineering pipeline on/off. When off, the lightweight
    /// line-based processor caps prefix/suffix instead. Live-reloadable
    /// through the orchestrator's update channel.
    pub prompt_engineering: bool,

    /// Shared token budget for the assembled prompt (prefix + suffix).
    pub max_prompt_tokens: usize,

    /// Wall-clock budget for context collection, in milliseconds.
    pub max_time_ms: u64,

    /// Tokenizer model or encoding name.
    pub tokenizer: String,

    /// Request-cache master switch, checked on every call.
    pub cache_enabled: bool,

    /// Delay before an automatic (as-you-type) trigger is honored.
    pub debounce_ms: u64,

    /// Weighted content sources feeding the budget allocator.
    pub wish_list: WishList,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prompt_engineering: true,
            max_prompt_tokens: 2048,
            max_time_ms: 1000,
            tokenizer: "cl100k_base".to_string(),
            cache_enabled: true,
            debounce_ms: 300,
            wish_list: WishList::default(),
        }
    }
}

/// The fixed set of named content sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WishList {
    pub before_cursor: WishItem,
    pub after_cursor: WishItem,
    pub imported_file: WishItem,
    pub language_marker: WishItem,
    pub path_marker: WishItem,
    pub similar_file: WishItem,
}

impl Default for WishList {
    fn default() -> Self {
        Self {
            before_cursor: WishItem::new(true, 90, 0.9),
            after_cursor: WishItem::new(true, 80, 1.0),
            similar_file: WishItem::new(true, 75, 0.6),
            imported_file: WishItem::new(true, 70, 0.5),
            path_marker: WishItem::new(true, 40, 0.1),
            language_marker: WishItem::new(true, 30, 0.1),
        }
    }
}

/// One weighted wish-list entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WishItem {
    /// Whether this source participates at all.
    pub enabled: bool,

    /// Allocation priority; higher values are granted budget first.
    pub priority: u32,

    /// Cap as a share of the budget still unallocated when this item is
    /// reached, applied only when the item does not fit whole.
    pub max_percent: f64,

    /// Source-specific extended options.
    pub options: WishOptions,
}

impl WishItem {
    fn new(enabled: bool, priority: u32, max_percent: f64) -> Self {
        Self {
            enabled,
            priority,
            max_percent,
            options: WishOptions::default(),
        }
    }
}

impl Default for WishItem {
    fn default() -> Self {
        Self::new(true, 50, 0.5)
    }
}

/// Extended options; each field is read only by the sources it concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WishOptions {
    /// Share of `max_prompt_tokens` reserved for the suffix
    /// (`after_cursor` only).
    pub suffix_percent: f64,

    /// Smallest syntactic block the cropper may leave behind
    /// (block-based cropping only).
    pub min_block_size: usize,

    /// Minimum Jaccard score a snippet must exceed to be kept
    /// (`similar_file` only).
    pub similarity_threshold: f64,

    /// Line-window size for the similarity matcher.
    pub window_size: usize,

    /// Maximum snippets kept across all neighbor documents.
    pub snippet_max_num: usize,

    /// Maximum neighbor documents consulted.
    pub neighboring_tabs_max_num: usize,

    /// Wall-clock budget for this source's collection phase, ms.
    pub max_time_ms: u64,

    /// Text placed before a retrieved snippet's source path marker.
    pub pattern_prefix: String,

    /// Text placed after a retrieved snippet's source path marker.
    pub pattern_suffix: String,
}

impl Default for WishOptions {
    fn default() -> Self {
        Self {
            suffix_percent: 0.15,
            min_block_size: 25,
            similarity_threshold: 0.0,
            window_size: 60,
            snippet_max_num: 4,
            neighboring_tabs_max_num: 20,
            max_time_ms: 200,
            pattern_prefix: "Compare this snippet from ".to_string(),
            pattern_suffix: ":".to_string(),
        }
    }
}

/// Load configuration by layering `prefill.toml` (when present) and
/// `PREFILL_`-prefixed environment variables over the defaults.
pub fn load_config() -> Result<EngineConfig> {
    let mut builder = config::Config::builder();

    let config_paths = ["prefill.toml", ".prefill.toml"];

    for path in &config_paths {
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // Environment wins over file values.
    builder = builder.add_source(config::Environment::with_prefix("PREFILL").separator("__"));

    let cfg = builder.build().context("Failed to load configuration")?;

    let parsed: EngineConfig = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}
