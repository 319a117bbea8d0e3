//! Prefix/suffix prompt assembly.
//!
//! The prefix builder gathers the five candidate content blocks
//! (language marker, path marker, imported-file declarations,
//! similar-file snippets, and the raw before-cursor text) and hands
//! them to the budget allocator with the share of the total budget not
//! reserved for the suffix. The suffix builder fits the after-cursor
//! text into its reserved share. A lightweight line-based processor
//! stands in for the whole pipeline when prompt engineering is disabled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::time::Instant;
use tracing::debug;

use crate::core::allocator::{Allocator, CommentStyle, MarkerAttr, MarkerItem, MarkerPayload};
use crate::core::crop::{CropDirection, CropPolicy, Cropper};
use crate::core::imports::extract_imported_files;
use crate::core::similar::{MatchSimilarSnippet, ResourceDocument, fixed_window_jaccard};
use crate::core::stopwords::WordFilter;
use crate::host::{CancelScope, SyntaxParser};
use crate::infra::config::EngineConfig;
use crate::infra::tokenizer::Tokenizer;

/// Line caps applied by the fallback processor when prompt engineering
/// is disabled.
pub const FALLBACK_PREFIX_MAX_LINES: usize = 1024;
pub const FALLBACK_SUFFIX_MAX_LINES: usize = 500;

/// Immutable per-request snapshot of the requesting document. Created
/// once per request and never mutated afterward.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    /// Text before the cursor (never empty; an empty prefix is coerced
    /// to a single newline upstream).
    pub prefix: String,

    /// Text after the cursor.
    pub suffix: String,

    /// Language id of the document.
    pub language: String,

    /// Workspace-relative file path.
    pub filename: String,

    /// Document URL.
    pub file_url: String,

    /// Document URI used for identity.
    pub uri: String,

    /// Workspace root, when known.
    pub workspace_root: Option<String>,
}

impl CompletionContext {
    /// Directory imports are resolved against.
    fn file_dir(&self) -> PathBuf {
        let file = match &self.workspace_root {
            Some(root) => PathBuf::from(root).join(&self.filename),
            None => PathBuf::from(&self.filename),
        };
        file.parent().map(PathBuf::from).unwrap_or_default()
    }

    /// The current file viewed as a matching reference document, cursor
    /// at the prefix/suffix boundary.
    fn as_reference(&self) -> ResourceDocument {
        ResourceDocument {
            text: format!("{}{}", self.prefix, self.suffix),
            language: self.language.clone(),
            uri: self.uri.clone(),
            offset: self.prefix.len(),
        }
    }
}

/// Static per-language file markers; anything unlisted gets a generic
/// comment fallback.
static LANGUAGE_MARKERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("python", "#!/usr/bin/env python3"),
        ("shellscript", "#!/bin/sh"),
        ("ruby", "#!/usr/bin/env ruby"),
        ("perl", "#!/usr/bin/env perl"),
        ("html", "<!DOCTYPE html>"),
        ("php", "<?php"),
    ])
});

/// Language marker line for `language`.
pub fn language_marker(language: &str) -> String {
    match LANGUAGE_MARKERS.get(language) {
        Some(marker) => (*marker).to_string(),
        None => CommentStyle::for_language(language).line(&format!("Language: {language}")),
    }
}

/// Path marker line for the requesting file.
pub fn path_marker(language: &str, filename: &str) -> String {
    CommentStyle::for_language(language).line(&format!("Path: {filename}"))
}

/// Assembled prompt halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub prefix: String,
    pub suffix: String,
}

/// Orchestrates matcher, import extraction, and budget allocation per
/// the declarative wish-list configuration.
pub struct PromptBuilder {
    config: EngineConfig,
    tokenizer: Arc<Tokenizer>,
    filter: Arc<WordFilter>,
}

impl PromptBuilder {
    pub fn new(config: EngineConfig, tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            config,
            tokenizer,
            filter: Arc::new(WordFilter::new()),
        }
    }

    fn suffix_budget(&self) -> usize {
        let share = self.config.wish_list.after_cursor.options.suffix_percent;
        (share * self.config.max_prompt_tokens as f64).ceil() as usize
    }

    fn prefix_budget(&self) -> usize {
        self.config.max_prompt_tokens.saturating_sub(self.suffix_budget())
    }

    /// Wall-clock budget left for one collection phase: the phase's own
    /// cap, shrunk by time the request has already spent.
    fn phase_budget(&self, started: Instant, phase_cap_ms: u64) -> Duration {
        let total = Duration::from_millis(self.config.max_time_ms);
        let remaining = total.saturating_sub(started.elapsed());
        remaining.min(Duration::from_millis(phase_cap_ms))
    }

    /// Retrieve scored snippets from neighbor documents, grouped by
    /// source path in first-appearance order.
    fn similar_snippets(
        &self,
        ctx: &CompletionContext,
        neighbors: &[ResourceDocument],
        started: Instant,
    ) -> Vec<(String, Vec<MatchSimilarSnippet>)> {
        let options = &self.config.wish_list.similar_file.options;
        let matcher = fixed_window_jaccard(
            ctx.as_reference(),
            options.window_size,
            Arc::clone(&self.filter),
        );

        let budget = self.phase_budget(started, options.max_time_ms);
        let phase_started = Instant::now();
        let mut scored: Vec<(String, MatchSimilarSnippet)> = Vec::new();

        for neighbor in neighbors {
            for snippet in matcher.find_top_k(neighbor, options.snippet_max_num) {
                if snippet.score > options.similarity_threshold {
                    scored.push((neighbor.uri.clone(), snippet));
                }
            }
            // Budget stops collecting MORE sources, never aborts one
            // already started.
            if phase_started.elapsed() > budget {
                debug!("similar-snippet retrieval budget exhausted");
                break;
            }
        }

        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(options.snippet_max_num);

        let mut grouped: Vec<(String, Vec<MatchSimilarSnippet>)> = Vec::new();
        for (path, snippet) in scored {
            match grouped.iter_mut().find(|(p, _)| *p == path) {
                Some((_, list)) => list.push(snippet),
                None => grouped.push((path, vec![snippet])),
            }
        }
        grouped
    }

    /// Build the budget-fitted prefix.
    ///
    /// Cancellation is checked after the similarity and import phases;
    /// either check bails out with the raw unmodified prefix.
    pub async fn build_prefix(
        &self,
        ctx: &CompletionContext,
        neighbors: &[ResourceDocument],
        parser: Option<&dyn SyntaxParser>,
        cancel: &CancelScope,
    ) -> String {
        let started = Instant::now();
        let wish = &self.config.wish_list;

        let similar = if wish.similar_file.enabled && !neighbors.is_empty() {
            self.similar_snippets(ctx, neighbors, started)
        } else {
            Vec::new()
        };

        if cancel.is_cancelled() {
            return ctx.prefix.clone();
        }

        let imported = match (wish.imported_file.enabled, parser) {
            (true, Some(parser)) => {
                let budget = self.phase_budget(started, wish.imported_file.options.max_time_ms);
                extract_imported_files(parser, &ctx.prefix, &ctx.file_dir(), budget).await
            }
            _ => Vec::new(),
        };

        if cancel.is_cancelled() {
            return ctx.prefix.clone();
        }

        let items = vec![
            MarkerItem {
                attr: MarkerAttr::LanguageMarker,
                priority: wish.language_marker.priority,
                max_percent: wish.language_marker.max_percent,
                enabled: wish.language_marker.enabled,
                crop: CropPolicy::Char,
                payload: MarkerPayload::Content(language_marker(&ctx.language)),
            },
            MarkerItem {
                attr: MarkerAttr::PathMarker,
                priority: wish.path_marker.priority,
                max_percent: wish.path_marker.max_percent,
                enabled: wish.path_marker.enabled,
                crop: CropPolicy::Char,
                payload: MarkerPayload::Content(path_marker(&ctx.language, &ctx.filename)),
            },
            MarkerItem {
                attr: MarkerAttr::ImportedFile,
                priority: wish.imported_file.priority,
                max_percent: wish.imported_file.max_percent,
                enabled: wish.imported_file.enabled,
                crop: CropPolicy::Line,
                payload: MarkerPayload::ImportedFiles(imported),
            },
            MarkerItem {
                attr: MarkerAttr::SimilarFile,
                priority: wish.similar_file.priority,
                max_percent: wish.similar_file.max_percent,
                enabled: wish.similar_file.enabled,
                crop: CropPolicy::Line,
                payload: MarkerPayload::SimilarSnippets {
                    files: similar,
                    pattern_prefix: wish.similar_file.options.pattern_prefix.clone(),
                    pattern_suffix: wish.similar_file.options.pattern_suffix.clone(),
                },
            },
            MarkerItem {
                attr: MarkerAttr::BeforeCursor,
                priority: wish.before_cursor.priority,
                max_percent: wish.before_cursor.max_percent,
                enabled: wish.before_cursor.enabled,
                crop: CropPolicy::Block {
                    min_block_size: wish.before_cursor.options.min_block_size,
                },
                payload: MarkerPayload::Content(ctx.prefix.clone()),
            },
        ];

        let cropper = Cropper::new(Arc::clone(&self.tokenizer));
        let allocator = Allocator::new(
            &self.tokenizer,
            &cropper,
            parser,
            CommentStyle::for_language(&ctx.language),
        );

        allocator.allocate(items, self.prefix_budget(), cancel)
    }

    /// Fit the after-cursor text into the suffix share of the budget.
    pub fn build_suffix(&self, ctx: &CompletionContext, cancel: &CancelScope) -> String {
        let budget = self.suffix_budget();
        if self.tokenizer.count(&ctx.suffix) <= budget {
            return ctx.suffix.clone();
        }

        let cropper = Cropper::new(Arc::clone(&self.tokenizer));
        cropper.crop(
            &ctx.suffix,
            budget,
            CropPolicy::Line,
            CropDirection::KeepHead,
            None,
            cancel,
        )
    }
}

/// Lightweight no-tokenizer fallback used when the prompt-engineering
/// pipeline is disabled: strip blank leading lines, hard-cap line
/// counts.
pub fn line_based_prompt(prefix: &str, suffix: &str) -> Prompt {
    let trimmed = prefix.trim_start_matches(['\n', '\r']);
    let lines: Vec<&str> = trimmed.split('\n').collect();
    let start = lines.len().saturating_sub(FALLBACK_PREFIX_MAX_LINES);
    let prefix = lines[start..].join("\n");

    let suffix = suffix
        .split('\n')
        .take(FALLBACK_SUFFIX_MAX_LINES)
        .collect::<Vec<_>>()
        .join("\n");

    Prompt { prefix, suffix }
}
