//! Priority-driven token-budget allocation across prompt content blocks.
//!
//! Candidate blocks arrive as [`MarkerItem`]s. Budget is granted in
//! priority order (stable; ties keep insertion order), but the surviving
//! blocks are assembled in a fixed declarative order: language marker,
//! path marker, imported files, similar files, before-cursor text. An
//! item can therefore receive its budget out of priority order relative
//! to its position in the final string.

use std::collections::HashMap;

use itertools::Itertools;
use tracing::trace;

use crate::core::crop::{CropDirection, CropPolicy, Cropper};
use crate::core::imports::ImportedFile;
use crate::core::similar::MatchSimilarSnippet;
use crate::host::{CancelScope, SyntaxParser};
use crate::infra::tokenizer::Tokenizer;

/// Named content sources, in their fixed assembly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerAttr {
    LanguageMarker,
    PathMarker,
    ImportedFile,
    SimilarFile,
    BeforeCursor,
}

/// Assembly order is independent of allocation priority.
const ASSEMBLY_ORDER: [MarkerAttr; 5] = [
    MarkerAttr::LanguageMarker,
    MarkerAttr::PathMarker,
    MarkerAttr::ImportedFile,
    MarkerAttr::SimilarFile,
    MarkerAttr::BeforeCursor,
];

/// Payload of one candidate block.
#[derive(Debug, Clone)]
pub enum MarkerPayload {
    /// Raw text, cropped to fit when over its cap.
    Content(String),

    /// `(path, declarations)` pairs appended block-by-block until one
    /// exceeds a limit.
    ImportedFiles(Vec<ImportedFile>),

    /// Snippets grouped by source file, appended file-by-file until one
    /// exceeds a limit.
    SimilarSnippets {
        files: Vec<(String, Vec<MatchSimilarSnippet>)>,
        pattern_prefix: String,
        pattern_suffix: String,
    },
}

/// A transient candidate content block, consumed exactly once by
/// [`Allocator::allocate`].
#[derive(Debug, Clone)]
pub struct MarkerItem {
    pub attr: MarkerAttr,
    pub priority: u32,
    pub max_percent: f64,
    pub enabled: bool,
    pub crop: CropPolicy,
    pub payload: MarkerPayload,
}

/// Per-language comment formatting for marker lines.
#[derive(Debug, Clone)]
pub struct CommentStyle {
    prefix: &'static str,
    suffix: &'static str,
}

impl CommentStyle {
    /// Comment style for `language`, with `//` as the generic fallback.
    pub fn for_language(language: &str) -> Self {
        let (prefix, suffix) = match language {
            "python" | "shellscript" | "ruby" | "perl" | "yaml" | "toml" | "r" | "coffeescript" => {
                ("# ", "")
            }
            "lua" | "sql" | "haskell" => ("-- ", ""),
            "html" | "xml" | "markdown" | "vue" | "svelte" => ("<!-- ", " -->"),
            "clojure" | "lisp" | "scheme" => ("; ", ""),
            _ => ("// ", ""),
        };
        Self { prefix, suffix }
    }

    /// Render `text` as one comment line (no trailing newline).
    pub fn line(&self, text: &str) -> String {
        format!("{}{}{}", self.prefix, text, self.suffix)
    }
}

fn ceil_share(max_percent: f64, left: usize) -> usize {
    (max_percent * left as f64).ceil() as usize
}

/// Greedy budget allocator over a fixed wish list.
pub struct Allocator<'a> {
    tokenizer: &'a Tokenizer,
    cropper: &'a Cropper,
    parser: Option<&'a dyn SyntaxParser>,
    comment: CommentStyle,
}

impl<'a> Allocator<'a> {
    pub fn new(
        tokenizer: &'a Tokenizer,
        cropper: &'a Cropper,
        parser: Option<&'a dyn SyntaxParser>,
        comment: CommentStyle,
    ) -> Self {
        Self {
            tokenizer,
            cropper,
            parser,
            comment,
        }
    }

    /// Allocate `left_token_size` tokens across `items` and assemble the
    /// surviving blocks.
    ///
    /// If cancellation fires at one of the defined checkpoints, the raw
    /// before-cursor text is returned unmodified and partial work is
    /// discarded.
    pub fn allocate(
        &self,
        mut items: Vec<MarkerItem>,
        left_token_size: usize,
        cancel: &CancelScope,
    ) -> String {
        // The cancellation bail-out returns the untouched before-cursor
        // text, so capture it before allocation starts.
        let raw_before = items
            .iter()
            .find_map(|i| match (&i.attr, &i.payload) {
                (MarkerAttr::BeforeCursor, MarkerPayload::Content(c)) => Some(c.clone()),
                _ => None,
            })
            .unwrap_or_default();

        // Stable sort: equal priorities keep their insertion order.
        items.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut left = left_token_size;
        let mut blocks: HashMap<MarkerAttr, String> = HashMap::new();

        for item in &items {
            if !item.enabled {
                continue;
            }
            if left == 0 {
                // Remaining items contribute nothing.
                break;
            }

            match &item.payload {
                MarkerPayload::Content(content) => {
                    if content.is_empty() {
                        continue;
                    }
                    let tokens = self.tokenizer.count(content);
                    if tokens <= left {
                        blocks.insert(item.attr, content.clone());
                        left -= tokens;
                    } else {
                        let cap = ceil_share(item.max_percent, left);
                        let cropped = self.cropper.crop(
                            content,
                            cap,
                            item.crop,
                            CropDirection::KeepTail,
                            self.parser,
                            cancel,
                        );
                        trace!(attr = ?item.attr, cap, "cropped over-budget block");
                        blocks.insert(item.attr, cropped);
                        left = left.saturating_sub(cap);
                    }
                }

                MarkerPayload::ImportedFiles(files) => {
                    let cap = ceil_share(item.max_percent, left);
                    let mut out = String::new();
                    let mut consumed = 0usize;

                    for file in files {
                        let block = format!(
                            "{}\n{}\n",
                            self.comment.line(&file.path),
                            file.declarations
                        );
                        let cost = self.tokenizer.count(&block);
                        // Stop (not skip) at the first block exceeding
                        // either the per-item cap or the global budget.
                        if consumed + cost > cap || consumed + cost > left {
                            break;
                        }
                        out.push_str(&block);
                        consumed += cost;
                    }

                    if !out.is_empty() {
                        blocks.insert(item.attr, out);
                        left -= consumed;
                    }

                    if cancel.is_cancelled() {
                        return raw_before;
                    }
                }

                MarkerPayload::SimilarSnippets {
                    files,
                    pattern_prefix,
                    pattern_suffix,
                } => {
                    let cap = ceil_share(item.max_percent, left);
                    let mut out = String::new();
                    let mut consumed = 0usize;

                    for (path, snippets) in files {
                        if snippets.is_empty() {
                            continue;
                        }
                        let body = snippets.iter().map(|s| s.snippet.as_str()).join("\n");
                        let header = self
                            .comment
                            .line(&format!("{pattern_prefix}{path}{pattern_suffix}"));
                        let block = format!("{header}\n{body}\n");
                        let cost = self.tokenizer.count(&block);
                        if consumed + cost > cap || consumed + cost > left {
                            break;
                        }
                        out.push_str(&block);
                        consumed += cost;
                    }

                    if !out.is_empty() {
                        blocks.insert(item.attr, out);
                        left -= consumed;
                    }

                    if cancel.is_cancelled() {
                        return raw_before;
                    }
                }
            }
        }

        // Fixed assembly order, independent of allocation order.
        let mut assembled = String::new();
        for attr in ASSEMBLY_ORDER {
            if let Some(block) = blocks.get(&attr) {
                if block.is_empty() {
                    continue;
                }
                assembled.push_str(block);
                if !assembled.ends_with('\n') {
                    assembled.push('\n');
                }
            }
        }

        assembled.trim_end_matches('\n').to_string()
    }
}
