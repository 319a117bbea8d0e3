//! Windowed document similarity matching.
//!
//! An abstract matcher slides caller-defined line windows over a
//! candidate document and scores each window's token set against a
//! reference context (default score: Jaccard). The concrete
//! [`fixed_window_jaccard`] matcher supplies non-overlapping contiguous
//! windows of a fixed line count and extracts the reference context from
//! the lines immediately before the cursor.
//!
//! Window token sets are expensive to build, so they are cached
//! process-wide keyed by matcher identity plus exact source text: any
//! edit produces a fresh entry and the old one ages out of the bounded
//! cache.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use once_cell::sync::{Lazy, OnceCell};
use xxhash_rust::xxh64::Xxh64;

use crate::core::stopwords::WordFilter;

/// Read-only view of one source file for matching purposes.
#[derive(Debug, Clone)]
pub struct ResourceDocument {
    /// Full source text.
    pub text: String,

    /// Language id.
    pub language: String,

    /// Document URI, used for identity and dedupe.
    pub uri: String,

    /// Cursor byte offset into `text` (0 for non-focused documents).
    pub offset: usize,
}

/// A scored line window.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarSnippet {
    /// First line of the window (0-based, inclusive).
    pub start_line: usize,

    /// One past the last line of the window.
    pub end_line: usize,

    /// Similarity score in `[0, 1]`.
    pub score: f64,
}

/// Semantic tag attached to a materialized snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetKind {
    Snippet,
}

/// A [`SimilarSnippet`] carrying the actual text slice.
#[derive(Debug, Clone)]
pub struct MatchSimilarSnippet {
    /// Text of the matched window.
    pub snippet: String,

    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    pub kind: SnippetKind,
}

/// Jaccard similarity: `|A ∩ B| / |A ∪ B|`.
///
/// Symmetric, bounded to `[0, 1]`, and `1` for identical non-empty sets.
/// Two empty sets score `0` (no evidence of similarity).
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Strategy producing the line windows a matcher scores.
pub trait WindowDelineation: Send + Sync {
    /// Half-open `[start, end)` line ranges over a document of
    /// `line_count` lines.
    fn windows(&self, line_count: usize) -> Vec<(usize, usize)>;
}

/// Fixed-size, non-overlapping contiguous windows.
#[derive(Debug, Clone, Copy)]
pub struct FixedWindow {
    pub size: usize,
}

impl WindowDelineation for FixedWindow {
    fn windows(&self, line_count: usize) -> Vec<(usize, usize)> {
        if self.size == 0 || line_count == 0 {
            return Vec::new();
        }
        (0..line_count)
            .step_by(self.size)
            .map(|start| (start, (start + self.size).min(line_count)))
            .collect()
    }
}

/// One window with its unioned token set.
#[derive(Debug, Clone)]
struct Window {
    start: usize,
    end: usize,
    tokens: HashSet<String>,
}

/// Bounded window-set cache: capacity 20, oldest-inserted evicted first.
struct WindowSetCache {
    map: HashMap<u64, Arc<Vec<Window>>>,
    order: VecDeque<u64>,
}

const WINDOW_CACHE_CAPACITY: usize = 20;

impl WindowSetCache {
    fn get(&self, key: u64) -> Option<Arc<Vec<Window>>> {
        self.map.get(&key).cloned()
    }

    fn insert(&mut self, key: u64, value: Arc<Vec<Window>>) {
        if self.map.insert(key, value).is_none() {
            self.order.push_back(key);
        }
        while self.map.len() > WINDOW_CACHE_CAPACITY {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.map.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

static WINDOW_CACHE: Lazy<Mutex<WindowSetCache>> = Lazy::new(|| {
    Mutex::new(WindowSetCache {
        map: HashMap::new(),
        order: VecDeque::new(),
    })
});

/// Extracts the reference "cursor context" text from a document.
pub type ContextExtractor = Arc<dyn Fn(&ResourceDocument) -> String + Send + Sync>;

/// Window-strategy-agnostic similarity matcher.
///
/// The reference token set is computed lazily once per matcher instance;
/// candidate window sets come from the shared bounded cache.
pub struct WindowedMatcher {
    matcher_id: String,
    delineation: Arc<dyn WindowDelineation>,
    filter: Arc<WordFilter>,
    reference: ResourceDocument,
    extract_context: ContextExtractor,
    reference_tokens: OnceCell<HashSet<String>>,
}

impl WindowedMatcher {
    pub fn new(
        matcher_id: impl Into<String>,
        delineation: Arc<dyn WindowDelineation>,
        filter: Arc<WordFilter>,
        reference: ResourceDocument,
        extract_context: ContextExtractor,
    ) -> Self {
        Self {
            matcher_id: matcher_id.into(),
            delineation,
            filter,
            reference,
            extract_context,
            reference_tokens: OnceCell::new(),
        }
    }

    fn reference_tokens(&self) -> &HashSet<String> {
        self.reference_tokens.get_or_init(|| {
            let context = (self.extract_context)(&self.reference);
            self.filter.tokenize(&self.reference.language, &context)
        })
    }

    fn cache_key(&self, source: &str) -> u64 {
        let mut hasher = Xxh64::new(0);
        hasher.update(self.matcher_id.as_bytes());
        hasher.update(b":");
        hasher.update(source.as_bytes());
        hasher.digest()
    }

    /// Window token sets for `doc`, computed once per exact source text.
    fn window_sets(&self, doc: &ResourceDocument) -> Arc<Vec<Window>> {
        let key = self.cache_key(&doc.text);

        if let Some(hit) = WINDOW_CACHE.lock().expect("window cache poisoned").get(key) {
            return hit;
        }

        let lines: Vec<&str> = doc.text.lines().collect();

        // Tokenize every line independently, then union per window.
        let line_tokens: Vec<HashSet<String>> = lines
            .iter()
            .map(|line| self.filter.tokenize(&doc.language, line))
            .collect();

        let windows: Vec<Window> = self
            .delineation
            .windows(lines.len())
            .into_iter()
            .map(|(start, end)| {
                let mut tokens = HashSet::new();
                for set in &line_tokens[start..end] {
                    tokens.extend(set.iter().cloned());
                }
                Window { start, end, tokens }
            })
            .collect();

        let built = Arc::new(windows);
        WINDOW_CACHE
            .lock()
            .expect("window cache poisoned")
            .insert(key, Arc::clone(&built));
        built
    }

    /// All windows of `doc` scored against the reference context, sorted
    /// by descending score (stable; no tie-break beyond sort stability).
    fn scored_windows(&self, doc: &ResourceDocument) -> Vec<SimilarSnippet> {
        if doc.text.is_empty() || self.reference_tokens().is_empty() {
            return Vec::new();
        }

        let reference = self.reference_tokens();
        let mut scored: Vec<SimilarSnippet> = self
            .window_sets(doc)
            .iter()
            .map(|w| SimilarSnippet {
                start_line: w.start,
                end_line: w.end,
                score: jaccard(reference, &w.tokens),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    fn materialize(&self, doc: &ResourceDocument, snippet: &SimilarSnippet) -> MatchSimilarSnippet {
        let text = doc
            .text
            .lines()
            .skip(snippet.start_line)
            .take(snippet.end_line - snippet.start_line)
            .collect::<Vec<_>>()
            .join("\n");

        MatchSimilarSnippet {
            snippet: text,
            start_line: snippet.start_line,
            end_line: snippet.end_line,
            score: snippet.score,
            kind: SnippetKind::Snippet,
        }
    }

    /// The single best-scoring window, or `None` when nothing scores
    /// above zero.
    pub fn find_best_match(&self, doc: &ResourceDocument) -> Option<MatchSimilarSnippet> {
        let scored = self.scored_windows(doc);
        let best = scored.first()?;
        if best.score == 0.0 {
            return None;
        }
        Some(self.materialize(doc, best))
    }

    /// Up to `k` best windows with pairwise non-overlapping line ranges.
    ///
    /// Greedy: windows are visited score-descending and accepted only if
    /// they overlap no previously accepted window. Zero-score windows are
    /// excluded on purpose, extending the [`Self::find_best_match`]
    /// cutoff to every rank: a window sharing no token with the
    /// reference is noise, not a weak match.
    pub fn find_top_k(&self, doc: &ResourceDocument, k: usize) -> Vec<MatchSimilarSnippet> {
        let mut accepted: Vec<SimilarSnippet> = Vec::new();

        for candidate in self.scored_windows(doc) {
            if accepted.len() >= k {
                break;
            }
            if candidate.score == 0.0 {
                // Scores are sorted; nothing further can match.
                break;
            }
            let overlaps = accepted
                .iter()
                .any(|a| candidate.start_line < a.end_line && a.start_line < candidate.end_line);
            if !overlaps {
                accepted.push(candidate);
            }
        }

        accepted.iter().map(|s| self.materialize(doc, s)).collect()
    }
}

/// The concrete matcher used by prompt assembly: fixed non-overlapping
/// windows of `window_size` lines, Jaccard scoring, reference context
/// taken from the last `window_size` lines before the cursor.
pub fn fixed_window_jaccard(
    reference: ResourceDocument,
    window_size: usize,
    filter: Arc<WordFilter>,
) -> WindowedMatcher {
    let extract: ContextExtractor = Arc::new(move |doc: &ResourceDocument| {
        let mut offset = doc.offset.min(doc.text.len());
        while offset > 0 && !doc.text.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &doc.text[..offset];
        let lines: Vec<&str> = before.lines().collect();
        let start = lines.len().saturating_sub(window_size);
        lines[start..].join("\n")
    });

    WindowedMatcher::new(
        format!("fixed-window-jaccard:{window_size}"),
        Arc::new(FixedWindow { size: window_size }),
        filter,
        reference,
        extract,
    )
}
