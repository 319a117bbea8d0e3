//! Word tokenization with stop-word filtering for similarity scoring.
//!
//! Text is split on any non-alphanumeric boundary, case preserved, and
//! filtered against a combined natural-language + programming-keyword
//! stop-word set. Output is a set: repeated tokens collapse and do not
//! increase similarity weight.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

/// Common natural-language words carrying no signal for code similarity.
static NATURAL_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "for", "from", "has",
    "have", "in", "is", "it", "its", "no", "not", "of", "on", "or", "so", "that", "the", "this",
    "to", "was", "we", "will", "with", "you",
];

/// Keywords and operators shared across mainstream languages.
static CODE_STOPWORDS: &[&str] = &[
    "abstract", "async", "await", "bool", "boolean", "break", "case", "catch", "class", "const",
    "continue", "def", "default", "delete", "do", "elif", "else", "enum", "export", "extends",
    "false", "final", "finally", "fn", "for", "from", "func", "function", "if", "impl", "import",
    "in", "instanceof", "int", "interface", "let", "match", "mod", "new", "null", "number",
    "object", "package", "private", "protected", "pub", "public", "return", "self", "static",
    "string", "struct", "super", "switch", "then", "this", "throw", "trait", "true", "try",
    "type", "typeof", "undefined", "use", "var", "void", "when", "where", "while", "yield",
];

/// Combined default stop-word set.
static DEFAULT_STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    NATURAL_STOPWORDS
        .iter()
        .chain(CODE_STOPWORDS.iter())
        .copied()
        .collect()
});

/// Stop-word-filtering word tokenizer with optional per-language
/// overrides.
///
/// No overrides are configured by default; every language falls back to
/// the combined set, which is the intended state rather than a gap.
#[derive(Debug, Clone, Default)]
pub struct WordFilter {
    overrides: HashMap<String, HashSet<String>>,
}

impl WordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stop-word set for one language id.
    pub fn with_override(mut self, language: &str, words: impl IntoIterator<Item = String>) -> Self {
        self.overrides
            .insert(language.to_string(), words.into_iter().collect());
        self
    }

    fn is_stopword(&self, language: &str, word: &str) -> bool {
        match self.overrides.get(language) {
            Some(set) => set.contains(word),
            None => DEFAULT_STOPWORDS.contains(word),
        }
    }

    /// Split `text` into its set of significant word tokens.
    ///
    /// Case-sensitive: `Foo` and `foo` are distinct tokens, and only
    /// exact stop-word matches are discarded.
    pub fn tokenize(&self, language: &str, text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .filter(|w| !self.is_stopword(language, w))
            .map(str::to_string)
            .collect()
    }
}
