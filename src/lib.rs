//! **prefill** - Inline code completion engine for editor hosts
//!
//! Token-budget-aware prompt assembly with similarity-ranked context,
//! debounced request orchestration, and cached backend results.

/// Host-side abstractions - buffers, cancellation, parsers, telemetry
pub mod host;

/// Completion backend trait and its request/result payloads
pub mod backend;

/// Core engine pipeline - context ranking, budgeting, and assembly
pub mod core {
    /// Stop-word filtering and code tokenization for similarity scoring
    pub mod stopwords;
    pub use stopwords::WordFilter;

    /// Windowed Jaccard similarity over neighboring documents
    pub mod similar;
    pub use similar::{FixedWindow, SimilarSnippet, WindowedMatcher, fixed_window_jaccard};

    /// Neighboring-document discovery (open tabs, recency-ordered)
    pub mod neighbors;
    pub use neighbors::{NeighborSource, OpenTabHistory, collect_neighbors};

    /// Relative-import resolution and declaration extraction
    pub mod imports;
    pub use imports::{ImportedFile, extract_imported_files};

    /// Token-budget text cropping (line, block, and char policies)
    pub mod crop;
    pub use crop::{CropDirection, CropPolicy, Cropper};

    /// Priority-ordered token allocation across prompt components
    pub mod allocator;
    pub use allocator::{Allocator, MarkerAttr, MarkerItem};

    /// FIFO request cache with lazy TTL expiry
    pub mod cache;
    pub use cache::{CachedCompletion, RequestCache};

    /// Prompt assembly - markers, budgets, prefix/suffix construction
    pub mod prompt;
    pub use prompt::{CompletionContext, Prompt, PromptBuilder, line_based_prompt};
}

/// Request lifecycle - task state machine and debounce orchestration
pub mod engine {
    /// One completion attempt's lifecycle, cache check through transform
    pub mod task;
    pub use task::{CompletionCommand, CompletionItem, CompletionTask, DocumentMeta};

    /// Debounce window, supersede semantics, same-position replay
    pub mod orchestrator;
    pub use orchestrator::{CompletionTrigger, Orchestrator, TriggerKind};
}

/// Infrastructure - configuration and tokenizer management
pub mod infra {
    /// Configuration with TOML and environment layering
    pub mod config;
    pub use config::{EngineConfig, WishList, load_config};

    /// Shared BPE tokenizers with cached token counting
    pub mod tokenizer;
    pub use tokenizer::Tokenizer;
}

// Strategic re-exports for host integrations
pub use backend::{Candidate, CompletionBackend, CompletionRequest, CompletionResult};
pub use engine::{CompletionItem, CompletionTrigger, Orchestrator, TriggerKind};
pub use host::{BufferSnapshot, CancellationToken, Position, Range, TextBuffer};
pub use infra::{EngineConfig, load_config};
