//! Collaborator contracts consumed from the host editor.
//!
//! The engine never talks to a concrete editor. Everything it needs
//! (text access, cancellation, syntax parsing, status display, telemetry)
//! comes in through the narrow traits defined here. Hosts implement these
//! against their extension API; tests implement them in-memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Zero-based cursor position inside a text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Half-open text range `[start, end)` in buffer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Read-only view of the host editor's text model.
///
/// Implementations are expected to be cheap snapshots: a task captures one
/// at construction time and reads from it for the rest of its life, so a
/// racing edit never changes what an in-flight request sees.
pub trait TextBuffer: Send + Sync {
    /// Text covered by `range`, clamped to the buffer bounds.
    fn text_in_range(&self, range: Range) -> String;

    /// Cursor position at snapshot time.
    fn cursor_position(&self) -> Position;

    /// Number of lines in the buffer.
    fn line_count(&self) -> u32;
}

/// Live cancellation signal owned by the host (signalled when the text
/// model or cursor changes underneath a request).
pub trait CancellationToken: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A token that never fires. Useful for tests and one-shot invocations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancelled;

impl CancellationToken for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Cooperative cancellation scope combining the host token with the
/// engine's own supersede flag.
///
/// Cancellation stays advisory: long uninterruptible steps run to
/// completion and observe the flag at the next phase boundary.
#[derive(Clone)]
pub struct CancelScope {
    token: Arc<dyn CancellationToken>,
    superseded: Arc<AtomicBool>,
}

impl CancelScope {
    pub fn new(token: Arc<dyn CancellationToken>) -> Self {
        Self {
            token,
            superseded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Scope that can only be cancelled locally. Used by tests and by
    /// callers driving the pipeline outside a full request lifecycle.
    pub fn detached() -> Self {
        Self::new(Arc::new(NeverCancelled))
    }

    /// Mark this scope as superseded by a newer request.
    pub fn cancel(&self) {
        self.superseded.store(true, Ordering::SeqCst);
    }

    /// True if either the host token fired or the scope was superseded.
    pub fn is_cancelled(&self) -> bool {
        self.superseded.load(Ordering::SeqCst) || self.token.is_cancelled()
    }
}

impl std::fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Narrow contract onto the language-parsing subsystem.
///
/// All operations are best-effort: a language without a parser is a valid
/// state and features consuming this trait silently degrade.
pub trait SyntaxParser: Send + Sync {
    /// Import paths referenced by `source` (verbatim, unresolved).
    fn extract_import_paths(&self, source: &str) -> Vec<String>;

    /// Exported interface/type declarations of `source`, concatenated.
    fn extract_interface_or_type_declarations(&self, source: &str) -> String;

    /// Trim trailing syntax errors down to the nearest valid block
    /// boundary, never producing a block smaller than `min_block_size`.
    fn trim_trailing_syntax_errors(&self, text: &str, min_block_size: usize)
    -> anyhow::Result<String>;

    /// Trim leading syntax errors down to the nearest valid block boundary.
    fn trim_leading_syntax_errors(&self, text: &str, min_block_size: usize)
    -> anyhow::Result<String>;
}

/// Lookup of a syntax parser by language id. `None` means the language has
/// no parsing support and dependent features are skipped.
pub trait ParserRegistry: Send + Sync {
    fn parser_for(&self, language: &str) -> Option<Arc<dyn SyntaxParser>>;
}

/// Registry with no parsers at all; every language degrades gracefully.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoParsers;

impl ParserRegistry for NoParsers {
    fn parser_for(&self, _language: &str) -> Option<Arc<dyn SyntaxParser>> {
        None
    }
}

/// Transient status-line sink exposed by the host UI.
pub trait StatusSink: Send + Sync {
    fn set(&self, text: &str, loading: bool);
    fn remove(&self);
}

/// Correlates a telemetry `start` with its `end`.
pub type RelationId = String;

/// Outcome of one completion attempt, as reported to telemetry.
///
/// Every user-visible failure converges to "no suggestion shown"; only the
/// outcome record distinguishes why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Backend produced a (possibly empty) candidate list.
    Success { completions: usize },
    /// Request was cancelled or superseded; counted as success with zero
    /// completions, distinguished only by report shape.
    Stopped,
    /// Backend call failed or the result was malformed.
    Failed {
        elapsed_ms: u64,
        message: Option<String>,
    },
}

/// Telemetry sink exposed by the host.
pub trait TelemetrySink: Send + Sync {
    /// Open a telemetry record, returning its relation id.
    fn start(&self, kind: &str, meta: serde_json::Value) -> RelationId;

    /// Close the record with its final outcome.
    fn end(&self, relation: &RelationId, outcome: Outcome);
}

/// No-op status sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn set(&self, _text: &str, _loading: bool) {}
    fn remove(&self) {}
}

/// Telemetry sink that assigns fresh ids and drops all records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn start(&self, _kind: &str, _meta: serde_json::Value) -> RelationId {
        uuid::Uuid::new_v4().to_string()
    }

    fn end(&self, _relation: &RelationId, _outcome: Outcome) {}
}

/// Immutable in-memory buffer snapshot.
///
/// The canonical [`TextBuffer`] implementation: hosts build one per
/// request from their live text model, tests build one from a string.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    lines: Vec<String>,
    cursor: Position,
}

impl BufferSnapshot {
    pub fn new(text: &str, cursor: Position) -> Self {
        // split('\n') keeps a trailing empty line for text ending in '\n',
        // matching how editors count lines.
        let lines = text.split('\n').map(|l| l.trim_end_matches('\r').to_string()).collect();
        Self { lines, cursor }
    }

    /// Position one past the last character of the buffer.
    pub fn end_position(&self) -> Position {
        let line = self.lines.len().saturating_sub(1) as u32;
        let column = self.lines.last().map_or(0, |l| l.chars().count()) as u32;
        Position::new(line, column)
    }

    fn clamp(&self, pos: Position) -> Position {
        let line = pos.line.min(self.lines.len().saturating_sub(1) as u32);
        let max_col = self.lines[line as usize].chars().count() as u32;
        Position::new(line, pos.column.min(max_col))
    }

    fn slice_line(&self, line: u32, from: u32, to: u32) -> String {
        self.lines[line as usize]
            .chars()
            .skip(from as usize)
            .take((to.saturating_sub(from)) as usize)
            .collect()
    }
}

impl TextBuffer for BufferSnapshot {
    fn text_in_range(&self, range: Range) -> String {
        let start = self.clamp(range.start);
        let end = self.clamp(range.end);
        if end.line < start.line || (end.line == start.line && end.column <= start.column) {
            return String::new();
        }

        if start.line == end.line {
            return self.slice_line(start.line, start.column, end.column);
        }

        let mut out = self.slice_line(start.line, start.column, u32::MAX);
        for line in (start.line + 1)..end.line {
            out.push('\n');
            out.push_str(&self.lines[line as usize]);
        }
        out.push('\n');
        out.push_str(&self.slice_line(end.line, 0, end.column));
        out
    }

    fn cursor_position(&self) -> Position {
        self.cursor
    }

    fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_multiline_range() {
        let buf = BufferSnapshot::new("alpha\nbravo\ncharlie", Position::new(1, 2));
        let text = buf.text_in_range(Range::new(Position::new(0, 2), Position::new(2, 3)));
        assert_eq!(text, "pha\nbravo\ncha");
    }

    #[test]
    fn snapshot_clamps_out_of_bounds() {
        let buf = BufferSnapshot::new("one\ntwo", Position::new(0, 0));
        let text = buf.text_in_range(Range::new(Position::new(0, 0), Position::new(9, 9)));
        assert_eq!(text, "one\ntwo");
    }

    #[test]
    fn empty_range_yields_empty_string() {
        let buf = BufferSnapshot::new("abc", Position::new(0, 1));
        let r = Range::new(Position::new(0, 2), Position::new(0, 2));
        assert_eq!(buf.text_in_range(r), "");
    }

    #[test]
    fn cancel_scope_combines_token_and_flag() {
        let scope = CancelScope::detached();
        assert!(!scope.is_cancelled());
        scope.cancel();
        assert!(scope.is_cancelled());

        struct Fired;
        impl CancellationToken for Fired {
            fn is_cancelled(&self) -> bool {
                true
            }
        }
        let scope = CancelScope::new(Arc::new(Fired));
        assert!(scope.is_cancelled());
    }
}
