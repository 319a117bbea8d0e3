//! One completion attempt's lifecycle.
//!
//! A task owns a single request from reading the editor snapshot to
//! emitting completion items: build request, check cache, call backend,
//! validate, transform. Cancellation is cooperative and checked at each
//! phase boundary through the task's [`CancelScope`]; a task past the
//! transforming phase can no longer be cancelled. Disposal runs exactly
//! once on whichever terminal path is reached first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Candidate, CompletionBackend, CompletionRequest};
use crate::core::cache::RequestCache;
use crate::core::neighbors::{NeighborSource, collect_neighbors};
use crate::core::prompt::{CompletionContext, Prompt, PromptBuilder, line_based_prompt};
use crate::host::{
    CancelScope, Outcome, ParserRegistry, Position, Range, RelationId, StatusSink, TelemetrySink,
    TextBuffer,
};
use crate::infra::config::EngineConfig;
use crate::infra::tokenizer::Tokenizer;

/// Identity of the document a task completes in.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub language: String,
    pub filename: String,
    pub file_url: String,
    pub uri: String,
    pub workspace_root: Option<String>,
}

/// Command the host fires when the user accepts a completion item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCommand {
    pub relation_id: RelationId,
    pub session_id: String,
    pub content: String,
}

/// An editor-displayable completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    /// Text inserted at the cursor.
    pub insert_text: String,

    /// Replacement range; deliberately overwrites the rest of the
    /// current line out to the computed width.
    pub range: Range,

    /// Acceptance telemetry command.
    pub command: CompletionCommand,
}

/// A single in-flight completion attempt.
pub struct CompletionTask {
    buffer: Arc<dyn TextBuffer>,
    meta: DocumentMeta,
    backend: Arc<dyn CompletionBackend>,
    parsers: Arc<dyn ParserRegistry>,
    neighbor_sources: Vec<Arc<dyn NeighborSource>>,
    cache: Arc<Mutex<RequestCache>>,
    telemetry: Arc<dyn TelemetrySink>,
    status: Arc<dyn StatusSink>,
    /// Configuration snapshot taken at construction; live changes reach
    /// only tasks constructed after them.
    config: EngineConfig,
    cancel: CancelScope,
    disposed: AtomicBool,
}

impl CompletionTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<dyn TextBuffer>,
        meta: DocumentMeta,
        backend: Arc<dyn CompletionBackend>,
        parsers: Arc<dyn ParserRegistry>,
        neighbor_sources: Vec<Arc<dyn NeighborSource>>,
        cache: Arc<Mutex<RequestCache>>,
        telemetry: Arc<dyn TelemetrySink>,
        status: Arc<dyn StatusSink>,
        config: EngineConfig,
        cancel: CancelScope,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer,
            meta,
            backend,
            parsers,
            neighbor_sources,
            cache,
            telemetry,
            status,
            config,
            cancel,
            disposed: AtomicBool::new(false),
        })
    }

    /// Mark this task superseded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Release per-task resources. Idempotent; runs on success or
    /// cancellation, whichever comes first.
    fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!(file = %self.meta.filename, "task disposed");
        }
    }

    /// Read the document around the cursor into an immutable context.
    fn read_context(&self) -> CompletionContext {
        let cursor = self.buffer.cursor_position();
        let end = Position::new(self.buffer.line_count().saturating_sub(1), u32::MAX);

        let mut prefix = self
            .buffer
            .text_in_range(Range::new(Position::new(0, 0), cursor));
        if prefix.is_empty() {
            // Guarantee downstream tokenization has content.
            prefix.push('\n');
        }
        let suffix = self.buffer.text_in_range(Range::new(cursor, end));

        CompletionContext {
            prefix,
            suffix,
            language: self.meta.language.clone(),
            filename: self.meta.filename.clone(),
            file_url: self.meta.file_url.clone(),
            uri: self.meta.uri.clone(),
            workspace_root: self.meta.workspace_root.clone(),
        }
    }

    /// Build the request payload, prompt-engineered or line-based per
    /// the configuration snapshot.
    async fn build_request(&self, ctx: &CompletionContext) -> anyhow::Result<CompletionRequest> {
        let prompt = if self.config.prompt_engineering {
            let tokenizer = Tokenizer::for_name(&self.config.tokenizer)?;
            let parser = self.parsers.parser_for(&ctx.language);
            let neighbors = collect_neighbors(
                &self.neighbor_sources,
                &ctx.language,
                &ctx.uri,
                self.config
                    .wish_list
                    .similar_file
                    .options
                    .neighboring_tabs_max_num,
            );

            let builder = PromptBuilder::new(self.config.clone(), tokenizer);
            let prefix = builder
                .build_prefix(ctx, &neighbors, parser.as_deref(), &self.cancel)
                .await;
            let suffix = builder.build_suffix(ctx, &self.cancel);
            Prompt { prefix, suffix }
        } else {
            line_based_prompt(&ctx.prefix, &ctx.suffix)
        };

        Ok(CompletionRequest {
            prompt: prompt.prefix,
            suffix: prompt.suffix,
            session_id: Uuid::new_v4().to_string(),
            language: ctx.language.clone(),
            file_url: ctx.file_url.clone(),
            workspace_dir: ctx.workspace_root.clone(),
        })
    }

    fn bail_stopped(&self, relation: &RelationId) -> Vec<CompletionItem> {
        self.telemetry.end(relation, Outcome::Stopped);
        self.status.remove();
        self.dispose();
        Vec::new()
    }

    fn bail_failed(
        &self,
        relation: &RelationId,
        started: Instant,
        message: Option<String>,
    ) -> Vec<CompletionItem> {
        self.telemetry.end(
            relation,
            Outcome::Failed {
                elapsed_ms: started.elapsed().as_millis() as u64,
                message,
            },
        );
        self.status.remove();
        self.dispose();
        Vec::new()
    }

    /// Run the attempt to completion (or bail-out).
    pub async fn run(&self) -> Vec<CompletionItem> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }

        self.status.set("completing", true);
        let started = Instant::now();
        let ctx = self.read_context();
        let cursor = self.buffer.cursor_position();

        let relation = self.telemetry.start(
            "completion",
            json!({
                "language": ctx.language,
                "file": ctx.filename,
            }),
        );

        let request = match self.build_request(&ctx).await {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "request construction failed");
                return self.bail_failed(&relation, started, Some(err.to_string()));
            }
        };

        // Prompt assembly may have taken a while; a newer request or an
        // editor change can have superseded us.
        if self.cancel.is_cancelled() {
            return self.bail_stopped(&relation);
        }

        let cached = self
            .cache
            .lock()
            .expect("request cache poisoned")
            .get(&request.prompt);

        let (result, result_relation, from_cache) = match cached {
            Some(hit) => {
                debug!("request cache hit, skipping backend call");
                (hit.result, hit.relation_id, true)
            }
            None => match self.backend.complete(&request).await {
                Ok(result) => (result, relation.clone(), false),
                Err(err) => {
                    warn!(error = %err, "backend completion failed");
                    return self.bail_failed(&relation, started, Some(err.to_string()));
                }
            },
        };

        // Cache hits flow through the same validation as misses.
        let Some(session_id) = result.session_id.clone() else {
            return self.bail_failed(&relation, started, None);
        };

        if result.cancelled || self.cancel.is_cancelled() {
            return self.bail_stopped(&relation);
        }

        if !from_cache && !result.candidates.is_empty() {
            self.cache
                .lock()
                .expect("request cache poisoned")
                .set(&request.prompt, result.clone(), relation.clone());
        }

        if result.candidates.is_empty() {
            self.telemetry.end(&relation, Outcome::Success { completions: 0 });
            self.status.remove();
            self.dispose();
            return Vec::new();
        }

        // Past this point the task can no longer be cancelled.
        self.dispose();

        let items: Vec<CompletionItem> = result
            .candidates
            .iter()
            .map(|c| self.transform(c, cursor, &result_relation, &session_id))
            .collect();

        self.telemetry.end(
            &relation,
            Outcome::Success {
                completions: items.len(),
            },
        );
        self.status.remove();
        items
    }

    /// Shape one raw candidate into an editor-displayable item:
    /// trailing newlines stripped, [`dedup_suffix`] appended, range
    /// widened over the rest of the current line.
    fn transform(
        &self,
        candidate: &Candidate,
        cursor: Position,
        relation: &RelationId,
        session_id: &str,
    ) -> CompletionItem {
        let stripped = candidate.content.trim_end_matches(['\n', '\r']);

        let line_end = Position::new(cursor.line, u32::MAX);
        let post_cursor = self.buffer.text_in_range(Range::new(cursor, line_end));

        let insert_text = format!("{stripped}{}", dedup_suffix(stripped, &post_cursor));
        let end_column = cursor.column
            + insert_text.chars().count() as u32
            + post_cursor.chars().count() as u32;

        CompletionItem {
            insert_text,
            range: Range::new(cursor, Position::new(cursor.line, end_column)),
            command: CompletionCommand {
                relation_id: relation.clone(),
                session_id: session_id.to_string(),
                content: candidate.content.clone(),
            },
        }
    }
}

/// Post-cursor characters safe to append after `insert`: a space always
/// survives; any other character survives only if it appears nowhere in
/// `insert`. This avoids doubling a bracket or quote the editor already
/// auto-closed.
fn dedup_suffix(insert: &str, post_cursor: &str) -> String {
    post_cursor
        .chars()
        .filter(|c| *c == ' ' || !insert.contains(*c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CompletionResult;
    use crate::host::{BufferSnapshot, NoParsers, NullStatus, NullTelemetry};
    use async_trait::async_trait;

    struct FixedBackend(Vec<Candidate>);

    #[async_trait]
    impl CompletionBackend for FixedBackend {
        async fn complete(&self, _r: &CompletionRequest) -> anyhow::Result<CompletionResult> {
            Ok(CompletionResult {
                candidates: self.0.clone(),
                session_id: Some("session-1".to_string()),
                cancelled: false,
            })
        }
    }

    fn meta() -> DocumentMeta {
        DocumentMeta {
            language: "rust".to_string(),
            filename: "src/lib.rs".to_string(),
            file_url: "file:///w/src/lib.rs".to_string(),
            uri: "file:///w/src/lib.rs".to_string(),
            workspace_root: None,
        }
    }

    fn task(buffer: BufferSnapshot, backend: FixedBackend) -> Arc<CompletionTask> {
        CompletionTask::new(
            Arc::new(buffer),
            meta(),
            Arc::new(backend),
            Arc::new(NoParsers),
            Vec::new(),
            Arc::new(Mutex::new(RequestCache::new(true))),
            Arc::new(NullTelemetry),
            Arc::new(NullStatus),
            EngineConfig::default(),
            CancelScope::detached(),
        )
    }

    #[tokio::test]
    async fn emits_transformed_items() {
        let buffer = BufferSnapshot::new("fn main() {\n    prin\n}\n", Position::new(1, 8));
        let t = task(
            buffer,
            FixedBackend(vec![Candidate {
                content: "tln!(\"hi\");\n".to_string(),
            }]),
        );
        let items = t.run().await;
        assert_eq!(items.len(), 1);
        // Trailing newlines stripped.
        assert!(items[0].insert_text.starts_with("tln!(\"hi\");"));
        assert_eq!(items[0].command.session_id, "session-1");
        assert_eq!(items[0].range.start, Position::new(1, 8));
    }

    #[tokio::test]
    async fn pre_cancelled_task_returns_empty() {
        let buffer = BufferSnapshot::new("fn main() {}\n", Position::new(0, 12));
        let t = task(buffer, FixedBackend(vec![]));
        t.cancel();
        assert!(t.run().await.is_empty());
    }

    #[tokio::test]
    async fn empty_result_writes_no_cache_entry() {
        let buffer = BufferSnapshot::new("fn main() {}\n", Position::new(0, 12));
        let t = task(buffer, FixedBackend(vec![]));
        assert!(t.run().await.is_empty());
        assert!(t.cache.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_session_id_is_a_failure() {
        struct NoSession;
        #[async_trait]
        impl CompletionBackend for NoSession {
            async fn complete(&self, _r: &CompletionRequest) -> anyhow::Result<CompletionResult> {
                Ok(CompletionResult {
                    candidates: vec![Candidate {
                        content: "x".to_string(),
                    }],
                    session_id: None,
                    cancelled: false,
                })
            }
        }

        let t = CompletionTask::new(
            Arc::new(BufferSnapshot::new("fn f() {}\n", Position::new(0, 9))),
            meta(),
            Arc::new(NoSession),
            Arc::new(NoParsers),
            Vec::new(),
            Arc::new(Mutex::new(RequestCache::new(true))),
            Arc::new(NullTelemetry),
            Arc::new(NullStatus),
            EngineConfig::default(),
            CancelScope::detached(),
        );
        assert!(t.run().await.is_empty());
        assert!(t.cache.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dedup_suffix_skips_auto_closed_brackets() {
        // Cursor sits before an auto-closed ")" on the same line.
        let buffer = BufferSnapshot::new("call(\n", Position::new(0, 5));
        let t = task(
            buffer,
            FixedBackend(vec![Candidate {
                content: "arg)".to_string(),
            }]),
        );
        let items = t.run().await;
        // ")" already appears in the candidate, so it is not repeated.
        assert_eq!(items[0].insert_text, "arg)");
    }

    mod dedup_properties {
        use super::super::dedup_suffix;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn suffix_never_repeats_a_candidate_character(
                insert in "\\PC{0,40}",
                post in "\\PC{0,40}",
            ) {
                let suffix = dedup_suffix(&insert, &post);
                for c in suffix.chars() {
                    prop_assert!(c == ' ' || !insert.contains(c));
                }
            }

            #[test]
            fn suffix_computation_is_deterministic_and_idempotent(
                insert in "\\PC{0,40}",
                post in "\\PC{0,40}",
            ) {
                let first = dedup_suffix(&insert, &post);
                prop_assert_eq!(&first, &dedup_suffix(&insert, &post));
                // Surviving characters survive a second pass unchanged.
                prop_assert_eq!(&first, &dedup_suffix(&insert, &first));
            }
        }
    }

    #[tokio::test]
    async fn empty_prefix_is_coerced_to_newline() {
        let buffer = BufferSnapshot::new("", Position::new(0, 0));
        let t = task(
            buffer,
            FixedBackend(vec![Candidate {
                content: "fn main() {}".to_string(),
            }]),
        );
        // Must not panic on empty context; candidate still flows through.
        let items = t.run().await;
        assert_eq!(items.len(), 1);
    }
}
