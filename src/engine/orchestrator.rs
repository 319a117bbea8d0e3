//! Debounce and supersede layer above [`CompletionTask`].
//!
//! Each editor trigger constructs a task, cancels whatever was in
//! flight, and parks the new task in a single pending slot for the
//! debounce window. A later trigger replaces the slot, so the earlier
//! invocation finds someone else's task there when it wakes and returns
//! empty without ever calling the backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::backend::CompletionBackend;
use crate::core::cache::RequestCache;
use crate::core::neighbors::NeighborSource;
use crate::engine::task::{CompletionItem, CompletionTask, DocumentMeta};
use crate::host::{CancelScope, CancellationToken, ParserRegistry, Position, StatusSink, TelemetrySink};
use crate::infra::config::EngineConfig;

/// How a completion request reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Typing-driven; debounced.
    Automatic,
    /// Explicit invoke command; bypasses the debounce window.
    Manual,
    /// The editor re-querying items it already shows.
    Hover,
}

/// One editor trigger.
#[derive(Debug, Clone)]
pub struct CompletionTrigger {
    pub kind: TriggerKind,
    pub position: Position,
    /// The triggering edit removed text.
    pub deletion: bool,
}

struct State {
    /// Task whose `run` may currently be executing.
    active: Option<Arc<CompletionTask>>,
    /// Task waiting out the debounce window. At most one; a newer
    /// trigger steals the slot.
    pending: Option<Arc<CompletionTask>>,
    /// Last produced items, replayed once for a non-explicit re-trigger
    /// at the same position.
    last: Option<(Position, Vec<CompletionItem>)>,
}

/// Entry point wiring triggers to tasks.
pub struct Orchestrator {
    backend: Arc<dyn CompletionBackend>,
    parsers: Arc<dyn ParserRegistry>,
    neighbor_sources: Vec<Arc<dyn NeighborSource>>,
    telemetry: Arc<dyn TelemetrySink>,
    status: Arc<dyn StatusSink>,
    cache: Arc<Mutex<RequestCache>>,
    config: watch::Sender<EngineConfig>,
    state: Mutex<State>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        parsers: Arc<dyn ParserRegistry>,
        neighbor_sources: Vec<Arc<dyn NeighborSource>>,
        telemetry: Arc<dyn TelemetrySink>,
        status: Arc<dyn StatusSink>,
        config: EngineConfig,
    ) -> Self {
        let cache = Arc::new(Mutex::new(RequestCache::new(config.cache_enabled)));
        let (tx, _rx) = watch::channel(config);
        Self {
            backend,
            parsers,
            neighbor_sources,
            telemetry,
            status,
            cache,
            config: tx,
            state: Mutex::new(State {
                active: None,
                pending: None,
                last: None,
            }),
        }
    }

    /// Replace the live configuration. Tasks already constructed keep
    /// their snapshot; the cache enable flag applies immediately.
    pub fn update_config(&self, config: EngineConfig) {
        self.cache
            .lock()
            .expect("request cache poisoned")
            .set_enabled(config.cache_enabled);
        self.config.send_replace(config);
    }

    /// Observe configuration changes, for hosts that surface them.
    pub fn config_watcher(&self) -> watch::Receiver<EngineConfig> {
        self.config.subscribe()
    }

    /// Handle one trigger end to end.
    pub async fn provide(
        &self,
        buffer: Arc<dyn crate::host::TextBuffer>,
        meta: DocumentMeta,
        trigger: CompletionTrigger,
        token: Arc<dyn CancellationToken>,
    ) -> Vec<CompletionItem> {
        let config;
        let task;
        {
            let mut state = self.state.lock().expect("orchestrator state poisoned");

            // Debug-bounce guard: a non-explicit re-trigger at the exact
            // position of the last computed result replays it, once.
            if trigger.kind != TriggerKind::Manual {
                if let Some((position, items)) = state.last.take() {
                    if position == trigger.position {
                        debug!("replaying memoized items for re-trigger at same position");
                        return items;
                    }
                    state.last = Some((position, items));
                }
            }

            if let Some(previous) = state.active.take() {
                previous.cancel();
            }
            if let Some(previous) = state.pending.take() {
                previous.cancel();
            }

            if trigger.deletion && trigger.kind != TriggerKind::Manual {
                return Vec::new();
            }
            if token.is_cancelled() {
                return Vec::new();
            }

            config = self.config.borrow().clone();
            task = CompletionTask::new(
                buffer,
                meta,
                Arc::clone(&self.backend),
                Arc::clone(&self.parsers),
                self.neighbor_sources.clone(),
                Arc::clone(&self.cache),
                Arc::clone(&self.telemetry),
                Arc::clone(&self.status),
                config.clone(),
                CancelScope::new(token),
            );
            state.active = Some(Arc::clone(&task));
            state.pending = Some(Arc::clone(&task));
        }

        if trigger.kind != TriggerKind::Manual {
            tokio::time::sleep(Duration::from_millis(config.debounce_ms)).await;
        }

        {
            let mut state = self.state.lock().expect("orchestrator state poisoned");
            if task.is_cancelled() {
                return Vec::new();
            }
            match state.pending.take() {
                Some(pending) if Arc::ptr_eq(&pending, &task) => {}
                other => {
                    // A newer trigger owns the slot now; its invocation
                    // will run it.
                    state.pending = other;
                    return Vec::new();
                }
            }
        }

        let items = task.run().await;

        {
            let mut state = self.state.lock().expect("orchestrator state poisoned");
            state.last = Some((trigger.position, items.clone()));
            if state
                .active
                .as_ref()
                .is_some_and(|active| Arc::ptr_eq(active, &task))
            {
                state.active = None;
            }
        }

        items
    }
}
