//! Candidate "neighbor" document retrieval for similarity matching.
//!
//! Sources are consulted in order; open-tab history is the only active
//! kind today, other kinds are reserved. Results are filtered to the
//! target language, never include the target file itself, deduplicate by
//! URI (first occurrence wins), and are capped to a configured maximum.

use std::sync::{Arc, Mutex};

use indexmap::IndexSet;

use crate::core::similar::ResourceDocument;

/// Kinds of neighbor sources, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborSourceKind {
    /// Recently viewed editor tabs, most recent first.
    OpenTabs,
}

/// Supplies candidate documents for retrieval.
pub trait NeighborSource: Send + Sync {
    fn kind(&self) -> NeighborSourceKind;

    /// Candidate documents in source-defined priority order.
    fn documents(&self) -> Vec<ResourceDocument>;
}

/// Recency-ordered open-tab history the host feeds as tabs gain focus.
#[derive(Default)]
pub struct OpenTabHistory {
    tabs: Mutex<Vec<ResourceDocument>>,
}

impl OpenTabHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document as most recently viewed, replacing any earlier
    /// entry with the same URI.
    pub fn record(&self, doc: ResourceDocument) {
        let mut tabs = self.tabs.lock().expect("tab history poisoned");
        tabs.retain(|d| d.uri != doc.uri);
        tabs.insert(0, doc);
    }
}

impl NeighborSource for OpenTabHistory {
    fn kind(&self) -> NeighborSourceKind {
        NeighborSourceKind::OpenTabs
    }

    fn documents(&self) -> Vec<ResourceDocument> {
        self.tabs.lock().expect("tab history poisoned").clone()
    }
}

/// Collect neighbor documents for `language`, excluding `self_uri`.
///
/// Source-list order is preserved as priority; at most `max` documents
/// are returned.
pub fn collect_neighbors(
    sources: &[Arc<dyn NeighborSource>],
    language: &str,
    self_uri: &str,
    max: usize,
) -> Vec<ResourceDocument> {
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut collected = Vec::new();

    for source in sources {
        for doc in source.documents() {
            if collected.len() >= max {
                return collected;
            }
            if doc.language != language || doc.uri == self_uri {
                continue;
            }
            if seen.insert(doc.uri.clone()) {
                collected.push(doc);
            }
        }
    }

    collected
}
