//! Completion backend contract.
//!
//! The transport is out of scope: the engine hands a finalized
//! [`CompletionRequest`] to whatever implements [`CompletionBackend`] and
//! gets a [`CompletionResult`] back. HTTP, IPC, or an in-process model are
//! all valid implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Finalized request payload. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Assembled, budget-fitted prompt (everything before the cursor plus
    /// retrieved context).
    pub prompt: String,

    /// Budget-fitted text after the cursor.
    pub suffix: String,

    /// Fresh UUID per request.
    pub session_id: String,

    /// Language id of the requesting document.
    pub language: String,

    /// URL of the requesting document.
    pub file_url: String,

    /// Workspace root, when known.
    pub workspace_dir: Option<String>,
}

/// One candidate completion as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Raw text to insert at the cursor.
    pub content: String,
}

/// Backend response. Cached verbatim (plus an injected timestamp and
/// relation id) keyed by a hash of the prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Candidate completions, possibly empty.
    pub candidates: Vec<Candidate>,

    /// Echoed session id; a missing id marks the result malformed.
    pub session_id: Option<String>,

    /// Set when the backend itself abandoned the request.
    #[serde(default)]
    pub cancelled: bool,
}

/// Asynchronous completion backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Run one completion call. Errors are reported as transient failures
    /// and surface to the user as an empty suggestion list; the engine
    /// never retries automatically.
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResult>;
}
