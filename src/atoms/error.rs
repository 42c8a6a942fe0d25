// ── Mnemo Atoms: Error Types ───────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are the engine's error kinds — callers can match on them to
//     decide between fail-fast, retry, and degrade.
//   • The `From` impls map std/external errors onto those kinds so `?` works
//     across store and adapter boundaries.
//   • No variant carries secret material (API keys, raw model responses,
//     embedding vectors) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MemoryError {
    /// A block id that does not exist (or is archived where an active block
    /// is required).
    #[error("not found: {id}")]
    NotFound { id: String },

    /// Id collision on `record`.
    #[error("already exists: {id}")]
    AlreadyExists { id: String },

    /// A precondition was violated: self-loop link, empty body, bad
    /// frontmatter value, non-positive `top_k`, dimension mismatch, …
    #[error("invalid: {0}")]
    Invalid(String),

    /// A block file failed to parse, or its stored content hash does not
    /// match its current content.
    #[error("corruption in {id}: {message}")]
    Corruption { id: String, message: String },

    /// An external backend is down. Read paths recover via the in-memory
    /// fallbacks; write paths surface this to the caller.
    #[error("backend unavailable: {backend}: {message}")]
    Unavailable { backend: String, message: String },

    /// The embedder is missing or erroring. Terminal for `encode` and
    /// `retrieve` — there is no degraded substitute for the dense signal.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// An external call exceeded its budget. Retriable.
    #[error("timeout after {ms}ms in {operation}")]
    Timeout { operation: String, ms: u64 },

    /// Unclassified failure. Prefer adding a specific variant over using
    /// this in new code.
    #[error("{0}")]
    Internal(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl MemoryError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn corruption(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corruption { id: id.into(), message: message.into() }
    }

    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable { backend: backend.into(), message: message.into() }
    }

    pub fn timeout(operation: impl Into<String>, ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), ms }
    }

    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

// ── Conversions from std/external error types ──────────────────────────────

impl From<std::io::Error> for MemoryError {
    fn from(e: std::io::Error) -> Self {
        MemoryError::Internal(format!("I/O error: {}", e))
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Internal(format!("serialization error: {}", e))
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::Unavailable { backend: "sqlite".into(), message: e.to_string() }
    }
}

impl From<reqwest::Error> for MemoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not expose the configured budget here; 0 means
            // "see the client config".
            MemoryError::Timeout { operation: "http".into(), ms: 0 }
        } else {
            MemoryError::Unavailable { backend: "http".into(), message: e.to_string() }
        }
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations return this type.
pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_operation_and_id() {
        let e = MemoryError::not_found("KB-20250101-001");
        assert_eq!(e.to_string(), "not found: KB-20250101-001");

        let e = MemoryError::corruption("KB-1", "hash mismatch");
        assert!(e.to_string().contains("KB-1"));
        assert!(e.to_string().contains("hash mismatch"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(MemoryError::timeout("embed", 5000).is_retriable());
        assert!(MemoryError::unavailable("neo4j", "connection refused").is_retriable());
        assert!(!MemoryError::invalid("self-loop").is_retriable());
        assert!(!MemoryError::not_found("x").is_retriable());
    }

    #[test]
    fn test_io_error_maps_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e: MemoryError = io.into();
        assert!(matches!(e, MemoryError::Internal(_)));
    }
}
