use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "cache.ttl_seconds", "session_id")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value, backend reply)
    pub details: Option<String>,
    /// Source of the error (e.g., "conversation_store", "redis_cache")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the chat core.
///
/// Domain errors (`NotFound`, `OwnershipViolation`, `PermissionDenied`) are meant
/// to be translated into client-facing rejections. Backend and cache variants
/// are mostly absorbed internally and only escape through explicit APIs such as
/// [`crate::cache::CacheBackend`] attempts.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Owner {owner_id} does not own session {session_id}")]
    OwnershipViolation {
        session_id: String,
        owner_id: String,
    },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Generation backend unavailable: {message}{}", format_context(.context))]
    BackendUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("Cache backend error: {message}{}", format_context(.context))]
    CacheBackend {
        message: String,
        context: ErrorContext,
    },

    #[error("Generation error: {message}{}", format_context(.context))]
    Generation {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn not_found(session_id: impl Into<String>) -> Self {
        Error::NotFound {
            session_id: session_id.into(),
        }
    }

    pub fn ownership(session_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Error::OwnershipViolation {
            session_id: session_id.into(),
            owner_id: owner_id.into(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Error::PermissionDenied {
            message: msg.into(),
        }
    }

    /// Create a new backend-unavailable error with structured context
    pub fn backend_unavailable_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::BackendUnavailable {
            message: msg.into(),
            context,
        }
    }

    /// Create a new cache backend error with structured context
    pub fn cache_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::CacheBackend {
            message: msg.into(),
            context,
        }
    }

    /// Create a new generation error with structured context
    pub fn generation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Generation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::BackendUnavailable { context, .. }
            | Error::CacheBackend { context, .. }
            | Error::Generation { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Domain errors are caused by the caller and must be surfaced, never absorbed.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::OwnershipViolation { .. } | Error::PermissionDenied { .. }
        )
    }
}
