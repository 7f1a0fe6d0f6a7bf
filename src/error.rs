//! Typed error taxonomy for the ingestion and query pipeline.
//!
//! Every public operation in [`crate::service`] returns [`RagError`] so that
//! callers (the HTTP layer, the CLI, embedding applications) can branch on a
//! stable [`kind`](RagError::kind) instead of matching message text. Provider
//! failures are converted into these variants where they happen; nothing
//! raw escapes past the pipeline boundary.

use std::fmt;

use thiserror::Error;

/// Pipeline stage an error originated from.
///
/// Reported alongside the error kind so a client can tell, for example, a
/// generation failure apart from a retrieval failure after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Request,
    Ingest,
    Storage,
    Embedding,
    Retrieval,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Request => "request",
            Stage::Ingest => "ingest",
            Stage::Storage => "storage",
            Stage::Embedding => "embedding",
            Stage::Retrieval => "retrieval",
            Stage::Generation => "generation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No index found for tenant '{tenant}'")]
    TenantNotFound { tenant: String },

    #[error("Unsupported document format: {message}")]
    UnsupportedFormat { message: String },

    #[error("Document contains no records: {file}")]
    EmptyDocument { file: String },

    #[error("Embedding failed: {message}")]
    Embedding { message: String },

    #[error("Persistence failed: {message}")]
    Persistence { message: String },

    #[error("Index for tenant '{tenant}' is unusable: {message}")]
    CorruptIndex { tenant: String, message: String },

    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("Generation failed: {message}")]
    Generation { message: String },

    #[error("Another rebuild is in progress for tenant '{tenant}'")]
    ConcurrentModification { tenant: String },

    #[error("Timed out during {stage}: {message}")]
    Timeout { stage: Stage, message: String },
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: message.into(),
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval {
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    pub fn corrupt(tenant: &str, message: impl Into<String>) -> Self {
        Self::CorruptIndex {
            tenant: tenant.to_string(),
            message: message.into(),
        }
    }

    pub fn tenant_not_found(tenant: &str) -> Self {
        Self::TenantNotFound {
            tenant: tenant.to_string(),
        }
    }

    /// Wrap an I/O failure from the storage layer.
    pub fn io(context: &str, err: std::io::Error) -> Self {
        Self::Persistence {
            message: format!("{}: {}", context, err),
        }
    }

    /// Stable machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::Configuration { .. } => "configuration_error",
            Self::TenantNotFound { .. } => "tenant_not_found",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::EmptyDocument { .. } => "empty_document",
            Self::Embedding { .. } => "embedding_error",
            Self::Persistence { .. } => "persistence_error",
            Self::CorruptIndex { .. } => "corrupt_index",
            Self::Retrieval { .. } => "retrieval_error",
            Self::Generation { .. } => "generation_error",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// The pipeline stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::BadRequest { .. } | Self::Configuration { .. } => Stage::Request,
            Self::UnsupportedFormat { .. } | Self::EmptyDocument { .. } => Stage::Ingest,
            Self::TenantNotFound { .. }
            | Self::Persistence { .. }
            | Self::CorruptIndex { .. }
            | Self::ConcurrentModification { .. } => Stage::Storage,
            Self::Embedding { .. } => Stage::Embedding,
            Self::Retrieval { .. } => Stage::Retrieval,
            Self::Generation { .. } => Stage::Generation,
            Self::Timeout { stage, .. } => *stage,
        }
    }
}

/// Convert a transport error from an external provider call.
///
/// Timeouts become [`RagError::Timeout`] for the given stage; everything
/// else becomes the stage's own failure kind.
pub(crate) fn from_transport(stage: Stage, provider: &str, err: reqwest::Error) -> RagError {
    if err.is_timeout() {
        return RagError::Timeout {
            stage,
            message: format!("{} request exceeded its deadline", provider),
        };
    }
    let message = format!("{} request failed: {}", provider, err);
    match stage {
        Stage::Generation => RagError::Generation { message },
        _ => RagError::Embedding { message },
    }
}
