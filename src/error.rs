use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for configuration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "accumulator.max_batch_count")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_validate", "config_env")
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

/// Crate-level error type.
///
/// Nothing in the batching core is fatal; this type covers setup problems
/// (bad configuration, unreadable config files) and transport failures that a
/// caller chooses to propagate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

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
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Why a single item was not delivered.
///
/// Delivered only to the item's own completion handle. Cloneable so a
/// batch-wide transport failure can fan out to every item of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The remote service rejected this item with an extended status code.
    #[error("{message}")]
    Rejected { code: u32, message: String },

    /// The whole batch failed at the transport level.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The aggregate response carried fewer results than the batch had items.
    #[error("no result for item {index} in aggregate response")]
    MissingResult { index: usize },

    /// The item was discarded before a transport call was made.
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Extended status code, if the remote service reported one.
    pub fn status_code(&self) -> Option<u32> {
        match self {
            DeliveryError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}
