use thiserror::Error;

/// Where a configuration or runtime error came from.
///
/// All parts are optional; only the ones that are set show up in the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Dotted path of the offending setting, e.g. `providers.openai.window_ms`.
    pub field_path: Option<String>,
    pub details: Option<String>,
    /// Component that raised the error, e.g. `provider_limits`.
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
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

/// Crate error type.
///
/// Batch failures never surface here: they are recorded in
/// [`crate::batch::BatchResult::errors`]. Rate-limited requests fail with
/// [`crate::resilience::RequestError`], which carries the caller's own error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// ` (field: .., details: .., source: ..)`, or nothing when the context is empty.
fn format_context(ctx: &ErrorContext) -> String {
    let parts: Vec<String> = [
        ("field", &ctx.field_path),
        ("details", &ctx.details),
        ("source", &ctx.source),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
    .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Context of configuration and runtime errors; `None` for wrapped I/O and YAML errors.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
