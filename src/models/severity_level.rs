use serde_repr::{Deserialize_repr, Serialize_repr};

/// Severity of a trace message or exception.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize_repr,
    Deserialize_repr,
)]
#[repr(u8)]
pub enum SeverityLevel {
    /// Diagnostic output that is normally switched off.
    Verbose = 0,
    /// Regular operational messages.
    #[default]
    Information = 1,
    /// Something unexpected that did not fail the operation.
    Warning = 2,
    /// A failed operation.
    Error = 3,
    /// A failure the application may not recover from.
    Critical = 4,
}

impl From<tracing::Level> for SeverityLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => SeverityLevel::Error,
            tracing::Level::WARN => SeverityLevel::Warning,
            tracing::Level::INFO => SeverityLevel::Information,
            _ => SeverityLevel::Verbose,
        }
    }
}
