//! Error types for the HogQL compiler.
//!
//! Errors fall into two categories:
//!
//! - **Exposed** errors ([`HogQLError::Syntax`], [`HogQLError::Resolution`],
//!   [`HogQLError::Query`]) are safe to show to the person who wrote the query.
//! - **Internal** errors ([`HogQLError::Internal`]) indicate a bug in a compiler
//!   pass or a violated caller invariant. They are logged, never shown raw.
//!
//! Every variant optionally carries the source [`Span`] of the node that
//! triggered it. Passes attach the span of the node being visited with
//! [`HogQLError::with_span`], which never overwrites a span that is already
//! present, so the innermost raise site wins.

use masterror::AppError;
pub use masterror::AppResult;
use serde::Serialize;
use thiserror::Error;

use crate::ast::Span;

/// Result alias used by every compiler pass.
pub type HogQLResult<T> = Result<T, HogQLError>;

/// Compiler error with optional source location.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HogQLError {
    /// Malformed query text
    #[error("Syntax error: {message}")]
    Syntax {
        message: String,
        span:    Option<Span>
    },
    /// A name could not be bound to a table, column, alias or CTE
    #[error("{message}")]
    Resolution {
        message: String,
        span:    Option<Span>
    },
    /// Disallowed or invalid query construct
    #[error("{message}")]
    Query {
        message: String,
        span:    Option<Span>
    },
    /// Broken compiler invariant
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        span:    Option<Span>
    }
}

impl HogQLError {
    /// Whether the message may be shown to end users verbatim.
    pub fn is_exposed(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }

    /// Raw message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Syntax {
                message, ..
            }
            | Self::Resolution {
                message, ..
            }
            | Self::Query {
                message, ..
            }
            | Self::Internal {
                message, ..
            } => message
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Syntax {
                span, ..
            }
            | Self::Resolution {
                span, ..
            }
            | Self::Query {
                span, ..
            }
            | Self::Internal {
                span, ..
            } => *span
        }
    }

    /// Attach a span unless the error already carries one.
    #[must_use]
    pub fn with_span(mut self, new_span: Option<Span>) -> Self {
        let slot = match &mut self {
            Self::Syntax {
                span, ..
            }
            | Self::Resolution {
                span, ..
            }
            | Self::Query {
                span, ..
            }
            | Self::Internal {
                span, ..
            } => span
        };
        if slot.is_none() {
            *slot = new_span;
        }
        self
    }
}

impl From<HogQLError> for AppError {
    fn from(err: HogQLError) -> Self {
        if err.is_exposed() {
            AppError::bad_request(format_located(&err))
        } else {
            tracing::error!(error = %err, "internal HogQL compiler error");
            AppError::internal(err.to_string())
        }
    }
}

/// Create syntax error
pub fn syntax_error(message: impl Into<String>, span: Option<Span>) -> HogQLError {
    HogQLError::Syntax {
        message: message.into(),
        span
    }
}

/// Create resolution error
pub fn resolution_error(message: impl Into<String>) -> HogQLError {
    HogQLError::Resolution {
        message: message.into(),
        span:    None
    }
}

/// Create exposed query error
pub fn query_error(message: impl Into<String>) -> HogQLError {
    HogQLError::Query {
        message: message.into(),
        span:    None
    }
}

/// Create internal error
pub fn internal_error(message: impl Into<String>) -> HogQLError {
    HogQLError::Internal {
        message: message.into(),
        span:    None
    }
}

/// Create file read error
pub fn file_read_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!("Failed to read file '{}': {}", path, source))
}

/// Create config error
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// Format an exposed error with its location, if known
pub fn format_located(err: &HogQLError) -> String {
    match err.span() {
        Some(span) => format!("{} (at {}..{})", err, span.start, span.end),
        None => err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_span_keeps_innermost() {
        let err = resolution_error("Unable to resolve field: foo")
            .with_span(Some(Span {
                start: 3,
                end:   6
            }))
            .with_span(Some(Span {
                start: 0,
                end:   20
            }));
        assert_eq!(
            err.span(),
            Some(Span {
                start: 3,
                end:   6
            })
        );
    }

    #[test]
    fn test_internal_is_not_exposed() {
        assert!(!internal_error("boom").is_exposed());
        assert!(query_error("nope").is_exposed());
        assert!(syntax_error("bad", None).is_exposed());
    }

    #[test]
    fn test_format_located() {
        let err = query_error("Invalid").with_span(Some(Span {
            start: 1,
            end:   2
        }));
        assert_eq!(format_located(&err), "Invalid (at 1..2)");
    }
}
