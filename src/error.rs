//! Error types for the handoff router

use thiserror::Error;
use tower::BoxError;

/// Result type alias for the handoff router
pub type Result<T> = std::result::Result<T, RouterError>;

/// Main error type for the handoff router.
///
/// Variants fall into three families:
/// - configuration errors, fatal at startup and a programming bug at request time
/// - routing errors, always recovered by the runtime into a degraded answer
/// - collaborator errors, recovered inside the responder that triggered them
#[derive(Debug, Error)]
pub enum RouterError {
    /// A responder with this name is already registered
    #[error("Duplicate responder: {name}")]
    DuplicateResponder { name: String },

    /// No entry responder configured
    #[error("No entry point configured")]
    NoEntryPoint,

    /// No fallback responder configured
    #[error("No fallback responder configured")]
    NoFallback,

    /// Lookup of a responder by name failed
    #[error("Unknown responder: {name}")]
    UnknownResponder { name: String },

    /// A responder exposes a tool its registration did not declare
    #[error("Responder {responder} exposes undeclared tool: {tool}")]
    UndeclaredTool { responder: String, tool: String },

    /// A handoff that the graph does not permit
    #[error("Invalid handoff: {source_name} -> {target}")]
    InvalidHandoff { source_name: String, target: String },

    /// The hop budget ran out
    #[error("Maximum hops exceeded: {max_hops}")]
    HopsExhausted { max_hops: usize },

    /// A lookup found nothing
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// The language completion collaborator could not answer
    #[error("Completion unavailable: {message}")]
    CompletionUnavailable { message: String },

    /// A collaborator call or hop ran past its deadline
    #[error("Timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// Tool arguments failed validation
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration could not be loaded or is out of bounds
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Error from the OpenAI API
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl RouterError {
    pub fn timeout(dur: std::time::Duration) -> Self {
        RouterError::Timeout {
            millis: dur.as_millis() as u64,
        }
    }

    /// Registry and graph wiring mistakes.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RouterError::DuplicateResponder { .. }
                | RouterError::NoEntryPoint
                | RouterError::NoFallback
                | RouterError::UnknownResponder { .. }
                | RouterError::UndeclaredTool { .. }
                | RouterError::Config { .. }
        )
    }

    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            RouterError::InvalidHandoff { .. } | RouterError::HopsExhausted { .. }
        )
    }

    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            RouterError::NotFound { .. }
                | RouterError::CompletionUnavailable { .. }
                | RouterError::Timeout { .. }
                | RouterError::OpenAI(_)
                | RouterError::Database(_)
        )
    }

    /// Worth another attempt against the same collaborator.
    pub fn is_transient(&self) -> bool {
        match self {
            RouterError::Timeout { .. } | RouterError::CompletionUnavailable { .. } => true,
            RouterError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }

    /// Recover a `RouterError` from a boxed service error, keeping the message otherwise.
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<RouterError>() {
            Ok(e) => *e,
            Err(other) => RouterError::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RouterError::HopsExhausted { max_hops: 4 };
        assert_eq!(err.to_string(), "Maximum hops exceeded: 4");

        let err = RouterError::InvalidHandoff {
            source_name: "search".to_string(),
            target: "generic".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid handoff: search -> generic");
    }

    #[test]
    fn test_error_families() {
        assert!(RouterError::NoEntryPoint.is_configuration());
        assert!(RouterError::UnknownResponder {
            name: "x".into()
        }
        .is_configuration());
        assert!(RouterError::HopsExhausted { max_hops: 1 }.is_routing());
        assert!(RouterError::CompletionUnavailable {
            message: "quota".into()
        }
        .is_collaborator());
        assert!(!RouterError::NotFound {
            message: "none".into()
        }
        .is_transient());
        assert!(RouterError::Timeout { millis: 5 }.is_transient());
    }

    #[test]
    fn test_from_boxed_round_trips_router_errors() {
        let boxed: BoxError = Box::new(RouterError::Timeout { millis: 10 });
        assert!(matches!(
            RouterError::from_boxed(boxed),
            RouterError::Timeout { millis: 10 }
        ));

        let boxed: BoxError = "plain failure".into();
        match RouterError::from_boxed(boxed) {
            RouterError::Other(msg) => assert_eq!(msg, "plain failure"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_from_openai() {
        let openai_err = async_openai::error::OpenAIError::InvalidArgument("test".to_string());
        let err: RouterError = openai_err.into();
        assert!(matches!(err, RouterError::OpenAI(_)));
        assert!(err.is_collaborator());
    }
}
