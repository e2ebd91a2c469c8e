use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::TaskType;

/// Operational classification of a failure.
///
/// - Transient: a coordination call failed, the current tick is abandoned and
///   the next one retries naturally.
/// - Configuration: rejected at startup, the process does not start.
/// - Handler: a task handler failed; counted, scheduling continues.
/// - Liveness: the heartbeat could not be refreshed; the process shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Configuration,
    Handler,
    Liveness,
}

/// Errors raised by a `Store` or one of its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("encoding metric: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decoding metric: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("invalid value stored at key={key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum TallyError {
    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("submitting task_type={task_type}: {message}")]
    Submit { task_type: TaskType, message: String },

    #[error("task_type={task_type} failed: {message}")]
    Handler { task_type: TaskType, message: String },

    #[error("liveness: {0}")]
    Liveness(String),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("http listener {address}: {source}")]
    Listener {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl TallyError {
    pub fn handler(task_type: TaskType, message: impl Into<String>) -> Self {
        Self::Handler {
            task_type,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TallyError::Store(_) | TallyError::Submit { .. } => ErrorKind::Transient,
            TallyError::HandlerNotFound(_) | TallyError::Handler { .. } => ErrorKind::Handler,
            TallyError::DuplicateHandler(_) | TallyError::Config(_) | TallyError::Listener { .. } => {
                ErrorKind::Configuration
            }
            TallyError::Liveness(_) => ErrorKind::Liveness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TallyError::Store(StoreError::Backend("down".into())), ErrorKind::Transient)]
    #[case(TallyError::handler(TaskType::new("pull"), "boom"), ErrorKind::Handler)]
    #[case(TallyError::DuplicateHandler(TaskType::new("pull")), ErrorKind::Configuration)]
    #[case(TallyError::Liveness("heartbeat".into()), ErrorKind::Liveness)]
    #[case(
        TallyError::Listener {
            address: "0.0.0.0:8080".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        },
        ErrorKind::Configuration
    )]
    fn errors_are_classified(#[case] err: TallyError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn handler_error_mentions_task_type() {
        let err = TallyError::handler(TaskType::new("pull"), "upstream unreachable");
        let msg = err.to_string();
        assert!(msg.contains("pull"));
        assert!(msg.contains("upstream unreachable"));
    }

    #[test]
    fn listener_error_names_the_address() {
        let err = TallyError::Listener {
            address: "127.0.0.1:8082".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("http listener 127.0.0.1:8082"));
        assert_ne!(err.kind(), ErrorKind::Liveness);
    }
}
