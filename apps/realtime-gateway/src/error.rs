use std::fmt;

/// Failure reported by an external collaborator (identity service, backend
/// REST API, settings store, message store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "NOT_FOUND".to_string(),
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            code: "UPSTREAM_ERROR".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!(?err, "backend request failed");
        Self::upstream("Backend request failed")
    }
}

/// Why an event handler did not complete.
///
/// Handlers never emit these to clients themselves; the event router decides
/// per event whether a failure becomes an `error` frame or is dropped.
#[derive(Debug)]
pub enum HandlerError {
    /// The connection has not completed `authenticate` yet.
    Unauthenticated,
    /// An external collaborator failed.
    Service(ServiceError),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Unauthenticated => f.write_str("not authenticated"),
            HandlerError::Service(err) => write!(f, "service failure: {err}"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<ServiceError> for HandlerError {
    fn from(err: ServiceError) -> Self {
        HandlerError::Service(err)
    }
}
