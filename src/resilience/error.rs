use thiserror::Error;

/// Why a rate-limited request did not produce a value.
///
/// `Failed` carries the request's own error exactly as it was returned by the
/// final attempt, with no wrapping of its message.
#[derive(Debug, Error)]
pub enum RequestError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("queue cleared for provider '{provider}'")]
    QueueCleared { provider: String },

    #[error("request abandoned before completion")]
    Abandoned,
}

impl<E> RequestError<E> {
    pub fn is_queue_cleared(&self) -> bool {
        matches!(self, RequestError::QueueCleared { .. })
    }

    pub fn failure(&self) -> Option<&E> {
        match self {
            RequestError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// The original error, if the request itself failed.
    pub fn into_failure(self) -> Option<E> {
        match self {
            RequestError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_displays_original_message() {
        let err: RequestError<String> = RequestError::Failed("invalid api key".to_string());
        assert_eq!(err.to_string(), "invalid api key");
        assert_eq!(err.failure().map(String::as_str), Some("invalid api key"));
        assert_eq!(err.into_failure(), Some("invalid api key".to_string()));
    }

    #[test]
    fn test_queue_cleared_message() {
        let err: RequestError<String> = RequestError::QueueCleared {
            provider: "openai".to_string(),
        };
        assert!(err.is_queue_cleared());
        assert!(err.to_string().contains("queue cleared"));
        assert!(err.into_failure().is_none());
    }
}
