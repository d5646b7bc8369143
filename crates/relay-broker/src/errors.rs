//! Broker error types.

use thiserror::Error;

/// Failures surfaced by a [`Broker`](crate::Broker) or
/// [`Subscription`](crate::Subscription).
///
/// Variants carry display strings only, so the raw transport error never
/// reaches a client.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The connection could not be established or the subscribe call failed.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// Reading from an established subscription failed.
    #[error("broker receive failed: {0}")]
    Receive(String),
    /// The broker ended the subscription stream.
    #[error("subscription closed by broker")]
    Closed,
    /// Any other broker command failed.
    #[error("broker command failed: {0}")]
    Command(String),
}

impl BrokerError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Receive(_) => "receive",
            Self::Closed => "closed",
            Self::Command(_) => "command",
        }
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display() {
        let err = BrokerError::Unavailable("connection refused".into());
        assert_eq!(err.to_string(), "broker unavailable: connection refused");
    }

    #[test]
    fn closed_display() {
        assert_eq!(
            BrokerError::Closed.to_string(),
            "subscription closed by broker"
        );
    }

    #[test]
    fn error_kinds_are_snake_case() {
        let errors = [
            BrokerError::Unavailable(String::new()),
            BrokerError::Receive(String::new()),
            BrokerError::Closed,
            BrokerError::Command(String::new()),
        ];
        for err in errors {
            assert!(
                err.error_kind()
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '_')
            );
        }
    }
}
