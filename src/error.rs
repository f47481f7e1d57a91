use std::time::Duration;

use thiserror::Error;

/// Errors synthesized by the crate itself.
///
/// Producer errors travel through a future untouched; this type only covers
/// the failures the combinators, aggregates, dispatcher and poller create on
/// their own. Any error channel that can hold one of these implements
/// `From<Error>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A value was missing or rejected by a predicate.
    #[error("value failed validation")]
    Validation,
    /// An aggregate that needs at least one input received none.
    #[error("no futures were supplied")]
    EmptyInput,
    /// Every input of an `any` aggregate failed.
    #[error("all {count} futures failed")]
    AllFailed { count: usize },
    /// A retrying operation ran out of attempts.
    #[error("gave up after {attempts} attempts")]
    RetryExhausted { attempts: usize },
    /// A timer fired before the subject settled.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The underlying operation was cancelled.
    #[error("operation was cancelled")]
    Cancelled,
    /// A `(value?, error?)` callback delivered neither.
    #[error("callback produced neither a value nor an error")]
    MissingResult,
    /// The producer side was dropped before settling.
    #[error("producer dropped without settling")]
    Abandoned,
    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn message(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Message(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Message(message.to_owned())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::Error;
    use std::time::Duration;

    #[test]
    fn display_messages() {
        assert_eq!(Error::AllFailed { count: 3 }.to_string(), "all 3 futures failed");
        assert_eq!(
            Error::RetryExhausted { attempts: 2 }.to_string(),
            "gave up after 2 attempts"
        );
        assert_eq!(
            Error::Timeout(Duration::from_millis(5)).to_string(),
            "timed out after 5ms"
        );
        assert_eq!(Error::from("boom").to_string(), "boom");
    }
}
