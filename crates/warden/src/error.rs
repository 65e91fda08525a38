use thiserror::Error;

use crate::http::HttpError;
use crate::store::StoreError;

/// Errors that can occur while harvesting.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The resource does not exist, and the caller required it to.
    #[error("Not found: {locator}")]
    NotFound { locator: String },

    /// The remote answered with a status outside the accepted set.
    #[error("Unexpected HTTP status {status} for {locator}")]
    UnexpectedStatus { status: u16, locator: String },

    /// The request never produced a response.
    #[error("Transport error for {locator}: {source}")]
    Transport {
        locator: String,
        #[source]
        source: HttpError,
    },

    /// The response body was not the JSON we expected.
    #[error("Could not decode response from {locator}: {message}")]
    Decode { locator: String, message: String },

    /// A locator could not be built from a base URL and path.
    #[error("Invalid locator '{raw}': {source}")]
    InvalidLocator {
        raw: String,
        #[source]
        source: url::ParseError,
    },

    /// The snapshot store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Shutdown was requested while waiting.
    #[error("Harvest interrupted")]
    Interrupted,
}

impl HarvestError {
    /// Create a not found error.
    #[inline]
    pub fn not_found(locator: impl Into<String>) -> Self {
        Self::NotFound {
            locator: locator.into(),
        }
    }

    /// Create an unexpected-status error.
    #[inline]
    pub fn unexpected_status(status: u16, locator: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            status,
            locator: locator.into(),
        }
    }

    /// Create a transport error.
    #[inline]
    pub fn transport(locator: impl Into<String>, source: HttpError) -> Self {
        Self::Transport {
            locator: locator.into(),
            source,
        }
    }

    /// Create a decode error.
    #[inline]
    pub fn decode(locator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            locator: locator.into(),
            message: message.into(),
        }
    }

    /// Whether this error must stop the whole run rather than one entity.
    ///
    /// A broken store or a shutdown request leaves nothing useful to do for
    /// the remaining entities.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Interrupted)
    }

    /// Check if this error is a missing-resource error.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which keeps progress output
/// and per-entity failure summaries to one line each.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for harvest operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_interrupt_errors_are_fatal() {
        assert!(HarvestError::Interrupted.is_fatal());
        assert!(
            HarvestError::Store(StoreError::corrupt("acme/a", "fields are not an object")).is_fatal()
        );
    }

    #[test]
    fn remote_errors_are_not_fatal() {
        assert!(!HarvestError::not_found("https://api.github.com/orgs/nope").is_fatal());
        assert!(!HarvestError::unexpected_status(500, "https://api.github.com/x").is_fatal());
        assert!(!HarvestError::decode("https://api.github.com/x", "eof").is_fatal());
        assert!(
            !HarvestError::transport(
                "https://api.github.com/x",
                HttpError::Transport("connection reset".to_string())
            )
            .is_fatal()
        );
    }

    #[test]
    fn short_error_message_takes_first_line() {
        let err = HarvestError::decode("https://api.github.com/x", "line one\nline two");
        assert_eq!(
            short_error_message(&err),
            "Could not decode response from https://api.github.com/x: line one"
        );
    }

    #[test]
    fn unexpected_status_display_names_status_and_locator() {
        let err = HarvestError::unexpected_status(500, "https://api.github.com/x");
        assert_eq!(
            err.to_string(),
            "Unexpected HTTP status 500 for https://api.github.com/x"
        );
    }
}
