//! Error types for the ranking engine.
//!
//! Every fallible operation returns a [`RankerError`] carrying an
//! [`ErrorKind`], a message, and optionally a suggestion and the
//! underlying source error. The kind decides how callers react: malformed
//! submissions are rejected, timeouts become resumable partial progress,
//! and corruption is surfaced as a hard failure.

use std::error::Error;
use std::fmt;

/// Exit codes for the command line tool.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// The submitted payload could not be parsed or validated.
    pub const INPUT_ERROR: i32 = 1;
    /// The durable store failed or missed its deadline.
    pub const STORE_ERROR: i32 = 2;
    /// Configuration error (invalid arguments, bad config file).
    pub const CONFIG_ERROR: i32 = 3;
    /// The operation stopped early and reported partial progress.
    pub const PARTIAL_FAILURE: i32 = 4;
    /// Persisted ranker state could not be decoded.
    pub const CORRUPTION: i32 = 5;
    /// Unknown/unexpected error.
    pub const UNKNOWN_ERROR: i32 = 99;
}

/// Categories of errors raised by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A submission or upload row could not be parsed or is inconsistent.
    MalformedInput,
    /// A store operation exceeded its deadline.
    Timeout,
    /// A requested category, test or ranker does not exist.
    NotFound,
    /// Persisted or cached bytes do not decode to a valid ranker.
    Corruption,
    /// The durable store reported a failure.
    Store,
    /// Invalid configuration.
    Config,
    /// Unknown or unexpected errors.
    Unknown,
}

impl ErrorKind {
    /// Get the exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::MalformedInput => exit_codes::INPUT_ERROR,
            ErrorKind::NotFound => exit_codes::INPUT_ERROR,
            ErrorKind::Timeout => exit_codes::PARTIAL_FAILURE,
            ErrorKind::Store => exit_codes::STORE_ERROR,
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::Corruption => exit_codes::CORRUPTION,
            ErrorKind::Unknown => exit_codes::UNKNOWN_ERROR,
        }
    }

    /// Get a user-friendly description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "Malformed input",
            ErrorKind::Timeout => "Deadline exceeded",
            ErrorKind::NotFound => "Not found",
            ErrorKind::Corruption => "Corrupt ranker state",
            ErrorKind::Store => "Store error",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Unknown => "Unknown error",
        }
    }

    /// Whether retrying the same request later may succeed.
    ///
    /// Ingestion clients use this to tell throttling apart from a payload
    /// that will never be accepted.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Store)
    }
}

/// The error type for ranking operations.
#[derive(Debug)]
pub struct RankerError {
    /// The kind of error.
    pub kind: ErrorKind,
    /// User-friendly error message.
    pub message: String,
    /// Optional suggestion for how to resolve the error.
    pub suggestion: Option<String>,
    /// The underlying error, if any.
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RankerError>;

impl RankerError {
    /// Create a new RankerError.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), suggestion: None, source: None }
    }

    /// Add a suggestion for how to resolve the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add the underlying error source.
    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// True when this error is a missed deadline.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Create a malformed input error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedInput, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).with_suggestion(
            "Persist the returned progress and resume on the next invocation.",
        )
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corruption, message).with_suggestion(
            "The stored byte layout is not trustworthy; rebuild the ranker.",
        )
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }
}

impl fmt::Display for RankerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)?;

        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl Error for RankerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Format an error for user display.
pub fn format_error_for_display(error: &RankerError) -> String {
    let mut output = format!("Error: {}", error.message);

    if let Some(ref suggestion) = error.suggestion {
        output.push_str(&format!("\n\nSuggestion: {}", suggestion));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_exit_codes() {
        assert_eq!(ErrorKind::MalformedInput.exit_code(), exit_codes::INPUT_ERROR);
        assert_eq!(ErrorKind::Timeout.exit_code(), exit_codes::PARTIAL_FAILURE);
        assert_eq!(ErrorKind::Store.exit_code(), exit_codes::STORE_ERROR);
        assert_eq!(ErrorKind::Config.exit_code(), exit_codes::CONFIG_ERROR);
        assert_eq!(ErrorKind::Corruption.exit_code(), exit_codes::CORRUPTION);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Store.is_transient());
        assert!(!ErrorKind::MalformedInput.is_transient());
        assert!(!ErrorKind::Corruption.is_transient());
    }

    #[test]
    fn test_ranker_error_display() {
        let error = RankerError::corruption("bad length 7");

        let display = format!("{}", error);
        assert!(display.contains("Corrupt ranker state"));
        assert!(display.contains("bad length 7"));
        assert!(display.contains("Suggestion"));
    }

    #[test]
    fn test_ranker_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let error = RankerError::store("write failed").with_source(io);

        assert!(error.source().is_some());
        assert_eq!(error.exit_code(), exit_codes::STORE_ERROR);
    }

    #[test]
    fn test_format_error_for_display() {
        let error = RankerError::malformed("score 'abc' is not an integer");
        let output = format_error_for_display(&error);

        assert!(output.starts_with("Error: score"));
        assert!(!output.contains("Suggestion"));
    }
}
