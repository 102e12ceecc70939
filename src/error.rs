//! Error types and error handling strategy for thunk execution.
//!
//! Every failure in this crate surfaces through a single [`Error`] value that
//! travels inside a failed completion handle. Errors are never thrown past an
//! operation boundary:
//!
//! - Errors are explicit and typed (an [`ErrorKind`] plus optional message)
//! - Errors carry the identity of the operation that produced them
//!   ([`ErrorContext`]) once the executor has attributed them
//! - Errors are classified so callers above the whole-sequence boundary can
//!   decide whether a retry makes sense; this crate itself never retries
//!
//! # Error Kinds
//!
//! - **Configuration**: malformed or incomplete execution context bundles
//! - **Lookup**: a named host kernel or custom call handler was not found
//! - **ResourceExhausted**: allocation or pool failure surfaced by an operation
//! - **Execution**: operation-specific failure
//! - **RendezvousTimeout**: a collective participant never arrived
//! - **InternalInvariantViolation**: a scheduler bug, e.g. conflicting
//!   footprints running concurrently
//! - **InvalidArgument**: bad buffer slice or out-of-range access
//! - **Unavailable**: a completion signal was dropped without being written

use core::fmt;
use std::sync::Arc;

use crate::thunk::ThunkInfo;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Execution context bundles are malformed or incomplete.
    Configuration,
    /// A host kernel or handler could not be resolved by name.
    Lookup,
    /// Allocation or thread pool failure.
    ResourceExhausted,
    /// Operation-specific failure.
    Execution,
    /// Not every collective participant arrived before the deadline.
    RendezvousTimeout,
    /// Conflicting operations were scheduled concurrently (scheduler bug).
    InternalInvariantViolation,
    /// Invalid buffer slice, size mismatch or similar caller mistake.
    InvalidArgument,
    /// A completion signal was dropped without a value.
    Unavailable,
}

impl ErrorKind {
    /// Returns a stable, human-readable name for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "ConfigurationError",
            Self::Lookup => "LookupError",
            Self::ResourceExhausted => "ResourceExhaustion",
            Self::Execution => "ExecutionError",
            Self::RendezvousTimeout => "RendezvousTimeout",
            Self::InternalInvariantViolation => "InternalInvariantViolation",
            Self::InvalidArgument => "InvalidArgument",
            Self::Unavailable => "Unavailable",
        }
    }

    /// Returns the recoverability classification for this error kind.
    ///
    /// This is advisory for callers above the whole-sequence invocation;
    /// nothing inside the executor retries.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::ResourceExhausted | Self::RendezvousTimeout | Self::Unavailable => {
                Recoverability::Transient
            }
            Self::Configuration
            | Self::Lookup
            | Self::InvalidArgument
            | Self::InternalInvariantViolation => Recoverability::Permanent,
            Self::Execution => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable by the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of error recoverability for caller-level retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on a fresh invocation.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Depends on the operation that failed.
    Unknown,
}

/// Diagnostic context for an error: the identity of the failing operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Name of the operation that failed.
    pub op_name: Option<String>,
    /// Name of the module owning the operation.
    pub module_name: Option<String>,
    /// Numeric id of the module owning the operation.
    pub module_id: Option<i64>,
}

impl ErrorContext {
    /// Builds a context from operation identity metadata.
    #[must_use]
    pub fn from_info(info: &ThunkInfo) -> Self {
        Self {
            op_name: Some(info.op_name.clone()),
            module_name: Some(info.module_name.clone()),
            module_id: Some(info.module_id),
        }
    }

    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.op_name.is_none() && self.module_name.is_none() && self.module_id.is_none()
    }
}

/// The main error type for thunk execution.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                op_name: None,
                module_name: None,
                module_id: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Attributes the error to an operation unless it is already attributed.
    ///
    /// Nested executors attribute errors to the innermost failing operation,
    /// so outer layers keep that attribution.
    #[must_use]
    pub fn attributed_to(self, info: &ThunkInfo) -> Self {
        if self.context.is_empty() {
            self.with_context(ErrorContext::from_info(info))
        } else {
            self
        }
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this is a rendezvous timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::RendezvousTimeout)
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration).with_message(detail)
    }

    /// Creates a lookup error for an unresolved name.
    #[must_use]
    pub fn not_found(what: &str, name: &str) -> Self {
        Self::new(ErrorKind::Lookup).with_message(format!("{what} '{name}' not found"))
    }

    /// Creates a resource exhaustion error.
    #[must_use]
    pub fn resource_exhausted(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted).with_message(detail)
    }

    /// Creates an execution error.
    #[must_use]
    pub fn execution(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution).with_message(detail)
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_message(detail)
    }

    /// Creates an internal invariant violation (scheduler bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalInvariantViolation).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(op) = &self.context.op_name {
            write!(f, " (op {op}")?;
            if let Some(module) = &self.context.module_name {
                write!(f, " in module {module}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<crate::runtime::ConfigError> for Error {
    fn from(e: crate::runtime::ConfigError) -> Self {
        let msg = e.to_string();
        Self::new(ErrorKind::Configuration)
            .with_message(msg)
            .with_source(e)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach a context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for thunk execution.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Lookup);
        assert_eq!(err.to_string(), "LookupError");
    }

    #[test]
    fn display_with_message_and_op() {
        let info = ThunkInfo::new("fusion.3").with_module("main", 7);
        let err = Error::execution("boom").attributed_to(&info);
        assert_eq!(
            err.to_string(),
            "ExecutionError: boom (op fusion.3 in module main)"
        );
        assert_eq!(err.context().module_id, Some(7));
    }

    #[test]
    fn attribution_keeps_innermost_operation() {
        let inner = ThunkInfo::new("inner");
        let outer = ThunkInfo::new("outer");
        let err = Error::execution("x")
            .attributed_to(&inner)
            .attributed_to(&outer);
        assert_eq!(err.context().op_name.as_deref(), Some("inner"));
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::execution("outer").with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn result_ext_adds_message() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::Unavailable));
        let err = res.context("promise dropped").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.to_string(), "Unavailable: promise dropped");
    }

    #[test]
    fn recoverability_classification() {
        assert!(ErrorKind::RendezvousTimeout.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
        assert_eq!(
            ErrorKind::Execution.recoverability(),
            Recoverability::Unknown
        );
        assert!(Error::new(ErrorKind::RendezvousTimeout).is_timeout());
    }
}
