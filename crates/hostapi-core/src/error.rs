//! The error taxonomy shared by every layer of the dispatch core.
//!
//! Guests receive errors as plain data, never as a crash: [`HostApiError`] is the
//! single tagged value that flows from a capability, through the capability set,
//! into the wire envelope. `code()` is the stable, machine-matchable contract;
//! `message()` is diagnostic text a human (or a support ticket) reads.

use std::borrow::Cow;
use std::fmt;

/// The closed, stable vocabulary of error codes a guest can match on.
///
/// This enum is `#[non_exhaustive]` in spirit but not in practice: the
/// specification fixes this vocabulary, so new variants are a breaking change
/// to the wire contract and must be added deliberately, not incidentally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ApiNotFound,
    MethodNotFound,
    InvalidParameters,
    PolicyDenied,
    PolicyError,
    InternalError,
    HostApiSetClosed,
    ResponseTooLarge,
    IteratorNotFound,
    IteratorLimitExceeded,
}

impl ErrorCode {
    /// The wire-stable string rendering of this code, e.g. `"API_NOT_FOUND"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ApiNotFound => "API_NOT_FOUND",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::InvalidParameters => "INVALID_PARAMETERS",
            ErrorCode::PolicyDenied => "POLICY_DENIED",
            ErrorCode::PolicyError => "POLICY_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::HostApiSetClosed => "HOST_API_SET_CLOSED",
            ErrorCode::ResponseTooLarge => "RESPONSE_TOO_LARGE",
            ErrorCode::IteratorNotFound => "ITERATOR_NOT_FOUND",
            ErrorCode::IteratorLimitExceeded => "ITERATOR_LIMIT_EXCEEDED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single, programmatically matchable host API failure.
///
/// `detail` is an optional free-form string for extra machine-readable
/// context (e.g. the actual/allowed sizes for [`ErrorCode::ResponseTooLarge`]);
/// it is intentionally a string rather than an arbitrary JSON value so that
/// every error, regardless of origin, serializes identically at the boundary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HostApiError {
    code: ErrorCode,
    message: Cow<'static, str>,
    detail: Option<String>,
}

impl HostApiError {
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn api_not_found(api: &str) -> Self {
        Self::new(ErrorCode::ApiNotFound, format!("capability not found: {api}"))
    }

    pub fn method_not_found(api: &str, method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("method not found: {api}.{method}"),
        )
    }

    pub fn invalid_parameters(reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidParameters, format!("invalid parameters: {reason}"))
    }

    pub fn policy_denied(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(ErrorCode::PolicyDenied, reason.clone()).with_detail(reason)
    }

    pub fn policy_error(reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::PolicyError, format!("policy evaluation failed: {reason}"))
    }

    pub fn internal(reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, format!("internal error: {reason}"))
    }

    pub fn set_closed() -> Self {
        Self::new(ErrorCode::HostApiSetClosed, "host API set is closed")
    }

    pub fn response_too_large(actual: usize, allowed: usize) -> Self {
        Self::new(ErrorCode::ResponseTooLarge, "response exceeds the configured size limit")
            .with_detail(format!("actual={actual} allowed={allowed}"))
    }

    pub fn iterator_not_found() -> Self {
        Self::new(ErrorCode::IteratorNotFound, "iterator not found")
    }

    pub fn iterator_limit_exceeded(limit: usize) -> Self {
        Self::new(ErrorCode::IteratorLimitExceeded, "iterator limit exceeded")
            .with_detail(format!("limit={limit}"))
    }
}

/// Result alias used throughout the dispatch core.
pub type Result<T> = std::result::Result<T, HostApiError>;

/// Aggregates every sub-failure observed while closing a capability set's
/// children. One failing iterator or capability must never prevent closing
/// the remaining siblings (§4.5, §7); this type is the vehicle for reporting
/// all of them at once instead of shortcutting on the first.
#[derive(Debug, Default)]
pub struct CloseErrors {
    failures: Vec<(String, HostApiError)>,
}

impl CloseErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, context: impl Into<String>, error: HostApiError) {
        self.failures.push((context.into(), error));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapses the aggregate into the close result: success if nothing
    /// failed, otherwise a single `INTERNAL_ERROR` carrying every
    /// sub-failure's context so none of them are silently dropped.
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let message = self
            .failures
            .iter()
            .map(|(ctx, err)| format!("{ctx}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(HostApiError::internal(format!("close failed for: {message}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_through_str() {
        for code in [
            ErrorCode::ApiNotFound,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParameters,
            ErrorCode::PolicyDenied,
            ErrorCode::PolicyError,
            ErrorCode::InternalError,
            ErrorCode::HostApiSetClosed,
            ErrorCode::ResponseTooLarge,
            ErrorCode::IteratorNotFound,
            ErrorCode::IteratorLimitExceeded,
        ] {
            assert!(!code.as_str().is_empty());
        }
    }

    #[test]
    fn close_errors_aggregates_without_shortcutting() {
        let mut errors = CloseErrors::new();
        errors.push("capability:state", HostApiError::internal("boom"));
        errors.push("iterator:abc", HostApiError::internal("bang"));
        let err = errors.into_result().unwrap_err();
        assert!(err.message().contains("capability:state"));
        assert!(err.message().contains("iterator:abc"));
    }
}
