//! The guest/host wire types (§6): UTF-8 JSON, camelCase on the wire,
//! snake_case in Rust.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, HostApiError};
use crate::ids::ServiceIdentity;

/// Trace/metric propagation context carried on every request, plus the
/// caller's self-reported identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baggage: Option<serde_json::Value>,
    pub service_info: ServiceInfo,
}

/// The caller's self-reported name/version, turned into a [`ServiceIdentity`]
/// at the dispatch boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

impl From<&ServiceInfo> for ServiceIdentity {
    fn from(info: &ServiceInfo) -> Self {
        ServiceIdentity::new(info.name.clone(), info.version.clone())
    }
}

/// The `run_host_api` request envelope.
///
/// `parameters` is captured as the raw JSON substring rather than parsed into
/// a [`serde_json::Value`]: the binding treats parameters as opaque bytes
/// (§6), and a guest's multi-key parameter object must reach the capability
/// byte-identical to how it was sent — parsing into a `Value` and
/// re-serializing would reorder its keys (`Value`'s object map is unordered).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub api: String,
    pub method: String,
    pub parameters: Box<serde_json::value::RawValue>,
    pub metadata: Metadata,
}

/// The wire rendering of a [`HostApiError`]: stable code, human message, and
/// an optional machine-readable detail string.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&HostApiError> for ErrorBody {
    fn from(err: &HostApiError) -> Self {
        Self {
            code: err.code().as_str(),
            message: err.message().to_string(),
            details: err.detail().map(str::to_string),
        }
    }
}

/// The `run_host_api` response envelope (§6): `{success, data?, error?}`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(err: &HostApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody::from(err)),
        }
    }

    /// The envelope substituted in place of an oversized response (§4.7
    /// step 4): the binding never lets a response exceeding
    /// `max_response_size` reach the guest, even as an error body.
    pub fn response_too_large(actual: usize, allowed: usize) -> Self {
        Self::failure(&HostApiError::response_too_large(actual, allowed))
    }
}

/// The `next` request envelope.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextRequest {
    pub iterator_id: String,
}

/// The `next` response envelope (§6): `{success, data?, hasMore, error?}`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl NextResponse {
    pub fn success(data: serde_json::Value, has_more: bool) -> Self {
        Self {
            success: true,
            data: Some(data),
            has_more,
            error: None,
        }
    }

    pub fn failure(err: &HostApiError) -> Self {
        Self {
            success: false,
            data: None,
            has_more: false,
            error: Some(ErrorBody::from(err)),
        }
    }
}

/// A malformed-envelope dispatch error (§7): parsing the guest's JSON failed
/// before a capability was ever reached.
pub fn malformed_envelope(reason: impl std::fmt::Display) -> HostApiError {
    HostApiError::new(ErrorCode::InvalidParameters, format!("malformed request envelope: {reason}"))
}
