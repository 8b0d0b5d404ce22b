//! The two pure dispatch entry points (§4.6): `run_host_api` and `next`.
//!
//! Both take raw request bytes and return raw response bytes — always a
//! well-formed envelope, never a Rust error. The only outcome that isn't an
//! envelope is a transport failure, and that is entirely the sandbox
//! binding's concern (§4.7): these functions are plain async library code,
//! reusable by any binding, not only the WASM one.

use crate::context::{CallContext, Cancellation, Deadline};
use crate::envelope::{malformed_envelope, NextRequest, NextResponse, RequestEnvelope, ResponseEnvelope};
use crate::error::HostApiError;
use crate::ids::ServiceIdentity;
use crate::set::CapabilitySet;

/// Everything a dispatch call needs beyond the request bytes themselves: the
/// capability set to route against, and the caller's identity as the host
/// (not the guest's self-reported payload) knows it. Caller identity is
/// ambient to the sandboxed guest instance, not something the request body
/// is trusted to assert (§4.5 step 4).
pub struct DispatchContext<'a> {
    set: &'a CapabilitySet,
    caller: ServiceIdentity,
    deadline: Deadline,
    cancellation: Cancellation,
}

impl<'a> DispatchContext<'a> {
    pub fn new(set: &'a CapabilitySet, caller: ServiceIdentity) -> Self {
        Self {
            set,
            caller,
            deadline: Deadline::none(),
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    fn call_context(&self) -> CallContext {
        CallContext::new(self.caller.clone())
            .with_deadline(self.deadline)
            .with_cancellation(self.cancellation.child())
    }
}

/// Dispatch one `okra.run_host_api` call. `request` is the guest-supplied
/// JSON body; the result is always a serialized [`ResponseEnvelope`], JSON
/// encoded.
pub async fn run_host_api(ctx: &DispatchContext<'_>, request: &[u8]) -> Vec<u8> {
    let envelope: RequestEnvelope = match serde_json::from_slice(request) {
        Ok(envelope) => envelope,
        Err(err) => return encode(&ResponseEnvelope::failure(&malformed_envelope(err))),
    };

    let params = envelope.parameters.get().as_bytes();

    let call_ctx = ctx.call_context();
    let outcome = ctx.set.execute(&call_ctx, &envelope.api, &envelope.method, params).await;

    let response = match outcome {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => ResponseEnvelope::success(data),
            Err(err) => ResponseEnvelope::failure(&HostApiError::internal(format!(
                "capability returned non-JSON response: {err}"
            ))),
        },
        Err(err) => ResponseEnvelope::failure(&err),
    };
    encode(&response)
}

/// Dispatch one `okra.next` call.
pub async fn next(ctx: &DispatchContext<'_>, request: &[u8]) -> Vec<u8> {
    let envelope: NextRequest = match serde_json::from_slice(request) {
        Ok(envelope) => envelope,
        Err(err) => return encode(&NextResponse::failure(&malformed_envelope(err))),
    };

    let id = match crate::ids::IteratorId::parse(envelope.iterator_id) {
        Some(id) => id,
        None => return encode(&NextResponse::failure(&HostApiError::iterator_not_found())),
    };

    let call_ctx = ctx.call_context();
    let response = match ctx.set.next_iterator(&call_ctx, &id).await {
        Ok(outcome) => match serde_json::from_slice(&outcome.data) {
            Ok(data) => NextResponse::success(data, outcome.has_more),
            Err(err) => NextResponse::failure(&HostApiError::internal(format!(
                "iterator produced non-JSON chunk: {err}"
            ))),
        },
        Err(err) => NextResponse::failure(&err),
    };
    encode(&response)
}

fn encode(response: &impl serde::Serialize) -> Vec<u8> {
    // Every field in these envelopes is itself already JSON-representable,
    // so encoding a well-formed envelope cannot fail in practice; a failure
    // here would indicate a bug in the envelope types, not bad guest input.
    serde_json::to_vec(response).expect("envelope serialization is infallible by construction")
}
