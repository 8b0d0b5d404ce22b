//! The WASM sandbox binding (§4.7): registers `okra.run_host_api` and
//! `okra.next` as host functions on a `wasmtime` `Linker`, and implements
//! the per-call protocol — bounds-checked memory access, guest-driven
//! allocation, and the oversized-response substitution.

use std::sync::Arc;

use hostapi_core::{CapabilitySet, DispatchContext, ServiceIdentity};
use wasmtime::{Caller, Config as EngineConfig, Engine, Linker, Memory, TypedFunc};

use crate::config::EnginePolicy;

/// Errors specific to the binding layer (transport failures per §7): these
/// never reach the guest as envelope data — a transport failure means the
/// binding itself returns `(0, 0)` and the guest stub treats the call as
/// fatal.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("wasm engine error: {0}")]
    Engine(#[from] anyhow::Error),
}

/// Per-guest-instance state stored in the `wasmtime` `Store`: the capability
/// set this guest dispatches against, and the caller identity the host
/// assigns to it — never the guest's own self-reported claims (§4.5 step 4).
pub struct GuestState {
    pub capability_set: Arc<CapabilitySet>,
    pub caller: ServiceIdentity,
}

/// Build an `Engine` configured per the binding's [`EnginePolicy`]: fuel
/// metering and epoch interruption are opt-in, and async host functions
/// require `async_support`.
pub fn build_engine(policy: EnginePolicy) -> Result<Engine, BindingError> {
    let mut config = EngineConfig::new();
    config.async_support(true);
    if policy.fuel_limit > 0 {
        config.consume_fuel(true);
    }
    if policy.epoch_ticks > 0 {
        config.epoch_interruption(true);
    }
    Engine::new(&config).map_err(BindingError::from)
}

/// Register `okra.run_host_api` and `okra.next` on the linker (§4.7).
pub fn register_host_functions(linker: &mut Linker<GuestState>) -> Result<(), BindingError> {
    linker
        .func_wrap2_async("okra", "run_host_api", |mut caller: Caller<'_, GuestState>, request_ptr: i32, request_len: i32| {
            Box::new(async move { dispatch_call(&mut caller, request_ptr, request_len, Endpoint::RunHostApi).await })
        })
        .map_err(BindingError::from)?;

    linker
        .func_wrap2_async("okra", "next", |mut caller: Caller<'_, GuestState>, request_ptr: i32, request_len: i32| {
            Box::new(async move { dispatch_call(&mut caller, request_ptr, request_len, Endpoint::Next).await })
        })
        .map_err(BindingError::from)?;

    Ok(())
}

enum Endpoint {
    RunHostApi,
    Next,
}

/// The per-call protocol shared by both entry points (§4.7 steps 1-7). Any
/// failure here is a transport failure: the function returns `(0, 0)` and
/// never fabricates an envelope, since at that point no envelope could be
/// trusted to reach the guest's own allocator.
async fn dispatch_call(
    caller: &mut Caller<'_, GuestState>,
    request_ptr: i32,
    request_len: i32,
    endpoint: Endpoint,
) -> anyhow::Result<(i32, i32)> {
    let max_request_size = caller.data().capability_set.config().limits().max_request_size;
    if request_len < 0 || request_len as usize > max_request_size {
        return Ok((0, 0));
    }

    let memory = match get_memory(caller) {
        Some(memory) => memory,
        None => return Ok((0, 0)),
    };

    let request = match read_request(caller, &memory, request_ptr, request_len) {
        Some(request) => request,
        None => return Ok((0, 0)),
    };

    let set = caller.data().capability_set.clone();
    let dispatch_ctx = DispatchContext::new(&set, caller.data().caller.clone());

    let response = match endpoint {
        Endpoint::RunHostApi => hostapi_core::dispatch::run_host_api(&dispatch_ctx, &request).await,
        Endpoint::Next => hostapi_core::dispatch::next(&dispatch_ctx, &request).await,
    };

    let max_response_size = set.config().limits().max_response_size;
    let response = if response.len() > max_response_size {
        encode_response_too_large(response.len(), max_response_size, &endpoint)
    } else {
        response
    };

    write_response(caller, &memory, &response).await
}

fn encode_response_too_large(actual: usize, allowed: usize, endpoint: &Endpoint) -> Vec<u8> {
    let err = hostapi_core::HostApiError::response_too_large(actual, allowed);
    let value = match endpoint {
        Endpoint::RunHostApi => serde_json::to_vec(&hostapi_core::envelope::ResponseEnvelope::failure(&err)),
        Endpoint::Next => serde_json::to_vec(&hostapi_core::envelope::NextResponse::failure(&err)),
    };
    value.expect("envelope serialization is infallible by construction")
}

fn get_memory(caller: &mut Caller<'_, GuestState>) -> Option<Memory> {
    caller.get_export("memory").and_then(|export| export.into_memory())
}

fn read_request(caller: &mut Caller<'_, GuestState>, memory: &Memory, ptr: i32, len: i32) -> Option<Vec<u8>> {
    let data = memory.data(&*caller);
    let start = usize::try_from(ptr).ok()?;
    let len = usize::try_from(len).ok()?;
    let end = start.checked_add(len)?;
    data.get(start..end).map(|slice| slice.to_vec())
}

async fn write_response(caller: &mut Caller<'_, GuestState>, memory: &Memory, response: &[u8]) -> anyhow::Result<(i32, i32)> {
    let allocate: TypedFunc<i32, i32> = match caller.get_export("allocate").and_then(|export| export.into_func()) {
        Some(func) => match func.typed(&*caller) {
            Ok(typed) => typed,
            Err(_) => return Ok((0, 0)),
        },
        None => return Ok((0, 0)),
    };

    let len = match i32::try_from(response.len()) {
        Ok(len) => len,
        Err(_) => return Ok((0, 0)),
    };

    let ptr = match allocate.call_async(&mut *caller, len).await {
        Ok(ptr) => ptr,
        Err(_) => return Ok((0, 0)),
    };

    let start = usize::try_from(ptr).unwrap_or(usize::MAX);
    let end = start.saturating_add(response.len());
    let data = memory.data_mut(&mut *caller);
    match data.get_mut(start..end) {
        Some(slice) => {
            slice.copy_from_slice(response);
            Ok((ptr, len))
        }
        None => {
            deallocate_best_effort(caller, ptr).await;
            Ok((0, 0))
        }
    }
}

async fn deallocate_best_effort(caller: &mut Caller<'_, GuestState>, ptr: i32) {
    if let Some(func) = caller.get_export("deallocate").and_then(|export| export.into_func()) {
        if let Ok(typed) = func.typed::<i32, ()>(&*caller) {
            let _ = typed.call_async(&mut *caller, ptr).await;
        }
    }
}
