//! WASM sandbox binding: wires `hostapi-core`'s dispatch entry points onto a
//! `wasmtime` `Linker` as `okra.run_host_api`/`okra.next`, and runs the
//! iterator staleness sweeper that reclaims what a misbehaving guest leaves
//! behind.

pub mod binding;
pub mod config;
pub mod sweep;

pub use binding::{build_engine, register_host_functions, BindingError, GuestState};
pub use config::{BindingConfig, EnginePolicy, LogVerbosity};
pub use sweep::{spawn as spawn_sweep, SweepHandle};
