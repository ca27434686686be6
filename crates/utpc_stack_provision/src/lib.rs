//! Control-plane adapters and handlers that apply UTPC deploy plans.
//!
//! Deterministic planning lives in `utpc_stack_core`; this crate owns every
//! externally visible side effect: asset packaging, control-plane calls,
//! teardown, logging setup, and the `utpc_stack` binary.

pub mod adapters;
pub mod handlers;
pub mod logging;
