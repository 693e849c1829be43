//! Purpose: Library crate backing the `chunkwise` CLI and embedders.
//! Exports: `api` (readers, options, policies, metrics, errors).
//! Role: Bounded-memory CSV and JSON decoding over blocking or async byte sources.
//! Invariants: `api` is the only public path; `core` layout may change freely.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod core;
