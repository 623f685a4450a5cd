//! Purpose: Shared library crate used by the `emstore` CLI and tests.
//! Exports: `core` (table store, config, errors), `api` (stable surface),
//! `convert`, `locations`, and `logging` collaborators.
//! Role: Internal library backing the binary; not yet a stable public SDK.
//! Invariants: Treat the crate API as internal until a dedicated library release.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod convert;
pub mod core;
pub mod locations;
pub mod logging;
