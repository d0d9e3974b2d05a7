//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for intraday bar fanout
//! with no I/O. Everything here is plain Rust guarded by in-process locks.

/// Symbols, bars, and upstream connection state.
pub mod streaming;

/// Symbol to client-session subscription tracking.
pub mod subscription;
