//! Core domain types
//!
//! These types are shared between the HTTP client (which serializes them on
//! the wire) and the worker (which produces them).

pub mod job;
pub mod log;
