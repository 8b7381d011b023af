//! Data Transfer Objects
//!
//! Payloads the worker receives from the outside world. Only the fields the
//! log shipping layer consumes are modelled strictly; the rest is carried as
//! raw JSON.

pub mod job;
