//! Logpipe Core
//!
//! Core types shared by the logpipe crates.
//!
//! This crate contains:
//! - Domain types: log parts and job finish states
//! - DTOs: the job payload received by the worker

pub mod domain;
pub mod dto;
