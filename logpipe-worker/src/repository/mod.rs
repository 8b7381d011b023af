//! Repository layer
//!
//! Repositories are stateless HTTP clients that abstract communication
//! with the log aggregator. They carry no buffering or retry logic.
//!
//! All repositories are trait-based to enable testing and mocking.

mod log_parts;

// Re-export traits
pub use log_parts::LogPartRepository;

// Re-export implementations
pub use log_parts::HttpLogPartRepository;

#[cfg(test)]
pub mod testing;
