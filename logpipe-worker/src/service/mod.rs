//! Service layer
//!
//! Services contain the log shipping logic of the worker: per-job writers,
//! their silence timers, the shared per-URL sinks and the registry that owns
//! them. Delivery itself goes through the repository layer.

pub mod log_sink;
pub mod log_writer;
pub mod silence_timer;
pub mod sink_registry;

// Re-export traits
pub use log_writer::LogWriter;

// Re-export implementations
pub use log_sink::{LogPartSink, RetryPolicy, SinkOptions};
pub use log_writer::{SinkLogWriter, WriterOptions};
pub use sink_registry::SinkRegistry;
