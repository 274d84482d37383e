//! Signpipe Core - concurrent hash-signing pipeline
//!
//! Integers flow through three stages connected by bounded queues:
//! a single hash (one serialized slow call plus two fast calls per item),
//! a multi hash (six fast calls per item), and a combining sink that sorts
//! and joins every signature. Per-item work is concurrent; the final result
//! is deterministic.

pub mod barrier;
pub mod error;
pub mod fan_out;
pub mod item;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod signer;
pub mod stage;

// Re-exports for convenience
pub use error::{Call, PipelineError};
pub use item::{Item, ItemKind};
pub use logging::{SpinnerLogger, init_logging};
pub use pipeline::{
    DEFAULT_QUEUE_CAPACITY, Pipeline, PipelineConfig, default_max_in_flight, execute_pipeline, run,
};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use signer::{DigestSigner, Signer, SignerContext, SignerError};
pub use stage::{CombineResults, MultiHash, SingleHash, Stage};
