//! Common error type for signing pipelines

use crate::item::ItemKind;

/// Which external hash function a [`PipelineError::Signer`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Fast,
    Slow,
}

impl std::fmt::Display for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => f.write_str("fast"),
            Self::Slow => f.write_str("slow"),
        }
    }
}

/// Fatal error from a pipeline run.
///
/// Every variant aborts the whole run: there is no retry and no partial
/// result. The orchestrator surfaces the first root cause to the caller.
#[derive(Debug)]
pub enum PipelineError {
    /// An item arrived at a stage in a form the stage cannot interpret.
    Shape {
        stage: &'static str,
        expected: ItemKind,
        found: String,
    },
    /// An external hash function failed.
    Signer { call: Call, message: String },
    /// A fan-out join observed a different number of completions than workers spawned.
    Barrier { expected: usize, observed: usize },
    /// The downstream queue went away while a stage was still writing.
    QueueClosed { stage: String },
    /// A stage (or one of its workers) panicked.
    StagePanicked { stage: String },
    /// The OS refused to start a worker thread.
    Spawn { what: String, message: String },
    /// The sink queue did not hold exactly one text item.
    SinkShape { items: usize },
    /// Invalid pipeline settings.
    Config(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shape {
                stage,
                expected,
                found,
            } => write!(f, "{stage}: expected {expected} item, got {found}"),
            Self::Signer { call, message } => write!(f, "{call} hash failed: {message}"),
            Self::Barrier { expected, observed } => write!(
                f,
                "join barrier violated: expected {expected} completions, observed {observed}"
            ),
            Self::QueueClosed { stage } => write!(f, "{stage}: output queue closed"),
            Self::StagePanicked { stage } => write!(f, "{stage}: panicked"),
            Self::Spawn { what, message } => {
                write!(f, "{what}: failed to spawn thread: {message}")
            }
            Self::SinkShape { items } => {
                write!(f, "expected exactly one text result in sink, got {items} items")
            }
            Self::Config(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    /// False for errors that are only a symptom of a failure elsewhere.
    ///
    /// A closed output queue means the consumer already stopped, which only
    /// happens after the consumer recorded its own error.
    pub fn is_root_cause(&self) -> bool {
        !matches!(self, Self::QueueClosed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_closed_is_secondary() {
        let err = PipelineError::QueueClosed {
            stage: "single_hash".into(),
        };
        assert!(!err.is_root_cause());
    }

    #[test]
    fn shape_is_root_cause() {
        let err = PipelineError::Shape {
            stage: "multi_hash",
            expected: ItemKind::Text,
            found: "integer 7".into(),
        };
        assert!(err.is_root_cause());
    }

    #[test]
    fn display_shape() {
        let err = PipelineError::Shape {
            stage: "single_hash",
            expected: ItemKind::Integer,
            found: "text \"abc\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "single_hash: expected integer item, got text \"abc\""
        );
    }

    #[test]
    fn display_signer() {
        let err = PipelineError::Signer {
            call: Call::Slow,
            message: "backend down".into(),
        };
        assert_eq!(err.to_string(), "slow hash failed: backend down");
    }

    #[test]
    fn display_barrier() {
        let err = PipelineError::Barrier {
            expected: 6,
            observed: 5,
        };
        assert!(err.to_string().contains("expected 6"));
    }

    #[test]
    fn display_spawn() {
        let err = PipelineError::Spawn {
            what: "multi_hash worker 3".into(),
            message: "Resource temporarily unavailable".into(),
        };
        assert!(err.is_root_cause());
        assert_eq!(
            err.to_string(),
            "multi_hash worker 3: failed to spawn thread: Resource temporarily unavailable"
        );
    }
}
