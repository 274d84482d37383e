//! Pipeline orchestration: wire stages with bounded queues and run them.
//!
//! ```text
//! source ──q0──▶ stage 0 ──q1──▶ stage 1 ── … ──qN──▶ sink (caller)
//! ```
//!
//! Every stage runs on its own scoped thread. A stage closes its output
//! queue by returning, so stage k+1 only sees end-of-input after stage k
//! has finished all of its work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use crate::error::PipelineError;
use crate::item::Item;
use crate::progress::fmt_num;
use crate::signer::SignerContext;
use crate::stage::{CombineResults, MultiHash, SingleHash, Stage};

/// Queue capacity used when none is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Tuning knobs for [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of every inter-stage queue (must be at least 1)
    pub queue_capacity: usize,
    /// Worker threads per hashing stage, i.e. items processed at once
    /// (must be at least 1)
    pub max_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Items in flight per hashing stage when none is configured.
///
/// Item work is mostly waiting on the signer, so this oversubscribes the
/// available cores by a fixed factor.
pub fn default_max_in_flight() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(4)
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(PipelineError::Config(
                "max_in_flight must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Run `stages` over `source` and return whatever reaches the sink queue.
///
/// Returns only after every stage thread has exited. If any stage fails,
/// the error of the earliest failing stage in pipeline order is returned
/// (secondary queue-closed errors only when nothing else failed), and the
/// drained sink items are discarded.
pub fn execute_pipeline(
    stages: &[Box<dyn Stage>],
    source: Vec<Item>,
    queue_capacity: usize,
) -> Result<Vec<Item>, PipelineError> {
    if queue_capacity == 0 {
        return Err(PipelineError::Config(
            "queue_capacity must be at least 1".into(),
        ));
    }
    let abort = AtomicBool::new(false);

    let (sink_items, results) = std::thread::scope(|s| {
        let mut results = Vec::with_capacity(stages.len() + 1);
        let (source_tx, mut upstream) = mpsc::sync_channel::<Item>(queue_capacity);
        let feeder = std::thread::Builder::new()
            .name("source".into())
            .spawn_scoped(s, move || {
                for item in source {
                    // Only fails once the first stage has gone away
                    if source_tx.send(item).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = feeder {
            // Nothing reaches the stages; they see an empty, closed input
            abort.store(true, Ordering::Relaxed);
            results.push(Err(PipelineError::Spawn {
                what: "source".into(),
                message: e.to_string(),
            }));
        }

        let mut handles = Vec::with_capacity(stages.len());
        for stage in stages {
            let (output, next) = mpsc::sync_channel::<Item>(queue_capacity);
            let input = std::mem::replace(&mut upstream, next);
            let stage: &dyn Stage = stage.as_ref();
            let abort = &abort;
            let spawned = std::thread::Builder::new()
                .name(stage.name().to_string())
                .spawn_scoped(s, move || run_stage(stage, input, output, abort));
            match spawned {
                Ok(handle) => handles.push((stage.name().to_string(), handle)),
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    results.push(Err(PipelineError::Spawn {
                        what: stage.name().to_string(),
                        message: e.to_string(),
                    }));
                    break;
                }
            }
        }

        let sink_items: Vec<Item> = upstream.iter().collect();
        let joined = handles.into_iter().map(|(name, handle)| {
            handle.join().unwrap_or_else(|_| {
                log::error!("{name}: stage panicked");
                Err(PipelineError::StagePanicked { stage: name })
            })
        });
        // Stage results first so pipeline order decides between root causes
        let mut ordered: Vec<Result<(), PipelineError>> = joined.collect();
        ordered.append(&mut results);
        (sink_items, ordered)
    });

    match first_error(results) {
        Some(e) => Err(e),
        None => Ok(sink_items),
    }
}

fn run_stage(
    stage: &dyn Stage,
    input: mpsc::Receiver<Item>,
    output: mpsc::SyncSender<Item>,
    abort: &AtomicBool,
) -> Result<(), PipelineError> {
    let start = Instant::now();
    log::debug!("{}: started", stage.name());
    let result = stage.process(input, output, abort);
    if result.is_err() {
        abort.store(true, Ordering::Relaxed);
    }
    log::debug!(
        "{}: finished in {:.1}ms",
        stage.name(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    result
}

/// Earliest root-cause error, else the earliest error of any kind.
fn first_error(results: Vec<Result<(), PipelineError>>) -> Option<PipelineError> {
    let mut secondary = None;
    for e in results.into_iter().filter_map(Result::err) {
        if e.is_root_cause() {
            return Some(e);
        }
        secondary.get_or_insert(e);
    }
    secondary
}

/// The signing pipeline: single hash → multi hash → combine.
#[derive(Debug, Clone)]
pub struct Pipeline {
    ctx: SignerContext,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(ctx: SignerContext, config: PipelineConfig) -> Self {
        Self { ctx, config }
    }

    /// Stage list in pipeline order.
    pub fn stages(&self) -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(SingleHash::new(self.ctx.clone(), self.config.max_in_flight)),
            Box::new(MultiHash::new(self.ctx.clone(), self.config.max_in_flight)),
            Box::new(CombineResults),
        ]
    }

    /// Compute the combined signature of `initial_items`.
    pub fn run(&self, initial_items: &[i64]) -> Result<String, PipelineError> {
        self.run_items(initial_items.iter().copied().map(Item::Integer).collect())
    }

    /// Like [`run`](Self::run), for items that still need shape validation.
    pub fn run_items(&self, items: Vec<Item>) -> Result<String, PipelineError> {
        self.config.validate()?;
        let start = Instant::now();
        let count = items.len();
        log::debug!("signing {} items", fmt_num(count));

        let mut sink = execute_pipeline(&self.stages(), items, self.config.queue_capacity)?;
        let signature = match (sink.pop(), sink.is_empty()) {
            (Some(Item::Text(s)), true) => s,
            (last, _) => {
                return Err(PipelineError::SinkShape {
                    items: sink.len() + usize::from(last.is_some()),
                });
            }
        };

        log::info!(
            "signed {} items in {:.2}s",
            fmt_num(count),
            start.elapsed().as_secs_f64()
        );
        Ok(signature)
    }
}

/// Run the signing pipeline with default settings.
pub fn run(ctx: &SignerContext, initial_items: &[i64]) -> Result<String, PipelineError> {
    Pipeline::new(ctx.clone(), PipelineConfig::default()).run(initial_items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{Signer, SignerError};
    use std::sync::mpsc::{Receiver, SyncSender};

    struct Mock;

    impl Signer for Mock {
        fn fast(&self, data: &str) -> Result<String, SignerError> {
            Ok(format!("F({data})"))
        }

        fn slow(&self, data: &str) -> Result<String, SignerError> {
            Ok(format!("S({data})"))
        }
    }

    /// Passes items through unchanged.
    struct Relay;

    impl Stage for Relay {
        fn name(&self) -> &str {
            "relay"
        }

        fn process(
            &self,
            input: Receiver<Item>,
            output: SyncSender<Item>,
            _abort: &AtomicBool,
        ) -> Result<(), PipelineError> {
            for item in input.iter() {
                output.send(item).map_err(|_| PipelineError::QueueClosed {
                    stage: "relay".into(),
                })?;
            }
            Ok(())
        }
    }

    /// Fails on the first item without draining its input.
    struct Reject;

    impl Stage for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        fn process(
            &self,
            input: Receiver<Item>,
            _output: SyncSender<Item>,
            _abort: &AtomicBool,
        ) -> Result<(), PipelineError> {
            let Ok(item) = input.recv() else {
                return Ok(());
            };
            Err(PipelineError::Shape {
                stage: "reject",
                expected: crate::item::ItemKind::Text,
                found: format!("{item:?}"),
            })
        }
    }

    struct Explode;

    impl Stage for Explode {
        fn name(&self) -> &str {
            "explode"
        }

        fn process(
            &self,
            _input: Receiver<Item>,
            _output: SyncSender<Item>,
            abort: &AtomicBool,
        ) -> Result<(), PipelineError> {
            assert!(!abort.load(Ordering::Relaxed));
            panic!("stage exploded");
        }
    }

    #[test]
    fn empty_stage_list_passes_source_through() {
        let out = execute_pipeline(&[], vec![Item::Integer(1), Item::Integer(2)], 1).unwrap();
        assert_eq!(out, vec![Item::Integer(1), Item::Integer(2)]);
    }

    #[test]
    fn relays_preserve_items() {
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(Relay), Box::new(Relay)];
        let source: Vec<Item> = (0..50).map(Item::Integer).collect();
        let out = execute_pipeline(&stages, source.clone(), 1).unwrap();
        assert_eq!(out, source);
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = execute_pipeline(&[], vec![], 0).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn root_cause_beats_queue_closed() {
        // Relay upstream of Reject sees its output close and reports QueueClosed
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(Relay), Box::new(Reject)];
        let source: Vec<Item> = (0..500).map(Item::Integer).collect();
        let err = execute_pipeline(&stages, source, 1).unwrap_err();
        assert!(matches!(err, PipelineError::Shape { stage: "reject", .. }));
    }

    #[test]
    fn stage_panic_is_reported() {
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(Relay), Box::new(Explode)];
        let err = execute_pipeline(&stages, vec![Item::Integer(1)], 4).unwrap_err();
        match err {
            PipelineError::StagePanicked { stage } => assert_eq!(stage, "explode"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn first_error_prefers_root_cause() {
        let results = vec![
            Ok(()),
            Err(PipelineError::QueueClosed { stage: "a".into() }),
            Err(PipelineError::Barrier {
                expected: 2,
                observed: 1,
            }),
        ];
        assert!(matches!(
            first_error(results),
            Some(PipelineError::Barrier { .. })
        ));
        assert!(first_error(vec![Ok(()), Ok(())]).is_none());
    }

    #[test]
    fn default_run_signs_items() {
        let ctx = SignerContext::new(Mock);
        assert_eq!(
            run(&ctx, &[3]).unwrap(),
            "F(0F(3)~F(S(3)))F(1F(3)~F(S(3)))F(2F(3)~F(S(3)))\
             F(3F(3)~F(S(3)))F(4F(3)~F(S(3)))F(5F(3)~F(S(3)))"
        );
    }

    #[test]
    fn empty_input_yields_empty_signature() {
        let ctx = SignerContext::new(Mock);
        assert_eq!(run(&ctx, &[]).unwrap(), "");
    }

    #[test]
    fn invalid_config_rejected_before_running() {
        let pipeline = Pipeline::new(
            SignerContext::new(Mock),
            PipelineConfig {
                queue_capacity: 1,
                max_in_flight: 0,
            },
        );
        assert!(matches!(pipeline.run(&[1]), Err(PipelineError::Config(_))));
    }
}
