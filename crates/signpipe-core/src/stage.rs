//! Pipeline stages: single hash, multi hash and the combining sink.
//!
//! ```text
//! integer ──▶ SingleHash ──▶ MultiHash ──▶ CombineResults ──▶ signature
//!             slow + 2×fast    6×fast        sort + join
//! ```
//!
//! The two hashing stages are streaming: a fixed pool of workers picks up
//! items as they arrive, so outputs leave in completion order. The combining
//! stage is a barrier and restores determinism with a sort.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Mutex, PoisonError};

use crate::error::PipelineError;
use crate::fan_out::fan_out;
use crate::item::Item;
use crate::signer::SignerContext;

/// Separator between the two halves of a single hash
pub const SINGLE_HASH_SEPARATOR: &str = "~";

/// Separator between per-item signatures in the combined result
pub const COMBINE_SEPARATOR: &str = "_";

/// Number of fast-hash workers per item in [`MultiHash`]
pub const MULTI_HASH_WIDTH: usize = 6;

/// One step of the pipeline, run on its own thread.
///
/// `process` reads `input` until it is closed and empty, writes to `output`,
/// and returns only after all of its own concurrent work has finished.
/// Returning drops `output`, which is how the next stage learns it is done.
///
/// `abort` is raised once any stage has failed; stages should stop taking
/// new items when they see it.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn process(
        &self,
        input: Receiver<Item>,
        output: SyncSender<Item>,
        abort: &AtomicBool,
    ) -> Result<(), PipelineError>;
}

/// `fast(text) ~ fast(slow(text))` for every numeric item.
pub struct SingleHash {
    ctx: SignerContext,
    workers: usize,
}

impl SingleHash {
    pub const NAME: &'static str = "single_hash";

    /// `max_in_flight` is the number of items hashed at once (at least 1).
    pub fn new(ctx: SignerContext, max_in_flight: usize) -> Self {
        Self {
            ctx,
            workers: max_in_flight.max(1),
        }
    }

    /// Hash one item's text.
    ///
    /// The slow call is the serialization point; the two fast calls run
    /// concurrently and are joined in fixed role order: raw text first,
    /// slow digest second.
    pub fn sign(&self, text: &str) -> Result<String, PipelineError> {
        let slow = self.ctx.call_slow(text)?;
        let halves = fan_out(&self.ctx, &[text.to_string(), slow])?;
        Ok(halves.join(SINGLE_HASH_SEPARATOR))
    }
}

impl Stage for SingleHash {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process(
        &self,
        input: Receiver<Item>,
        output: SyncSender<Item>,
        abort: &AtomicBool,
    ) -> Result<(), PipelineError> {
        for_each_item(Self::NAME, input, &output, self.workers, abort, |item| {
            let text = item.into_numeric_text(Self::NAME)?;
            self.sign(&text)
        })
    }
}

/// Concatenation of `fast(i ++ text)` for `i` in `0..6`, in index order.
pub struct MultiHash {
    ctx: SignerContext,
    workers: usize,
}

impl MultiHash {
    pub const NAME: &'static str = "multi_hash";

    pub fn new(ctx: SignerContext, max_in_flight: usize) -> Self {
        Self {
            ctx,
            workers: max_in_flight.max(1),
        }
    }

    pub fn sign(&self, text: &str) -> Result<String, PipelineError> {
        let inputs: Vec<String> = (0..MULTI_HASH_WIDTH).map(|i| format!("{i}{text}")).collect();
        Ok(fan_out(&self.ctx, &inputs)?.concat())
    }
}

impl Stage for MultiHash {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process(
        &self,
        input: Receiver<Item>,
        output: SyncSender<Item>,
        abort: &AtomicBool,
    ) -> Result<(), PipelineError> {
        for_each_item(Self::NAME, input, &output, self.workers, abort, |item| {
            let text = item.into_text(Self::NAME)?;
            self.sign(&text)
        })
    }
}

/// Sink stage: sort every signature byte-wise and join with `_`.
///
/// Emits exactly one item, and only after its input is exhausted.
#[derive(Debug, Default)]
pub struct CombineResults;

impl CombineResults {
    pub const NAME: &'static str = "combine_results";
}

/// Sort byte-wise and join; the result does not depend on input order.
pub fn combine(mut hashes: Vec<String>) -> String {
    hashes.sort_unstable();
    hashes.join(COMBINE_SEPARATOR)
}

impl Stage for CombineResults {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process(
        &self,
        input: Receiver<Item>,
        output: SyncSender<Item>,
        abort: &AtomicBool,
    ) -> Result<(), PipelineError> {
        let mut hashes = Vec::new();
        for item in input.iter() {
            if abort.load(Ordering::Relaxed) {
                log::debug!("{}: aborting", Self::NAME);
                return Ok(());
            }
            hashes.push(item.into_text(Self::NAME)?);
        }
        log::debug!("{}: combining {} hashes", Self::NAME, hashes.len());
        output
            .send(Item::Text(combine(hashes)))
            .map_err(|_| PipelineError::QueueClosed {
                stage: Self::NAME.to_string(),
            })
    }
}

/// Run `transform` on every input item with a fixed pool of `workers`
/// threads and send the results.
///
/// Workers pull the next item from the shared input as soon as they are
/// free, so up to `workers` items are in flight and output order follows
/// completion order. The first failure (including a panic inside
/// `transform` or a refused thread spawn) is kept and raises `abort`;
/// workers stop taking items once it is raised and all of them have exited
/// before this returns.
fn for_each_item<F>(
    stage: &'static str,
    input: Receiver<Item>,
    output: &SyncSender<Item>,
    workers: usize,
    abort: &AtomicBool,
    transform: F,
) -> Result<(), PipelineError>
where
    F: Fn(Item) -> Result<String, PipelineError> + Sync,
{
    let input = Mutex::new(input);
    let processed = AtomicUsize::new(0);
    let failure: Mutex<Option<PipelineError>> = Mutex::new(None);
    let fail = |e: PipelineError| {
        abort.store(true, Ordering::Relaxed);
        let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            log::error!("{stage}: {e}");
            *slot = Some(e);
        }
    };

    std::thread::scope(|s| {
        let (input, transform, fail, processed) = (&input, &transform, &fail, &processed);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let output = output.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{stage}-{worker}"))
                .spawn_scoped(s, move || loop {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    // Lock only for the hand-off
                    let next = input.lock().unwrap_or_else(PoisonError::into_inner).recv();
                    let Ok(item) = next else {
                        break;
                    };
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let sent = panic::catch_unwind(AssertUnwindSafe(|| transform(item)))
                        .unwrap_or_else(|_| {
                            Err(PipelineError::StagePanicked {
                                stage: stage.to_string(),
                            })
                        })
                        .and_then(|hash| {
                            output
                                .send(Item::Text(hash))
                                .map_err(|_| PipelineError::QueueClosed {
                                    stage: stage.to_string(),
                                })
                        });
                    match sent {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            fail(e);
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    fail(PipelineError::Spawn {
                        what: format!("{stage} worker {worker}"),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                fail(PipelineError::StagePanicked {
                    stage: stage.to_string(),
                });
            }
        }
    });

    log::debug!(
        "{stage}: processed {} items",
        processed.load(Ordering::Relaxed)
    );
    match failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
