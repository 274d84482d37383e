//! Fan-out workers: run several fast hashes at once, reassemble by index

use std::sync::mpsc::{self, Sender};

use crate::barrier::{Arrival, JoinBarrier};
use crate::error::PipelineError;
use crate::signer::SignerContext;

/// Output of one fan-out worker, tagged with its logical position.
#[derive(Debug)]
pub struct TaggedResult {
    pub index: usize,
    pub result: Result<String, PipelineError>,
}

/// Hash every input with the fast hash concurrently, one worker per input.
///
/// Returns the results in input order regardless of which worker finished
/// first. If several workers fail, the lowest-indexed failure is returned.
pub fn fan_out(ctx: &SignerContext, inputs: &[String]) -> Result<Vec<String>, PipelineError> {
    let workers = inputs.len();
    let barrier = JoinBarrier::new(workers);
    let (done_tx, done_rx) = mpsc::channel::<TaggedResult>();

    std::thread::scope(|s| {
        let mut handles = Vec::with_capacity(workers);
        let mut refused = None;
        for (index, input) in inputs.iter().enumerate() {
            let arrival = barrier.arrival();
            let done = done_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("fan-out-{index}"))
                .spawn_scoped(s, move || fast_worker(ctx, index, input, done, arrival));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    refused = Some(PipelineError::Spawn {
                        what: format!("fan-out worker {index}"),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }
        drop(done_tx);

        // The barrier can never fill up if a worker was not started
        let joined = match refused {
            Some(e) => Err(e),
            None => barrier.wait(),
        };
        for (index, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                return Err(PipelineError::StagePanicked {
                    stage: format!("fan-out worker {index}"),
                });
            }
        }
        joined
    })?;

    assemble(workers, done_rx.try_iter().collect())
}

/// Place tagged results into a slot array of `workers` entries and read it
/// out in index order.
///
/// Every slot must be filled exactly once; a short, duplicated or
/// out-of-range delivery is a barrier violation.
pub fn assemble(
    workers: usize,
    received: Vec<TaggedResult>,
) -> Result<Vec<String>, PipelineError> {
    let violation = |observed| PipelineError::Barrier {
        expected: workers,
        observed,
    };
    let observed = received.len();

    let mut slots: Vec<Option<Result<String, PipelineError>>> =
        std::iter::repeat_with(|| None).take(workers).collect();
    for tagged in received {
        match slots.get_mut(tagged.index) {
            Some(slot) if slot.is_none() => *slot = Some(tagged.result),
            _ => return Err(violation(observed)),
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| violation(observed)).and_then(|r| r))
        .collect()
}

/// One fan-out worker: hash, deliver the tagged result, then arrive.
fn fast_worker(
    ctx: &SignerContext,
    index: usize,
    input: &str,
    done: Sender<TaggedResult>,
    arrival: Arrival<'_>,
) {
    let result = ctx.call_fast(input);
    log::trace!("fan-out worker {index} finished");
    // Receiver outlives every worker
    let _ = done.send(TaggedResult { index, result });
    drop(arrival);
}
