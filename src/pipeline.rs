//! Contains the parallel producer/consumer pipeline.
//!
//! One parser thread streams the document, batching matched subtrees onto a
//! bounded job channel. A pool of workers pulls batches, runs the pluggable
//! transform on every subtree and accumulates two local diff streams. When
//! the job channel closes, each worker sorts its streams and reports them;
//! the driver k-way-merges the per-worker streams back into the global
//! identity order the writer expects.
//!
//! The only synchronization contract between the transform side and the
//! writer is that the merged diff sequences are identity-sorted.

use std::io::{Read, Seek};
use std::panic;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;

use diff::{Diff, DiffSet};
use error::Error;
use filter::{NodeFilter, SubtreeMatcher};
use node::Node;
use reader::{Fbx, FbxReader};


/// Capacity of the job channel, in batches. Back-pressures the parser when
/// the workers fall behind.
pub const JOB_CHANNEL_CAP: usize = 10_000;

/// Per-subtree computation producing the two output diff streams.
///
/// Implemented for plain closures; larger transforms implement the trait
/// directly.
pub trait Transform: Send + Sync {
    /// Computes the diffs a matched subtree contributes to each output.
    fn transform(&self, node: &Node) -> (Vec<Diff>, Vec<Diff>);
}

impl<F> Transform for F
    where F: Fn(&Node) -> (Vec<Diff>, Vec<Diff>) + Send + Sync
{
    fn transform(&self, node: &Node) -> (Vec<Diff>, Vec<Diff>) {
        self(node)
    }
}

/// The sorted diff streams one worker accumulated.
pub struct WorkerResult {
    /// First output stream.
    pub a: DiffSet,
    /// Second output stream.
    pub b: DiffSet,
}

/// Everything a finished pipeline run hands back.
pub struct PipelineOutput<R> {
    /// The parsed document; partial when `error` is set.
    pub fbx: Fbx,
    /// The source stream, reclaimed for copy-through during the rewrite.
    pub source: R,
    /// Merged first diff stream, identity-sorted.
    pub a: DiffSet,
    /// Merged second diff stream, identity-sorted.
    pub b: DiffSet,
    /// The first parse error, if any.
    pub error: Option<Error>,
}

/// Parses `source` while transforming matched subtrees on `workers` threads.
///
/// The parser hands matched subtrees to the workers in batches and keeps
/// streaming while they compute; the rewrite can start as soon as this
/// returns. On a parse error the job channel closes early, the workers drain
/// what they already received, and the partial document comes back together
/// with the error.
pub fn run<R, T>(source: R,
                 filters: Vec<NodeFilter>,
                 matcher: SubtreeMatcher,
                 transform: Arc<T>,
                 workers: usize)
                 -> PipelineOutput<R>
    where R: Read + Seek + Send + 'static,
          T: Transform + 'static
{
    let workers = workers.max(1);
    let (job_tx, job_rx) = bounded::<Vec<Arc<Node>>>(JOB_CHANNEL_CAP);
    let (result_tx, result_rx) = bounded::<WorkerResult>(workers);
    let (done_tx, done_rx) = bounded::<(Fbx, R, Option<Error>)>(1);

    let parser = thread::spawn(move || {
        let mut reader = FbxReader::with_matcher(source, filters, matcher, job_tx);
        let _ = reader.read();
        if done_tx.send(reader.into_parts()).is_err() {
            warn!("pipeline driver went away before the parse completed");
        }
    });

    let mut worker_handles = Vec::with_capacity(workers);
    for index in 0..workers {
        let jobs = job_rx.clone();
        let results = result_tx.clone();
        let transform = Arc::clone(&transform);
        worker_handles.push(thread::spawn(move || {
            let mut a = Vec::new();
            let mut b = Vec::new();
            let mut subtrees = 0_usize;
            while let Ok(batch) = jobs.recv() {
                for node in &batch {
                    let (diffs_a, diffs_b) = transform.transform(node);
                    a.extend(diffs_a);
                    b.extend(diffs_b);
                }
                subtrees += batch.len();
            }
            debug!("worker {} transformed {} subtrees", index, subtrees);
            // Sort locally; the driver merges the per-worker streams.
            let _ = results.send(WorkerResult {
                a: DiffSet::from_unsorted(a),
                b: DiffSet::from_unsorted(b),
            });
        }));
    }
    drop(job_rx);
    drop(result_tx);

    let (fbx, source, error) = match done_rx.recv() {
        Ok(parts) => parts,
        // The parser thread only fails to report by panicking.
        Err(_) => match parser.join() {
            Err(cause) => panic::resume_unwind(cause),
            Ok(()) => unreachable!("parser thread exited without reporting"),
        },
    };

    let mut a_streams = Vec::with_capacity(workers);
    let mut b_streams = Vec::with_capacity(workers);
    for result in result_rx.iter() {
        a_streams.push(result.a);
        b_streams.push(result.b);
    }
    for handle in worker_handles {
        let _ = handle.join();
    }
    let _ = parser.join();

    PipelineOutput {
        fbx: fbx,
        source: source,
        a: DiffSet::merge(a_streams),
        b: DiffSet::merge(b_streams),
        error: error,
    }
}
