//! Encode jobs and the per-generation coordinator.
//!
//! A *generation* is the set of encode jobs spawned by one scheduler
//! tick. Jobs run on blocking worker threads, each owning a private
//! clone of the codec state, so a generation of N ≥ 1 candidates can
//! race without sharing.
//!
//! The coordinator task awaits every job handle up to the generation's
//! absolute deadline and then posts exactly one [`GenerationOutcome`].
//! Jobs cannot be preempted mid-encode: a job that misses the deadline
//! is abandoned — its handle is dropped, the worker runs to completion
//! detached, and its output is discarded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::codec::Encoder;
use crate::error::FramecastError;
use crate::raster::RasterHandle;

// ── Job types ────────────────────────────────────────────────────

/// How a single encode attempt targets its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Encode at a fixed quantizer index; output size falls where it
    /// falls.
    ConstantQuantizer(u8),
    /// Best-effort approximation of an output byte length.
    TargetSize(usize),
}

/// One encode attempt: the raster, a snapshot of the committed codec
/// state, and the mode.
#[derive(Debug)]
pub struct EncodeJob {
    pub frame_no: u32,
    pub raster: RasterHandle,
    pub encoder: Encoder,
    pub mode: EncodeMode,
}

/// The product of a finished encode job.
#[derive(Debug)]
pub struct EncodeOutput {
    pub frame_no: u32,
    /// The advanced codec state. Committed only if this output wins.
    pub encoder: Encoder,
    /// The encoded frame bytes.
    pub frame: Vec<u8>,
    /// Wall-clock encode duration.
    pub encode_time: Duration,
}

/// Result of one generation: the outputs that finished before the
/// deadline, in job submission order. May be empty.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub frame_no: u32,
    pub ready: Vec<EncodeOutput>,
}

// ── Execution ────────────────────────────────────────────────────

/// Run one job to completion on the current thread.
pub fn run_encode_job(job: EncodeJob) -> Result<EncodeOutput, FramecastError> {
    let EncodeJob {
        frame_no,
        raster,
        mut encoder,
        mode,
    } = job;

    let started = std::time::Instant::now();
    let frame = match mode {
        EncodeMode::ConstantQuantizer(qi) => encoder.encode_with_quantizer(&raster, qi)?,
        EncodeMode::TargetSize(bytes) => encoder.encode_with_target_size(&raster, bytes)?,
    };

    Ok(EncodeOutput {
        frame_no,
        encoder,
        frame,
        encode_time: started.elapsed(),
    })
}

/// Launch a generation of jobs plus its coordinator task.
///
/// The coordinator sends exactly one [`GenerationOutcome`] on
/// `outcome_tx`, whether or not any job made the deadline. Must be
/// called from within a tokio runtime.
///
/// # Panics
///
/// Panics if `jobs` is empty — a tick that decides to skip must not
/// open a generation.
pub fn spawn_generation(
    jobs: Vec<EncodeJob>,
    deadline: Instant,
    outcome_tx: mpsc::Sender<GenerationOutcome>,
) {
    assert!(!jobs.is_empty(), "a generation needs at least one job");
    let frame_no = jobs[0].frame_no;
    debug_assert!(jobs.iter().all(|j| j.frame_no == frame_no));

    let handles: Vec<JoinHandle<Result<EncodeOutput, FramecastError>>> = jobs
        .into_iter()
        .map(|job| tokio::task::spawn_blocking(move || run_encode_job(job)))
        .collect();

    tokio::spawn(async move {
        let mut ready = Vec::with_capacity(handles.len());

        for (index, mut handle) in handles.into_iter().enumerate() {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(output))) => ready.push(output),
                Ok(Ok(Err(e))) => {
                    // One candidate failing is recoverable as long as
                    // a sibling finishes.
                    warn!(frame_no, job = index, "encode job failed: {e}");
                }
                Ok(Err(join_error)) => {
                    warn!(frame_no, job = index, "encode worker died: {join_error}");
                }
                Err(_elapsed) => {
                    // Deadline passed. Dropping the handle detaches the
                    // worker; its output will be discarded on arrival.
                    debug!(frame_no, job = index, "encode job missed the deadline");
                }
            }
        }

        let _ = outcome_tx.send(GenerationOutcome { frame_no, ready }).await;
    });
}

// ── Tests ────────────────────────────────────────────────────────
