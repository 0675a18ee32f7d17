//! Bounded-concurrency work pool
//!
//! The producer (the walker) feeds jobs in through `add`; a single actor
//! task owns all pool state and dispatches onto the encoder driver, bounded
//! by `concurrency`. This generalizes the teacher's `parallel.rs`
//! `Semaphore` + `FuturesUnordered` pattern from a fixed, pre-collected
//! `Vec<ConversionJob>` into a pool that accepts work while it is still
//! being discovered and supports two distinct shutdown protocols.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::job::{Job, JobId};
use crate::ledger::Ledger;
use crate::observer::PipelineObserver;

use super::{driver, EncoderSettings};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSummary {
    pub total_added: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_output_bytes: u64,
    pub total_time: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineStateSnapshot {
    pub total_added: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_output_bytes: u64,
    pub active_count: usize,
    pub pending_count: usize,
}

enum PoolEvent {
    Add(Job),
    ScanComplete,
    GracefulShutdown,
    ImmediateShutdown,
    Cancel(JobId),
    Pause,
    Resume,
}

struct JobDoneMsg {
    job: Job,
    succeeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Paused,
    Draining { immediate: bool },
    Terminated,
}

impl Phase {
    fn is_shutting_down(self) -> bool {
        matches!(self, Phase::Draining { .. } | Phase::Terminated)
    }
}

/// A handle to a running pool. Cheaply cloneable; every method is a
/// non-blocking send onto the actor's event channel.
#[derive(Clone)]
pub struct PoolHandle {
    tx: mpsc::UnboundedSender<PoolEvent>,
}

impl PoolHandle {
    /// `add(file)`: enqueue a new job. Unbounded and non-blocking — the
    /// walker's disk-bound discovery rate is always slower than `C`
    /// (SPEC_FULL.md §4.D "Back-pressure").
    pub fn add(&self, job: Job) {
        let _ = self.tx.send(PoolEvent::Add(job));
    }

    pub fn mark_scan_complete(&self) {
        let _ = self.tx.send(PoolEvent::ScanComplete);
    }

    pub fn request_graceful_shutdown(&self) {
        let _ = self.tx.send(PoolEvent::GracefulShutdown);
    }

    pub fn request_immediate_shutdown(&self) {
        let _ = self.tx.send(PoolEvent::ImmediateShutdown);
    }

    pub fn cancel(&self, job_id: JobId) {
        let _ = self.tx.send(PoolEvent::Cancel(job_id));
    }

    pub fn pause(&self) {
        let _ = self.tx.send(PoolEvent::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(PoolEvent::Resume);
    }
}

/// Spawn the pool's actor task and return a handle plus the future that
/// resolves with the final summary — the `start() -> future<summary>`
/// interface from SPEC_FULL.md §4.D, split so the handle can be shared with
/// the walker while the caller separately awaits completion.
pub fn spawn(
    concurrency: usize,
    ledger: Ledger,
    settings: EncoderSettings,
    observer: Arc<dyn PipelineObserver>,
    verbose: bool,
) -> (PoolHandle, oneshot::Receiver<PipelineSummary>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (summary_tx, summary_rx) = oneshot::channel();

    tokio::spawn(run_actor(
        rx,
        concurrency.clamp(1, 25),
        ledger,
        settings,
        observer,
        verbose,
        summary_tx,
    ));

    (PoolHandle { tx }, summary_rx)
}

struct ActorState {
    phase: Phase,
    pending: VecDeque<Job>,
    active: HashSet<JobId>,
    cancel_requested: HashSet<JobId>,
    scan_complete: bool,
    concurrency: usize,
    summary: PipelineSummary,
    started_at: Instant,
}

impl ActorState {
    fn snapshot(&self) -> PipelineStateSnapshot {
        PipelineStateSnapshot {
            total_added: self.summary.total_added,
            completed: self.summary.completed,
            failed: self.summary.failed,
            cancelled: self.summary.cancelled,
            total_output_bytes: self.summary.total_output_bytes,
            active_count: self.active.len(),
            pending_count: self.pending.len(),
        }
    }
}

async fn run_actor(
    mut events: mpsc::UnboundedReceiver<PoolEvent>,
    concurrency: usize,
    ledger: Ledger,
    settings: EncoderSettings,
    observer: Arc<dyn PipelineObserver>,
    verbose: bool,
    summary_tx: oneshot::Sender<PipelineSummary>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<JobDoneMsg>();

    let mut state = ActorState {
        phase: Phase::Running,
        pending: VecDeque::new(),
        active: HashSet::new(),
        cancel_requested: HashSet::new(),
        scan_complete: false,
        concurrency,
        summary: PipelineSummary::default(),
        started_at: Instant::now(),
    };

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => handle_event(&mut state, event, &ledger, &settings, &observer, verbose, &done_tx),
                    None => break,
                }
            }
            done = done_rx.recv() => {
                match done {
                    Some(done) => handle_job_done(&mut state, done, &ledger, &settings, &observer, verbose, &done_tx),
                    None => break,
                }
            }
        }

        if state.phase == Phase::Terminated {
            break;
        }
    }

    let summary = PipelineSummary {
        total_time: state.started_at.elapsed(),
        ..state.summary.clone()
    };
    observer.on_queue_complete(&summary);
    let _ = summary_tx.send(summary);
}

fn handle_event(
    state: &mut ActorState,
    event: PoolEvent,
    ledger: &Ledger,
    settings: &EncoderSettings,
    observer: &Arc<dyn PipelineObserver>,
    verbose: bool,
    done_tx: &mpsc::UnboundedSender<JobDoneMsg>,
) {
    match event {
        PoolEvent::Add(job) => {
            state.summary.total_added += 1;
            observer.on_file_added(&job);
            if state.phase.is_shutting_down() {
                // The walker can still be emitting files after a shutdown
                // was requested (it runs concurrently with the pool). Such
                // jobs were never started, so they are cancelled outright
                // rather than queued — queuing them would leave `pending`
                // permanently non-empty and the pool would never terminate.
                let mut job = job;
                job.mark_cancelled();
                state.summary.cancelled += 1;
                observer.on_job_complete(&job);
            } else {
                state.pending.push_back(job);
            }
        }
        PoolEvent::ScanComplete => {
            state.scan_complete = true;
        }
        PoolEvent::GracefulShutdown => {
            if !state.phase.is_shutting_down() {
                state.phase = Phase::Draining { immediate: false };
                state.summary.cancelled += state.pending.len() as u64;
                state.pending.clear();
            }
        }
        PoolEvent::ImmediateShutdown => {
            state.phase = Phase::Draining { immediate: true };
            state.summary.cancelled += state.pending.len() as u64;
            state.pending.clear();
        }
        PoolEvent::Cancel(job_id) => {
            if let Some(pos) = state.pending.iter().position(|j| j.id == job_id) {
                let mut job = state.pending.remove(pos).unwrap();
                job.mark_cancelled();
                state.summary.cancelled += 1;
                observer.on_job_complete(&job);
            } else if state.active.contains(&job_id) {
                driver::kill(job_id);
                state.cancel_requested.insert(job_id);
            }
        }
        PoolEvent::Pause => {
            if state.phase == Phase::Running {
                state.phase = Phase::Paused;
            }
        }
        PoolEvent::Resume => {
            if state.phase == Phase::Paused {
                state.phase = Phase::Running;
            }
        }
    }

    schedule(state, ledger, settings, observer, verbose, done_tx);
}

fn handle_job_done(
    state: &mut ActorState,
    done: JobDoneMsg,
    ledger: &Ledger,
    settings: &EncoderSettings,
    observer: &Arc<dyn PipelineObserver>,
    verbose: bool,
    done_tx: &mpsc::UnboundedSender<JobDoneMsg>,
) {
    let JobDoneMsg { mut job, succeeded } = done;
    state.active.remove(&job.id);

    let was_cancel_requested = state.cancel_requested.remove(&job.id);
    if was_cancel_requested {
        job.mark_cancelled();
        state.summary.cancelled += 1;
    } else if succeeded {
        state.summary.completed += 1;
        state.summary.total_output_bytes += job.output_bytes.unwrap_or(0);
    } else {
        state.summary.failed += 1;
    }

    // Re-enter scheduling before notifying the observer (SPEC_FULL.md §4.D
    // step 4) so the next job is already spawning before the UI updates.
    schedule(state, ledger, settings, observer, verbose, done_tx);

    observer.on_job_complete(&job);
    observer.on_state_change(&state.snapshot());
}

/// Steady-state scheduling loop, invoked after every state change.
fn schedule(
    state: &mut ActorState,
    ledger: &Ledger,
    settings: &EncoderSettings,
    observer: &Arc<dyn PipelineObserver>,
    verbose: bool,
    done_tx: &mpsc::UnboundedSender<JobDoneMsg>,
) {
    if state.pending.is_empty() && state.active.is_empty() {
        if state.scan_complete || state.phase.is_shutting_down() {
            state.phase = Phase::Terminated;
        }
        return;
    }

    if let Phase::Draining { immediate } = state.phase {
        if immediate && !state.active.is_empty() {
            driver::kill_all(true);
            state.summary.cancelled += state.active.len() as u64;
            state.active.clear();
            state.cancel_requested.clear();
            state.phase = Phase::Terminated;
        }
        return;
    }

    while state.active.len() < state.concurrency
        && !state.pending.is_empty()
        && !state.phase.is_shutting_down()
        && state.phase != Phase::Paused
    {
        let job = state.pending.pop_front().unwrap();
        start_job(
            job,
            ledger.clone(),
            settings.clone(),
            observer.clone(),
            verbose,
            done_tx.clone(),
            &mut state.active,
        );
    }
}

fn start_job(
    mut job: Job,
    ledger: Ledger,
    settings: EncoderSettings,
    observer: Arc<dyn PipelineObserver>,
    verbose: bool,
    done_tx: mpsc::UnboundedSender<JobDoneMsg>,
    active: &mut HashSet<JobId>,
) {
    job.mark_running();
    active.insert(job.id);
    observer.on_job_start(&job);

    tokio::spawn(async move {
        if let Err(e) = ledger.start(&job.source_path, &job.target_path, job.source_bytes).await {
            log::warn!("ledger start failed for {}: {e}", job.source_path.display());
        }

        let job_id = job.id;
        let source = job.source_path.clone();
        let target = job.target_path.clone();
        let obs = observer.clone();

        let outcome = driver::run(job_id, &source, &target, &settings, verbose, |percent, current_time_s| {
            job.apply_progress(percent, current_time_s);
            obs.on_job_progress(job_id, percent, current_time_s);
        })
        .await;

        // `kill`/`kill_all` already marked this job id as killed before (or
        // while) the child was torn down — the pool has already counted it
        // as cancelled, so leave the ledger's `processing` record alone
        // (§7) rather than overwrite it with a `complete`/`failed` state
        // that doesn't reflect an actual unattended run.
        if driver::was_killed(job_id) {
            job.mark_cancelled();
            let _ = done_tx.send(JobDoneMsg { job, succeeded: false });
            return;
        }

        let succeeded = match outcome {
            driver::RunOutcome::Completed { output_bytes } => {
                job.mark_completed(output_bytes);
                if let Err(e) = ledger.complete(&job.source_path, output_bytes).await {
                    log::warn!("ledger complete failed for {}: {e}", job.source_path.display());
                }
                true
            }
            driver::RunOutcome::Failed { error_text } => {
                job.mark_failed(error_text.clone());
                if let Err(e) = ledger.fail(&job.source_path, &error_text).await {
                    log::warn!("ledger fail failed for {}: {e}", job.source_path.display());
                }
                false
            }
        };

        let _ = done_tx.send(JobDoneMsg { job, succeeded });
    });
}
