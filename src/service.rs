// # Sequencer Service
//
// Runs a `Sequencer` on a dedicated tokio task. Commands, fired timers and result
// batches all arrive on channels and are handled one at a time by the worker, so
// the sequencer state needs no locking.

use crate::config::Config;
use crate::events::{SearchEvents, Subscription};
use crate::host::{SearchResponse, SearchService, StatusSink, TransferService};
use crate::matcher::MatchCriteria;
use crate::sequencer::{
    RunSummary, Scheduler, Sequencer, SequencerState, TimerEvent, TimerHandle, ValidationError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Sequencer service is not running")]
    ChannelClosed,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Commands sent to the sequencer worker
pub enum SequencerCommand {
    Start {
        raw_terms: String,
        criteria: MatchCriteria,
        response_tx: oneshot::Sender<Result<usize, ValidationError>>,
    },
    Snapshot {
        response_tx: oneshot::Sender<SequencerState>,
    },
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

struct FiredTimer {
    handle: TimerHandle,
    event: TimerEvent,
}

/// Scheduler backed by tokio sleeps
///
/// A fired timer is delivered as a message on the worker's timer channel. Aborting a
/// timer whose message is already queued is harmless: the sequencer drops events
/// for handles it no longer holds.
pub struct TokioScheduler {
    timer_tx: mpsc::UnboundedSender<FiredTimer>,
    next_id: u64,
    armed: HashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioScheduler {
    fn new(timer_tx: mpsc::UnboundedSender<FiredTimer>) -> Self {
        TokioScheduler {
            timer_tx,
            next_id: 0,
            armed: HashMap::new(),
        }
    }

    /// Forget a timer that has fired
    fn disarm(&mut self, handle: TimerHandle) -> bool {
        self.armed.remove(&handle).is_some()
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let timer_tx = self.timer_tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(FiredTimer { handle, event });
        });
        self.armed.insert(handle, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.armed.remove(&handle) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

/// Handle to the sequencer service for sending commands
#[derive(Clone)]
pub struct SequencerHandle {
    command_tx: mpsc::UnboundedSender<SequencerCommand>,
    summary_rx: watch::Receiver<Option<RunSummary>>,
}

impl SequencerHandle {
    /// Start a run; returns the number of terms queued
    pub async fn start(
        &self,
        raw_terms: impl Into<String>,
        criteria: MatchCriteria,
    ) -> Result<usize, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SequencerCommand::Start {
                raw_terms: raw_terms.into(),
                criteria,
                response_tx: tx,
            })
            .map_err(|_| ServiceError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| ServiceError::ChannelClosed)??)
    }

    /// Copy of the current sequencer state
    pub async fn snapshot(&self) -> Result<SequencerState, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SequencerCommand::Snapshot { response_tx: tx })
            .map_err(|_| ServiceError::ChannelClosed)?;
        rx.await.map_err(|_| ServiceError::ChannelClosed)
    }

    /// Wait until the current run completes
    pub async fn wait_for_completion(&self) -> Result<RunSummary, ServiceError> {
        let mut summary_rx = self.summary_rx.clone();
        let summary = summary_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ServiceError::ChannelClosed)?
            .clone();
        summary.ok_or(ServiceError::ChannelClosed)
    }

    /// Stop the worker: cancels timers and unsubscribes from search events
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SequencerCommand::Shutdown { response_tx: tx })
            .map_err(|_| ServiceError::ChannelClosed)?;
        rx.await.map_err(|_| ServiceError::ChannelClosed)
    }
}

struct SequencerWorker {
    sequencer: Sequencer<TokioScheduler>,
    command_rx: mpsc::UnboundedReceiver<SequencerCommand>,
    timer_rx: mpsc::UnboundedReceiver<FiredTimer>,
    events: SearchEvents,
    subscription: Subscription,
    summary_tx: watch::Sender<Option<RunSummary>>,
}

/// Start the sequencer service on the current tokio runtime
///
/// Subscribes to `events` immediately; the subscription lives until shutdown or
/// until every handle is dropped.
pub fn start_sequencer_service(
    config: Config,
    search: Arc<dyn SearchService>,
    transfer: Arc<dyn TransferService>,
    status: Arc<dyn StatusSink>,
    events: &SearchEvents,
) -> SequencerHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (summary_tx, summary_rx) = watch::channel(None);

    let sequencer = Sequencer::new(
        config,
        search,
        transfer,
        status,
        TokioScheduler::new(timer_tx),
    );
    let subscription = events.subscribe();
    info!(
        "Sequencer service subscribed to search events (subscription {})",
        subscription.id
    );

    let worker = SequencerWorker {
        sequencer,
        command_rx,
        timer_rx,
        events: events.clone(),
        subscription,
        summary_tx,
    };
    tokio::spawn(worker.run());

    SequencerHandle {
        command_tx,
        summary_rx,
    }
}

impl SequencerWorker {
    async fn run(mut self) {
        info!("Sequencer worker started");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SequencerCommand::Start {
                            raw_terms,
                            criteria,
                            response_tx,
                        }) => {
                            let result = self.sequencer.start(&raw_terms, criteria);
                            self.publish_summary();
                            let _ = response_tx.send(result);
                        }
                        Some(SequencerCommand::Snapshot { response_tx }) => {
                            let _ = response_tx.send(self.sequencer.state().clone());
                        }
                        Some(SequencerCommand::Shutdown { response_tx }) => {
                            self.stop();
                            let _ = response_tx.send(());
                            info!("Sequencer worker stopped");
                            return;
                        }
                        None => {
                            info!("Sequencer command channel closed");
                            break;
                        }
                    }
                }
                Some(fired) = self.timer_rx.recv() => {
                    if !self.sequencer.scheduler_mut().disarm(fired.handle) {
                        debug!("Sequencer: timer {:?} fired after cancellation", fired.handle);
                    }
                    self.sequencer.on_timer(fired.handle, fired.event);
                    self.publish_summary();
                }
                response = self.subscription.rx.recv() => {
                    match response {
                        Some(response) => self.handle_response(response),
                        None => {
                            warn!("Search event bus closed");
                            break;
                        }
                    }
                }
            }
        }

        self.stop();
        info!("Sequencer worker stopped");
    }

    fn handle_response(&mut self, response: SearchResponse) {
        self.sequencer.on_response(&response);
        self.publish_summary();
    }

    fn publish_summary(&self) {
        let summary = self.sequencer.summary();
        self.summary_tx.send_if_modified(|current| {
            if *current != summary {
                *current = summary;
                true
            } else {
                false
            }
        });
    }

    fn stop(&mut self) {
        self.sequencer.cancel_timers();
        self.events.unsubscribe(self.subscription.id);
        debug!(
            "Sequencer: {} timer(s) still armed at stop",
            self.sequencer.scheduler_mut().armed_count()
        );
    }
}
