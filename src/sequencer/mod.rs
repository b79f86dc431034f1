// # Search Sequencer
//
// Walks a list of terms one at a time. Each term gets exactly one search; the run
// moves on when either the response timeout fires without a match, or the delayed
// acquisition armed by a match fires. Both paths are timers on the driving event
// loop, and a match cancels the timeout so only one of them can advance the run.

pub mod scheduler;
pub mod state;

pub use scheduler::{Scheduler, TimerEvent, TimerHandle};
pub use state::{parse_terms, Acquisition, Phase, RunSummary, SequencerState};

use crate::config::Config;
use crate::host::{SearchResponse, SearchService, StatusSink, TransferService};
use crate::matcher::{evaluate, DiscoveredFile, MatchCriteria};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const NO_TERMS_MESSAGE: &str = "⚠️ Please enter at least one search term.";

/// Reasons a run refuses to start
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No search terms were given")]
    NoSearchTerms,
}

/// The sequential search-dispatch state machine
pub struct Sequencer<S: Scheduler> {
    state: SequencerState,
    config: Config,
    search: Arc<dyn SearchService>,
    transfer: Arc<dyn TransferService>,
    status: Arc<dyn StatusSink>,
    scheduler: S,
}

impl<S: Scheduler> Sequencer<S> {
    pub fn new(
        config: Config,
        search: Arc<dyn SearchService>,
        transfer: Arc<dyn TransferService>,
        status: Arc<dyn StatusSink>,
        scheduler: S,
    ) -> Self {
        Sequencer {
            state: SequencerState::default(),
            config,
            search,
            transfer,
            status,
            scheduler,
        }
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Summary of the last run, once it has completed
    pub fn summary(&self) -> Option<RunSummary> {
        (self.state.phase == Phase::Completed).then(|| self.state.summary())
    }

    /// Start a run over the terms in `raw_text` (one per line)
    ///
    /// Blank input leaves the current state untouched. A valid start abandons any
    /// run in progress: its timers are cancelled and its state discarded.
    /// Returns the number of terms queued.
    pub fn start(
        &mut self,
        raw_text: &str,
        criteria: MatchCriteria,
    ) -> Result<usize, ValidationError> {
        let terms = parse_terms(raw_text);
        if terms.is_empty() {
            warn!("⚠️ No valid content in the term list");
            self.status.set_status(NO_TERMS_MESSAGE);
            return Err(ValidationError::NoSearchTerms);
        }

        self.cancel_timers();
        let count = terms.len();
        self.state = SequencerState::for_run(terms, criteria);
        self.status.set_status("");
        self.log_event(format!(
            "🔍 Starting searches for {} term(s) ({} {})",
            count,
            criteria.format,
            display_quality(&criteria)
        ));

        self.dispatch_next();
        Ok(count)
    }

    /// Cancel every armed timer. Used on restart and shutdown.
    pub fn cancel_timers(&mut self) {
        if let Some(handle) = self.state.timeout_handle.take() {
            self.scheduler.cancel(handle);
        }
        if let Some(handle) = self.state.acquisition_handle.take() {
            if self.scheduler.cancel(handle) {
                debug!("Sequencer: dropped pending acquisition on cancel");
            }
        }
    }

    /// Handle a result batch from the host
    ///
    /// Only the pending search is eligible, and only until its first match.
    pub fn on_response(&mut self, response: &SearchResponse) {
        if self.state.download_launched {
            return;
        }
        let Phase::AwaitingResult(term) = &self.state.phase else {
            debug!(
                "Sequencer: ignoring results from {} while not awaiting a search",
                response.peer
            );
            return;
        };
        if self.state.pending_token != Some(response.token) {
            debug!(
                "Sequencer: ignoring results for superseded search {:?} from {}",
                response.token, response.peer
            );
            return;
        }
        let Some(criteria) = self.state.criteria else {
            return;
        };
        let term = term.clone();

        self.log_event(format!(
            "📩 Received {} search result(s) from {}",
            response.results.len(),
            response.peer
        ));

        for record in &response.results {
            let file = match DiscoveredFile::from_record(
                &response.peer,
                record,
                &self.config.private_marker,
            ) {
                Ok(file) => file,
                Err(e) => {
                    warn!("❌ Error extracting result record: {}", e);
                    continue;
                }
            };

            let decision = evaluate(&file, &criteria);
            debug!(
                "🎯 Checking file: {} (Format: {}, Quality: {}, Format match: {}, Quality match: {}, private: {})",
                file.filename,
                file.extension,
                file.quality,
                decision.format_match,
                decision.quality_match,
                decision.is_private
            );

            if decision.qualifies() {
                self.launch(term, file);
                return;
            }
        }

        self.log_event(format!(
            "❌ No matching file found for {} from {}",
            term, response.peer
        ));
    }

    /// Handle a fired timer
    ///
    /// Timers that are no longer armed (cancelled, or from an abandoned run) are
    /// ignored.
    pub fn on_timer(&mut self, handle: TimerHandle, event: TimerEvent) {
        match event {
            TimerEvent::ResponseTimeout { term } => {
                if self.state.timeout_handle != Some(handle) {
                    debug!("Sequencer: stale response timeout for {}", term);
                    return;
                }
                self.state.timeout_handle = None;

                let is_pending = self.state.pending_term.as_deref() == Some(term.as_str());
                if !is_pending || self.state.download_launched {
                    debug!("Sequencer: timeout for {} already resolved", term);
                    return;
                }

                self.log_event(format!("❌ No matching file found for {}", term));
                self.state.missing_terms.insert(term);
                self.dispatch_next();
            }
            TimerEvent::Acquisition {
                term,
                peer,
                remote_path,
            } => {
                if self.state.acquisition_handle != Some(handle) {
                    debug!("Sequencer: stale acquisition for {}", remote_path);
                    return;
                }
                self.state.acquisition_handle = None;

                let acquisition = Acquisition {
                    term,
                    peer,
                    remote_path,
                };
                match self
                    .transfer
                    .enqueue_download(&acquisition.peer, &acquisition.remote_path)
                {
                    Ok(()) => {
                        self.log_event(format!(
                            "🚀 Download launched for: {}",
                            acquisition.remote_path
                        ));
                        self.state.found.push(acquisition);
                    }
                    Err(e) => {
                        error!(
                            "❌ Error downloading {}: {}",
                            acquisition.remote_path, e
                        );
                        self.status.log_line(&format!(
                            "❌ Error downloading {}: {}",
                            acquisition.remote_path, e
                        ));
                        self.state.failed.push(acquisition);
                    }
                }
                self.dispatch_next();
            }
        }
    }

    fn launch(&mut self, term: String, file: DiscoveredFile) {
        self.log_event(format!(
            "✅ Matching result found for {}: {}",
            term, file.filename
        ));

        if let Some(handle) = self.state.timeout_handle.take() {
            self.scheduler.cancel(handle);
        }
        self.state.download_launched = true;
        let handle = self.scheduler.schedule(
            self.config.download_delay,
            TimerEvent::Acquisition {
                term,
                peer: file.peer,
                remote_path: file.remote_path,
            },
        );
        self.state.acquisition_handle = Some(handle);
    }

    /// Dispatch the next term, skipping over terms whose search is rejected
    fn dispatch_next(&mut self) {
        if let Some(handle) = self.state.timeout_handle.take() {
            self.scheduler.cancel(handle);
        }

        loop {
            let Some(term) = self.state.terms.get(self.state.current_index).cloned() else {
                self.complete();
                return;
            };

            self.state.current_index += 1;
            self.state.pending_term = Some(term.clone());
            self.state.pending_token = None;
            self.state.download_launched = false;

            self.log_event(format!("📡 Searching for: {}", term));
            match self.search.search(&term, &self.config.search_scope) {
                Ok(token) => {
                    self.state.pending_token = Some(token);
                    let handle = self.scheduler.schedule(
                        self.config.response_timeout,
                        TimerEvent::ResponseTimeout { term: term.clone() },
                    );
                    self.state.timeout_handle = Some(handle);
                    self.state.phase = Phase::AwaitingResult(term);
                    return;
                }
                Err(e) => {
                    error!("❌ Error during search for '{}': {}", term, e);
                    self.status
                        .log_line(&format!("❌ Error during search for '{}': {}", term, e));
                    self.state.missing_terms.insert(term);
                }
            }
        }
    }

    fn complete(&mut self) {
        self.state.phase = Phase::Completed;
        self.state.pending_term = None;
        self.state.pending_token = None;

        let message = self.state.summary().message();
        info!("{}", message);
        self.status.set_status(&message);
    }

    fn log_event(&self, line: String) {
        info!("{}", line);
        self.status.log_line(&line);
    }
}

fn display_quality(criteria: &MatchCriteria) -> &'static str {
    match criteria.quality.label() {
        "" => "any quality",
        label => label,
    }
}
