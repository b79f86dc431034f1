use crate::matcher::MatchCriteria;
use crate::host::SearchToken;
use crate::sequencer::scheduler::TimerHandle;
use std::collections::BTreeSet;

pub const ALL_FOUND_MESSAGE: &str = "✅ All files have been found.";
pub const NOT_FOUND_HEADER: &str = "❌ No file found for:\n ";

/// Where the sequencer is in a run
///
/// Dispatching a term is not a resting state: it either ends in `AwaitingResult`
/// or moves straight on to the next term when the host rejects the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingResult(String),
    Completed,
}

/// A download that was handed to the transfer subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub term: String,
    pub peer: String,
    pub remote_path: String,
}

/// Outcome of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub found: Vec<Acquisition>,
    /// Matched, but the transfer subsystem refused the download
    pub failed: Vec<Acquisition>,
    /// Sorted
    pub missing: Vec<String>,
}

impl RunSummary {
    /// Final status text
    pub fn message(&self) -> String {
        if self.missing.is_empty() {
            ALL_FOUND_MESSAGE.to_string()
        } else {
            format!("{}{}", NOT_FOUND_HEADER, self.missing.join("\n "))
        }
    }
}

/// Everything the sequencer tracks across one run
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerState {
    pub terms: Vec<String>,
    /// Next term to dispatch; only ever moves forward
    pub current_index: usize,
    /// Last dispatched term
    pub pending_term: Option<String>,
    /// Token of the search for `pending_term`
    pub pending_token: Option<SearchToken>,
    /// A match for `pending_term` has armed an acquisition
    pub download_launched: bool,
    pub timeout_handle: Option<TimerHandle>,
    pub acquisition_handle: Option<TimerHandle>,
    pub missing_terms: BTreeSet<String>,
    pub found: Vec<Acquisition>,
    pub failed: Vec<Acquisition>,
    pub criteria: Option<MatchCriteria>,
    pub phase: Phase,
}

impl Default for SequencerState {
    fn default() -> Self {
        SequencerState {
            terms: Vec::new(),
            current_index: 0,
            pending_term: None,
            pending_token: None,
            download_launched: false,
            timeout_handle: None,
            acquisition_handle: None,
            missing_terms: BTreeSet::new(),
            found: Vec::new(),
            failed: Vec::new(),
            criteria: None,
            phase: Phase::Idle,
        }
    }
}

impl SequencerState {
    /// Fresh state for a new run
    pub fn for_run(terms: Vec<String>, criteria: MatchCriteria) -> Self {
        SequencerState {
            terms,
            criteria: Some(criteria),
            ..Default::default()
        }
    }

    /// Summary of the run so far
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            found: self.found.clone(),
            failed: self.failed.clone(),
            missing: self.missing_terms.iter().cloned().collect(),
        }
    }
}

/// Split raw input into terms: one per line, trimmed, blank lines dropped
pub fn parse_terms(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
