// Test support utilities for both unit and integration tests

use crate::host::{HostError, SearchScope, SearchService, SearchToken, StatusSink, TransferService};
use crate::sequencer::{Scheduler, TimerEvent, TimerHandle};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

struct PendingTimer {
    handle: TimerHandle,
    due: Duration,
    event: TimerEvent,
}

/// Scheduler on a virtual clock
///
/// Nothing fires on its own; tests pop due timers and hand them to the sequencer,
/// so timer races can be replayed deterministically.
#[derive(Default)]
pub struct ManualScheduler {
    now: Duration,
    next_id: u64,
    pending: Vec<PendingTimer>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Move the clock forward; never backwards
    pub fn set_now(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }

    /// Remove and return the earliest timer due at or before `until`
    pub fn pop_due(&mut self, until: Duration) -> Option<(TimerHandle, TimerEvent)> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due <= until)
            .min_by_key(|(_, timer)| (timer.due, timer.handle))
            .map(|(index, _)| index)?;
        let timer = self.pending.remove(index);
        self.set_now(timer.due);
        Some((timer.handle, timer.event))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.iter().any(|timer| timer.handle == handle)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        self.pending.push(PendingTimer {
            handle,
            due: self.now + delay,
            event,
        });
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|timer| timer.handle != handle);
        self.pending.len() != before
    }
}

/// Search service that records every dispatch
#[derive(Default)]
pub struct RecordingSearch {
    calls: Mutex<Vec<(String, SearchScope)>>,
    fail_terms: HashSet<String>,
    next_token: AtomicU32,
    last_token: Mutex<Option<SearchToken>>,
}

impl RecordingSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects searches for the given terms
    pub fn failing(terms: &[&str]) -> Self {
        RecordingSearch {
            fail_terms: terms.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn terms(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn scopes(&self) -> Vec<SearchScope> {
        self.calls.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }

    /// Token of the last accepted search
    pub fn last_token(&self) -> Option<SearchToken> {
        *self.last_token.lock().unwrap()
    }
}

impl SearchService for RecordingSearch {
    fn search(&self, term: &str, scope: &SearchScope) -> Result<SearchToken, HostError> {
        self.calls
            .lock()
            .unwrap()
            .push((term.to_string(), scope.clone()));
        if self.fail_terms.contains(term) {
            return Err(HostError::SearchRejected(format!("refused {}", term)));
        }
        let token = SearchToken(self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        *self.last_token.lock().unwrap() = Some(token);
        Ok(token)
    }
}

/// Transfer service that records enqueued downloads
#[derive(Default)]
pub struct RecordingTransfer {
    downloads: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every download
    pub fn failing() -> Self {
        RecordingTransfer {
            fail: true,
            ..Default::default()
        }
    }

    /// `(peer, remote_path)` pairs, in enqueue order
    pub fn downloads(&self) -> Vec<(String, String)> {
        self.downloads.lock().unwrap().clone()
    }
}

impl TransferService for RecordingTransfer {
    fn enqueue_download(&self, peer: &str, remote_path: &str) -> Result<(), HostError> {
        if self.fail {
            return Err(HostError::TransferRejected(format!(
                "queue full for {}",
                peer
            )));
        }
        self.downloads
            .lock()
            .unwrap()
            .push((peer.to_string(), remote_path.to_string()));
        Ok(())
    }
}

/// Status sink that keeps the current status and every log line
#[derive(Default)]
pub struct RecordingStatus {
    status: Mutex<String>,
    lines: Mutex<Vec<String>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> String {
        self.status.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingStatus {
    fn set_status(&self, message: &str) {
        *self.status.lock().unwrap() = message.to_string();
    }

    fn log_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
