use std::time::Duration;

/// Identifies one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// What a timer delivers back to the sequencer when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// No qualifying result arrived in time for `term`
    ResponseTimeout { term: String },
    /// Download delay elapsed for the match found for `term`
    Acquisition {
        term: String,
        peer: String,
        remote_path: String,
    },
}

/// Deferred callbacks on the event loop driving the sequencer
///
/// Timers never block. When one fires, the driver hands `(handle, event)` back to
/// `Sequencer::on_timer`.
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Cancel an armed timer. Returns false if it already fired or was cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;
}
