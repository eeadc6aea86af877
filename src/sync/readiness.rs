use crate::error::SyncError;
use crate::stream_mode::{Modality, StreamMode};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Lifecycle of the synchronizer as seen by the rendezvous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    /// No stream started
    Idle,
    /// Streams running, readiness accumulating
    AwaitingAll,
    /// Streams stopped and device released
    ShutDown,
    /// Device disappeared; every further call fails
    DeviceLost,
}

/// What a signal did to the readiness bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Bit newly set for this cycle
    Accepted,
    /// Bit was already set; the buffer now holds a newer frame
    Coalesced,
    /// Modality not requested, or no cycle running; bitmask untouched
    Masked,
}

/// Which mode a wait releases on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// Whatever mode is requested when the bitmask completes
    Requested,
    /// Exactly this mode; switching away from it ends the wait
    Exact(StreamMode),
}

struct ReadinessState {
    ready: StreamMode,
    requested: StreamMode,
    phase: SyncPhase,
    /// Streams are being stopped and restarted; nothing may release
    switching: bool,
    cancel_pending: bool,
}

impl ReadinessState {
    fn accepts(&self, modality: Modality) -> bool {
        self.phase == SyncPhase::AwaitingAll && !self.switching && self.requested.contains(modality)
    }
}

/// Readiness bitmask plus the rendezvous built on it.
///
/// The bitmask and the requested mode live under one mutex. The bitmask is
/// always a subset of the requested mode: signals for anything else are masked.
pub struct ReadinessTracker {
    connection: String,
    state: Mutex<ReadinessState>,
    condvar: Condvar,
}

impl ReadinessTracker {
    pub fn new<S: Into<String>>(connection: S) -> Self {
        Self {
            connection: connection.into(),
            state: Mutex::new(ReadinessState {
                ready: StreamMode::NONE,
                requested: StreamMode::NONE,
                phase: SyncPhase::Idle,
                switching: false,
                cancel_pending: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Record the arrival of a fresh frame and wake the consumer
    pub fn signal(&self, modality: Modality) -> SignalOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if !state.accepts(modality) {
                SignalOutcome::Masked
            } else if state.ready.contains(modality) {
                SignalOutcome::Coalesced
            } else {
                state.ready.insert(modality);
                SignalOutcome::Accepted
            }
        };

        if outcome != SignalOutcome::Masked {
            trace!("{} ready ({:?})", modality, outcome);
            self.condvar.notify_one();
        }
        outcome
    }

    /// Whether a frame of `modality` would count toward the current cycle
    pub fn accepts(&self, modality: Modality) -> bool {
        self.state.lock().accepts(modality)
    }

    /// Mask every signal and hold every waiter until the next [`reset`](Self::reset)
    pub fn begin_switch(&self) {
        let mut state = self.state.lock();
        state.switching = true;
        state.ready = StreamMode::NONE;
    }

    /// Start a new cycle for `requested`, clearing readiness and ending any switch.
    ///
    /// Returns false and changes nothing once the tracker is closed.
    pub fn reset(&self, requested: StreamMode) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(state.phase, SyncPhase::ShutDown | SyncPhase::DeviceLost) {
                return false;
            }
            state.requested = requested;
            state.ready = StreamMode::NONE;
            state.switching = false;
            state.phase = if requested.is_empty() {
                SyncPhase::Idle
            } else {
                SyncPhase::AwaitingAll
            };
        }
        debug!("Readiness reset for {}", requested);
        // Waiters re-evaluate against the new mode
        self.condvar.notify_all();
        true
    }

    /// Terminal transition; wakes every waiter
    pub fn close(&self, phase: SyncPhase) {
        {
            let mut state = self.state.lock();
            if state.phase == SyncPhase::DeviceLost {
                return;
            }
            state.phase = phase;
            state.ready = StreamMode::NONE;
        }
        self.condvar.notify_all();
    }

    /// Abort the wait in progress, or the next wait if none is in progress
    pub fn cancel(&self) {
        self.state.lock().cancel_pending = true;
        self.condvar.notify_all();
    }

    pub fn ready(&self) -> StreamMode {
        self.state.lock().ready
    }

    pub fn requested(&self) -> StreamMode {
        self.state.lock().requested
    }

    pub fn phase(&self) -> SyncPhase {
        self.state.lock().phase
    }

    /// Block until the bitmask equals the target mode, run `collect` with
    /// that mode under the lock, then clear the bitmask.
    ///
    /// A [`WaitTarget::Exact`] wait fails with `ModeChanged` once another
    /// mode is requested. `timeout` of `None` waits indefinitely.
    pub fn await_ready<T>(
        &self,
        target: WaitTarget,
        timeout: Option<Duration>,
        collect: impl FnOnce(StreamMode) -> T,
    ) -> Result<T, SyncError> {
        let started = Instant::now();
        let deadline = timeout.map(|timeout| started + timeout);
        let mut state = self.state.lock();
        let mut expired = false;

        let mode = loop {
            match state.phase {
                SyncPhase::ShutDown => return Err(SyncError::ShutDown),
                SyncPhase::DeviceLost => {
                    return Err(SyncError::DeviceLost {
                        connection: self.connection.clone(),
                    })
                }
                SyncPhase::Idle | SyncPhase::AwaitingAll => {}
            }

            if state.cancel_pending {
                state.cancel_pending = false;
                return Err(SyncError::Cancelled);
            }

            let mode = match target {
                WaitTarget::Requested => state.requested,
                WaitTarget::Exact(mode) => mode,
            };
            if !state.switching {
                if state.requested != mode {
                    return Err(SyncError::ModeChanged {
                        expected: mode,
                        requested: state.requested,
                    });
                }
                if state.ready == mode {
                    break mode;
                }
            }

            if expired {
                return Err(SyncError::Timeout {
                    mode,
                    ready: state.ready,
                    waited: started.elapsed(),
                });
            }

            match deadline {
                Some(deadline) => {
                    expired = self.condvar.wait_until(&mut state, deadline).timed_out();
                }
                None => self.condvar.wait(&mut state),
            }
        };

        let value = collect(mode);
        state.ready = StreamMode::NONE;
        debug!("Rendezvous released for {} after {:?}", mode, started.elapsed());
        Ok(value)
    }
}
