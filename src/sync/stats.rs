use crate::stream_mode::Modality;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by callback handlers and the rendezvous
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Frames decoded into a buffer, indexed RGB, IR, DEPTH
    frames_received: [AtomicU64; 3],
    /// Frames that failed to decode and were dropped
    frames_dropped: AtomicU64,
    /// Frames from a modality outside the requested mode
    late_frames: AtomicU64,
    /// Signals for a modality already ready in the current cycle
    signals_coalesced: AtomicU64,
    /// Completed rendezvous
    releases: AtomicU64,
    mode_switches: AtomicU64,
    timeouts: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_frame(&self, modality: Modality) {
        self.frames_received[modality.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_late(&self) {
        self.late_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.signals_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a release and return its sequence number, starting at 1
    pub(crate) fn record_release(&self) -> u64 {
        self.releases.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_mode_switch(&self) {
        self.mode_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        let received = |m: Modality| self.frames_received[m.index()].load(Ordering::Relaxed);
        SyncStatsSnapshot {
            rgb_frames: received(Modality::Rgb),
            ir_frames: received(Modality::Ir),
            depth_frames: received(Modality::Depth),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            late_frames: self.late_frames.load(Ordering::Relaxed),
            signals_coalesced: self.signals_coalesced.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            mode_switches: self.mode_switches.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of synchronizer statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatsSnapshot {
    pub rgb_frames: u64,
    pub ir_frames: u64,
    pub depth_frames: u64,
    pub frames_dropped: u64,
    pub late_frames: u64,
    pub signals_coalesced: u64,
    pub releases: u64,
    pub mode_switches: u64,
    pub timeouts: u64,
}

impl SyncStatsSnapshot {
    pub fn frames_received(&self) -> u64 {
        self.rgb_frames + self.ir_frames + self.depth_frames
    }
}
