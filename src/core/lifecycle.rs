//! core/lifecycle.rs — codec/processing status flags shared by both threads.
//!
//! Two independent flags gate every heavy reconfiguration:
//! - codec status: NotInitialised → Initialising → Initialised
//! - processing status: Ongoing while the engine is inside a frame
//!
//! Handshake
//! ---------
//! The engine publishes `Ongoing` *before* it reads the codec status; a reinit
//! publishes `Initialising` *before* it reads the processing status. Both sides
//! use SeqCst, so at least one of them observes the other and backs off.
//!
//! Each side also marks its critical section (`in_frame`, `rebuilding`) once
//! it is past the handshake and checks the other side's mark from inside. A
//! broken handshake is counted in `overlap_count()` by whichever side enters
//! second.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Codec (cache) status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecStatus {
    /// Caches are stale; frames are skipped until the next reinit.
    NotInitialised = 0,
    /// A reinit is rebuilding caches.
    Initialising = 1,
    /// Caches match the configuration.
    Initialised = 2,
}

impl CodecStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Initialising,
            2 => Self::Initialised,
            _ => Self::NotInitialised,
        }
    }
}

/// Processing status of the analysis thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcStatus {
    NotOngoing = 0,
    Ongoing = 1,
}

/// Shared status flags plus overlap instrumentation.
#[derive(Debug)]
pub struct Lifecycle {
    codec: AtomicU8,
    proc: AtomicU8,
    in_frame: AtomicBool,
    rebuilding: AtomicBool,
    overlaps: AtomicU64,
    rebuilds: AtomicU64,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            codec: AtomicU8::new(CodecStatus::NotInitialised as u8),
            proc: AtomicU8::new(ProcStatus::NotOngoing as u8),
            in_frame: AtomicBool::new(false),
            rebuilding: AtomicBool::new(false),
            overlaps: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
        }
    }
}

impl Lifecycle {
    #[inline]
    pub fn codec_status(&self) -> CodecStatus {
        CodecStatus::from_u8(self.codec.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn proc_status(&self) -> ProcStatus {
        if self.proc.load(Ordering::SeqCst) == ProcStatus::Ongoing as u8 {
            ProcStatus::Ongoing
        } else {
            ProcStatus::NotOngoing
        }
    }

    /// Number of times a processing section and a rebuild section were seen
    /// active at the same time. Zero unless the handshake is broken.
    pub fn overlap_count(&self) -> u64 {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Completed rebuilds since creation.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    /// Mark caches stale. Called by setters of structural parameters.
    pub(crate) fn invalidate(&self) {
        self.codec
            .store(CodecStatus::NotInitialised as u8, Ordering::SeqCst);
    }

    /// Enter the per-frame critical section, or `None` when caches are not ready.
    pub(crate) fn try_begin_processing(&self) -> Option<ProcessingGuard<'_>> {
        self.proc.store(ProcStatus::Ongoing as u8, Ordering::SeqCst);
        if self.codec_status() != CodecStatus::Initialised {
            self.proc
                .store(ProcStatus::NotOngoing as u8, Ordering::SeqCst);
            return None;
        }
        self.in_frame.store(true, Ordering::SeqCst);
        if self.rebuilding.load(Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        Some(ProcessingGuard { lifecycle: self })
    }

    /// Enter the rebuild section: publish `Initialising`, then wait for the
    /// in-flight frame (if any) to finish.
    pub(crate) fn begin_rebuild(&self, poll: Duration) -> RebuildGuard<'_> {
        self.codec
            .store(CodecStatus::Initialising as u8, Ordering::SeqCst);
        while self.proc_status() == ProcStatus::Ongoing {
            thread::sleep(poll);
        }
        self.enter_rebuild_section()
    }

    /// Mark the rebuild section entered. `in_frame` is only set by an engine
    /// that got past the codec check, so an engine that is merely backing off
    /// is not counted.
    fn enter_rebuild_section(&self) -> RebuildGuard<'_> {
        self.rebuilding.store(true, Ordering::SeqCst);
        if self.in_frame.load(Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        RebuildGuard {
            lifecycle: self,
            finished: false,
        }
    }

    /// Poll until no frame is in flight, giving up after `max_polls`.
    /// Returns whether the engine went quiet.
    pub(crate) fn wait_quiescent(&self, poll: Duration, max_polls: usize) -> bool {
        for _ in 0..max_polls {
            if self.proc_status() == ProcStatus::NotOngoing
                && self.codec_status() != CodecStatus::Initialising
            {
                return true;
            }
            thread::sleep(poll);
        }
        false
    }
}

/// Held by the engine for the duration of one `analyse` call.
pub(crate) struct ProcessingGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.in_frame.store(false, Ordering::SeqCst);
        self.lifecycle
            .proc
            .store(ProcStatus::NotOngoing as u8, Ordering::SeqCst);
    }
}

/// Held by the control thread while caches are rebuilt.
///
/// Dropping without [`RebuildGuard::finish`] (e.g. on unwind) leaves the codec
/// `NotInitialised`, so the engine never sees a half-built state.
pub(crate) struct RebuildGuard<'a> {
    lifecycle: &'a Lifecycle,
    finished: bool,
}

impl RebuildGuard<'_> {
    pub(crate) fn finish(mut self) {
        self.finished = true;
        self.lifecycle.rebuilds.fetch_add(1, Ordering::SeqCst);
        self.lifecycle.rebuilding.store(false, Ordering::SeqCst);
        self.lifecycle
            .codec
            .store(CodecStatus::Initialised as u8, Ordering::SeqCst);
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.lifecycle.rebuilding.store(false, Ordering::SeqCst);
            self.lifecycle.invalidate();
        }
    }
}
