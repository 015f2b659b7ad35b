// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Session lifecycle shared between the command thread and the
//! producer/consumer threads.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use tracing::debug;

/// Lifecycle of a receive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Starting,
            2 => RunState::Running,
            3 => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }
}

/// Lock-free lifecycle flag plus block counters.
///
/// The producer only hands blocks to the consumer while the gate reads
/// `Running`; blocks that arrive in any other state are discarded and
/// counted.
#[derive(Debug)]
pub struct SessionGate {
    state: AtomicU8,
    discarded: AtomicU64,
    dropped_packets: AtomicU64,
}

impl SessionGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::Stopped as u8),
            discarded: AtomicU64::new(0),
            dropped_packets: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, next: RunState) {
        let prev = RunState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            debug!("session state {:?} -> {:?}", prev, next);
        }
    }

    /// Move `Stopped -> Starting`. Returns false if the session was not stopped.
    pub fn begin_start(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::Stopped as u8,
                RunState::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// True while worker threads should keep looping.
    pub fn should_run(&self) -> bool {
        matches!(self.state(), RunState::Starting | RunState::Running)
    }

    /// True when filled blocks may be published to the consumer.
    pub fn accepting_blocks(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn note_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discarded_blocks(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Count datagrams lost in transit (sequence gaps).
    pub fn note_dropped_packets(&self, count: u64) {
        self.dropped_packets.fetch_add(count, Ordering::Relaxed);
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets.load(Ordering::Relaxed)
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}
