//! Watcher subscriptions: a (connection, subject) pair with the event
//! state accumulated for that client between emissions.
//!
//! A throttled watcher (writer queue past the threshold) keeps merging
//! changed sets without emitting; the drain timer re-walks the sets once
//! the queue empties.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use core_cells::{BufReg, RowIndex};
use core_emu::EventState;
use core_wire::Id;
use parking_lot::Mutex;

use crate::writer::Writer;

/// Queue bound shared with the buffer-side changed-region sets.
const MAX_QUEUED_REGIONS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    Term(Id),
    Conn(Id),
    Server,
}

/// Accumulated per-watcher event state.
#[derive(Debug, Default)]
pub struct WatchState {
    pub flags_changed: bool,
    pub buffer_changed: [[bool; 2]; 2],
    pub buffer_switched: bool,
    pub size_changed: bool,
    pub cursor_changed: bool,
    pub bell_count: u32,
    pub mouse_moved: bool,
    /// The next emission must first pull the visible window of both
    /// buffers (fresh watch).
    pub needs_snapshot: bool,
    pub changed_rows: [BTreeSet<RowIndex>; 2],
    pub changed_regions: BTreeSet<BufReg>,
    pub changed_attributes: BTreeMap<String, Vec<u8>>,
}

impl WatchState {
    /// Everything dirty: the initial state of a fresh watch, so the first
    /// emission carries a full snapshot.
    pub fn full() -> Self {
        WatchState {
            flags_changed: true,
            buffer_changed: [[true; 2]; 2],
            buffer_switched: true,
            size_changed: true,
            cursor_changed: true,
            needs_snapshot: true,
            ..Default::default()
        }
    }

    pub fn clear(&mut self) {
        *self = WatchState::default();
    }

    pub fn is_empty(&self) -> bool {
        !self.flags_changed
            && !self.needs_snapshot
            && self.buffer_changed == [[false; 2]; 2]
            && !self.buffer_switched
            && !self.size_changed
            && !self.cursor_changed
            && self.bell_count == 0
            && !self.mouse_moved
            && self.changed_rows[0].is_empty()
            && self.changed_rows[1].is_empty()
            && self.changed_regions.is_empty()
            && self.changed_attributes.is_empty()
    }

    /// Merge one burst's emulator event state.
    pub fn merge_events(&mut self, events: &EventState) {
        self.flags_changed |= events.flags_changed;
        for b in 0..2 {
            for i in 0..2 {
                self.buffer_changed[b][i] |= events.buffer_changed[b][i];
            }
        }
        self.buffer_switched |= events.buffer_switched;
        self.size_changed |= events.size_changed;
        self.cursor_changed |= events.cursor_changed;
        self.bell_count += events.bell_count;
        for (key, line) in &events.changed_attributes {
            self.changed_attributes.insert(key.clone(), line.clone());
        }
    }

    /// Merge a buffer's changed rows, dropping entries behind the retained
    /// window.
    pub fn merge_rows(
        &mut self,
        bufid: usize,
        rows: &BTreeSet<RowIndex>,
        size: RowIndex,
        screen_height: u32,
    ) {
        let dst = &mut self.changed_rows[bufid];
        dst.extend(rows.iter().copied());

        let floor = size.saturating_sub(screen_height as u64);
        while let Some(&first) = dst.iter().next() {
            if first >= floor {
                break;
            }
            dst.remove(&first);
        }
    }

    pub fn merge_regions(&mut self, regions: &BTreeSet<BufReg>) {
        self.changed_regions.extend(regions.iter().copied());
        while self.changed_regions.len() > MAX_QUEUED_REGIONS {
            let first = *self.changed_regions.iter().next().unwrap();
            self.changed_regions.remove(&first);
        }
    }
}

pub struct Watcher {
    pub conn: Id,
    pub target: WatchTarget,
    pub writer: Arc<Writer>,
    pub state: Mutex<WatchState>,
    throttled: AtomicBool,
}

impl Watcher {
    pub fn new(conn: Id, target: WatchTarget, writer: Arc<Writer>) -> Arc<Self> {
        Arc::new(Watcher {
            conn,
            target,
            writer,
            state: Mutex::new(WatchState::full()),
            throttled: AtomicBool::new(false),
        })
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::Relaxed)
    }

    pub fn set_throttled(&self, throttled: bool) {
        self.throttled.store(throttled, Ordering::Relaxed);
    }
}
