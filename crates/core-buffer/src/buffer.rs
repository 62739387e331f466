//! The row ring and the region catalog.
//!
//! Invariants:
//! * `capacity == 1 << caporder`, the ring wraps with `capacity - 1`;
//! * `size <= realsize <= capacity` except transiently inside a resize;
//! * `size >= screen_height`; in no-scrollback mode rows shift in place so
//!   `size == screen_height` always;
//! * a region id is in `by_start` iff it is in the catalog map, and in
//!   `by_end` iff it also has `HAS_END`;
//! * when the ring evicts a row, every region starting behind the retained
//!   window is deleted from all three indices.
//!
//! Logical row indices are monotonic between ring reconfigurations; a
//! caporder change or scrollback clear renumbers rows relative to the new
//! origin and shifts regions with them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use core_cells::{
    BufReg, CellRow, Column, ContentId, INVALID_REGION_ID, LineFlags, RegionFlags, RegionId,
    RowIndex, make_bufreg,
};

use crate::region::{Region, RegionType};

/// Changed-region queue bound; oldest entries are dropped first.
const MAX_QUEUED_REGIONS: usize = 512;

/// Sort key for the start/end indices: row, then type, then id.
type RegionKey = (RowIndex, u8, RegionId);

fn start_key(r: &Region) -> RegionKey {
    (r.start_row, r.ty as u8, r.id)
}

fn end_key(r: &Region) -> RegionKey {
    (r.end_row, r.ty as u8, r.id)
}

/// Per-burst accumulation the emission layer drains.
#[derive(Debug, Default)]
pub struct BufferEvents {
    pub changed_rows: BTreeSet<RowIndex>,
    pub changed_regions: BTreeSet<BufReg>,
    pub length_changed: bool,
    pub capacity_changed: bool,
    /// Content ids released by evicted image regions.
    pub released_content: Vec<ContentId>,
}

#[derive(Debug)]
pub struct TermBuffer {
    size: RowIndex,
    realsize: RowIndex,
    capacity: RowIndex,
    capmask: RowIndex,
    screen_height: u32,
    id: u8,
    caporder: u8,
    no_scrollback: bool,
    next_region_id: RegionId,
    modtime: i32,

    rows: std::collections::VecDeque<CellRow>,
    events: BufferEvents,

    regions: BTreeMap<RegionId, Region>,
    /// Regions dropped from the catalog but still referenced by the screen.
    detached: HashMap<RegionId, Region>,
    by_start: BTreeSet<RegionKey>,
    by_end: BTreeSet<RegionKey>,
}

impl TermBuffer {
    /// `caporder == 0` selects no-scrollback mode; the effective caporder is
    /// always rounded up to cover the screen.
    pub fn new(screen_height: u32, caporder: u8, id: u8) -> Self {
        let no_scrollback = caporder == 0;
        let mut caporder = caporder;
        while (1u64 << caporder) < screen_height as u64 {
            caporder += 1;
        }

        let mut rows = std::collections::VecDeque::new();
        for _ in 0..screen_height {
            rows.push_back(CellRow::new());
        }

        TermBuffer {
            size: screen_height as u64,
            realsize: screen_height as u64,
            capacity: 1 << caporder,
            capmask: (1 << caporder) - 1,
            screen_height,
            id,
            caporder,
            no_scrollback,
            next_region_id: 0,
            modtime: 0,
            rows,
            events: BufferEvents::default(),
            regions: BTreeMap::new(),
            detached: HashMap::new(),
            by_start: BTreeSet::new(),
            by_end: BTreeSet::new(),
        }
    }

    pub fn size(&self) -> RowIndex {
        self.size
    }

    pub fn capacity(&self) -> RowIndex {
        self.capacity
    }

    pub fn screen_height(&self) -> u32 {
        self.screen_height
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Caporder with the no-scrollback marker in the top bit, as it rides in
    /// the buffer-capacity frame.
    pub fn caporder_wire(&self) -> u8 {
        self.caporder | if self.no_scrollback { 0x80 } else { 0 }
    }

    pub fn no_scrollback(&self) -> bool {
        self.no_scrollback
    }

    pub fn set_modtime(&mut self, modtime: i32) {
        self.modtime = modtime;
    }

    /*
     * Rows
     */

    pub fn const_row(&self, i: RowIndex) -> &CellRow {
        &self.rows[(i & self.capmask) as usize]
    }

    pub fn raw_row_mut(&mut self, i: RowIndex) -> &mut CellRow {
        let idx = (i & self.capmask) as usize;
        &mut self.rows[idx]
    }

    /// Mutable row access that stamps the row and breaks the wrap chain:
    /// overwriting row `i` clears the continuation flag on row `i + 1`.
    pub fn row_mut(&mut self, i: RowIndex) -> &mut CellRow {
        self.events.changed_rows.insert(i);

        if i < self.size - 1 {
            let nidx = ((i + 1) & self.capmask) as usize;
            if !self.rows[nidx].flags.is_empty() {
                self.events.changed_rows.insert(i + 1);
                self.rows[nidx].modtime = self.modtime;
                self.rows[nidx].flags.remove(LineFlags::CONTINUATION);
            }
        }

        let idx = (i & self.capmask) as usize;
        self.rows[idx].modtime = self.modtime;
        &mut self.rows[idx]
    }

    /// Mutable row access without the continuation check.
    pub fn single_row_mut(&mut self, i: RowIndex) -> &mut CellRow {
        self.events.changed_rows.insert(i);
        let idx = (i & self.capmask) as usize;
        self.rows[idx].modtime = self.modtime;
        &mut self.rows[idx]
    }

    pub fn touch_row(&mut self, i: RowIndex) {
        self.events.changed_rows.insert(i);
        let idx = (i & self.capmask) as usize;
        self.rows[idx].modtime = self.modtime;
    }

    /*
     * Event state
     */

    pub fn events(&self) -> &BufferEvents {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut BufferEvents {
        &mut self.events
    }

    pub fn reset_event_state(&mut self) {
        self.events.changed_rows.clear();
        self.events.changed_regions.clear();
        self.events.length_changed = false;
        self.events.capacity_changed = false;
        self.events.released_content.clear();
    }

    fn report_length(&mut self) {
        self.events.length_changed = true;
    }

    fn report_capacity(&mut self) {
        self.events.length_changed = true;
        self.events.capacity_changed = true;
    }

    fn bound_changed_rows(&mut self, limit: usize) {
        while self.events.changed_rows.len() > limit {
            let first = *self.events.changed_rows.iter().next().unwrap();
            self.events.changed_rows.remove(&first);
        }
    }

    /*
     * Ring operations
     */

    /// Swap-chain shift of logical rows `[pos, top)` down by one; the row at
    /// `top` lands at `pos`.
    fn rotate_down(&mut self, top: RowIndex, pos: RowIndex) {
        let mut i = top;
        while i > pos {
            let a = (i & self.capmask) as usize;
            let b = ((i - 1) & self.capmask) as usize;
            self.rows.swap(a, b);
            self.events.changed_rows.insert(i);
            i -= 1;
        }
        self.events.changed_rows.insert(i);
    }

    /// Open a blank row at logical position `pos`, scrolling the ring.
    pub fn insert_row(&mut self, pos: RowIndex) {
        if self.no_scrollback {
            // Shift in place; size stays pinned to the screen height
            self.rows.insert(pos as usize, CellRow::new());
            self.rows.pop_front();

            for i in 0..pos {
                self.events.changed_rows.insert(i);
            }
            return;
        } else if self.size < self.realsize {
            // Recycle a row saved past the current size
            self.rotate_down(self.size, pos);
        } else if self.size < self.capacity {
            self.rows.insert(pos as usize, CellRow::new());
            for i in pos..=self.size {
                self.events.changed_rows.insert(i);
            }
            self.realsize += 1;
        } else if pos == self.size {
            let idx = (pos & self.capmask) as usize;
            self.rows[idx].clear();
            self.events.changed_rows.insert(pos);
            self.evict_regions();
        } else {
            self.rotate_down(self.size, pos);
            let idx = (pos & self.capmask) as usize;
            self.rows[idx].clear();
            self.evict_regions();
        }

        self.size += 1;
        self.report_length();
        self.bound_changed_rows(self.screen_height as usize);
    }

    fn evict_regions(&mut self) {
        let floor = self.size - self.capacity;
        while let Some(&(row, _, id)) = self.by_start.iter().next() {
            if row > floor {
                break;
            }
            self.delete_region(id);
        }
    }

    /// Rotate a slice without growing the ring: the row at `delpos` is
    /// recycled as a blank at `addpos` above it (scroll-region scroll down).
    pub fn delete_row_and_insert_above(&mut self, delpos: RowIndex, addpos: RowIndex) {
        self.rotate_down(delpos, addpos);
        let idx = (addpos & self.capmask) as usize;
        self.rows[idx].clear();
    }

    /// As above but the blank lands below (scroll-region scroll up).
    pub fn delete_row_and_insert_below(&mut self, delpos: RowIndex, addpos: RowIndex) {
        let mut i = delpos;
        while i < addpos {
            let a = (i & self.capmask) as usize;
            let b = ((i + 1) & self.capmask) as usize;
            self.rows.swap(a, b);
            self.events.changed_rows.insert(i);
            i += 1;
        }
        self.events.changed_rows.insert(i);
        let idx = (addpos & self.capmask) as usize;
        self.rows[idx].clear();
    }

    /// Resize the ring. Rows are renumbered relative to the new origin;
    /// regions shift with them and anything falling off the top is deleted.
    fn set_caporder(&mut self, caporder: u8) {
        if self.caporder < caporder {
            // Increase caporder: make the physical layout contiguous first
            let pos = (self.realsize & self.capmask) as usize;

            if pos < self.rows.len() {
                if (pos as u64) < self.capacity / 2 {
                    self.rows.rotate_left(pos);
                } else {
                    self.rows.rotate_right(self.capacity as usize - pos);
                }
            }

            // Remove saved rows
            while self.realsize > self.size {
                self.rows.pop_back();
                self.realsize -= 1;
            }
        } else {
            // Decrease caporder: keep the newest window
            let capacity = 1u64 << caporder;
            let end = (self.size & self.capmask) as usize;
            let start = if self.size > capacity {
                ((end as u64).wrapping_sub(capacity) & self.capmask) as usize
            } else {
                0
            };

            if end >= start {
                self.rows.drain(end..);
                self.rows.drain(..start);
            } else {
                self.rows.drain(end..start);
                self.rows.rotate_left(end);
            }
        }

        // Renumber regions against the new origin
        let discarded = self.size - self.rows.len() as u64;
        self.events.changed_regions.clear();
        if discarded > 0 {
            self.shift_regions_down(discarded);
        }

        let len = self.rows.len() as u64;
        let window = len - self.screen_height as u64;
        let mut pulled = BTreeSet::new();
        self.pull_regions(window, len, &mut pulled);
        self.events.changed_regions = pulled;

        self.size = len;
        self.realsize = len;
        self.capacity = 1 << caporder;
        self.capmask = self.capacity - 1;
        self.caporder = caporder;

        self.events.changed_rows.clear();
        for i in 1..=self.screen_height as u64 {
            self.events.changed_rows.insert(self.size - i);
        }
    }

    fn shift_regions_down(&mut self, discarded: u64) {
        while let Some(&(row, _, id)) = self.by_start.iter().next() {
            if row >= discarded {
                break;
            }
            self.delete_region(id);
        }
        let mut by_start = BTreeSet::new();
        let mut by_end = BTreeSet::new();
        for region in self.regions.values_mut() {
            region.start_row -= discarded;
            if region.flags.contains(RegionFlags::HAS_END) {
                region.end_row -= discarded;
            }
            by_start.insert(start_key(region));
            if region.flags.contains(RegionFlags::HAS_END) {
                by_end.insert(end_key(region));
            }
        }
        self.by_start = by_start;
        self.by_end = by_end;
    }

    pub fn enable_scrollback(&mut self, caporder: u8) -> bool {
        let mut caporder = caporder;
        while (1u64 << caporder) < self.screen_height as u64 {
            caporder += 1;
        }

        if !self.no_scrollback && self.caporder == caporder {
            return false;
        }
        self.no_scrollback = false;
        if self.caporder != caporder {
            self.set_caporder(caporder);
        }

        self.report_capacity();
        true
    }

    /// Drop everything behind the visible window. Returns false when there
    /// is no scrollback to clear.
    pub fn clear_scrollback(&mut self) -> bool {
        if self.size == self.screen_height as u64 {
            return false;
        }

        let end = (self.size & self.capmask) as usize;
        let start = ((end as u64).wrapping_sub(self.screen_height as u64) & self.capmask) as usize;

        if end >= start {
            self.rows.drain(end..);
            self.rows.drain(..start);
        } else {
            self.rows.drain(end..start);
            self.rows.rotate_left(end);
        }

        let discarded = self.size - self.screen_height as u64;
        self.events.changed_regions.clear();
        self.shift_regions_down(discarded);

        let mut pulled = BTreeSet::new();
        self.pull_regions(0, self.screen_height as u64, &mut pulled);
        self.events.changed_regions = pulled;

        self.size = self.screen_height as u64;
        self.realsize = self.size;

        self.events.changed_rows.clear();
        for i in 0..self.size {
            self.events.changed_rows.insert(i);
        }

        self.report_capacity();
        true
    }

    /// Adjust the visible window height. Up to `max_chop` trailing blank
    /// rows are chopped instead of scrolling content up. Returns the number
    /// of rows added at the bottom.
    pub fn set_screen_height(&mut self, screen_height: u32, max_chop: u32) -> i32 {
        let mut added = 0i32;
        let mut removed = 0i32;
        let old_height = self.screen_height;

        if self.capacity < screen_height as u64 {
            let mut caporder = self.caporder;
            while (1u64 << caporder) < screen_height as u64 {
                caporder += 1;
            }
            self.set_caporder(caporder);
            self.report_capacity();
        }

        if self.no_scrollback {
            while self.size > screen_height as u64 {
                // size diverges from realsize here
                self.size -= 1;
                removed += 1;
                self.rows[self.size as usize].clear();
            }
            while self.size < screen_height as u64 {
                if self.size == self.realsize {
                    self.rows.push_back(CellRow::new());
                    self.realsize += 1;
                }
                self.events.changed_rows.insert(self.size);
                self.size += 1;
                added += 1;
            }
        } else {
            while self.size < screen_height as u64 {
                added += 1;

                if self.size < self.realsize {
                    // reuse a saved row
                } else {
                    if self.size < self.capacity {
                        self.rows.push_back(CellRow::new());
                    } else {
                        let idx = (self.size & self.capmask) as usize;
                        self.rows[idx].clear();
                    }
                    self.realsize += 1;
                }
                self.events.changed_rows.insert(self.size);
                self.size += 1;
            }

            // try to chop empty rows instead of scrolling up
            let mut chop = max_chop;
            let mut i = screen_height;
            while chop > 0 && i < old_height {
                let idx = ((self.size - 1) & self.capmask) as usize;
                if !self.rows[idx].is_empty() {
                    break;
                }

                // size diverges from realsize here
                self.rows[idx].clear();
                self.size -= 1;
                removed += 1;
                chop -= 1;
                i += 1;
            }

            if added as u32 <= old_height {
                let lower = old_height - added as u32;
                let mut i = screen_height;
                while i > lower {
                    self.events.changed_rows.insert(self.size - i as u64);
                    i -= 1;
                }
            }
        }

        self.screen_height = screen_height;
        if added != 0 || removed != 0 {
            self.report_length();
        }

        self.bound_changed_rows(screen_height as usize);
        added
    }

    /// Reset every row. Only meaningful for the alternate buffer.
    pub fn clear(&mut self) {
        self.rows.clear();

        while (self.rows.len() as u64) < self.size {
            self.events.changed_rows.insert(self.rows.len() as u64);
            self.rows.push_back(CellRow::new());
        }

        self.realsize = self.size;
    }

    /*
     * Region catalog
     */

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// Region lookup for the screen's live job/prompt/command/output ids;
    /// also finds regions the catalog has already dropped.
    pub fn live_region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id).or_else(|| self.detached.get(&id))
    }

    pub fn live_region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        if self.regions.contains_key(&id) {
            return self.regions.get_mut(&id);
        }
        self.detached.get_mut(&id)
    }

    pub fn take_reference(&mut self, id: RegionId) {
        if let Some(r) = self.live_region_mut(id) {
            r.refcount += 1;
        }
    }

    /// Drop one reference. Returns true while the region is still alive.
    pub fn put_reference(&mut self, id: RegionId) -> bool {
        let Some(r) = self.live_region_mut(id) else {
            return false;
        };
        r.refcount -= 1;
        if r.refcount == 0 {
            if let Some(region) = self.regions.remove(&id) {
                self.by_start.remove(&start_key(&region));
                self.by_end.remove(&end_key(&region));
            }
            self.detached.remove(&id);
            false
        } else {
            true
        }
    }

    fn delete_region(&mut self, id: RegionId) {
        let Some(mut region) = self.regions.remove(&id) else {
            return;
        };
        if region.ty == RegionType::Image {
            if let Some(cid) = region
                .attributes
                .get("id")
                .and_then(|v| v.parse::<ContentId>().ok())
            {
                self.events.released_content.push(cid);
            }
        }

        self.events.changed_regions.remove(&region.bufreg());
        self.by_start.remove(&start_key(&region));
        self.by_end.remove(&end_key(&region));

        region.refcount -= 1;
        if region.refcount > 0 {
            self.detached.insert(id, region);
        }
    }

    pub fn report_region(&mut self, id: RegionId) {
        if let Some(r) = self.regions.get(&id) {
            let bufreg = r.bufreg();
            self.events.changed_regions.insert(bufreg);
        }
    }

    fn next_id(&mut self) -> RegionId {
        self.next_region_id = self.next_region_id.wrapping_add(1);
        if self.next_region_id == INVALID_REGION_ID {
            self.next_region_id = 1;
        }
        self.next_region_id
    }

    /// Insert a region whose start is set; no same-type scan.
    pub fn add_region(&mut self, mut region: Region) -> RegionId {
        let id = self.next_id();
        region.id = id;
        region.bufid = self.id;

        self.by_start.insert(start_key(&region));
        // Note: not added to by_end here
        self.events.changed_regions.insert(region.bufreg());
        self.regions.insert(id, region);
        id
    }

    /// Insert a region, deleting same-type regions that begin at or past it
    /// and marking regions that end past it overwritten.
    pub fn begin_region(&mut self, region: Region) -> RegionId {
        // Delete any same-type regions starting at or after this one
        let mut deleted = Vec::new();
        for &(row, ty, id) in self.by_start.iter().rev() {
            if row < region.start_row {
                break;
            }
            if ty != region.ty as u8 {
                continue;
            }
            let other = &self.regions[&id];
            if other.start_row == region.start_row && other.start_col < region.start_col {
                continue;
            }
            if other.flags.contains(RegionFlags::DELETED) {
                continue;
            }
            deleted.push(id);
        }
        for id in deleted {
            let bufreg = self.regions[&id].bufreg();
            self.regions.get_mut(&id).unwrap().flags |= RegionFlags::DELETED;
            self.events.changed_regions.insert(bufreg);
        }

        self.overwrite_regions_past(region.start_row, region.start_col);
        self.add_region(region)
    }

    fn overwrite_regions_past(&mut self, row: RowIndex, col: Column) {
        let mut overwritten = Vec::new();
        for &(end_row, _, id) in self.by_end.iter().rev() {
            if end_row < row {
                break;
            }
            let other = &self.regions[&id];
            if other.end_row == row && other.end_col <= col {
                continue;
            }
            if other.flags.contains(RegionFlags::DELETED) {
                continue;
            }
            overwritten.push(id);
        }
        for id in overwritten {
            let bufreg = self.regions[&id].bufreg();
            self.regions.get_mut(&id).unwrap().flags |= RegionFlags::OVERWRITTEN;
            self.events.changed_regions.insert(bufreg);
        }
    }

    /// Close a region at the given cursor position. When the recorded start
    /// lies past the end, the end snaps to the start.
    pub fn end_region(&mut self, id: RegionId, row: RowIndex, col: Column) {
        let Some(region) = self.regions.get_mut(&id) else {
            return;
        };
        region.end_row = row;
        region.end_col = col;

        if region.start_row > region.end_row {
            region.end_row = region.start_row;
            region.end_col = region.start_col;
        } else if region.start_row == region.end_row && region.start_col > region.end_col {
            region.end_col = region.start_col;
        }

        region.flags |= RegionFlags::HAS_END;
        let key = end_key(region);
        let bufreg = region.bufreg();
        self.by_end.insert(key);
        self.events.changed_regions.insert(bufreg);
    }

    /// Close a region at an exact position, without the snap.
    pub fn end_region_at(&mut self, id: RegionId, row: RowIndex, col: Column) {
        let Some(region) = self.regions.get_mut(&id) else {
            return;
        };
        region.end_row = row;
        region.end_col = col;
        region.flags |= RegionFlags::HAS_END;
        let key = end_key(region);
        let bufreg = region.bufreg();
        self.by_end.insert(key);
        self.events.changed_regions.insert(bufreg);
    }

    /// Mark non-user regions starting at or after (row, col) deleted and
    /// regions ending past it overwritten; eviction reclaims them later.
    pub fn remove_regions(&mut self, start_row: RowIndex, start_col: Column) {
        let mut deleted = Vec::new();
        for &(row, ty, id) in self.by_start.iter().rev() {
            if row < start_row {
                break;
            }
            if ty == RegionType::User as u8 {
                continue;
            }
            let other = &self.regions[&id];
            if other.start_row == start_row && other.start_col < start_col {
                continue;
            }
            if other.flags.contains(RegionFlags::DELETED) {
                continue;
            }
            deleted.push(id);
        }
        for id in deleted {
            let bufreg = self.regions[&id].bufreg();
            self.regions.get_mut(&id).unwrap().flags |= RegionFlags::DELETED;
            self.events.changed_regions.insert(bufreg);
        }

        self.overwrite_regions_past(start_row, start_col);
    }

    /// Collect the ids (and parent job ids) of regions intersecting
    /// `[start, end)`.
    pub fn pull_regions(&self, start: RowIndex, end: RowIndex, ret: &mut BTreeSet<BufReg>) {
        if end == 0 {
            return;
        }
        let lo = (start, 0u8, RegionId::MIN);
        let hi = (end - 1, u8::MAX, RegionId::MAX);

        for &(_, _, id) in self.by_start.range(lo..=hi) {
            let r = &self.regions[&id];
            ret.insert(r.parent_bufreg());
            ret.insert(r.bufreg());
        }
        for &(_, _, id) in self.by_end.range(lo..=hi) {
            let r = &self.regions[&id];
            ret.insert(r.parent_bufreg());
            ret.insert(r.bufreg());
        }

        ret.remove(&make_bufreg(self.id, INVALID_REGION_ID));
    }

    /// As `pull_regions` but returning full copies, parents resolved.
    pub fn pull_regions_full(&self, start: RowIndex, end: RowIndex) -> Vec<Region> {
        let mut set = BTreeSet::new();
        self.pull_regions(start, end, &mut set);

        let mut out = Vec::new();
        for bufreg in set {
            let id = core_cells::bufreg_reg(bufreg);
            if let Some(r) = self.regions.get(&id) {
                out.push(r.clone());
            }
        }
        out
    }

    /// User regions are created whole; overlapping user regions replace the
    /// earlier ones.
    pub fn add_user_region(&mut self, mut region: Region) -> RegionId {
        if !region.is_ordered() || region.ty != RegionType::User {
            return INVALID_REGION_ID;
        }

        let lo = (region.start_row, 0u8, RegionId::MIN);
        let hi = (region.end_row, u8::MAX, RegionId::MAX);
        let mut doomed = BTreeSet::new();

        for &(_, _, id) in self.by_start.range(lo..=hi) {
            let other = &self.regions[&id];
            if other.ty == RegionType::User && region.overlaps(other) {
                doomed.insert(id);
            }
        }
        for &(_, _, id) in self.by_end.range(lo..=hi) {
            let other = &self.regions[&id];
            if other.ty == RegionType::User && region.overlaps(other) {
                doomed.insert(id);
            }
        }
        for id in doomed {
            self.delete_region(id);
        }

        let id = self.next_id();
        region.id = id;
        region.bufid = self.id;
        region.flags = RegionFlags::HAS_START | RegionFlags::HAS_END;

        self.by_start.insert(start_key(&region));
        self.by_end.insert(end_key(&region));
        self.events.changed_regions.insert(region.bufreg());
        self.regions.insert(id, region);
        id
    }

    pub fn remove_user_region(&mut self, id: RegionId) -> bool {
        if let Some(region) = self.regions.get_mut(&id) {
            if region.ty == RegionType::User && !region.flags.contains(RegionFlags::DELETED) {
                region.flags |= RegionFlags::DELETED;
                let bufreg = region.bufreg();
                self.events.changed_regions.insert(bufreg);
                return true;
            }
        }
        false
    }

    /// Bound the changed-region queue; oldest first.
    pub fn bound_changed_regions(&mut self) {
        while self.events.changed_regions.len() > MAX_QUEUED_REGIONS {
            let first = *self.events.changed_regions.iter().next().unwrap();
            self.events.changed_regions.remove(&first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_marker(buf: &mut TermBuffer, row: RowIndex, text: &str) {
        let r = buf.row_mut(row);
        r.erase_all();
        for c in text.chars() {
            r.append(&core_cells::CellAttributes::default(), c, 1);
        }
    }

    #[test]
    fn new_buffer_rounds_capacity_to_power_of_two() {
        let buf = TermBuffer::new(24, 0, 1);
        assert!(buf.no_scrollback());
        assert_eq!(buf.capacity(), 32);
        assert_eq!(buf.size(), 24);
        assert_eq!(buf.caporder_wire() & 0x80, 0x80);
    }

    #[test]
    fn insert_row_grows_size_with_scrollback() {
        let mut buf = TermBuffer::new(4, 6, 0);
        for i in 0..4 {
            write_marker(&mut buf, i, &format!("row{i}"));
        }
        buf.insert_row(4);
        assert_eq!(buf.size(), 5);
        assert_eq!(buf.const_row(0).as_str(), "row0");
        assert!(buf.const_row(4).is_empty());
    }

    #[test]
    fn insert_row_no_scrollback_shifts_in_place() {
        let mut buf = TermBuffer::new(4, 0, 1);
        for i in 0..4 {
            write_marker(&mut buf, i, &format!("row{i}"));
        }
        buf.insert_row(4);
        assert_eq!(buf.size(), 4);
        assert_eq!(buf.const_row(0).as_str(), "row1");
        assert!(buf.const_row(3).is_empty());
    }

    #[test]
    fn ring_wrap_recycles_oldest_row() {
        let mut buf = TermBuffer::new(4, 2, 0); // capacity 4
        for i in 0..4 {
            write_marker(&mut buf, i, &format!("row{i}"));
        }
        buf.insert_row(4);
        assert_eq!(buf.size(), 5);
        // Logical row 4 recycled the storage of logical row 0
        assert!(buf.const_row(4).is_empty());
        assert_eq!(buf.const_row(1).as_str(), "row1");
    }

    #[test]
    fn eviction_deletes_regions_behind_window() {
        let mut buf = TermBuffer::new(4, 2, 0); // capacity 4
        let mut region = Region::new(RegionType::Job);
        region.start_row = 0;
        region.start_col = 0;
        let id = buf.begin_region(region);
        buf.end_region(id, 0, 3);
        assert!(buf.region(id).is_some());

        // Wrap far enough that row 0 leaves the ring
        for _ in 0..5 {
            buf.insert_row(buf.size());
        }
        assert!(buf.region(id).is_none());
        assert!(!buf.by_start.iter().any(|&(_, _, i)| i == id));
        assert!(!buf.by_end.iter().any(|&(_, _, i)| i == id));
    }

    #[test]
    fn scroll_region_rotation_keeps_size() {
        let mut buf = TermBuffer::new(5, 3, 0);
        for i in 0..5 {
            write_marker(&mut buf, i, &format!("row{i}"));
        }
        // Scroll up inside margins 1..3: row 1 is deleted, blank appears at 3
        buf.delete_row_and_insert_below(1, 3);
        assert_eq!(buf.size(), 5);
        assert_eq!(buf.const_row(0).as_str(), "row0");
        assert_eq!(buf.const_row(1).as_str(), "row2");
        assert_eq!(buf.const_row(2).as_str(), "row3");
        assert!(buf.const_row(3).is_empty());
        assert_eq!(buf.const_row(4).as_str(), "row4");
    }

    #[test]
    fn clear_scrollback_renumbers_and_keeps_screen() {
        let mut buf = TermBuffer::new(3, 4, 0);
        for i in 0..3 {
            write_marker(&mut buf, i, &format!("row{i}"));
        }
        for _ in 0..4 {
            let at = buf.size();
            buf.insert_row(at);
            let at = buf.size() - 1;
            write_marker(&mut buf, at, &format!("new{at}"));
        }
        assert_eq!(buf.size(), 7);
        assert!(buf.clear_scrollback());
        assert_eq!(buf.size(), 3);
        // The visible window survived under new indices
        assert_eq!(buf.const_row(2).as_str(), "new6");
        assert!(!buf.clear_scrollback());
    }

    #[test]
    fn enable_scrollback_resizes_ring() {
        let mut buf = TermBuffer::new(4, 0, 1);
        assert!(buf.no_scrollback());
        assert!(buf.enable_scrollback(6));
        assert!(!buf.no_scrollback());
        assert_eq!(buf.capacity(), 64);
        assert!(!buf.enable_scrollback(6));
    }

    #[test]
    fn shrink_caporder_keeps_newest_rows() {
        let mut buf = TermBuffer::new(4, 5, 0); // capacity 32
        for i in 0..4 {
            write_marker(&mut buf, i, &format!("row{i}"));
        }
        for _ in 0..6 {
            let at = buf.size();
            buf.insert_row(at);
            write_marker(&mut buf, at, &format!("new{at}"));
        }
        assert_eq!(buf.size(), 10);
        // Shrink to capacity 8: the oldest two rows fall off and indices
        // renumber from the survivor at the top.
        buf.enable_scrollback(3);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.size(), 8);
        assert_eq!(buf.const_row(7).as_str(), "new9");
    }

    #[test]
    fn set_screen_height_chops_trailing_blanks() {
        let mut buf = TermBuffer::new(6, 4, 0);
        write_marker(&mut buf, 0, "content");
        // Rows 1..6 stay empty; shrinking to 4 with chop allowed removes
        // blanks instead of scrolling.
        let added = buf.set_screen_height(4, 2);
        assert_eq!(added, 0);
        assert_eq!(buf.size(), 4);
        assert_eq!(buf.screen_height(), 4);
        assert_eq!(buf.const_row(0).as_str(), "content");
    }

    #[test]
    fn begin_region_deletes_later_same_type_starts() {
        let mut buf = TermBuffer::new(10, 4, 0);
        let mut a = Region::new(RegionType::Prompt);
        a.start_row = 5;
        let a_id = buf.begin_region(a);

        let mut b = Region::new(RegionType::Prompt);
        b.start_row = 3;
        let b_id = buf.begin_region(b);

        assert!(buf.region(a_id).unwrap().flags.contains(RegionFlags::DELETED));
        assert!(!buf.region(b_id).unwrap().flags.contains(RegionFlags::DELETED));
    }

    #[test]
    fn end_region_snaps_inverted_span() {
        let mut buf = TermBuffer::new(10, 4, 0);
        let mut r = Region::new(RegionType::Output);
        r.start_row = 5;
        r.start_col = 7;
        let id = buf.begin_region(r);
        buf.end_region(id, 3, 0);
        let r = buf.region(id).unwrap();
        assert_eq!((r.end_row, r.end_col), (5, 7));
        assert!(r.flags.contains(RegionFlags::HAS_END));
    }

    #[test]
    fn pull_regions_includes_parents() {
        let mut buf = TermBuffer::new(10, 4, 0);
        let mut job = Region::new(RegionType::Job);
        job.start_row = 2;
        let job_id = buf.begin_region(job);
        buf.end_region(job_id, 6, 0);

        let mut out = Region::with_parent(RegionType::Output, job_id);
        out.start_row = 4;
        let out_id = buf.begin_region(out);
        buf.end_region(out_id, 6, 0);

        let mut set = BTreeSet::new();
        buf.pull_regions(4, 5, &mut set);
        let ids: Vec<RegionId> = set.iter().map(|&b| core_cells::bufreg_reg(b)).collect();
        assert!(ids.contains(&job_id));
        assert!(ids.contains(&out_id));
    }

    #[test]
    fn user_region_overlap_replaces_earlier() {
        let mut buf = TermBuffer::new(10, 4, 0);
        let mut a = Region::new(RegionType::User);
        a.start_row = 1;
        a.end_row = 3;
        a.end_col = 5;
        let a_id = buf.add_user_region(a);
        assert_ne!(a_id, INVALID_REGION_ID);

        // Partial overlap: the earlier region is deleted outright, the new
        // one is never split.
        let mut b = Region::new(RegionType::User);
        b.start_row = 2;
        b.end_row = 4;
        b.end_col = 0;
        let b_id = buf.add_user_region(b);
        assert_ne!(b_id, INVALID_REGION_ID);

        assert!(buf.region(a_id).is_none());
        let b = buf.region(b_id).unwrap();
        assert_eq!((b.start_row, b.end_row), (2, 4));
    }

    #[test]
    fn malformed_user_region_rejected() {
        let mut buf = TermBuffer::new(10, 4, 0);
        let mut r = Region::new(RegionType::User);
        r.start_row = 5;
        r.end_row = 2;
        assert_eq!(buf.add_user_region(r), INVALID_REGION_ID);
    }

    #[test]
    fn detached_region_outlives_catalog_entry() {
        let mut buf = TermBuffer::new(4, 2, 0); // capacity 4
        let mut job = Region::new(RegionType::Job);
        job.start_row = 0;
        let id = buf.begin_region(job);
        buf.take_reference(id); // the screen's live reference

        for _ in 0..6 {
            let at = buf.size();
            buf.insert_row(at);
        }
        assert!(buf.region(id).is_none());
        assert!(buf.live_region(id).is_some());
        assert_eq!(buf.live_region(id).unwrap().refcount, 1);
        assert!(!buf.put_reference(id));
        assert!(buf.live_region(id).is_none());
    }

    #[test]
    fn changed_rows_are_bounded_by_screen_height() {
        let mut buf = TermBuffer::new(4, 6, 0);
        for _ in 0..20 {
            let at = buf.size();
            buf.insert_row(at);
        }
        assert!(buf.events().changed_rows.len() <= 4);
        let max = *buf.events().changed_rows.iter().next_back().unwrap();
        assert_eq!(max, buf.size() - 1);
    }
}
