//! The linear index: per-window lower bounds on record offsets.
//!
//! Window `w` covers reference positions `[w << shift, (w + 1) << shift)`.
//! Each entry holds the smallest virtual offset among records whose
//! alignment span reaches the window. Because the indexer sees records in
//! increasing file order, the first offset written to a window is the
//! smallest.

use crate::virtual_offset::VirtualOffset;

/// Default window shift: 16 kb windows.
pub const DEFAULT_WINDOW_SHIFT: u32 = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearIndex {
    offsets: Vec<VirtualOffset>,
    shift: u32,
}

impl Default for LinearIndex {
    fn default() -> Self {
        LinearIndex::new(DEFAULT_WINDOW_SHIFT)
    }
}

impl LinearIndex {
    pub fn new(shift: u32) -> Self {
        LinearIndex {
            offsets: Vec::new(),
            shift,
        }
    }

    pub fn from_offsets(offsets: Vec<VirtualOffset>, shift: u32) -> Self {
        LinearIndex { offsets, shift }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[VirtualOffset] {
        &self.offsets
    }

    pub fn window_shift(&self) -> u32 {
        self.shift
    }

    /// The window holding a 0-based reference position.
    pub fn window_of(&self, pos: i64) -> usize {
        (pos.max(0) >> self.shift) as usize
    }

    /// Records `offset` as a candidate lower bound for every window the
    /// span `[start, end)` (0-based half-open) reaches.
    pub fn update(&mut self, start: i64, end: i64, offset: VirtualOffset) {
        let first = self.window_of(start);
        let last = self.window_of((end - 1).max(start));
        if last >= self.offsets.len() {
            self.offsets.resize(last + 1, VirtualOffset::ZERO);
        }
        for window in first..=last {
            if self.offsets[window].is_zero() {
                self.offsets[window] = offset;
            }
        }
    }

    /// Back-fills zero entries from the nearest preceding non-zero entry.
    ///
    /// Kept for interoperability with the external index emitter this
    /// format is shared with; windows before the first occupied one stay
    /// zero. After sealing, the entries are non-decreasing.
    pub fn seal(&mut self) {
        let mut last = VirtualOffset::ZERO;
        for offset in self.offsets.iter_mut() {
            if offset.is_zero() {
                *offset = last;
            } else {
                last = *offset;
            }
        }
    }

    /// The lower bound for a query starting in `window`; zero past the end.
    pub fn min_offset(&self, window: usize) -> VirtualOffset {
        self.offsets
            .get(window)
            .copied()
            .unwrap_or(VirtualOffset::ZERO)
    }
}
