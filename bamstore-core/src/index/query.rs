//! Turning reference intervals into coalesced chunk lists.
//!
//! The candidate bins of an interval are fetched from the binning index,
//! their chunks pruned against a per-query minimum offset (from the linear
//! index when present, otherwise from bin lower bounds), then sorted and
//! coalesced on block adjacency.

use crate::binning::BinningScheme;
use crate::virtual_offset::VirtualOffset;

use super::{Chunk, Index, IndexError, IndexResult, ReferenceIndex};

/// End-of-reference marker in public queries: `end == 0` means "to the end".
const END_OF_REFERENCE: i64 = i32::MAX as i64;

/// A query interval in public 1-based inclusive coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub ref_id: usize,
    /// 1-based inclusive start.
    pub start: i64,
    /// 1-based inclusive end; 0 extends to the end of the reference.
    pub end: i64,
}

impl Interval {
    pub fn new(ref_id: usize, start: i64, end: i64) -> Self {
        Interval { ref_id, start, end }
    }

    /// The inclusive end with the end-of-reference convention applied.
    pub fn resolved_end(&self) -> i64 {
        if self.end == 0 {
            END_OF_REFERENCE
        } else {
            self.end
        }
    }

    /// Whether a 0-based half-open span overlaps this interval.
    pub fn overlaps(&self, span_start: i64, span_end: i64) -> bool {
        span_start < self.resolved_end() && span_end > self.start - 1
    }

    /// Whether a 0-based half-open span lies fully inside this interval.
    pub fn contains(&self, span_start: i64, span_end: i64) -> bool {
        span_start >= self.start - 1 && span_end <= self.resolved_end()
    }
}

/// Sorts intervals on `(ref_id, start, end)` and merges overlapping or
/// abutting ones. The union of the output equals the union of the input.
pub fn optimize_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    for interval in intervals.iter_mut() {
        interval.end = interval.resolved_end();
    }
    intervals.sort_by_key(|i| (i.ref_id, i.start, i.end));

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if last.ref_id == interval.ref_id && interval.start <= last.end + 1 => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

impl Index {
    /// Chunks possibly holding records overlapping a 1-based inclusive
    /// interval; `end == 0` extends to the end of the reference.
    pub fn query_chunks(&self, ref_id: usize, start: i64, end: i64) -> IndexResult<Vec<Chunk>> {
        let end = if end == 0 { END_OF_REFERENCE } else { end };
        self.query_region(ref_id, start - 1, end)
    }

    /// Chunks for a 0-based half-open region, the internal coordinate form.
    pub fn query_region(&self, ref_id: usize, beg: i64, end: i64) -> IndexResult<Vec<Chunk>> {
        let reference = self
            .reference(ref_id)
            .ok_or_else(|| IndexError::ReferenceOutOfRange {
                ref_id: ref_id as i32,
                count: self.references().len(),
            })?;

        let mut chunks = Vec::new();
        for bin_id in self.scheme().region_to_bins(beg, end) {
            if let Some(bin) = reference.bin(bin_id) {
                chunks.extend_from_slice(bin.chunks());
            }
        }

        let min_offset = min_offset(reference, self.scheme(), beg);
        chunks.retain(|chunk| chunk.end > min_offset);
        for chunk in chunks.iter_mut() {
            if chunk.start < min_offset {
                chunk.start = min_offset;
            }
        }

        Ok(coalesce_chunks(chunks))
    }

    /// Chunks recorded for one bin together with every present ancestor,
    /// which can also hold records overlapping the bin's span.
    pub fn query_bin(&self, ref_id: usize, bin_id: u32) -> IndexResult<Vec<Chunk>> {
        let reference = self
            .reference(ref_id)
            .ok_or_else(|| IndexError::ReferenceOutOfRange {
                ref_id: ref_id as i32,
                count: self.references().len(),
            })?;

        let mut chunks = Vec::new();
        if let Some(bin) = reference.bin(bin_id) {
            chunks.extend_from_slice(bin.chunks());
        }
        for ancestor in self.scheme().ancestors(bin_id) {
            if let Some(bin) = reference.bin(ancestor) {
                chunks.extend_from_slice(bin.chunks());
            }
        }
        Ok(coalesce_chunks(chunks))
    }
}

/// Lower bound on chunk starts for a query beginning at `beg` (0-based).
///
/// With a linear index the bound is the entry for the window holding `beg`.
/// Without one, it is the lowest offset of the smallest present bin at or
/// left of `beg`: starting from the leaf containing `beg`, walk left
/// through siblings and up through parents until a present bin or the root.
fn min_offset(reference: &ReferenceIndex, scheme: BinningScheme, beg: i64) -> VirtualOffset {
    if !reference.linear().is_empty() {
        let window = reference.linear().window_of(beg);
        return reference.linear().min_offset(window);
    }

    let mut bin_id = scheme.leaf_bin(beg).min(scheme.max_bin());
    loop {
        if let Some(bin) = reference.bin(bin_id) {
            return bin.loffset();
        }
        if bin_id == 0 {
            return VirtualOffset::ZERO;
        }
        bin_id = if scheme.is_first_sibling(bin_id) {
            scheme.parent_bin(bin_id).unwrap_or(0)
        } else {
            bin_id - 1
        };
    }
}

/// Sorts chunks by start and merges runs whose endpoints fall in the same
/// or adjacent compressed blocks. The result is pairwise disjoint and
/// ascending.
pub(crate) fn coalesce_chunks(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_by_key(|chunk| (chunk.start, chunk.end));

    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(last)
                if chunk.start <= last.end || last.end.same_or_adjacent_block(chunk.start) =>
            {
                last.end = last.end.max(chunk.end);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}
