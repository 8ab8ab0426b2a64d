//! The write-side indexer: consumes records in coordinate order, emits the
//! binning and linear indexes.
//!
//! The builder is a state machine over `{AwaitingFirst, InReference(r),
//! Finished}`. All mutable per-reference state lives in the current
//! reference's working set and is frozen into a [`ReferenceIndex`] the
//! moment a record for a later reference arrives; skipped references emit
//! empty structures.

use std::collections::HashMap;

use crate::binning::BinningScheme;
use crate::header::{Header, SortOrder};
use crate::record::Record;
use crate::virtual_offset::VirtualOffset;

use super::linear::LinearIndex;
use super::{Bin, Chunk, Index, IndexError, IndexResult, Metadata, ReferenceIndex};

#[derive(Debug)]
enum State {
    AwaitingFirst,
    InReference(usize),
    Finished,
}

/// Builds an [`Index`] from records arriving in `(ref_id, pos)` order.
#[derive(Debug)]
pub struct IndexBuilder {
    scheme: BinningScheme,
    reference_count: usize,
    state: State,
    done: Vec<ReferenceIndex>,
    current: Option<ReferenceBuilder>,
    no_coordinate_count: u64,
    last_ref: i32,
    last_pos: i32,
}

impl IndexBuilder {
    pub fn new(scheme: BinningScheme, reference_count: usize) -> Self {
        IndexBuilder {
            scheme,
            reference_count,
            state: State::AwaitingFirst,
            done: Vec::with_capacity(reference_count),
            current: None,
            no_coordinate_count: 0,
            last_ref: -1,
            last_pos: -1,
        }
    }

    /// Builder for a record stream with the given header, refusing input
    /// whose declared sort order rules out coordinate sorting.
    pub fn for_header(scheme: BinningScheme, header: &Header) -> IndexResult<Self> {
        match header.sort_order() {
            SortOrder::Coordinate | SortOrder::Unknown => {}
            other => return Err(IndexError::NotCoordinateSorted(other)),
        }
        Ok(Self::new(scheme, header.dictionary.len()))
    }

    /// Feeds one record and the virtual-offset extent it occupies.
    pub fn add_record(&mut self, record: &Record, chunk: Chunk) -> IndexResult<()> {
        if record.is_unplaced() {
            self.no_coordinate_count += 1;
            return Ok(());
        }
        let start = i64::from(record.pos());
        let end = start + i64::from(record.alignment_span().max(1));
        self.add_span(
            record.ref_id(),
            start,
            end,
            !record.flags().is_unmapped(),
            chunk,
        )
    }

    /// Feeds one placed alignment span. This is the unit a composite block
    /// holding records of several references is replayed through, one span
    /// per inner record.
    pub fn add_span(
        &mut self,
        ref_id: i32,
        start: i64,
        end: i64,
        mapped: bool,
        chunk: Chunk,
    ) -> IndexResult<()> {
        if matches!(self.state, State::Finished) {
            return Err(IndexError::AlreadyFinished);
        }
        if ref_id < 0 || ref_id as usize >= self.reference_count {
            return Err(IndexError::UnknownReference(ref_id));
        }
        let pos = start as i32;
        if ref_id < self.last_ref || (ref_id == self.last_ref && pos < self.last_pos) {
            return Err(IndexError::OutOfOrder {
                ref_id,
                pos,
                last_ref: self.last_ref,
                last_pos: self.last_pos,
            });
        }

        self.advance_to(ref_id as usize);
        self.last_ref = ref_id;
        self.last_pos = pos;

        let current = self.current.as_mut().expect("advance_to set a reference");
        current.add_span(start, end.max(start + 1), mapped, chunk);
        Ok(())
    }

    /// Seals all remaining references and returns the finished index.
    pub fn finish(mut self) -> IndexResult<Index> {
        if matches!(self.state, State::Finished) {
            return Err(IndexError::AlreadyFinished);
        }
        if let Some(current) = self.current.take() {
            self.done.push(current.finish());
        }
        while self.done.len() < self.reference_count {
            self.done.push(ReferenceIndex::default());
        }
        self.state = State::Finished;
        Ok(Index::new(
            self.scheme,
            self.done,
            Some(self.no_coordinate_count),
        ))
    }

    pub fn no_coordinate_count(&self) -> u64 {
        self.no_coordinate_count
    }

    /// Moves the current reference forward, sealing everything before it.
    fn advance_to(&mut self, ref_id: usize) {
        let starting_from = match self.state {
            State::AwaitingFirst => 0,
            State::InReference(r) if r < ref_id => {
                if let Some(current) = self.current.take() {
                    self.done.push(current.finish());
                }
                r + 1
            }
            _ => return,
        };
        for _ in starting_from..ref_id {
            self.done.push(ReferenceIndex::default());
        }
        self.current = Some(ReferenceBuilder::new(self.scheme));
        self.state = State::InReference(ref_id);
    }
}

/// Working set for the reference currently being indexed.
#[derive(Debug)]
struct ReferenceBuilder {
    scheme: BinningScheme,
    bins: HashMap<u32, Bin>,
    /// Most recently touched bin, kept out of the map. Coordinate-sorted
    /// input hits the same bin in runs, so the hot bin skips the map on
    /// nearly every record.
    hot: Option<Bin>,
    linear: LinearIndex,
    metadata: Metadata,
    seen: bool,
}

impl ReferenceBuilder {
    fn new(scheme: BinningScheme) -> Self {
        ReferenceBuilder {
            scheme,
            bins: HashMap::new(),
            hot: None,
            linear: LinearIndex::new(scheme.min_shift()),
            metadata: Metadata {
                first_offset: VirtualOffset::MAX,
                last_offset: VirtualOffset::ZERO,
                mapped_count: 0,
                unmapped_count: 0,
            },
            seen: false,
        }
    }

    fn add_span(&mut self, start: i64, end: i64, mapped: bool, chunk: Chunk) {
        let bin_id = self.scheme.region_to_bin(start, end);
        self.bin_mut(bin_id).add_chunk(chunk);
        self.linear.update(start, end, chunk.start);

        self.seen = true;
        if mapped {
            self.metadata.mapped_count += 1;
        } else {
            self.metadata.unmapped_count += 1;
        }
        if chunk.start < self.metadata.first_offset {
            self.metadata.first_offset = chunk.start;
        }
        if chunk.end > self.metadata.last_offset {
            self.metadata.last_offset = chunk.end;
        }
    }

    fn bin_mut(&mut self, bin_id: u32) -> &mut Bin {
        match &self.hot {
            Some(bin) if bin.id() == bin_id => {}
            _ => {
                let next = self.bins.remove(&bin_id).unwrap_or_else(|| Bin::new(bin_id));
                if let Some(previous) = self.hot.replace(next) {
                    self.bins.insert(previous.id(), previous);
                }
            }
        }
        self.hot.as_mut().unwrap()
    }

    fn finish(mut self) -> ReferenceIndex {
        if let Some(bin) = self.hot.take() {
            self.bins.insert(bin.id(), bin);
        }
        self.linear.seal();
        let metadata = self.seen.then_some(self.metadata);
        ReferenceIndex::new(self.bins, self.linear, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Flags;

    fn vo(raw: u64) -> VirtualOffset {
        VirtualOffset::from(raw)
    }

    fn mapped(ref_id: i32, pos: i32, cigar: &str) -> Record {
        let mut record = Record::default();
        record.set_name("r");
        record.set_flags(Flags::default());
        record.set_ref_id(ref_id);
        record.set_pos(pos);
        record.set_cigar(cigar.parse().unwrap());
        record
    }

    fn chunk(start: u64, end: u64) -> Chunk {
        Chunk::new(vo(start), vo(end))
    }

    #[test]
    fn test_single_reference_index() {
        let mut builder = IndexBuilder::new(BinningScheme::default(), 2);
        builder
            .add_record(&mapped(0, 100, "50M"), chunk(0x100, 0x180))
            .unwrap();
        builder
            .add_record(&mapped(0, 16_384, "100M"), chunk(0x180, 0x200))
            .unwrap();
        let index = builder.finish().unwrap();

        assert_eq!(index.references().len(), 2);
        let reference = index.reference(0).unwrap();
        assert!(reference.bin(4681).is_some());
        assert!(reference.bin(4682).is_some());
        let metadata = reference.metadata().unwrap();
        assert_eq!(metadata.mapped_count, 2);
        assert_eq!(metadata.first_offset, vo(0x100));
        assert_eq!(metadata.last_offset, vo(0x200));
        assert!(index.reference(1).unwrap().is_empty());
        assert_eq!(index.no_coordinate_count(), Some(0));
    }

    #[test]
    fn test_skipped_references_emit_empty_structures() {
        let mut builder = IndexBuilder::new(BinningScheme::default(), 4);
        builder
            .add_record(&mapped(2, 5, "10M"), chunk(0x100, 0x140))
            .unwrap();
        let index = builder.finish().unwrap();
        assert!(index.reference(0).unwrap().is_empty());
        assert!(index.reference(1).unwrap().is_empty());
        assert!(!index.reference(2).unwrap().is_empty());
        assert!(index.reference(3).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_order_input_is_fatal() {
        let mut builder = IndexBuilder::new(BinningScheme::default(), 2);
        builder
            .add_record(&mapped(1, 500, "10M"), chunk(0x100, 0x140))
            .unwrap();
        let err = builder
            .add_record(&mapped(1, 400, "10M"), chunk(0x140, 0x180))
            .unwrap_err();
        assert!(matches!(err, IndexError::OutOfOrder { .. }));

        let mut builder = IndexBuilder::new(BinningScheme::default(), 2);
        builder
            .add_record(&mapped(1, 500, "10M"), chunk(0x100, 0x140))
            .unwrap();
        let err = builder
            .add_record(&mapped(0, 900, "10M"), chunk(0x140, 0x180))
            .unwrap_err();
        assert!(matches!(err, IndexError::OutOfOrder { .. }));
    }

    #[test]
    fn test_unknown_reference_is_fatal() {
        let mut builder = IndexBuilder::new(BinningScheme::default(), 1);
        let err = builder
            .add_record(&mapped(5, 0, "10M"), chunk(0x100, 0x140))
            .unwrap_err();
        assert!(matches!(err, IndexError::UnknownReference(5)));
    }

    #[test]
    fn test_unplaced_records_only_count() {
        let mut builder = IndexBuilder::new(BinningScheme::default(), 1);
        builder
            .add_record(&Record::default(), chunk(0x100, 0x140))
            .unwrap();
        builder
            .add_record(&Record::default(), chunk(0x140, 0x180))
            .unwrap();
        let index = builder.finish().unwrap();
        assert_eq!(index.no_coordinate_count(), Some(2));
        assert!(index.reference(0).unwrap().is_empty());
    }

    #[test]
    fn test_placed_unmapped_records_count_per_reference() {
        let mut builder = IndexBuilder::new(BinningScheme::default(), 1);
        let mut record = mapped(0, 1000, "");
        record.flags_mut().set(Flags::UNMAPPED, true);
        builder.add_record(&record, chunk(0x100, 0x140)).unwrap();
        let index = builder.finish().unwrap();
        let metadata = index.reference(0).unwrap().metadata().unwrap();
        assert_eq!(metadata.mapped_count, 0);
        assert_eq!(metadata.unmapped_count, 1);
    }

    #[test]
    fn test_empty_input_yields_wellformed_index() {
        let index = IndexBuilder::new(BinningScheme::default(), 3)
            .finish()
            .unwrap();
        assert_eq!(index.references().len(), 3);
        assert!(index.references().iter().all(ReferenceIndex::is_empty));
        assert_eq!(index.no_coordinate_count(), Some(0));
    }

    #[test]
    fn test_sort_order_guard() {
        use crate::header::SequenceDictionary;
        let header = Header::new("@HD\tVN:1.6\tSO:queryname\n", SequenceDictionary::new());
        let err = IndexBuilder::for_header(BinningScheme::default(), &header).unwrap_err();
        assert!(matches!(err, IndexError::NotCoordinateSorted(_)));
    }

    #[test]
    fn test_composite_span_replay() {
        // Two inner records of different references replayed as bare spans.
        let mut builder = IndexBuilder::new(BinningScheme::default(), 2);
        builder
            .add_span(0, 100, 200, true, chunk(0x100, 0x140))
            .unwrap();
        builder
            .add_span(1, 50, 90, true, chunk(0x100, 0x140))
            .unwrap();
        let index = builder.finish().unwrap();
        assert!(!index.reference(0).unwrap().is_empty());
        assert!(!index.reference(1).unwrap().is_empty());
    }
}
