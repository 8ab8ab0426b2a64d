//! End-to-end indexing: write an archive with its indexes, read everything
//! back, and check the query invariants against the written records.

use std::io::Cursor;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use bamstore_core::index::{bai, csi, sbi};
use bamstore_core::writer::IndexingWriter;
use bamstore_core::{
    BamReader, BamWriter, BinningScheme, Chunk, Flags, Header, IndexBuilder, Interval, Record,
    SequenceDictionary, VirtualOffset,
};

fn header(n_ref: usize) -> Header {
    let mut dictionary = SequenceDictionary::new();
    for i in 0..n_ref {
        dictionary.push(format!("chr{}", i + 1), 1 << 28).unwrap();
    }
    Header::new("@HD\tVN:1.6\tSO:coordinate\n", dictionary)
}

fn mapped(name: &str, ref_id: i32, pos: i32, cigar: &str) -> Record {
    let mut record = Record::default();
    record.set_name(name);
    record.set_flags(Flags::default());
    record.set_ref_id(ref_id);
    record.set_pos(pos);
    record.set_cigar(cigar.parse().unwrap());
    record.set_bases(vec![b'A'; cigar.parse::<bamstore_core::Cigar>().unwrap().read_length() as usize]);
    record
}

/// Generates a coordinate-sorted corpus across two references.
fn sorted_corpus(count: usize, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keys: Vec<(i32, i32)> = (0..count)
        .map(|_| (rng.gen_range(0..2), rng.gen_range(0..1 << 27)))
        .collect();
    keys.sort_unstable();
    keys.iter()
        .enumerate()
        .map(|(i, (ref_id, pos))| {
            let len = rng.gen_range(30..150);
            mapped(&format!("r{i}"), *ref_id, *pos, &format!("{len}M"))
        })
        .collect()
}

#[test]
fn every_indexed_record_is_reachable_through_its_query() -> Result<()> {
    let records = sorted_corpus(400, 7);

    let writer = BamWriter::from_writer(Vec::new(), header(2))?;
    let mut writer = IndexingWriter::new(writer)?;
    let mut chunks: Vec<Chunk> = Vec::new();
    for record in &records {
        chunks.push(writer.write_record(record)?);
    }
    let (_bytes, index, _) = writer.finish()?;

    for (record, chunk) in records.iter().zip(&chunks) {
        let start = i64::from(record.pos());
        let end = start + i64::from(record.alignment_span());
        let found = index.query_region(record.ref_id() as usize, start, end)?;
        assert!(
            found
                .iter()
                .any(|c| c.start <= chunk.start && chunk.start < c.end),
            "record {} at {} not covered",
            record.name(),
            chunk.start
        );
    }
    Ok(())
}

#[test]
fn linear_index_is_nondecreasing_after_finalization() -> Result<()> {
    let records = sorted_corpus(300, 11);
    let writer = BamWriter::from_writer(Vec::new(), header(2))?;
    let mut writer = IndexingWriter::new(writer)?;
    for record in &records {
        writer.write_record(record)?;
    }
    let (_, index, _) = writer.finish()?;

    for reference in index.references() {
        let offsets = reference.linear().offsets();
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    }
    Ok(())
}

#[test]
fn fixed_depth_index_survives_disk_roundtrip() -> Result<()> {
    let records = sorted_corpus(200, 23);
    let writer = BamWriter::from_writer(Vec::new(), header(2))?;
    let mut writer = IndexingWriter::new(writer)?;
    for record in &records {
        writer.write_record(record)?;
    }
    let (_, index, _) = writer.finish()?;

    let dir = tempdir()?;
    let path = dir.path().join("corpus.bam.bai");
    bai::write(&path, &index)?;
    let loaded = bai::read(&path)?;

    assert_eq!(loaded.references().len(), index.references().len());
    assert_eq!(loaded.no_coordinate_count(), index.no_coordinate_count());
    for (a, b) in index.references().iter().zip(loaded.references()) {
        assert_eq!(a.bins().len(), b.bins().len());
        assert_eq!(a.linear(), b.linear());
        assert_eq!(a.metadata(), b.metadata());
        for (id, bin) in a.bins() {
            assert_eq!(b.bin(*id).unwrap().chunks(), bin.chunks());
        }
    }
    Ok(())
}

#[test]
fn variable_depth_index_answers_the_same_queries() -> Result<()> {
    let records = sorted_corpus(200, 31);
    let writer = BamWriter::from_writer(Vec::new(), header(2))?;
    let mut writer = IndexingWriter::new(writer)?;
    let mut chunks = Vec::new();
    for record in &records {
        chunks.push(writer.write_record(record)?);
    }
    let (_, index, _) = writer.finish()?;

    let dir = tempdir()?;
    let path = dir.path().join("corpus.bam.csi");
    csi::write(&path, &index)?;
    let loaded = csi::read(&path)?;
    assert_eq!(loaded.scheme(), BinningScheme::default());

    for (record, chunk) in records.iter().zip(&chunks) {
        let start = i64::from(record.pos());
        let end = start + i64::from(record.alignment_span());
        let found = loaded.query_region(record.ref_id() as usize, start, end)?;
        assert!(found
            .iter()
            .any(|c| c.start <= chunk.start && chunk.start < c.end));
    }
    Ok(())
}

#[test]
fn offset_side_index_survives_disk_roundtrip() -> Result<()> {
    let records = sorted_corpus(100, 43);
    let writer = BamWriter::from_writer(Vec::new(), header(2))?;
    let mut writer = IndexingWriter::new(writer)?.with_offset_index(16);
    for record in &records {
        writer.write_record(record)?;
    }
    let (_, _, sbi_index) = writer.finish()?;
    let sbi_index = sbi_index.unwrap();
    assert_eq!(sbi_index.record_count, 100);
    assert_eq!(sbi_index.granularity, 16);
    // ceil(100 / 16) sampled offsets plus the end-of-stream offset.
    assert_eq!(sbi_index.offsets.len(), 8);
    assert!(sbi_index.offsets.windows(2).all(|w| w[0] <= w[1]));

    let dir = tempdir()?;
    let path = dir.path().join("corpus.bam.sbi");
    sbi::write(&path, &sbi_index)?;
    assert_eq!(sbi::read(&path)?, sbi_index);
    Ok(())
}

#[test]
fn indexing_writer_writes_sibling_index_files() -> Result<()> {
    let dir = tempdir()?;
    let archive = dir.path().join("sample.bam");

    let mut writer =
        IndexingWriter::create(&archive, header(1))?.with_offset_index(sbi::DEFAULT_GRANULARITY);
    writer.write_record(&mapped("a", 0, 100, "50M"))?;
    writer.write_record(&mapped("b", 0, 90_000, "50M"))?;
    writer.finish()?;

    assert!(archive.exists());
    assert!(dir.path().join("sample.bam.bai").exists());
    assert!(dir.path().join("sample.bam.sbi").exists());

    // The written archive and index answer a position query.
    let index = bai::read(dir.path().join("sample.bam.bai"))?;
    let mut reader = BamReader::open(&archive)?;
    let hits: Vec<Record> = reader
        .query(&index, vec![Interval::new(0, 90_001, 90_050)], false)?
        .collect::<Result<_, _>>()?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name(), "b");
    Ok(())
}

#[test]
fn queries_through_the_full_file_path() -> Result<()> {
    let records = sorted_corpus(500, 57);
    let writer = BamWriter::from_writer(Vec::new(), header(2))?;
    let mut writer = IndexingWriter::new(writer)?;
    for record in &records {
        writer.write_record(record)?;
    }
    let (bytes, index, _) = writer.finish()?;

    let mut reader = BamReader::from_reader(Cursor::new(bytes))?;
    let interval = Interval::new(1, 1_000_001, 40_000_000);
    let hits: Vec<Record> = reader
        .query(&index, vec![interval], false)?
        .collect::<Result<_, _>>()?;

    let expected: Vec<&Record> = records
        .iter()
        .filter(|r| {
            r.ref_id() == 1
                && interval.overlaps(
                    i64::from(r.pos()),
                    i64::from(r.pos()) + i64::from(r.alignment_span()),
                )
        })
        .collect();
    assert_eq!(hits.len(), expected.len());
    for (hit, expect) in hits.iter().zip(expected) {
        assert_eq!(hit, expect);
    }

    // Contained semantics only keeps fully covered records.
    let contained: Vec<Record> = reader
        .query(&index, vec![interval], true)?
        .collect::<Result<_, _>>()?;
    assert!(contained.len() <= hits.len());
    for record in &contained {
        let start = i64::from(record.pos());
        let end = start + i64::from(record.alignment_span());
        assert!(interval.contains(start, end));
    }
    Ok(())
}

#[test]
fn unplaced_records_feed_the_no_coordinate_count() -> Result<()> {
    let writer = BamWriter::from_writer(Vec::new(), header(1))?;
    let mut writer = IndexingWriter::new(writer)?;
    writer.write_record(&mapped("a", 0, 100, "10M"))?;
    writer.write_record(&Record::default())?;
    writer.write_record(&Record::default())?;
    let (_, index, _) = writer.finish()?;
    assert_eq!(index.no_coordinate_count(), Some(2));

    let dir = tempdir()?;
    let path = dir.path().join("x.bai");
    bai::write(&path, &index)?;
    assert_eq!(bai::read(&path)?.no_coordinate_count(), Some(2));
    Ok(())
}

#[test]
fn empty_archive_produces_wellformed_empty_index() -> Result<()> {
    let index = IndexBuilder::new(BinningScheme::default(), 3).finish()?;
    assert_eq!(index.no_coordinate_count(), Some(0));
    for reference in index.references() {
        assert!(reference.is_empty());
    }
    // The empty index still queries cleanly.
    assert!(index.query_region(0, 0, 1000)?.is_empty());
    Ok(())
}

#[test]
fn record_at_reference_length_boundary() -> Result<()> {
    let writer = BamWriter::from_writer(Vec::new(), header(1))?;
    let mut writer = IndexingWriter::new(writer)?;
    // Alignment ending exactly at the addressable maximum.
    let pos = (1 << 28) - 50;
    writer.write_record(&mapped("edge", 0, pos, "50M"))?;
    let (_, index, _) = writer.finish()?;

    let found = index.query_region(0, i64::from(pos), i64::from(pos) + 50)?;
    assert_eq!(found.len(), 1);
    Ok(())
}

#[test]
fn lenient_reader_passes_semantically_invalid_records() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    // A record hanging past the reference end writes under silent
    // stringency and reads back under lenient with a logged warning.
    let mut dictionary = SequenceDictionary::new();
    dictionary.push("tiny", 100)?;
    let tiny_header = Header::new("@HD\tVN:1.6\tSO:coordinate\n", dictionary);

    let mut writer = BamWriter::from_writer(Vec::new(), tiny_header)?;
    writer.set_validation_stringency(bamstore_core::ValidationStringency::Silent);
    writer.write_record(&mapped("overhang", 0, 90, "50M"))?;
    let bytes = writer.finish()?;

    let mut reader = BamReader::from_reader(Cursor::new(bytes.clone()))?;
    reader.set_validation_stringency(bamstore_core::ValidationStringency::Lenient);
    let records: Vec<Record> = reader.records().collect::<Result<_, _>>()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name(), "overhang");

    // Strict reading of the same bytes fails.
    let mut reader = BamReader::from_reader(Cursor::new(bytes))?;
    let failure = reader.records().next().unwrap();
    assert!(failure.is_err());
    Ok(())
}

#[test]
fn sbi_offsets_match_record_starts() -> Result<()> {
    let records = sorted_corpus(64, 91);
    let writer = BamWriter::from_writer(Vec::new(), header(2))?;
    let mut writer = IndexingWriter::new(writer)?.with_offset_index(16);
    let mut starts: Vec<VirtualOffset> = Vec::new();
    for record in &records {
        starts.push(writer.write_record(record)?.start);
    }
    let (_, _, sbi_index) = writer.finish()?;
    let sbi_index = sbi_index.unwrap();

    for (slot, offset) in sbi_index.offsets.iter().take(4).enumerate() {
        assert_eq!(*offset, starts[slot * 16]);
    }
    Ok(())
}
