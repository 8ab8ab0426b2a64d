use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bamstore_core::record::codec;
use bamstore_core::{BinningScheme, Flags, Record};

fn generate_test_record(read_len: usize) -> Record {
    let pattern = b"ACGT";
    let mut bases = Vec::with_capacity(read_len);
    while bases.len() < read_len {
        let remaining = read_len - bases.len();
        let chunk_size = std::cmp::min(pattern.len(), remaining);
        bases.extend_from_slice(&pattern[..chunk_size]);
    }

    let mut record = Record::default();
    record.set_name("bench/1");
    record.set_flags(Flags::new(Flags::PAIRED | Flags::FIRST_OF_PAIR));
    record.set_ref_id(0);
    record.set_pos(1_000_000);
    record.set_mapq(60);
    record.set_cigar(format!("{read_len}M").parse().unwrap());
    record.set_qualities(vec![30; read_len]);
    record.set_bases(bases);
    record
}

fn bench_record_encode(c: &mut Criterion) {
    let record = generate_test_record(150);
    c.bench_function("encode_150bp", |b| {
        b.iter(|| {
            let buf = codec::encode(black_box(&record)).unwrap();
            black_box(buf)
        })
    });
}

fn bench_record_decode(c: &mut Criterion) {
    let record = generate_test_record(150);
    let buf = codec::encode(&record).unwrap();
    c.bench_function("decode_150bp", |b| {
        b.iter(|| {
            let record = codec::decode(black_box(&buf)).unwrap();
            black_box(record)
        })
    });
}

fn bench_region_to_bins(c: &mut Criterion) {
    let scheme = BinningScheme::default();
    c.bench_function("region_to_bins_1mb", |b| {
        b.iter(|| {
            let bins = scheme.region_to_bins(black_box(10_000_000), black_box(11_000_000));
            black_box(bins)
        })
    });
}

criterion_group!(
    benches,
    bench_record_encode,
    bench_record_decode,
    bench_region_to_bins
);
criterion_main!(benches);
