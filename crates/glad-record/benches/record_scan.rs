use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use glad_record::{FIXED_FIELD_BYTES, LadRecord, RecordReader};

fn backup_image(records: usize, payload_len: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    for index in 0..records {
        let session_id = u32::try_from(index % 16).expect("fits u32");
        let record = LadRecord::new(
            *b"SYNC",
            [0x11; FIXED_FIELD_BYTES],
            session_id,
            vec![0x42; payload_len],
        )
        .expect("record should build");
        record.encode_into(&mut bytes).expect("encode");
    }
    bytes
}

fn bench_scan(c: &mut Criterion) {
    let image = backup_image(10_000, 128);
    let mut group = c.benchmark_group("record_scan");
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("scan_10k_records", |b| {
        b.iter(|| {
            let mut reader = RecordReader::new(black_box(image.as_slice()));
            let mut sessions = 0_u64;
            while let Some(record) = reader.next_record().expect("scan") {
                sessions = sessions.wrapping_add(u64::from(record.session_id));
            }
            black_box(sessions)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
