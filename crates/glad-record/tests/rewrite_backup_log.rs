use std::fs;
use std::path::Path;

use glad_error::GladError;
use glad_record::{
    FIXED_FIELD_BYTES, LadRecord, OverflowPolicy, RecordReader, RewriteOptions, inspect_backup,
    rewrite_session_ids,
};
use proptest::prelude::*;
use tempfile::tempdir;

fn fixed_fields(seed: u8) -> [u8; FIXED_FIELD_BYTES] {
    let mut fixed = [0_u8; FIXED_FIELD_BYTES];
    for (index, byte) in fixed.iter_mut().enumerate() {
        let reduced = u8::try_from(index % 251).expect("modulo result fits u8");
        *byte = reduced.wrapping_mul(31) ^ seed;
    }
    fixed
}

fn build_records(session_ids: &[u32]) -> Vec<LadRecord> {
    session_ids
        .iter()
        .enumerate()
        .map(|(index, &session_id)| {
            let seed = u8::try_from(index % 256).expect("index fits u8");
            let payload = vec![seed; index * 3 + 1];
            LadRecord::new(*b"\xEB\x90\x1A\xCF", fixed_fields(seed), session_id, payload)
                .expect("record should build")
        })
        .collect()
}

fn write_log(path: &Path, records: &[LadRecord]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for record in records {
        record.encode_into(&mut bytes).expect("encode");
    }
    fs::write(path, &bytes).expect("write fixture");
    bytes
}

fn read_log(path: &Path) -> Vec<LadRecord> {
    let bytes = fs::read(path).expect("read output");
    RecordReader::new(bytes.as_slice())
        .collect::<Result<_, _>>()
        .expect("output should scan cleanly")
}

/// Sorted file names in `dir`.
fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read_dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn rewrite_shifts_every_session_id_and_preserves_other_bytes() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("lad_backup.bin");
    let records = build_records(&[10, 10, 11, 12, 10]);
    let input_bytes = write_log(&input, &records);

    let report = rewrite_session_ids(&input, 1000, &RewriteOptions::default()).expect("rewrite");
    assert_eq!(report.records, 5);
    assert_eq!(report.bytes, input_bytes.len() as u64);
    assert_eq!(report.wrapped, 0);
    assert_eq!(report.output_path, dir.path().join("lad_backup.bin.rewritten"));

    let output_bytes = fs::read(&report.output_path).expect("read output");
    assert_eq!(output_bytes.len(), input_bytes.len());

    let rewritten = read_log(&report.output_path);
    assert_eq!(rewritten.len(), records.len());
    for (before, after) in records.iter().zip(&rewritten) {
        assert_eq!(after.session_id, before.session_id + 1000);
        assert_eq!(after.sync, before.sync);
        assert_eq!(after.length, before.length);
        assert_eq!(after.fixed, before.fixed);
        assert_eq!(after.payload, before.payload);
    }

    // The input is untouched.
    assert_eq!(fs::read(&input).expect("reread input"), input_bytes);
}

#[test]
fn rewrite_in_place_replaces_input() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("backup.lad");
    write_log(&input, &build_records(&[5, 6]));

    let options = RewriteOptions {
        in_place: true,
        ..RewriteOptions::default()
    };
    let report = rewrite_session_ids(&input, -5, &options).expect("rewrite");
    assert_eq!(report.output_path, input);

    let ids: Vec<u32> = read_log(&input).iter().map(|r| r.session_id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(dir_listing(dir.path()), vec!["backup.lad".to_owned()]);
}

#[test]
fn truncated_input_leaves_no_output_behind() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("torn.bin");
    let mut bytes = write_log(&input, &build_records(&[1, 2, 3]));
    bytes.truncate(bytes.len() - 2);
    fs::write(&input, &bytes).expect("rewrite fixture");

    let err = rewrite_session_ids(&input, 1, &RewriteOptions::default()).unwrap_err();
    assert!(
        matches!(err, GladError::TruncatedRecord { record_index: 2, .. }),
        "{err}"
    );
    assert_eq!(dir_listing(dir.path()), vec!["torn.bin".to_owned()]);
}

#[test]
fn reject_policy_fails_without_output() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("near_max.bin");
    write_log(&input, &build_records(&[1, u32::MAX]));

    let options = RewriteOptions {
        overflow: OverflowPolicy::Reject,
        ..RewriteOptions::default()
    };
    let err = rewrite_session_ids(&input, 1, &options).unwrap_err();
    assert!(matches!(err, GladError::SessionIdOverflow { .. }));
    assert_eq!(dir_listing(dir.path()), vec!["near_max.bin".to_owned()]);
}

#[test]
fn wrap_policy_counts_wrapped_records() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("near_max.bin");
    write_log(&input, &build_records(&[1, u32::MAX]));

    let report = rewrite_session_ids(&input, 1, &RewriteOptions::default()).expect("rewrite");
    assert_eq!(report.wrapped, 1);
    let ids: Vec<u32> = read_log(&report.output_path)
        .iter()
        .map(|r| r.session_id)
        .collect();
    assert_eq!(ids, vec![2, 0]);
}

#[test]
fn missing_input_is_reported() {
    let dir = tempdir().expect("tempdir");
    let err =
        rewrite_session_ids(&dir.path().join("nope.bin"), 1, &RewriteOptions::default()).unwrap_err();
    assert!(matches!(err, GladError::FileNotFound { .. }));
}

#[test]
fn inspect_counts_sessions() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("mixed.bin");
    let bytes = write_log(&input, &build_records(&[7, 8, 7, 7]));

    let summary = inspect_backup(&input).expect("inspect");
    assert_eq!(summary.records, 4);
    assert_eq!(summary.bytes, bytes.len() as u64);
    assert_eq!(summary.sessions.get(&7), Some(&3));
    assert_eq!(summary.sessions.get(&8), Some(&1));
    assert_eq!(summary.largest_record, 43 + 10);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_rewrite_preserves_count_order_and_shifts_ids(
        session_ids in proptest::collection::vec(any::<u32>(), 0..24),
        delta in -100_000_i64..100_000,
    ) {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("prop.bin");
        let records = build_records(&session_ids);
        write_log(&input, &records);

        let report = rewrite_session_ids(&input, delta, &RewriteOptions::default())
            .expect("wrap policy never fails on well-formed input");
        let rewritten = read_log(&report.output_path);

        prop_assert_eq!(rewritten.len(), records.len());
        for (before, after) in records.iter().zip(&rewritten) {
            let expected = (i64::from(before.session_id) + delta).rem_euclid(1_i64 << 32);
            prop_assert_eq!(i64::from(after.session_id), expected);
            prop_assert_eq!(&after.fixed, &before.fixed);
            prop_assert_eq!(&after.payload, &before.payload);
        }
    }
}
