//! Backup log session-id rewriting.
//!
//! The input is streamed through the codec one record at a time. Each
//! record's session id is shifted by a signed delta. Records are written to
//! a temporary file beside the destination, which is persisted only after
//! the whole pass succeeds. Any failure drops the temporary file, so a
//! half-rewritten log is never visible under the output name.
//!
//! One rewrite per input file at a time; concurrent rewrites of the same
//! input are not coordinated.

use std::ffi::OsString;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use glad_error::{GladError, Result};
use tracing::{debug, info, warn};

use crate::stream::{RecordWriter, open_backup};

const OUTPUT_SUFFIX: &str = ".rewritten";
const TEMP_PREFIX: &str = ".glad-rewrite-";

/// What to do when `session_id + delta` leaves `0..=u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wrap modulo 2^32 and log a warning for each wrapped record.
    #[default]
    Wrap,
    /// Fail the rewrite; nothing is written.
    Reject,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// Destination path. Defaults to `<input>.rewritten`.
    pub output: Option<PathBuf>,
    /// Atomically replace the input instead of writing a sibling file.
    pub in_place: bool,
    pub overflow: OverflowPolicy,
}

/// Outcome of a successful rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    pub output_path: PathBuf,
    pub records: u64,
    pub bytes: u64,
    /// Records whose session id wrapped around the 32-bit range.
    pub wrapped: u64,
}

/// Shift one session id, returning the new id and whether it wrapped.
pub fn apply_session_delta(
    session_id: u32,
    delta: i64,
    policy: OverflowPolicy,
) -> Result<(u32, bool)> {
    let shifted = i128::from(session_id) + i128::from(delta);
    let in_range = (0..=i128::from(u32::MAX)).contains(&shifted);
    if !in_range && policy == OverflowPolicy::Reject {
        return Err(GladError::SessionIdOverflow { session_id, delta });
    }
    let wrapped = shifted.rem_euclid(1_i128 << 32);
    let new_id = u32::try_from(wrapped)
        .map_err(|_| GladError::internal("rem_euclid(2^32) produced an out-of-range id"))?;
    Ok((new_id, !in_range))
}

/// Resolve where the rewritten log should land.
pub fn resolve_output_path(input: &Path, options: &RewriteOptions) -> Result<PathBuf> {
    match (&options.output, options.in_place) {
        (Some(_), true) => Err(GladError::configuration(
            "an explicit output path cannot be combined with in-place rewriting",
        )),
        (Some(path), false) => Ok(path.clone()),
        (None, true) => Ok(input.to_path_buf()),
        (None, false) => {
            let mut name = OsString::from(input.as_os_str());
            name.push(OUTPUT_SUFFIX);
            Ok(PathBuf::from(name))
        }
    }
}

/// Rewrite every record's session id in `input` by `delta`.
pub fn rewrite_session_ids(
    input: &Path,
    delta: i64,
    options: &RewriteOptions,
) -> Result<RewriteReport> {
    let output_path = resolve_output_path(input, options)?;
    let mut reader = open_backup(input)?;

    let target_dir = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(&target_dir)?;
    debug!(
        input = %input.display(),
        temp = %temp.path().display(),
        "staging rewritten backup log"
    );

    let mut writer = RecordWriter::new(BufWriter::new(temp));
    let mut wrapped = 0_u64;
    while let Some(mut record) = reader.next_record()? {
        let (new_id, did_wrap) = apply_session_delta(record.session_id, delta, options.overflow)?;
        if did_wrap {
            wrapped += 1;
            warn!(
                record_index = reader.records_read() - 1,
                session_id = record.session_id,
                new_session_id = new_id,
                delta,
                "session id wrapped around the 4-byte field"
            );
        }
        record.session_id = new_id;
        writer.write_record(&record)?;
    }

    let records = writer.records_written();
    let bytes = writer.bytes_written();
    let temp = writer
        .into_inner()?
        .into_inner()
        .map_err(|err| GladError::Io(err.into_error()))?;
    temp.as_file().sync_all()?;
    temp.persist(&output_path)
        .map_err(|err| GladError::Io(err.error))?;

    info!(
        input = %input.display(),
        output = %output_path.display(),
        delta,
        records,
        bytes,
        wrapped,
        "rewrote backup log session ids"
    );

    Ok(RewriteReport {
        output_path,
        records,
        bytes,
        wrapped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_within_range() {
        assert_eq!(
            apply_session_delta(100, 5, OverflowPolicy::Reject).expect("in range"),
            (105, false)
        );
        assert_eq!(
            apply_session_delta(100, -100, OverflowPolicy::Reject).expect("in range"),
            (0, false)
        );
    }

    #[test]
    fn delta_wraps_modulo_field_width() {
        assert_eq!(
            apply_session_delta(u32::MAX, 1, OverflowPolicy::Wrap).expect("wrap"),
            (0, true)
        );
        assert_eq!(
            apply_session_delta(0, -1, OverflowPolicy::Wrap).expect("wrap"),
            (u32::MAX, true)
        );
        assert_eq!(
            apply_session_delta(7, i64::from(u32::MAX) + 1, OverflowPolicy::Wrap).expect("wrap"),
            (7, true)
        );
    }

    #[test]
    fn reject_policy_refuses_overflow() {
        let err = apply_session_delta(u32::MAX - 1, 2, OverflowPolicy::Reject).unwrap_err();
        assert!(matches!(
            err,
            GladError::SessionIdOverflow {
                session_id: 4_294_967_294,
                delta: 2
            }
        ));
    }

    #[test]
    fn extreme_deltas_do_not_overflow_arithmetic() {
        assert!(apply_session_delta(u32::MAX, i64::MAX, OverflowPolicy::Wrap).is_ok());
        assert!(apply_session_delta(0, i64::MIN, OverflowPolicy::Wrap).is_ok());
    }

    #[test]
    fn output_path_resolution() {
        let input = Path::new("/data/lad/backup.bin");
        let default = resolve_output_path(input, &RewriteOptions::default()).expect("default");
        assert_eq!(default, PathBuf::from("/data/lad/backup.bin.rewritten"));

        let in_place = RewriteOptions {
            in_place: true,
            ..RewriteOptions::default()
        };
        assert_eq!(resolve_output_path(input, &in_place).expect("in place"), input);

        let both = RewriteOptions {
            output: Some(PathBuf::from("/tmp/out.bin")),
            in_place: true,
            ..RewriteOptions::default()
        };
        assert!(matches!(
            resolve_output_path(input, &both),
            Err(GladError::Configuration { .. })
        ));
    }
}
