//! Record-at-a-time reading and writing over `std::io`.
//!
//! A backup log is a back-to-back concatenation of records. The reader pulls
//! the 6-byte preamble, then exactly the remaining declared bytes, so memory
//! use is bounded by the largest single record.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use glad_error::{GladError, Result};
use tracing::trace;

use crate::record::{
    LadRecord, RECORD_PREAMBLE_BYTES, check_declared_len, preamble_declared_len,
};

/// Streaming record reader.
///
/// A clean end of input on a record boundary ends the stream. Input that
/// stops partway through a record yields [`GladError::TruncatedRecord`], and
/// the reader yields nothing further afterwards.
#[derive(Debug)]
pub struct RecordReader<R> {
    inner: R,
    scratch: Vec<u8>,
    offset: u64,
    records: u64,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
            offset: 0,
            records: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Records successfully read so far.
    #[must_use]
    pub const fn records_read(&self) -> u64 {
        self.records
    }

    /// Read the next record, or `None` at a clean end of input.
    pub fn next_record(&mut self) -> Result<Option<LadRecord>> {
        if self.failed {
            return Ok(None);
        }
        let result = self.read_one();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn read_one(&mut self) -> Result<Option<LadRecord>> {
        let mut preamble = [0_u8; RECORD_PREAMBLE_BYTES];
        let got = read_full(&mut self.inner, &mut preamble)?;
        if got == 0 {
            return Ok(None);
        }
        if got < RECORD_PREAMBLE_BYTES {
            return Err(GladError::TruncatedRecord {
                record_index: self.records,
                offset: self.offset,
                expected: RECORD_PREAMBLE_BYTES,
                actual: got,
            });
        }

        let declared = preamble_declared_len(&preamble);
        check_declared_len(declared).map_err(|err| {
            GladError::format(format!(
                "record #{} at byte offset {}: {err}",
                self.records, self.offset
            ))
        })?;

        self.scratch.clear();
        self.scratch.resize(declared, 0);
        self.scratch[..RECORD_PREAMBLE_BYTES].copy_from_slice(&preamble);
        let body = read_full(&mut self.inner, &mut self.scratch[RECORD_PREAMBLE_BYTES..])?;
        if body < declared - RECORD_PREAMBLE_BYTES {
            return Err(GladError::TruncatedRecord {
                record_index: self.records,
                offset: self.offset,
                expected: declared,
                actual: RECORD_PREAMBLE_BYTES + body,
            });
        }

        let (record, consumed) = LadRecord::decode(&self.scratch)?;
        trace!(
            record_index = self.records,
            offset = self.offset,
            length = consumed,
            session_id = record.session_id,
            "read LAD record"
        );
        self.offset += consumed as u64;
        self.records += 1;
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<LadRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Streaming record writer that keeps running totals.
#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    inner: W,
    scratch: Vec<u8>,
    records: u64,
    bytes: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
            records: 0,
            bytes: 0,
        }
    }

    /// Encode and write one record.
    pub fn write_record(&mut self, record: &LadRecord) -> Result<()> {
        self.scratch.clear();
        record.encode_into(&mut self.scratch)?;
        self.inner.write_all(&self.scratch)?;
        self.records += 1;
        self.bytes += self.scratch.len() as u64;
        Ok(())
    }

    #[must_use]
    pub const fn records_written(&self) -> u64 {
        self.records
    }

    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Open a backup log for buffered record-at-a-time reading.
pub fn open_backup(path: &Path) -> Result<RecordReader<BufReader<File>>> {
    let file = File::open(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            GladError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            GladError::Io(err)
        }
    })?;
    Ok(RecordReader::new(BufReader::new(file)))
}

/// Fill `buf` as far as the reader allows; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::record::FIXED_FIELD_BYTES;

    fn record(session_id: u32, payload: &[u8]) -> LadRecord {
        LadRecord::new(*b"SYNC", [0xAB; FIXED_FIELD_BYTES], session_id, payload.to_vec())
            .expect("record should build")
    }

    fn concat(records: &[LadRecord]) -> Vec<u8> {
        let mut out = Vec::new();
        for r in records {
            r.encode_into(&mut out).expect("encode");
        }
        out
    }

    /// Reader that hands out one byte per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn reads_back_to_back_records_in_order() {
        let records = vec![record(1, b"a"), record(2, b""), record(3, b"ccc")];
        let bytes = concat(&records);
        let read: Vec<LadRecord> = RecordReader::new(Cursor::new(bytes))
            .collect::<Result<_>>()
            .expect("scan");
        assert_eq!(read, records);
    }

    #[test]
    fn empty_input_is_an_empty_stream() {
        let mut reader = RecordReader::new(Cursor::new(Vec::new()));
        assert!(reader.next_record().expect("clean eof").is_none());
        assert_eq!(reader.records_read(), 0);
    }

    #[test]
    fn short_reads_are_reassembled() {
        let records = vec![record(10, b"hello"), record(11, b"world")];
        let bytes = concat(&records);
        let read: Vec<LadRecord> = RecordReader::new(Trickle(&bytes))
            .collect::<Result<_>>()
            .expect("scan");
        assert_eq!(read, records);
    }

    #[test]
    fn partial_preamble_is_truncation() {
        let mut bytes = concat(&[record(1, b"x")]);
        let first_len = bytes.len() as u64;
        bytes.extend_from_slice(b"SYN");
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(reader.next_record().expect("first").is_some());
        let err = reader.next_record().unwrap_err();
        match err {
            GladError::TruncatedRecord {
                record_index,
                offset,
                expected,
                actual,
            } => {
                assert_eq!(record_index, 1);
                assert_eq!(offset, first_len);
                assert_eq!(expected, RECORD_PREAMBLE_BYTES);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(reader.next_record().expect("stays finished").is_none());
    }

    #[test]
    fn partial_body_is_truncation() {
        let bytes = concat(&[record(1, b"0123456789")]);
        let cut = &bytes[..bytes.len() - 4];
        let err = RecordReader::new(Cursor::new(cut))
            .next_record()
            .unwrap_err();
        assert!(
            matches!(err, GladError::TruncatedRecord { expected: 53, actual: 49, .. }),
            "{err}"
        );
    }

    #[test]
    fn undersized_length_is_format_error_with_offset() {
        let mut bytes = concat(&[record(1, b"")]);
        bytes[4..6].copy_from_slice(&10_u16.to_be_bytes());
        let err = RecordReader::new(Cursor::new(bytes))
            .next_record()
            .unwrap_err();
        assert!(matches!(err, GladError::Format { .. }));
        assert!(err.to_string().contains("byte offset 0"), "{err}");
    }

    #[test]
    fn writer_counts_records_and_bytes() {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write_record(&record(1, b"ab")).expect("write");
        writer.write_record(&record(2, b"")).expect("write");
        assert_eq!(writer.records_written(), 2);
        assert_eq!(writer.bytes_written(), 45 + 43);
        let out = writer.into_inner().expect("flush");
        assert_eq!(out.len(), 88);
    }

    #[test]
    fn open_backup_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = open_backup(&dir.path().join("missing.lad")).unwrap_err();
        assert!(matches!(err, GladError::FileNotFound { .. }));
    }
}
