//! Binary LAD record handling: the byte-exact record codec, record-at-a-time
//! streaming over files, and the offline backup log tools built on them.

pub mod inspect;
pub mod record;
pub mod rewrite;
pub mod stream;

pub use inspect::{BackupSummary, inspect_backup};
pub use record::{
    FIXED_FIELD_BYTES, LadRecord, MAX_PAYLOAD_BYTES, MIN_RECORD_LEN, RECORD_HEADER_BYTES,
    SYNC_MARKER_BYTES,
};
pub use rewrite::{
    OverflowPolicy, RewriteOptions, RewriteReport, apply_session_delta, rewrite_session_ids,
};
pub use stream::{RecordReader, RecordWriter, open_backup};
