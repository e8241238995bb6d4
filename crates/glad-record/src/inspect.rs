//! Single-pass backup log summary.

use std::collections::BTreeMap;
use std::path::Path;

use glad_error::Result;
use serde::Serialize;
use tracing::info;

use crate::stream::open_backup;

/// Aggregate view of a backup log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    pub records: u64,
    pub bytes: u64,
    /// Record count per session id.
    pub sessions: BTreeMap<u32, u64>,
    pub largest_record: usize,
}

/// Scan `path` and summarize it. Truncation anywhere fails the whole scan.
pub fn inspect_backup(path: &Path) -> Result<BackupSummary> {
    let mut reader = open_backup(path)?;
    let mut summary = BackupSummary::default();
    while let Some(record) = reader.next_record()? {
        summary.records += 1;
        summary.bytes += record.declared_len() as u64;
        summary.largest_record = summary.largest_record.max(record.declared_len());
        *summary.sessions.entry(record.session_id).or_insert(0) += 1;
    }

    info!(
        path = %path.display(),
        records = summary.records,
        bytes = summary.bytes,
        sessions = summary.sessions.len(),
        "inspected backup log"
    );
    Ok(summary)
}
