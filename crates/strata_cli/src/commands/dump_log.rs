//! Dump-log command implementation.

use super::open_files;
use serde::Serialize;
use std::error::Error;
use std::path::Path;
use strata_core::wal::LogBody;
use strata_core::{LogManager, LogRecord, DEFAULT_LOG_BUFFER_CAPACITY};

#[derive(Debug, Serialize)]
struct LogRecordInfo {
    lsn: i32,
    prev_lsn: i32,
    txn_id: i32,
    record_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slot: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    oid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_page_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tuple_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_size: Option<usize>,
}

impl From<&LogRecord> for LogRecordInfo {
    fn from(record: &LogRecord) -> Self {
        let mut info = Self {
            lsn: record.lsn().as_i32(),
            prev_lsn: record.header.prev_lsn.as_i32(),
            txn_id: record.txn_id().as_i32(),
            record_type: record.record_type().name().to_string(),
            page_id: record.page_id().map(|p| p.as_i32()),
            slot: record.body.rid().map(|rid| rid.slot),
            oid: None,
            prev_page_id: None,
            tuple_size: None,
            old_size: None,
        };

        match &record.body {
            LogBody::Insert { tuple, .. }
            | LogBody::MarkDelete { tuple, .. }
            | LogBody::RollbackDelete { tuple, .. }
            | LogBody::ApplyDelete { tuple, .. } => info.tuple_size = Some(tuple.len()),
            LogBody::Update { old, new, .. } => {
                info.old_size = Some(old.len());
                info.tuple_size = Some(new.len());
            }
            LogBody::NewPage {
                prev_page_id, oid, ..
            } => {
                info.oid = Some(oid.as_i32());
                info.prev_page_id = Some(prev_page_id.as_i32());
            }
            LogBody::Begin | LogBody::Commit | LogBody::Abort => {}
        }
        info
    }
}

/// Runs the dump-log command.
///
/// The log is decoded exactly as recovery would see it; a torn tail is
/// skipped, a damaged complete record is an error.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    txn: Option<i32>,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    let disk = open_files(path)?;
    let log = LogManager::new(disk, DEFAULT_LOG_BUFFER_CAPACITY);

    let records: Vec<LogRecordInfo> = log
        .read()?
        .iter()
        .filter(|r| txn.is_none_or(|t| r.txn_id().as_i32() == t))
        .take(limit.unwrap_or(usize::MAX))
        .map(LogRecordInfo::from)
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => print_text_output(&records),
    }

    Ok(())
}

fn print_text_output(records: &[LogRecordInfo]) {
    println!("Log Records ({} shown)", records.len());
    println!("================");
    println!();

    for record in records {
        print!(
            "[{:>8}] {:<15} txn={} prev={}",
            record.lsn, record.record_type, record.txn_id, record.prev_lsn
        );
        if let Some(page_id) = record.page_id {
            print!(" page={page_id}");
        }
        if let Some(slot) = record.slot {
            print!(" slot={slot}");
        }
        if let Some(oid) = record.oid {
            print!(" oid={oid}");
        }
        if let Some(prev) = record.prev_page_id {
            print!(" after={prev}");
        }
        if let Some(old) = record.old_size {
            print!(" old={old} bytes");
        }
        if let Some(size) = record.tuple_size {
            print!(" tuple={size} bytes");
        }
        println!();
    }
}
