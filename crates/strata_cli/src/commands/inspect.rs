//! Inspect command implementation.

use super::{format_size, open_files};
use serde::Serialize;
use std::error::Error;
use std::path::Path;
use strata_core::page::SlotState;
use strata_core::{DiskManager, Page, PageId, HEADER_PAGE_ID};

#[derive(Debug, Serialize)]
struct InspectResult {
    path: String,
    page_count: u32,
    data_size: u64,
    log_size: u64,
    pages_by_kind: KindCounts,
    directory: Vec<DirectoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<Vec<PageInfo>>,
}

#[derive(Debug, Default, Serialize)]
struct KindCounts {
    header: u32,
    table: u32,
    btree_internal: u32,
    btree_leaf: u32,
    unwritten: u32,
    corrupt: u32,
}

#[derive(Debug, Serialize)]
struct DirectoryEntry {
    oid: i32,
    first_page_id: i32,
}

#[derive(Debug, Serialize)]
struct PageInfo {
    page_id: i32,
    kind: String,
    detail: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_pages: bool, format: &str) -> Result<(), Box<dyn Error>> {
    let disk = open_files(path)?;
    let page_count = disk.num_pages()?;

    let mut counts = KindCounts::default();
    let mut pages = Vec::with_capacity(page_count as usize);
    for id in 0..page_count {
        let page_id = PageId::new(id as i32);
        let info = describe(&disk, page_id, &mut counts)?;
        pages.push(info);
    }

    let result = InspectResult {
        path: path.display().to_string(),
        page_count,
        data_size: u64::from(page_count) * strata_core::PAGE_SIZE as u64,
        log_size: disk.log_size()?,
        pages_by_kind: counts,
        directory: read_directory(&disk, page_count)?,
        pages: show_pages.then_some(pages),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    Ok(())
}

fn describe(
    disk: &DiskManager,
    page_id: PageId,
    counts: &mut KindCounts,
) -> Result<PageInfo, Box<dyn Error>> {
    let bytes = disk.read_page(page_id)?;
    if bytes.iter().all(|&b| b == 0) {
        counts.unwritten += 1;
        return Ok(PageInfo {
            page_id: page_id.as_i32(),
            kind: "unwritten".into(),
            detail: String::new(),
        });
    }

    let page = match Page::deserialize(page_id, &bytes, None) {
        Ok(page) => page,
        Err(e) => {
            counts.corrupt += 1;
            return Ok(PageInfo {
                page_id: page_id.as_i32(),
                kind: "corrupt".into(),
                detail: e.to_string(),
            });
        }
    };

    let detail = match &page {
        Page::Header(p) => {
            counts.header += 1;
            format!("{} records, next={}", p.record_count(), p.next_page_id().as_i32())
        }
        Page::Table(p) => {
            counts.table += 1;
            let (mut live, mut tombstoned, mut gone) = (0, 0, 0);
            for slot in 0..p.slot_count() {
                match p.slot_state(slot) {
                    Some(SlotState::Live) => live += 1,
                    Some(SlotState::Tombstoned) => tombstoned += 1,
                    Some(SlotState::Gone) | None => gone += 1,
                }
            }
            format!(
                "oid={} lsn={} next={} live={live} tombstoned={tombstoned} gone={gone} free={}",
                p.oid().as_i32(),
                p.lsn().as_i32(),
                p.next_page_id().as_i32(),
                p.free_space()
            )
        }
        Page::BTreeInternal(p) => {
            counts.btree_internal += 1;
            format!("{} children, parent={}", p.size(), p.parent_page_id().as_i32())
        }
        Page::BTreeLeaf(p) => {
            counts.btree_leaf += 1;
            format!(
                "{} keys, parent={} next={}",
                p.size(),
                p.parent_page_id().as_i32(),
                p.next_page_id().as_i32()
            )
        }
    };

    Ok(PageInfo {
        page_id: page_id.as_i32(),
        kind: page.kind().name().to_string(),
        detail,
    })
}

/// Walks the header page chain from page 0.
fn read_directory(
    disk: &DiskManager,
    page_count: u32,
) -> Result<Vec<DirectoryEntry>, Box<dyn Error>> {
    let mut entries = Vec::new();
    if page_count == 0 {
        return Ok(entries);
    }

    let mut current = HEADER_PAGE_ID;
    let mut hops = 0;
    while current.is_valid() {
        if hops > page_count {
            return Err("header page chain contains a cycle".into());
        }
        let bytes = disk.read_page(current)?;
        let page = Page::deserialize(current, &bytes, None)?;
        let header = page.as_header()?;
        entries.extend(header.records().iter().map(|(oid, first)| DirectoryEntry {
            oid: oid.as_i32(),
            first_page_id: first.as_i32(),
        }));
        current = header.next_page_id();
        hops += 1;
    }
    Ok(entries)
}

fn print_text_output(result: &InspectResult) {
    println!("strata Database Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Pages:     {}", result.page_count);
    println!("  Data size: {}", format_size(result.data_size));
    println!("  Log size:  {}", format_size(result.log_size));
    println!();
    let k = &result.pages_by_kind;
    println!("Page kinds:");
    println!("  Header:          {}", k.header);
    println!("  Table:           {}", k.table);
    println!("  B+tree internal: {}", k.btree_internal);
    println!("  B+tree leaf:     {}", k.btree_leaf);
    println!("  Unwritten:       {}", k.unwritten);
    if k.corrupt > 0 {
        println!("  Corrupt:         {}", k.corrupt);
    }
    println!();
    println!("Directory ({} objects):", result.directory.len());
    for entry in &result.directory {
        println!("  oid {:>6} -> page {}", entry.oid, entry.first_page_id);
    }

    if let Some(pages) = &result.pages {
        println!();
        println!("Pages:");
        for page in pages {
            println!("  [{:>6}] {:<16} {}", page.page_id, page.kind, page.detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_core::{
        Column, Config, MemoryCatalog, Oid, Schema, StorageEngine, Tuple, TypeId, Value,
    };
    use tempfile::tempdir;

    fn build(path: &Path) {
        let oid = Oid::new(3);
        let schema = Schema::new(vec![Column::new("id", TypeId::Integer)]).unwrap();
        let catalog = Arc::new(MemoryCatalog::new().with_table(oid, schema));
        let engine = StorageEngine::open(path, Config::default(), catalog).unwrap();

        let mut txn = engine.begin().unwrap();
        let table = engine.create_table(oid, &mut txn).unwrap();
        let rid = table
            .insert_tuple(&Tuple::new(vec![Value::Integer(1)]), &mut txn)
            .unwrap();
        table
            .insert_tuple(&Tuple::new(vec![Value::Integer(2)]), &mut txn)
            .unwrap();
        table.mark_delete(rid, &mut txn).unwrap();
        engine.commit(&mut txn).unwrap();

        let index = engine.create_index(Oid::new(4)).unwrap();
        index.insert(2, rid).unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn describes_every_page_kind() {
        let dir = tempdir().unwrap();
        build(dir.path());

        let disk = open_files(dir.path()).unwrap();
        let mut counts = KindCounts::default();
        let pages: Vec<PageInfo> = (0..disk.num_pages().unwrap())
            .map(|id| describe(&disk, PageId::new(id as i32), &mut counts).unwrap())
            .collect();

        assert_eq!(counts.header, 1);
        assert_eq!(counts.table, 1);
        assert_eq!(counts.btree_leaf, 1);
        assert_eq!(counts.corrupt, 0);
        let table = pages.iter().find(|p| p.kind == "table").unwrap();
        assert!(table.detail.contains("live=1"));
        assert!(table.detail.contains("gone=1"));
    }

    #[test]
    fn lists_the_directory() {
        let dir = tempdir().unwrap();
        build(dir.path());

        let disk = open_files(dir.path()).unwrap();
        let entries = read_directory(&disk, disk.num_pages().unwrap()).unwrap();
        let oids: Vec<i32> = entries.iter().map(|e| e.oid).collect();
        assert_eq!(oids, vec![3, 4]);
        assert!(entries.iter().all(|e| e.first_page_id > 0));
    }

    #[test]
    fn foreign_bytes_are_reported_as_corrupt() {
        let dir = tempdir().unwrap();
        build(dir.path());
        let data = dir.path().join("data.db");
        let mut bytes = std::fs::read(&data).unwrap();
        bytes[strata_core::PAGE_SIZE + 4] = 0x7f;
        std::fs::write(&data, bytes).unwrap();

        let disk = open_files(dir.path()).unwrap();
        let mut counts = KindCounts::default();
        let info = describe(&disk, PageId::new(1), &mut counts).unwrap();
        assert_eq!(info.kind, "corrupt");
        assert_eq!(counts.corrupt, 1);
    }

    #[test]
    fn run_prints_json() {
        let dir = tempdir().unwrap();
        build(dir.path());
        run(dir.path(), true, "json").unwrap();
        run(dir.path(), false, "text").unwrap();
    }
}
