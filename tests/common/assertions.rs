//! Filesystem and event assertions

use channel_harvest::persist::read_batch;
use channel_harvest::{Event, MessageRecord};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// All files under `dir` with the given suffix, sorted
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.to_string_lossy().ends_with(suffix))
        .collect();
    files.sort();
    files
}

/// Decode every batch file under `raw_dir` for `channel`
pub fn records_for(raw_dir: &Path, channel: &str) -> Vec<MessageRecord> {
    let prefix = format!("{channel}.");
    let part_prefix = format!("{channel}_part");
    let mut records: Vec<MessageRecord> = files_with_suffix(raw_dir, ".json.zst")
        .into_iter()
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            name.starts_with(&prefix) || name.starts_with(&part_prefix)
        })
        .flat_map(|p| read_batch(&p).expect("batch should decode"))
        .collect();
    records.sort_by_key(|r| r.source_id);
    records
}

/// Names of every entry in the zip at `path`
pub fn zip_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect()
}

/// Drain whatever is buffered on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
