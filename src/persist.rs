//! Batch buffering and compressed persistence
//!
//! Processed records are buffered per channel in a [`Batch`] of fixed capacity.
//! A full (or final) batch is serialized as a compact JSON array, zstd-compressed
//! and written atomically under `{raw_dir}/{date}/`, then added to the channel's
//! open archive under `messages/`.

use crate::archive::ArchivePackager;
use crate::error::{Error, Result};
use crate::types::{Event, MessageRecord};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Bounded, ordered buffer of records for one channel and one UTC day
#[derive(Debug)]
pub struct Batch {
    channel: String,
    date: NaiveDate,
    capacity: usize,
    records: Vec<MessageRecord>,
}

impl Batch {
    /// Create an empty batch dated today (UTC)
    pub fn new(channel: impl Into<String>, capacity: usize) -> Self {
        Self::with_date(channel, capacity, Utc::now().date_naive())
    }

    /// Create an empty batch for an explicit date
    pub fn with_date(channel: impl Into<String>, capacity: usize, date: NaiveDate) -> Self {
        let capacity = capacity.max(1);
        Self {
            channel: channel.into(),
            date,
            capacity,
            records: Vec::with_capacity(capacity),
        }
    }

    /// Append a record; returns `false` (dropping nothing) when the batch is full
    pub fn push(&mut self, record: MessageRecord) -> bool {
        if self.is_full() {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Whether the batch reached its capacity
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Whether the batch holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of buffered records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Channel the batch belongs to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Date the batch is filed under
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Buffered records in insertion order
    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    /// Hand out the buffered records, leaving an empty batch dated today
    pub fn take(&mut self) -> Batch {
        let fresh = Batch::new(self.channel.clone(), self.capacity);
        std::mem::replace(self, fresh)
    }
}

/// Writes batches for one channel
pub struct BatchPersister {
    raw_dir: PathBuf,
    channel: String,
    zstd_level: i32,
    parts: HashMap<NaiveDate, u32>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl BatchPersister {
    /// Create a persister writing under `raw_dir`
    pub fn new(raw_dir: impl Into<PathBuf>, channel: impl Into<String>, zstd_level: i32) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            channel: channel.into(),
            zstd_level,
            parts: HashMap::new(),
            event_tx: None,
        }
    }

    /// Publish a [`Event::BatchFlushed`] after every write
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Compress and write `batch`, then package it
    ///
    /// Returns `Ok(None)` for an empty batch. The first flush of a day writes
    /// `{channel}.json.zst`; later ones write `{channel}_partN.json.zst`. A file
    /// left by an earlier run is never overwritten. Packaging failures are logged;
    /// the batch file stays on disk either way.
    pub async fn flush(&mut self, batch: Batch, packager: &mut ArchivePackager) -> Result<Option<PathBuf>> {
        if batch.is_empty() {
            return Ok(None);
        }

        let date = batch.date();
        let day_dir = self.raw_dir.join(date.format("%Y-%m-%d").to_string());
        tokio::fs::create_dir_all(&day_dir).await?;

        let (part, path) = self.next_path(&day_dir, date).await;
        let records = batch.len();
        let json = serde_json::to_vec(batch.records())?;

        let level = self.zstd_level;
        let write_path = path.clone();
        let written = tokio::task::spawn_blocking(move || write_compressed(&json, &write_path, level))
            .await??;

        info!(
            channel = %self.channel,
            records,
            bytes = written,
            path = ?path,
            "Flushed batch"
        );

        let entry = match part {
            1 => format!("messages/{}_{}.json.zst", self.channel, date),
            n => format!("messages/{}_{}_part{}.json.zst", self.channel, date, n),
        };
        if !packager.add(&path, &entry).await {
            warn!(channel = %self.channel, path = ?path, "Batch file was not packaged");
        }

        if let Some(tx) = &self.event_tx {
            tx.send(Event::BatchFlushed {
                channel: self.channel.clone(),
                records,
                path: path.clone(),
            })
            .ok();
        }

        Ok(Some(path))
    }

    async fn next_path(&mut self, day_dir: &Path, date: NaiveDate) -> (u32, PathBuf) {
        let counter = self.parts.entry(date).or_insert(0);
        loop {
            *counter += 1;
            let name = match *counter {
                1 => format!("{}.json.zst", self.channel),
                n => format!("{}_part{}.json.zst", self.channel, n),
            };
            let path = day_dir.join(name);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return (*counter, path);
            }
            debug!(path = ?path, "Batch file exists, trying next part");
        }
    }
}

/// Stream `json` through a zstd encoder into a temp file and rename it into place
fn write_compressed(json: &[u8], path: &Path, level: i32) -> Result<u64> {
    let tmp_path = path.with_extension("zst.tmp");

    let result = (|| -> Result<u64> {
        let file = std::fs::File::create(&tmp_path)?;
        let mut encoder = zstd::Encoder::new(file, level)?;
        encoder.write_all(json)?;
        let file = encoder.finish()?;
        file.sync_all()?;
        let size = file.metadata()?.len();
        std::fs::rename(&tmp_path, path)?;
        Ok(size)
    })();

    if result.is_err() {
        std::fs::remove_file(&tmp_path).ok();
    }
    result.map_err(|e| match e {
        Error::Io(io) => Error::Io(std::io::Error::new(
            io.kind(),
            format!("failed to write {}: {}", path.display(), io),
        )),
        other => other,
    })
}

/// Read a persisted batch back into records
pub fn read_batch(path: &Path) -> Result<Vec<MessageRecord>> {
    let file = std::fs::File::open(path)?;
    let json = zstd::decode_all(file)?;
    Ok(serde_json::from_slice(&json)?)
}
