//! Size-bounded rotating zip packages
//!
//! Each channel coordinator owns one [`ArchivePackager`]. Files are added under an
//! entry name; before a write that would push the running size over
//! `max_archive_size` the current archive is closed and a fresh one opened. Closing
//! an archive re-reads it and deletes it when any entry fails its CRC check.
//!
//! All zip I/O runs on the blocking thread pool. The writer is moved into the
//! blocking task and handed back when the write completes.

mod verify;

pub use verify::verify_archive;

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::types::Event;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Summary of a closed archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Archive file (removed from disk when `verified` is false)
    pub path: PathBuf,
    /// Entries written
    pub entries: usize,
    /// Sum of source file sizes written
    pub bytes: u64,
    /// Whether every entry passed the integrity check
    pub verified: bool,
}

struct OpenArchive {
    path: PathBuf,
    writer: ZipWriter<File>,
    size: u64,
    entries: usize,
}

/// Rotating archive writer bound to one channel
pub struct ArchivePackager {
    dir: PathBuf,
    channel: String,
    config: ArchiveConfig,
    seq: u32,
    current: Option<OpenArchive>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl ArchivePackager {
    /// Create a packager writing into `dir`; nothing is opened yet
    pub fn new(dir: impl Into<PathBuf>, channel: impl Into<String>, config: ArchiveConfig) -> Self {
        Self {
            dir: dir.into(),
            channel: channel.into(),
            config,
            seq: 0,
            current: None,
            event_tx: None,
        }
    }

    /// Publish archive lifecycle events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Whether an archive is currently open
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Path of the open archive
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }

    /// Running size of the open archive (sum of source sizes)
    pub fn current_size(&self) -> u64 {
        self.current.as_ref().map(|c| c.size).unwrap_or(0)
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }

    /// Open a new archive, closing the current one first
    pub async fn open(&mut self) -> Result<PathBuf, ArchiveError> {
        if self.current.is_some() {
            self.close().await;
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        self.seq += 1;
        let name = format!(
            "{}_{}_{}.zip",
            self.channel,
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            self.seq
        );
        let path = self.dir.join(name);

        let create_path = path.clone();
        let writer = tokio::task::spawn_blocking(move || -> Result<_, ArchiveError> {
            Ok(ZipWriter::new(File::create(&create_path)?))
        })
        .await
        .map_err(|e| ArchiveError::Io(io::Error::other(format!("archive worker failed: {}", e))))??;

        info!(channel = %self.channel, archive = ?path, "Opened archive");
        self.emit(Event::ArchiveOpened {
            channel: self.channel.clone(),
            path: path.clone(),
        });

        self.current = Some(OpenArchive {
            path: path.clone(),
            writer,
            size: 0,
            entries: 0,
        });
        Ok(path)
    }

    /// Add `source` under `entry_name`, logging instead of failing
    ///
    /// Returns `false` for missing or empty sources and for write errors.
    pub async fn add(&mut self, source: &Path, entry_name: &str) -> bool {
        match self.try_add(source, entry_name).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    channel = %self.channel,
                    source = ?source,
                    error = %e,
                    "Failed to add file to archive"
                );
                false
            }
        }
    }

    /// Add `source` under `entry_name` and return the archive it landed in
    ///
    /// Rotates strictly before a write that would exceed the size cap. A file
    /// larger than the cap on its own is written alone into a fresh archive.
    pub async fn try_add(&mut self, source: &Path, entry_name: &str) -> Result<PathBuf, ArchiveError> {
        let size = match tokio::fs::metadata(source).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                return Err(ArchiveError::SourceMissing {
                    path: source.to_path_buf(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::SourceMissing {
                    path: source.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            return Err(ArchiveError::EmptySource {
                path: source.to_path_buf(),
            });
        }

        let max = self.config.max_archive_size;
        if size > max {
            warn!(
                channel = %self.channel,
                source = ?source,
                size,
                max,
                "File exceeds archive size cap, packaging it alone"
            );
        }

        let needs_rotation = match &self.current {
            None => true,
            Some(current) => current.entries > 0 && current.size + size > max,
        };
        if needs_rotation {
            if let Some(current) = &self.current {
                debug!(
                    channel = %self.channel,
                    archive = ?current.path,
                    size = current.size,
                    incoming = size,
                    "Rotating archive"
                );
            }
            self.open().await?;
        }

        let mut current = self.current.take().ok_or(ArchiveError::NotOpen)?;
        let level = self.config.compression_level;
        let source_owned = source.to_path_buf();
        let name_owned = entry_name.to_string();

        let (mut current, result) = tokio::task::spawn_blocking(move || {
            let result = write_entry(&mut current.writer, &source_owned, &name_owned, size, level);
            (current, result)
        })
        .await
        .map_err(|e| ArchiveError::Io(io::Error::other(format!("archive worker failed: {}", e))))?;

        let path = current.path.clone();
        if result.is_ok() {
            current.size += size;
            current.entries += 1;
        }
        self.current = Some(current);
        result?;

        debug!(channel = %self.channel, archive = ?path, entry = %entry_name, size, "Added archive entry");
        Ok(path)
    }

    /// Finish the open archive and verify it
    ///
    /// Returns `None` when no archive is open. State is cleared either way; a
    /// corrupt archive is deleted and reported with `verified: false`.
    pub async fn close(&mut self) -> Option<ArchiveReport> {
        let current = self.current.take()?;
        let OpenArchive {
            path,
            writer,
            size,
            entries,
        } = current;

        let finished = tokio::task::spawn_blocking(move || -> Result<(), ArchiveError> {
            let mut writer = writer;
            writer.finish()?;
            Ok(())
        })
        .await
        .map_err(|e| ArchiveError::Io(io::Error::other(format!("archive worker failed: {}", e))))
        .and_then(|r| r);

        let report = match finished {
            Ok(()) => self.verify_or_discard(path, entries, size).await,
            Err(e) => self.discard(path, entries, size, &e).await,
        };
        Some(report)
    }

    pub(crate) async fn verify_or_discard(&mut self, path: PathBuf, entries: usize, bytes: u64) -> ArchiveReport {
        let verify_path = path.clone();
        let verified = tokio::task::spawn_blocking(move || verify_archive(&verify_path))
            .await
            .map_err(|e| ArchiveError::Io(io::Error::other(format!("archive worker failed: {}", e))))
            .and_then(|r| r);

        match verified {
            Ok(count) => {
                info!(
                    channel = %self.channel,
                    archive = ?path,
                    entries = count,
                    bytes,
                    "Archive verified"
                );
                self.emit(Event::ArchiveVerified {
                    path: path.clone(),
                    entries: count,
                });
                ArchiveReport {
                    path,
                    entries: count,
                    bytes,
                    verified: true,
                }
            }
            Err(e) => self.discard(path, entries, bytes, &e).await,
        }
    }

    async fn discard(&mut self, path: PathBuf, entries: usize, bytes: u64, cause: &ArchiveError) -> ArchiveReport {
        error!(
            channel = %self.channel,
            archive = ?path,
            error = %cause,
            "Archive failed integrity check, deleting"
        );
        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(archive = ?path, error = %e, "Failed to delete corrupt archive");
        }
        self.emit(Event::ArchiveCorrupt {
            path: path.clone(),
            error: cause.to_string(),
        });
        ArchiveReport {
            path,
            entries,
            bytes,
            verified: false,
        }
    }
}

fn write_entry(
    writer: &mut ZipWriter<File>,
    source: &Path,
    entry_name: &str,
    size: u64,
    level: i32,
) -> Result<(), ArchiveError> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level))
        .large_file(size >= u32::MAX as u64);

    let mut reader = BufReader::new(File::open(source)?);
    writer.start_file(entry_name, options)?;
    io::copy(&mut reader, writer)?;
    Ok(())
}
