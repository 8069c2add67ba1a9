//! Archive integrity verification

use crate::error::ArchiveError;
use std::path::Path;
use tracing::debug;

/// Re-open a finished archive read-only and read every entry to the end
///
/// Reading an entry to EOF makes the zip reader compare the stored CRC-32 with the
/// data actually read, so a truncated container or a damaged entry surfaces here.
/// Returns the number of entries on success.
pub fn verify_archive(path: &Path) -> Result<usize, ArchiveError> {
    let file = std::fs::File::open(path)?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("unreadable container: {}", e),
    })?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("entry {}: {}", i, e),
        })?;
        let name = entry.name().to_string();

        std::io::copy(&mut entry, &mut std::io::sink()).map_err(|e| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("{}: {}", name, e),
        })?;
        debug!(archive = ?path, entry = %name, "entry checksum ok");
    }

    Ok(archive.len())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_stored_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn valid_archive_reports_entry_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.zip");
        write_stored_zip(&path, &[("a.txt", b"alpha"), ("b.txt", b"bravo")]);

        assert_eq!(verify_archive(&path).unwrap(), 2);
    }

    #[test]
    fn truncated_archive_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.zip");
        write_stored_zip(&path, &[("a.txt", &[b'x'; 4096])]);

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len / 2).unwrap();
        drop(file);

        assert!(matches!(
            verify_archive(&path),
            Err(ArchiveError::Corrupt { .. })
        ));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flipped.zip");
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(8);
        write_stored_zip(&path, &[("fox.txt", &payload)]);

        let mut bytes = std::fs::read(&path).unwrap();
        let start = bytes
            .windows(payload.len())
            .position(|w| w == payload.as_slice())
            .unwrap();
        bytes[start + 10] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = verify_archive(&path).unwrap_err();
        match err {
            ArchiveError::Corrupt { reason, .. } => assert!(reason.contains("fox.txt")),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }
}
