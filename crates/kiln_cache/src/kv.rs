//! A small log-structured map from `u32` keys to `i64` arrays, kept in a
//! single file.
//!
//! Every update appends one self-checksummed record; on open the log is
//! replayed and the last record for each key wins. A record is the unit of
//! crash atomicity: a torn final record (shorter than its declared length)
//! is dropped on the next open, while a complete record with a bad checksum
//! is reported as corruption. Once enough records have been superseded the
//! log is rewritten with only live records.
//!
//! ```text
//! "KKVL" u16 revision
//! repeated: u32 key  u32 count  count * i64  u32 crc32
//! ```

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::CacheError;

const LOG_MAGIC: [u8; 4] = *b"KKVL";
const LOG_REVISION: u16 = 1;
const LOG_HEADER_LEN: usize = 6;

/// Longest array a single record may hold; longer declared lengths are corruption.
const MAX_VALUES_PER_RECORD: u32 = 1 << 16;

/// Outcome of a [`KeyValueLog::compare_and_put`] decision function.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PutDecision {
    /// Write the new value.
    Put,
    /// Keep the existing value; nothing is written.
    Skip,
}

/// Decision function that skips the write when the stored value is identical.
pub fn skip_if_identical(existing: Option<&[i64]>, new: &[i64]) -> PutDecision {
    if existing == Some(new) {
        PutDecision::Skip
    } else {
        PutDecision::Put
    }
}

/// An open key-value log.
pub struct KeyValueLog {
    path: PathBuf,
    file: File,
    entries: BTreeMap<u32, Vec<i64>>,
    dead_records: usize,
    compaction_threshold: usize,
    appended: usize,
}

impl KeyValueLog {
    /// Opens the log at `path`, creating it (and its directory) if absent.
    ///
    /// `compaction_threshold` is the number of superseded records tolerated
    /// before the log is rewritten.
    pub fn open_or_create(path: &Path, compaction_threshold: usize) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| CacheError::io(path, e))?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| CacheError::io(path, e))?;

        let (entries, dead_records) = if bytes.is_empty() {
            file.write_all(&log_header())
                .and_then(|()| file.sync_data())
                .map_err(|e| CacheError::io(path, e))?;
            (BTreeMap::new(), 0)
        } else {
            let replay = replay(path, &bytes)?;
            if replay.valid_len < bytes.len() {
                tracing::warn!(
                    path = %path.display(),
                    dropped = bytes.len() - replay.valid_len,
                    "dropping torn record at end of key-value log"
                );
                file.set_len(replay.valid_len as u64)
                    .map_err(|e| CacheError::io(path, e))?;
            }
            (replay.entries, replay.dead_records)
        };
        file.seek(SeekFrom::End(0))
            .map_err(|e| CacheError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
            dead_records,
            compaction_threshold,
            appended: 0,
        })
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: u32) -> Option<&[i64]> {
        self.entries.get(&key).map(Vec::as_slice)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records appended through this handle.
    pub fn appended_records(&self) -> usize {
        self.appended
    }

    /// Stores `value` under `key` if `decide(existing, value)` returns
    /// [`PutDecision::Put`]. Returns whether a record was written.
    pub fn compare_and_put<F>(&mut self, key: u32, value: &[i64], decide: F) -> Result<bool, CacheError>
    where
        F: FnOnce(Option<&[i64]>, &[i64]) -> PutDecision,
    {
        if decide(self.get(key), value) == PutDecision::Skip {
            return Ok(false);
        }

        self.append(&encode_record(key, value))?;
        self.appended += 1;
        if self.entries.insert(key, value.to_vec()).is_some() {
            self.dead_records += 1;
        }

        if self.dead_records > self.compaction_threshold {
            self.compact()?;
        }
        Ok(true)
    }

    /// Writes `record` at the end of the log. On failure the file is cut
    /// back to its previous length so no partial record stays behind.
    fn append(&mut self, record: &[u8]) -> Result<(), CacheError> {
        let start = self
            .file
            .stream_position()
            .map_err(|e| CacheError::io(&self.path, e))?;
        if let Err(e) = self
            .file
            .write_all(record)
            .and_then(|()| self.file.sync_data())
        {
            self.truncate_to(start);
            return Err(CacheError::io(&self.path, e));
        }
        Ok(())
    }

    fn truncate_to(&mut self, len: u64) {
        let restored = self
            .file
            .set_len(len)
            .and_then(|()| self.file.seek(SeekFrom::Start(len)));
        if let Err(e) = restored {
            tracing::warn!(path = %self.path.display(), error = %e, "cannot roll back partial record");
        }
    }

    /// Rewrites the log with only live records, atomically replacing the file.
    pub fn compact(&mut self) -> Result<(), CacheError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| CacheError::io(&dir, e))?;
        let mut bytes = log_header().to_vec();
        for (&key, value) in &self.entries {
            bytes.extend_from_slice(&encode_record(key, value));
        }
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| CacheError::io(tmp.path(), e))?;
        let mut file = tmp
            .persist(&self.path)
            .map_err(|e| CacheError::io(&self.path, e.error))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| CacheError::io(&self.path, e))?;

        tracing::debug!(
            path = %self.path.display(),
            dropped = self.dead_records,
            live = self.entries.len(),
            "compacted key-value log"
        );
        self.file = file;
        self.dead_records = 0;
        Ok(())
    }
}

struct Replay {
    entries: BTreeMap<u32, Vec<i64>>,
    dead_records: usize,
    valid_len: usize,
}

fn log_header() -> [u8; LOG_HEADER_LEN] {
    let mut header = [0u8; LOG_HEADER_LEN];
    header[..4].copy_from_slice(&LOG_MAGIC);
    header[4..].copy_from_slice(&LOG_REVISION.to_le_bytes());
    header
}

fn encode_record(key: u32, value: &[i64]) -> Vec<u8> {
    let mut record = Vec::with_capacity(12 + value.len() * 8);
    record.extend_from_slice(&key.to_le_bytes());
    record.extend_from_slice(&(value.len() as u32).to_le_bytes());
    for v in value {
        record.extend_from_slice(&v.to_le_bytes());
    }
    let crc = crc32fast::hash(&record);
    record.extend_from_slice(&crc.to_le_bytes());
    record
}

fn read_u32_at(bytes: &[u8], pos: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[pos..pos + 4]);
    u32::from_le_bytes(buf)
}

fn replay(path: &Path, bytes: &[u8]) -> Result<Replay, CacheError> {
    if bytes.len() < LOG_HEADER_LEN || bytes[..LOG_HEADER_LEN] != log_header() {
        return Err(CacheError::InvalidHeader {
            path: path.to_path_buf(),
            reason: "not a key-value log".to_string(),
        });
    }

    let mut entries = BTreeMap::new();
    let mut dead_records = 0;
    let mut pos = LOG_HEADER_LEN;
    while bytes.len() - pos >= 8 {
        let key = read_u32_at(bytes, pos);
        let count = read_u32_at(bytes, pos + 4);
        if count > MAX_VALUES_PER_RECORD {
            return Err(CacheError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("record at offset {pos} declares {count} values"),
            });
        }
        let body_len = 8 + count as usize * 8;
        if bytes.len() - pos < body_len + 4 {
            break;
        }
        let body = &bytes[pos..pos + body_len];
        let expected = read_u32_at(bytes, pos + body_len);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(CacheError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }
        let value = body[8..]
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                i64::from_le_bytes(buf)
            })
            .collect();
        if entries.insert(key, value).is_some() {
            dead_records += 1;
        }
        pos += body_len + 4;
    }

    Ok(Replay {
        entries,
        dead_records,
        valid_len: pos,
    })
}

impl std::fmt::Debug for KeyValueLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueLog")
            .field("path", &self.path)
            .field("keys", &self.entries.len())
            .field("dead_records", &self.dead_records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(path: &Path) -> KeyValueLog {
        KeyValueLog::open_or_create(path, 64).unwrap()
    }

    #[test]
    fn create_then_reopen_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.kv");
        assert!(open(&path).is_empty());
        assert!(open(&path).is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), LOG_HEADER_LEN as u64);
    }

    #[test]
    fn put_get_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.kv");
        {
            let mut log = open(&path);
            assert!(log.compare_and_put(1, &[10, -20, i64::MAX], skip_if_identical).unwrap());
            assert!(log.compare_and_put(2, &[], skip_if_identical).unwrap());
            assert!(log.compare_and_put(1, &[11], skip_if_identical).unwrap());
        }
        let log = open(&path);
        assert_eq!(log.get(1), Some(&[11][..]));
        assert_eq!(log.get(2), Some(&[][..]));
        assert_eq!(log.get(3), None);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn identical_value_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(&dir.path().join("stats.kv"));
        assert!(log.compare_and_put(7, &[1, 2], skip_if_identical).unwrap());
        assert!(!log.compare_and_put(7, &[1, 2], skip_if_identical).unwrap());
        assert_eq!(log.appended_records(), 1);
    }

    #[test]
    fn custom_decision_sees_existing_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(&dir.path().join("stats.kv"));
        log.compare_and_put(1, &[5], skip_if_identical).unwrap();
        let written = log
            .compare_and_put(1, &[3], |existing, new| {
                if existing.map_or(true, |old| new[0] > old[0]) {
                    PutDecision::Put
                } else {
                    PutDecision::Skip
                }
            })
            .unwrap();
        assert!(!written);
        assert_eq!(log.get(1), Some(&[5][..]));
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.kv");
        {
            let mut log = open(&path);
            log.compare_and_put(1, &[1], skip_if_identical).unwrap();
            log.compare_and_put(1, &[2, 3], skip_if_identical).unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        let mut log = open(&path);
        assert_eq!(log.get(1), Some(&[1][..]));
        log.compare_and_put(1, &[4], skip_if_identical).unwrap();
        drop(log);
        assert_eq!(open(&path).get(1), Some(&[4][..]));
    }

    #[test]
    fn rolled_back_partial_record_leaves_log_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.kv");
        let mut log = open(&path);
        log.compare_and_put(1, &[1], skip_if_identical).unwrap();

        let start = log.file.stream_position().unwrap();
        log.file.write_all(&encode_record(2, &[5, 6])[..9]).unwrap();
        log.truncate_to(start);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), start);

        log.compare_and_put(3, &[7], skip_if_identical).unwrap();
        drop(log);
        let log = open(&path);
        assert_eq!(log.get(1), Some(&[1][..]));
        assert_eq!(log.get(2), None);
        assert_eq!(log.get(3), Some(&[7][..]));
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.kv");
        open(&path).compare_and_put(9, &[42, 43], skip_if_identical).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[LOG_HEADER_LEN + 10] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let err = KeyValueLog::open_or_create(&path, 64).unwrap_err();
        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
    }

    #[test]
    fn foreign_file_is_invalid_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.kv");
        std::fs::write(&path, b"{\"json\": true}").unwrap();
        let err = KeyValueLog::open_or_create(&path, 64).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn compaction_keeps_live_records_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.kv");
        {
            let mut log = KeyValueLog::open_or_create(&path, 2).unwrap();
            for i in 0..10 {
                log.compare_and_put(1, &[i], skip_if_identical).unwrap();
            }
            log.compare_and_put(2, &[99], skip_if_identical).unwrap();
            assert_eq!(log.appended_records(), 11);
        }
        let size = std::fs::metadata(&path).unwrap().len() as usize;
        // header + at most threshold+1 superseded copies of key 1 + live records
        assert!(size < LOG_HEADER_LEN + 5 * 20, "log not compacted: {size} bytes");

        let log = open(&path);
        assert_eq!(log.get(1), Some(&[9][..]));
        assert_eq!(log.get(2), Some(&[99][..]));
    }
}
