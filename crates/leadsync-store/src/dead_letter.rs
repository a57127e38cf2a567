use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use leadsync_types::DeadLetterEntry;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::DeadLetterChannel;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// In-memory dead-letter channel.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetters {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().expect("lock poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }
}

#[async_trait]
impl DeadLetterChannel for InMemoryDeadLetters {
    async fn append(&self, entry: &DeadLetterEntry) -> StoreResult<()> {
        self.entries
            .write()
            .expect("lock poisoned")
            .push(entry.clone());
        Ok(())
    }

    async fn entries(&self) -> StoreResult<Vec<DeadLetterEntry>> {
        Ok(self.snapshot())
    }
}

/// Append-only dead-letter file.
///
/// On-disk format, one frame per entry:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized DeadLetterEntry)]
/// ```
/// Every append is flushed and fsynced: a dead letter is the only trace of a
/// record that will never be retried. On read, frames failing the CRC check
/// are skipped and a torn tail stops the scan.
///
/// The async [`DeadLetterChannel`] methods run their file I/O on tokio's
/// blocking pool.
pub struct DeadLetterLog {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

fn encode_frame(entry: &DeadLetterEntry) -> StoreResult<Vec<u8>> {
    let payload =
        bincode::serialize(entry).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn write_frame(writer: &Mutex<BufWriter<File>>, frame: &[u8]) -> StoreResult<()> {
    let mut w = writer.lock().expect("dead-letter mutex poisoned");
    w.write_all(frame)?;
    w.flush()?;
    w.get_ref().sync_all()?;
    Ok(())
}

fn blocking_failed(e: tokio::task::JoinError) -> StoreError {
    StoreError::Io(io::Error::other(e))
}

impl DeadLetterLog {
    /// Open (or create) a dead-letter log at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single entry, blocking until it is on disk.
    pub fn append_entry(&self, entry: &DeadLetterEntry) -> StoreResult<()> {
        let frame = encode_frame(entry)?;
        write_frame(&self.writer, &frame)?;
        debug!(entry = %entry.id, len = frame.len(), "dead letter appended");
        Ok(())
    }

    /// Read every intact entry from a dead-letter file.
    pub fn read_all(path: &Path) -> StoreResult<Vec<DeadLetterEntry>> {
        let mut file = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if length == 0 {
                warn!(offset, "zero-length dead-letter frame; stopping scan");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated dead-letter frame; stopping scan");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "CRC mismatch; skipping dead-letter frame"
                );
            } else {
                match bincode::deserialize::<DeadLetterEntry>(&payload) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(offset, error = %e, "undecodable dead-letter frame; skipping"),
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        Ok(entries)
    }
}

#[async_trait]
impl DeadLetterChannel for DeadLetterLog {
    async fn append(&self, entry: &DeadLetterEntry) -> StoreResult<()> {
        let frame = encode_frame(entry)?;
        let writer = Arc::clone(&self.writer);
        let len = frame.len();
        tokio::task::spawn_blocking(move || write_frame(&writer, &frame))
            .await
            .map_err(blocking_failed)??;
        debug!(entry = %entry.id, len, "dead letter appended");
        Ok(())
    }

    async fn entries(&self) -> StoreResult<Vec<DeadLetterEntry>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read_all(&path))
            .await
            .map_err(blocking_failed)?
    }
}

impl std::fmt::Debug for DeadLetterLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterLog")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadsync_types::{CanonicalId, Document, LeadCandidate, OriginalId, SourceId};
    use std::io::{Seek, SeekFrom};

    fn entry(original: &str, attempts: u32) -> DeadLetterEntry {
        let source = SourceId::new("sourceA").unwrap();
        let original = OriginalId::new(original).unwrap();
        let candidate = LeadCandidate {
            canonical_id: CanonicalId::derive(&source, &original),
            fields: Document::new(),
            original_id: original,
            source_database: source,
        };
        DeadLetterEntry::new(&candidate, "write timed out after 10s", attempts)
    }

    #[tokio::test]
    async fn in_memory_is_append_only() {
        let dlq = InMemoryDeadLetters::new();
        dlq.append(&entry("L1", 5)).await.unwrap();
        dlq.append(&entry("L2", 1)).await.unwrap();

        let all = dlq.entries().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].original_id.as_str(), "L1");
        assert_eq!(all[1].attempts, 1);
    }

    #[tokio::test]
    async fn log_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead-letters.log");

        let first = entry("L1", 5);
        let second = entry("L2", 1);
        {
            let log = DeadLetterLog::open(&path).unwrap();
            log.append(&first).await.unwrap();
            log.append(&second).await.unwrap();
        }

        let log = DeadLetterLog::open(&path).unwrap();
        let all = log.entries().await.unwrap();
        assert_eq!(all, vec![first, second]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_appends_write_whole_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead-letters.log");
        let log = Arc::new(DeadLetterLog::open(&path).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..20 {
            let log = Arc::clone(&log);
            tasks.spawn(async move { log.append(&entry(&format!("L{n}"), 5)).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let all = log.entries().await.unwrap();
        assert_eq!(all.len(), 20);
        let mut ids: Vec<_> = all.iter().map(|e| e.original_id.as_str().to_string()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn corrupt_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.log");
        let log = DeadLetterLog::open(&path).unwrap();
        log.append_entry(&entry("L1", 5)).unwrap();
        let keep = entry("L2", 5);
        log.append_entry(&keep).unwrap();
        drop(log);

        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            file.write_all(&buf).unwrap();
        }

        let all = DeadLetterLog::read_all(&path).unwrap();
        assert_eq!(all, vec![keep]);
    }

    #[test]
    fn torn_tail_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.log");
        let log = DeadLetterLog::open(&path).unwrap();
        let keep = entry("L1", 3);
        log.append_entry(&keep).unwrap();
        log.append_entry(&entry("L2", 3)).unwrap();
        drop(log);

        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let all = DeadLetterLog::read_all(&path).unwrap();
        assert_eq!(all, vec![keep]);
    }
}
