use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FabricError, Result};
use crate::event::SourceEvent;

/// When appended events reach stable storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every append.
    EveryWrite,
    /// Hand each append to the OS and let it decide when to persist.
    #[default]
    OsDefault,
}

#[derive(Clone, Debug, Default)]
pub struct WalConfig {
    pub sync_mode: SyncMode,
}

/// `[len: u32 LE][crc32: u32 LE]` precedes every payload.
const HEADER_SIZE: usize = 8;

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Result of decoding one frame from a log image.
enum Frame<'a> {
    Intact(&'a [u8]),
    Corrupt,
}

/// Walks the frames of a log image. Stops at the first header whose length
/// is zero or runs past the end of the image (a torn tail).
struct FrameScanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameScanner<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(word)
}

impl<'a> Iterator for FrameScanner<'a> {
    type Item = (usize, Frame<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let buf = self.buf;
        let start = self.pos;
        if start + HEADER_SIZE > buf.len() {
            return None;
        }
        let len = read_u32(buf, start) as usize;
        let crc = read_u32(buf, start + 4);
        let body = start + HEADER_SIZE;
        if len == 0 || body + len > buf.len() {
            warn!(offset = start, len, "torn WAL frame; ignoring the rest of the log");
            return None;
        }
        self.pos = body + len;
        let payload = &buf[body..body + len];
        if crc32fast::hash(payload) == crc {
            Some((start, Frame::Intact(payload)))
        } else {
            Some((start, Frame::Corrupt))
        }
    }
}

/// What one frame holds. `RecordRef` is the borrowed twin used for writing;
/// bincode encodes both identically.
#[derive(Deserialize)]
enum Record {
    Event(SourceEvent),
    Ack { sequence: u64 },
}

#[derive(Serialize)]
enum RecordRef<'a> {
    Event(&'a SourceEvent),
    Ack { sequence: u64 },
}

fn encode_record(record: &RecordRef<'_>) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| FabricError::Serialization(e.to_string()))?;
    Ok(encode_frame(&payload))
}

/// Decoded contents of the log.
struct LogImage {
    events: Vec<SourceEvent>,
    acked: HashSet<u64>,
}

impl LogImage {
    fn unacknowledged(self) -> Vec<SourceEvent> {
        let acked = self.acked;
        self.events
            .into_iter()
            .filter(|e| !acked.contains(&e.sequence))
            .collect()
    }
}

struct Tail {
    file: BufWriter<File>,
    /// Byte length of the log, i.e. where the next frame lands.
    len: u64,
}

/// Append-only, CRC-framed log of published source events and of their
/// acknowledgements.
///
/// Frames are `[len][crc32][bincode(record)]`, where a record is either an
/// event or the acknowledgement of an event's sequence number. An
/// acknowledged event has reached a final outcome and is never recovered
/// again. Recovery skips frames whose checksum or payload is bad and treats
/// an incomplete last frame as never written.
pub struct WriteAheadLog {
    path: PathBuf,
    tail: Mutex<Tail>,
    config: WalConfig,
}

impl WriteAheadLog {
    pub fn open(path: &Path, config: WalConfig) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            tail: Mutex::new(Tail {
                file: BufWriter::new(file),
                len,
            }),
            config,
        })
    }

    fn write(&self, frame: &[u8]) -> Result<u64> {
        let mut tail = self.tail.lock().expect("WAL mutex poisoned");
        let at = tail.len;
        tail.file.write_all(frame)?;
        tail.file.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            tail.file.get_ref().sync_data()?;
        }
        tail.len += frame.len() as u64;
        Ok(at)
    }

    /// Append one event and return the offset its frame starts at.
    pub fn append(&self, event: &SourceEvent) -> Result<u64> {
        let at = self.write(&encode_record(&RecordRef::Event(event))?)?;
        debug!(offset = at, sequence = event.sequence, "event logged");
        Ok(at)
    }

    /// Record that the event with this sequence number reached a final
    /// outcome. Acknowledging twice is harmless.
    pub fn acknowledge(&self, sequence: u64) -> Result<()> {
        let at = self.write(&encode_record(&RecordRef::Ack { sequence })?)?;
        debug!(offset = at, sequence, "event acknowledged");
        Ok(())
    }

    fn scan(&self) -> Result<LogImage> {
        let image = fs::read(&self.path)?;
        let mut log = LogImage {
            events: Vec::new(),
            acked: HashSet::new(),
        };
        for (offset, frame) in FrameScanner::new(&image) {
            let Frame::Intact(payload) = frame else {
                warn!(offset, "WAL frame failed its checksum; skipped");
                continue;
            };
            match bincode::deserialize::<Record>(payload) {
                Ok(Record::Event(event)) => log.events.push(event),
                Ok(Record::Ack { sequence }) => {
                    log.acked.insert(sequence);
                }
                Err(e) => warn!(offset, error = %e, "undecodable WAL frame; skipped"),
            }
        }
        Ok(log)
    }

    /// Every intact, unacknowledged event in the log, in append order.
    pub fn recover(&self) -> Result<Vec<SourceEvent>> {
        let log = self.scan()?;
        let acked = log.acked.len();
        let events = log.unacknowledged();
        debug!(events = events.len(), acked, path = %self.path.display(), "WAL recovered");
        Ok(events)
    }

    /// Highest sequence number of any event frame, acknowledged or not.
    pub fn last_sequence(&self) -> Result<Option<u64>> {
        Ok(self.scan()?.events.iter().map(|e| e.sequence).max())
    }

    /// Rewrite the log so it holds only unacknowledged events. Returns how
    /// many were kept.
    pub fn compact(&self) -> Result<usize> {
        let mut tail = self.tail.lock().expect("WAL mutex poisoned");
        tail.file.flush()?;

        let live = self.scan()?.unacknowledged();
        let mut image = Vec::new();
        for event in &live {
            image.extend_from_slice(&encode_record(&RecordRef::Event(event))?);
        }

        let staging = self.path.with_extension("compact");
        {
            let mut file = File::create(&staging)?;
            file.write_all(&image)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        tail.file = BufWriter::new(file);
        tail.len = image.len() as u64;

        debug!(kept = live.len(), len = tail.len, path = %self.path.display(), "WAL compacted");
        Ok(live.len())
    }

    /// Current byte length of the log.
    pub fn offset(&self) -> u64 {
        self.tail.lock().expect("WAL mutex poisoned").len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
