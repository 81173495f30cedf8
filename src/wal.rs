//! Append-only log store, one file per collection.
//!
//! Every mutation is appended here before it is applied in memory. Each
//! record is framed as `[u32 length BE][u32 CRC32 BE][bincode payload]` and
//! durably flushed with `fsync`. Frames are self-delimiting, so a partial
//! trailing record left by a crashed append is detected and discarded on
//! replay instead of poisoning the file.
//!
//! Appends use **group commit**: concurrent callers are batched by a
//! background task into a single write + fsync cycle. Each record receives a
//! monotonic sequence number in file order.

use crate::config;
use crate::document::{Document, FieldValue};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// One durable fact: a single mutation against a collection.
///
/// Records are immutable once appended and replayed in append order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogRecord {
    /// A document entered the collection.
    Insert {
        /// The full inserted document, id included.
        doc: Document,
    },
    /// Fields were merged into an existing document.
    Update {
        /// Target document id.
        id: String,
        /// Shallow field overwrites, as passed to the update.
        patch: HashMap<String, FieldValue>,
    },
    /// A document left the collection.
    Remove {
        /// Removed document id.
        id: String,
    },
}

/// Diagnostic outcome of a log replay.
#[derive(Debug, Default)]
pub struct ReplayStats {
    /// Number of records successfully read.
    pub records: usize,
    /// Byte length of the clean prefix: everything up to the end of the last
    /// good record. When the tail was discarded, the file must be cut back
    /// to this length before new appends, or the damage ends up mid-file.
    pub valid_len: u64,
    /// A partial trailing frame was discarded (crash during append).
    pub truncated_tail: bool,
    /// A complete but corrupt final frame was discarded (crash during append).
    pub dropped_tail: bool,
    /// Fatal corruption before the tail: frame offset and reason. Replay
    /// stops at the corrupt frame; the collection must not accept writes.
    pub corruption: Option<(u64, String)>,
}

/// Read all records from a log file in append order.
///
/// A missing file is an empty log. Tail damage (truncated or corrupt final
/// frame) is discarded and flagged in the stats; a frame that fails its
/// checksum or decode anywhere before the tail sets `corruption` and stops
/// the scan.
pub fn replay(path: &Path) -> io::Result<(Vec<LogRecord>, ReplayStats)> {
    let mut records = Vec::new();
    let mut stats = ReplayStats::default();

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((records, stats)),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut offset: u64 = 0;
    let mut header = [0u8; 8];

    while offset < file_len {
        let record_start = offset;
        if file_len - offset < 8 {
            tracing::warn!("log {:?} ends in a partial frame header, discarding", path);
            stats.truncated_tail = true;
            break;
        }
        reader.read_exact(&mut header)?;
        offset += 8;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let stored_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if len > file_len - offset {
            tracing::warn!("log {:?} ends in a truncated record, discarding", path);
            stats.truncated_tail = true;
            break;
        }
        if len as usize > config::MAX_RECORD_LEN {
            stats.corruption = Some((
                record_start,
                format!("record length {} exceeds maximum", len),
            ));
            break;
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        offset += len;

        let failure = if crc32fast::hash(&payload) != stored_crc {
            Some("CRC32 mismatch".to_string())
        } else {
            match bincode::deserialize::<LogRecord>(&payload) {
                Ok(record) => {
                    records.push(record);
                    stats.records += 1;
                    stats.valid_len = offset;
                    None
                }
                Err(e) => Some(format!("undecodable record: {}", e)),
            }
        };

        if let Some(reason) = failure {
            if offset == file_len {
                // Final record: damage here is the signature of a crashed
                // append, not of a corrupted history.
                tracing::warn!("log {:?} final record invalid ({}), discarding", path, reason);
                stats.dropped_tail = true;
            } else {
                stats.corruption = Some((record_start, reason));
            }
            break;
        }
    }

    Ok((records, stats))
}

/// Cut discarded tail damage off the log file, leaving the clean prefix
/// that replay validated. Must run before the log is reopened for appends;
/// otherwise the next append lands after the damaged bytes and the damage
/// is no longer at the tail on the following replay.
pub fn trim_tail(path: &Path, valid_len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(valid_len)?;
    file.sync_all()?;
    Ok(())
}

/// A caller's request to append one framed record.
struct GroupCommitRequest {
    /// Pre-serialized frame: `[u32 len BE][u32 crc32 BE][bincode payload]`.
    framed_bytes: Vec<u8>,
    /// Resolves with the record's sequence number once fsynced.
    result_tx: oneshot::Sender<io::Result<u64>>,
}

/// Writer-side file state, shared with the background batch writer.
struct WriterState {
    file: File,
    /// Length of the file up to the last successful fsync. A failed batch
    /// write rolls the file back to this point so a partial frame can never
    /// sit in front of later appends.
    durable_len: u64,
}

/// Append-only log with CRC32 integrity checks and group commit.
///
/// Cheap to share: appends go through a channel to the background writer
/// task, which batches whatever has queued up into one write + fsync.
pub struct WriteAheadLog {
    submit_tx: mpsc::Sender<GroupCommitRequest>,
    /// Compaction takes this exclusively; batch flushes take it shared.
    write_gate: Arc<RwLock<()>>,
    path: PathBuf,
    writer: Arc<Mutex<WriterState>>,
    /// Sequence number of the next record to be flushed.
    next_sequence: Arc<AtomicU64>,
}

impl WriteAheadLog {
    /// Open or create the log file in append mode and spawn the background
    /// batch writer. `start_sequence` seeds numbering after replay.
    pub fn open(path: &Path, start_sequence: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = open_append(path)?;
        let durable_len = file.metadata()?.len();
        let writer = Arc::new(Mutex::new(WriterState { file, durable_len }));
        let write_gate = Arc::new(RwLock::new(()));
        let next_sequence = Arc::new(AtomicU64::new(start_sequence));

        let (submit_tx, submit_rx) = mpsc::channel::<GroupCommitRequest>(4096);

        let task_writer = Arc::clone(&writer);
        let task_gate = Arc::clone(&write_gate);
        let task_seq = Arc::clone(&next_sequence);
        tokio::spawn(async move {
            batch_writer_loop(submit_rx, task_writer, task_gate, task_seq).await;
        });

        Ok(Self {
            submit_tx,
            write_gate,
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Durably append one record, returning its sequence number.
    ///
    /// Resolves only after the record (and whatever batch it rode in on)
    /// has been fsynced. On `Err` the record is not on disk and the caller
    /// must not apply the mutation.
    pub async fn append(&self, record: &LogRecord) -> io::Result<u64> {
        let framed = serialize_and_frame(record)?;
        let (result_tx, result_rx) = oneshot::channel();
        self.submit_tx
            .send(GroupCommitRequest {
                framed_bytes: framed,
                result_tx,
            })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log batch writer stopped"))?;
        result_rx
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log batch result lost"))?
    }

    /// Atomically replace the log's contents with the given records.
    ///
    /// Writes a fresh file next to the log and renames it into place, then
    /// reopens the writer in append mode. Sequence numbering restarts at
    /// `records.len()`. Used by compaction.
    pub fn rewrite(&self, records: &[LogRecord]) -> io::Result<()> {
        let _gate = self.write_gate.write();
        let mut state = self.writer.lock();

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut output = Vec::new();
        for record in records {
            output.extend_from_slice(&serialize_and_frame(record)?);
        }
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&output)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        let file = open_append(&self.path)?;
        let durable_len = file.metadata()?.len();
        *state = WriterState { file, durable_len };
        self.next_sequence
            .store(records.len() as u64, Ordering::SeqCst);

        tracing::info!(
            "rewrote log {:?} to {} records ({} bytes)",
            self.path,
            records.len(),
            durable_len
        );
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

/// Serialize a record into its on-disk frame:
/// `[u32 len BE][u32 crc32 BE][bincode payload]`.
fn serialize_and_frame(record: &LogRecord) -> io::Result<Vec<u8>> {
    let bytes = bincode::serialize(record).map_err(|e| io::Error::other(e.to_string()))?;
    let len = bytes.len() as u32;
    let crc = crc32fast::hash(&bytes);

    let mut framed = Vec::with_capacity(8 + bytes.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&crc.to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}

/// Background task collecting append requests and flushing them in batches.
///
/// A lone request flushes immediately; under load, up to
/// `WAL_GROUP_COMMIT_MAX_BATCH` requests or `WAL_GROUP_COMMIT_MAX_WAIT_US`
/// of coalescing share one fsync.
async fn batch_writer_loop(
    mut rx: mpsc::Receiver<GroupCommitRequest>,
    writer: Arc<Mutex<WriterState>>,
    write_gate: Arc<RwLock<()>>,
    next_sequence: Arc<AtomicU64>,
) {
    let max_batch = config::WAL_GROUP_COMMIT_MAX_BATCH;
    let max_wait = Duration::from_micros(config::WAL_GROUP_COMMIT_MAX_WAIT_US);
    let mut batch: Vec<GroupCommitRequest> = Vec::with_capacity(max_batch);

    loop {
        let first = match rx.recv().await {
            Some(req) => req,
            None => break, // channel closed, log handle dropped
        };
        batch.push(first);

        // Drain whatever is already queued
        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(req) => batch.push(req),
                Err(_) => break,
            }
        }

        // With more than one writer active, wait briefly for stragglers
        if batch.len() > 1 && batch.len() < max_batch {
            let deadline = tokio::time::Instant::now() + max_wait;
            while batch.len() < max_batch {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(req)) => batch.push(req),
                    _ => break,
                }
            }
        }

        flush_batch(&mut batch, &writer, &write_gate, &next_sequence);
    }
}

/// Write the batch, fsync once, and resolve every caller with its sequence
/// number (or the shared error).
fn flush_batch(
    batch: &mut Vec<GroupCommitRequest>,
    writer: &Arc<Mutex<WriterState>>,
    write_gate: &Arc<RwLock<()>>,
    next_sequence: &Arc<AtomicU64>,
) {
    let _gate = write_gate.read();
    let mut state = writer.lock();

    let total: usize = batch.iter().map(|req| req.framed_bytes.len()).sum();
    let mut output = Vec::with_capacity(total);
    for req in batch.iter() {
        output.extend_from_slice(&req.framed_bytes);
    }

    let result = state
        .file
        .write_all(&output)
        .and_then(|_| state.file.sync_all());

    match result {
        Ok(()) => {
            state.durable_len += output.len() as u64;
            let base = next_sequence.fetch_add(batch.len() as u64, Ordering::SeqCst);
            for (i, req) in batch.drain(..).enumerate() {
                let _ = req.result_tx.send(Ok(base + i as u64));
            }
        }
        Err(e) => {
            // Roll back any partial write so the file stays a clean prefix
            // of acknowledged records.
            if let Err(trunc_err) = state.file.set_len(state.durable_len) {
                tracing::warn!("failed to roll back partial log write: {}", trunc_err);
            }
            for req in batch.drain(..) {
                let _ = req
                    .result_tx
                    .send(Err(io::Error::new(e.kind(), e.to_string())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fields_from_json;
    use serde_json::json;
    use tempfile::TempDir;

    fn insert_record(id: &str) -> LogRecord {
        LogRecord::Insert {
            doc: Document::with_id(id, fields_from_json(json!({"name": id}))),
        }
    }

    fn record_ids(records: &[LogRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| match r {
                LogRecord::Insert { doc } => doc.id.clone(),
                LogRecord::Update { id, .. } | LogRecord::Remove { id } => id.clone(),
            })
            .collect()
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let (records, stats) = replay(&dir.path().join("absent.db")).unwrap();
        assert!(records.is_empty());
        assert_eq!(stats.records, 0);
        assert!(!stats.truncated_tail && !stats.dropped_tail);
        assert!(stats.corruption.is_none());
    }

    #[tokio::test]
    async fn test_append_then_replay_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");
        let wal = WriteAheadLog::open(&path, 0).unwrap();

        assert_eq!(wal.append(&insert_record("a")).await.unwrap(), 0);
        assert_eq!(wal.append(&insert_record("b")).await.unwrap(), 1);
        assert_eq!(wal.append(&insert_record("c")).await.unwrap(), 2);

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(record_ids(&records), vec!["a", "b", "c"]);
        assert!(stats.corruption.is_none());
    }

    #[test]
    fn test_replay_discards_truncated_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&serialize_and_frame(&insert_record("a")).unwrap());
        bytes.extend_from_slice(&serialize_and_frame(&insert_record("b")).unwrap());
        let clean_len = bytes.len() as u64;
        let partial = serialize_and_frame(&insert_record("c")).unwrap();
        bytes.extend_from_slice(&partial[..partial.len() / 2]);
        fs::write(&path, &bytes).unwrap();

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(record_ids(&records), vec!["a", "b"]);
        assert!(stats.truncated_tail);
        assert_eq!(stats.valid_len, clean_len);
        assert!(stats.corruption.is_none());
    }

    #[test]
    fn test_trim_tail_heals_the_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&serialize_and_frame(&insert_record("a")).unwrap());
        let partial = serialize_and_frame(&insert_record("b")).unwrap();
        bytes.extend_from_slice(&partial[..partial.len() - 3]);
        fs::write(&path, &bytes).unwrap();

        let (_, stats) = replay(&path).unwrap();
        assert!(stats.truncated_tail);
        trim_tail(&path, stats.valid_len).unwrap();

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(record_ids(&records), vec!["a"]);
        assert!(!stats.truncated_tail && !stats.dropped_tail);
        assert!(stats.corruption.is_none());
    }

    #[test]
    fn test_replay_discards_partial_header_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");

        let mut bytes = serialize_and_frame(&insert_record("a")).unwrap();
        bytes.extend_from_slice(&[0x00, 0x01, 0x02]); // 3 stray bytes, not a header
        fs::write(&path, &bytes).unwrap();

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(record_ids(&records), vec!["a"]);
        assert!(stats.truncated_tail);
        assert!(stats.corruption.is_none());
    }

    #[test]
    fn test_replay_drops_corrupt_final_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&serialize_and_frame(&insert_record("a")).unwrap());
        let mut bad = serialize_and_frame(&insert_record("b")).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF; // flip a payload byte, CRC now mismatches
        bytes.extend_from_slice(&bad);
        fs::write(&path, &bytes).unwrap();

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(record_ids(&records), vec!["a"]);
        assert!(stats.dropped_tail);
        assert!(stats.corruption.is_none());
    }

    #[test]
    fn test_replay_flags_corruption_before_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");

        let first = serialize_and_frame(&insert_record("a")).unwrap();
        let first_len = first.len() as u64;
        let mut bad = serialize_and_frame(&insert_record("b")).unwrap();
        bad[9] ^= 0xFF; // corrupt a payload byte in the middle record
        let mut bytes = first;
        bytes.extend_from_slice(&bad);
        bytes.extend_from_slice(&serialize_and_frame(&insert_record("c")).unwrap());
        fs::write(&path, &bytes).unwrap();

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(record_ids(&records), vec!["a"]);
        let (offset, reason) = stats.corruption.expect("mid-file corruption must be fatal");
        assert_eq!(offset, first_len);
        assert!(reason.contains("CRC32"));
    }

    #[test]
    fn test_replay_flags_absurd_length_before_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");

        let mut bytes = serialize_and_frame(&insert_record("a")).unwrap();
        let absurd = (config::MAX_RECORD_LEN as u32) + 1;
        bytes.extend_from_slice(&absurd.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        // Enough trailing bytes that the claimed frame is not a truncation
        bytes.resize(bytes.len() + absurd as usize + 16, 0xAB);
        fs::write(&path, &bytes).unwrap();

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(record_ids(&records), vec!["a"]);
        assert!(stats.corruption.is_some());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_contents_and_resets_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");
        let wal = WriteAheadLog::open(&path, 0).unwrap();

        wal.append(&insert_record("a")).await.unwrap();
        wal.append(&insert_record("b")).await.unwrap();
        wal.append(&LogRecord::Remove {
            id: "a".to_string(),
        })
        .await
        .unwrap();

        wal.rewrite(&[insert_record("b")]).unwrap();

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(record_ids(&records), vec!["b"]);
        assert!(stats.corruption.is_none());

        // Appends continue after the rewritten history
        assert_eq!(wal.append(&insert_record("c")).await.unwrap(), 1);
        let (records, _) = replay(&path).unwrap();
        assert_eq!(record_ids(&records), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.db");
        let wal = Arc::new(WriteAheadLog::open(&path, 0).unwrap());

        let mut handles = Vec::new();
        for i in 0..32 {
            let wal = Arc::clone(&wal);
            handles.push(tokio::spawn(async move {
                wal.append(&insert_record(&format!("doc-{}", i))).await
            }));
        }
        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap().unwrap());
        }
        sequences.sort_unstable();
        let expected: Vec<u64> = (0..32).collect();
        assert_eq!(sequences, expected);

        let (records, stats) = replay(&path).unwrap();
        assert_eq!(stats.records, 32);
        assert!(stats.corruption.is_none());
        assert_eq!(records.len(), 32);
    }
}
