//! Single-topic append-only log.
//!
//! On disk a topic is `<root>/<topic>/partition-0/messages.log`, one
//! JSON record per line, plus an `hwm` sidecar holding a single decimal
//! integer. The full record set is mirrored in memory; the file is the
//! source of truth on restart.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use yak_common::{Epoch, Offset, Record};

use crate::error::{Result, StorageError};

const LOG_FILE: &str = "messages.log";
const HWM_FILE: &str = "hwm";

/// Append-only log for one topic.
///
/// All mutation goes through `&mut self`; callers are expected to wrap
/// a `TopicLog` in a per-topic lock (see `LogStore`).
pub struct TopicLog {
    topic: String,
    log_path: PathBuf,
    hwm_path: PathBuf,
    writer: BufWriter<File>,
    /// Durable byte length of the log file. Appends that fail part-way
    /// are rolled back to this length.
    durable_len: u64,
    records: Vec<Record>,
    hwm: Offset,
}

impl TopicLog {
    /// Open (or create) the log for `topic` under `root`, recovering
    /// any existing state from disk.
    ///
    /// A partial trailing line (torn write) is discarded and the file
    /// truncated back to the last complete record. Corruption anywhere
    /// else is an error.
    pub fn open(root: &Path, topic: &str) -> Result<Self> {
        let dir = root.join(topic).join("partition-0");
        fs::create_dir_all(&dir)?;
        let log_path = dir.join(LOG_FILE);
        let hwm_path = dir.join(HWM_FILE);

        let (records, durable_len) = Self::recover_records(&log_path, topic)?;

        let persisted_hwm = Self::read_hwm_file(&hwm_path);
        let next_offset = records.len() as Offset;
        let hwm = persisted_hwm.min(next_offset);
        if persisted_hwm > next_offset {
            warn!(
                topic,
                persisted_hwm, next_offset, "persisted hwm beyond log end, clamping"
            );
        }

        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        debug!(topic, next_offset, hwm, "opened topic log");

        Ok(Self {
            topic: topic.to_string(),
            log_path,
            hwm_path,
            writer: BufWriter::new(file),
            durable_len,
            records,
            hwm,
        })
    }

    fn recover_records(log_path: &Path, topic: &str) -> Result<(Vec<Record>, u64)> {
        let data = match fs::read(log_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<Record> = Vec::new();
        let mut good_len = 0usize;
        let mut start = 0usize;
        while start < data.len() {
            let Some(rel) = data[start..].iter().position(|&b| b == b'\n') else {
                // No terminating newline: torn final write.
                break;
            };
            let end = start + rel;
            let line_no = records.len() + 1;
            match serde_json::from_slice::<Record>(&data[start..end]) {
                Ok(record) => {
                    if record.offset != records.len() as Offset {
                        return Err(StorageError::CorruptLog {
                            topic: topic.to_string(),
                            line: line_no,
                            reason: format!(
                                "offset {} where {} expected",
                                record.offset,
                                records.len()
                            ),
                        });
                    }
                    if let Some(prev) = records.last() {
                        if record.epoch < prev.epoch {
                            return Err(StorageError::CorruptLog {
                                topic: topic.to_string(),
                                line: line_no,
                                reason: format!(
                                    "epoch {} below predecessor epoch {}",
                                    record.epoch, prev.epoch
                                ),
                            });
                        }
                    }
                    records.push(record);
                    good_len = end + 1;
                    start = end + 1;
                }
                Err(e) if end + 1 >= data.len() => {
                    // Unparsable final line: torn write, drop it.
                    warn!(topic, line = line_no, error = %e, "discarding torn trailing record");
                    break;
                }
                Err(e) => {
                    return Err(StorageError::CorruptLog {
                        topic: topic.to_string(),
                        line: line_no,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if good_len < data.len() {
            warn!(
                topic,
                discarded = data.len() - good_len,
                "truncating partial trailing bytes from log file"
            );
            let file = OpenOptions::new().write(true).open(log_path)?;
            file.set_len(good_len as u64)?;
            file.sync_data()?;
        }

        Ok((records, good_len as u64))
    }

    fn read_hwm_file(hwm_path: &Path) -> Offset {
        match fs::read_to_string(hwm_path) {
            Ok(text) => match text.trim().parse::<Offset>() {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %hwm_path.display(), error = %e, "unreadable hwm sidecar, assuming 0");
                    0
                }
            },
            Err(_) => 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Offset the next append will receive (= length of the log).
    pub fn next_offset(&self) -> Offset {
        self.records.len() as Offset
    }

    /// Committed prefix bound. Records below this never change.
    pub fn hwm(&self) -> Offset {
        self.hwm
    }

    /// Epoch of the last record, 0 when the log is empty.
    pub fn last_epoch(&self) -> Epoch {
        self.records.last().map(|r| r.epoch).unwrap_or(0)
    }

    /// Append a new record under `epoch`, returning its offset.
    ///
    /// The record is durable (flushed and fsynced) before this returns.
    /// On failure the log is rolled back and the offset not consumed.
    pub fn append(&mut self, message: String, epoch: Epoch) -> Result<Offset> {
        let log_end_epoch = self.last_epoch();
        if epoch < log_end_epoch {
            return Err(StorageError::EpochRegression {
                epoch,
                log_end_epoch,
            });
        }
        let record = Record {
            offset: self.next_offset(),
            topic: self.topic.clone(),
            message,
            epoch,
        };
        let offset = record.offset;
        self.write_durable(&record)?;
        self.records.push(record);
        Ok(offset)
    }

    /// Append a replicated record verbatim. The record must continue
    /// the log exactly: next offset, non-decreasing epoch, same topic.
    pub fn append_replica(&mut self, record: Record) -> Result<Offset> {
        if record.offset != self.next_offset() {
            return Err(StorageError::OffsetOutOfRange {
                requested: record.offset,
                log_end: self.next_offset(),
            });
        }
        if record.epoch < self.last_epoch() {
            return Err(StorageError::EpochRegression {
                epoch: record.epoch,
                log_end_epoch: self.last_epoch(),
            });
        }
        if record.topic != self.topic {
            return Err(StorageError::CorruptLog {
                topic: self.topic.clone(),
                line: self.records.len() + 1,
                reason: format!("record for topic '{}'", record.topic),
            });
        }
        let offset = record.offset;
        self.write_durable(&record)?;
        self.records.push(record);
        Ok(offset)
    }

    fn write_durable(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let written = (|| -> Result<()> {
            self.writer.write_all(&line)?;
            self.writer.flush()?;
            self.writer.get_ref().sync_data()?;
            Ok(())
        })();
        match written {
            Ok(()) => {
                self.durable_len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                // Roll the file back and drop any bytes still sitting
                // in the buffer, so the next append starts from the
                // last durable record.
                match OpenOptions::new().append(true).open(&self.log_path) {
                    Ok(file) => {
                        let old = std::mem::replace(&mut self.writer, BufWriter::new(file));
                        // into_parts discards the buffer without
                        // flushing it.
                        let (old_file, _) = old.into_parts();
                        if let Err(trunc_err) = old_file.set_len(self.durable_len) {
                            warn!(
                                topic = %self.topic,
                                error = %trunc_err,
                                "failed to roll back torn append"
                            );
                        }
                    }
                    Err(open_err) => {
                        warn!(
                            topic = %self.topic,
                            error = %open_err,
                            "failed to reopen log after torn append"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Read up to `max_count` records starting at `from`.
    ///
    /// Empty when `from` is at the log end; `OffsetOutOfRange` when it
    /// is beyond it.
    pub fn read(&self, from: Offset, max_count: usize) -> Result<Vec<Record>> {
        self.read_bounded(from, max_count, self.next_offset())
    }

    /// Like `read`, but never returns records at or above the
    /// high-water mark. This is the consumer-visible view.
    pub fn read_committed(&self, from: Offset, max_count: usize) -> Result<Vec<Record>> {
        self.read_bounded(from, max_count, self.hwm)
    }

    fn read_bounded(&self, from: Offset, max_count: usize, bound: Offset) -> Result<Vec<Record>> {
        if from > self.next_offset() {
            return Err(StorageError::OffsetOutOfRange {
                requested: from,
                log_end: self.next_offset(),
            });
        }
        if from >= bound {
            return Ok(Vec::new());
        }
        let available = (bound - from) as usize;
        let take = available.min(max_count);
        let start = from as usize;
        Ok(self.records[start..start + take].to_vec())
    }

    /// Discard every record with offset >= `new_end`.
    ///
    /// Refuses to cut into the committed prefix. The surviving prefix
    /// is rewritten atomically (temp file + rename).
    pub fn truncate_to(&mut self, new_end: Offset) -> Result<()> {
        if new_end < self.hwm {
            return Err(StorageError::TruncateBelowHwm {
                requested: new_end,
                hwm: self.hwm,
            });
        }
        if new_end >= self.next_offset() {
            return Ok(());
        }

        let tmp_path = self.log_path.with_extension("log.tmp");
        let mut bytes = 0u64;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for record in &self.records[..new_end as usize] {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                tmp.write_all(&line)?;
                bytes += line.len() as u64;
            }
            tmp.flush()?;
            tmp.get_ref().sync_data()?;
        }
        fs::rename(&tmp_path, &self.log_path)?;

        let file = OpenOptions::new().append(true).open(&self.log_path)?;
        self.writer = BufWriter::new(file);
        self.durable_len = bytes;
        let dropped = self.records.len() - new_end as usize;
        self.records.truncate(new_end as usize);
        debug!(topic = %self.topic, new_end, dropped, "truncated log suffix");
        Ok(())
    }

    /// Advance the high-water mark. Monotone and bounded by the log
    /// end; the new value is persisted before this returns.
    pub fn set_hwm(&mut self, hwm: Offset) -> Result<()> {
        if hwm < self.hwm || hwm > self.next_offset() {
            return Err(StorageError::InvalidHwm {
                requested: hwm,
                current: self.hwm,
                log_end: self.next_offset(),
            });
        }
        if hwm == self.hwm {
            return Ok(());
        }
        let tmp_path = self.hwm_path.with_extension("tmp");
        fs::write(&tmp_path, format!("{hwm}\n"))?;
        fs::rename(&tmp_path, &self.hwm_path)?;
        self.hwm = hwm;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> TopicLog {
        TopicLog::open(dir.path(), "orders").unwrap()
    }

    #[test]
    fn test_append_assigns_dense_offsets() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);

        assert_eq!(log.append("a".into(), 1).unwrap(), 0);
        assert_eq!(log.append("b".into(), 1).unwrap(), 1);
        assert_eq!(log.append("c".into(), 2).unwrap(), 2);
        assert_eq!(log.next_offset(), 3);
        assert_eq!(log.last_epoch(), 2);

        let records = log.read(0, 100).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].message, "b");
        assert_eq!(records[1].offset, 1);
        assert_eq!(records[2].epoch, 2);
    }

    #[test]
    fn test_read_bounds() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        for i in 0..5 {
            log.append(format!("m{i}"), 1).unwrap();
        }

        // Reads at the tail are empty, beyond it are errors.
        assert!(log.read(5, 10).unwrap().is_empty());
        assert!(matches!(
            log.read(6, 10),
            Err(StorageError::OffsetOutOfRange { requested: 6, .. })
        ));

        // max_count caps the range.
        let records = log.read(1, 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 1);
    }

    #[test]
    fn test_committed_reads_stop_at_hwm() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        for i in 0..4 {
            log.append(format!("m{i}"), 1).unwrap();
        }
        log.set_hwm(2).unwrap();

        let committed = log.read_committed(0, 100).unwrap();
        assert_eq!(committed.len(), 2);
        assert!(log.read_committed(2, 100).unwrap().is_empty());
        // The uncommitted tail is still visible to replication reads.
        assert_eq!(log.read(0, 100).unwrap().len(), 4);
    }

    #[test]
    fn test_reopen_recovers_state() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = open(&dir);
            log.append("a".into(), 1).unwrap();
            log.append("b".into(), 3).unwrap();
            log.set_hwm(1).unwrap();
        }
        let log = open(&dir);
        assert_eq!(log.next_offset(), 2);
        assert_eq!(log.hwm(), 1);
        assert_eq!(log.last_epoch(), 3);
        assert_eq!(log.read(0, 10).unwrap()[1].message, "b");
    }

    #[test]
    fn test_torn_trailing_line_is_discarded() {
        let dir = TempDir::new().unwrap();
        let log_path = {
            let mut log = open(&dir);
            log.append("a".into(), 1).unwrap();
            log.append("b".into(), 1).unwrap();
            dir.path().join("orders/partition-0/messages.log")
        };

        // Simulate a torn write: half a JSON object, no newline.
        let mut data = fs::read(&log_path).unwrap();
        data.extend_from_slice(b"{\"offset\":2,\"topic\":\"ord");
        fs::write(&log_path, &data).unwrap();

        let mut log = open(&dir);
        assert_eq!(log.next_offset(), 2);
        // The torn bytes are gone from disk and the log keeps working.
        assert_eq!(log.append("c".into(), 1).unwrap(), 2);
        drop(log);
        let log = open(&dir);
        assert_eq!(log.read(2, 1).unwrap()[0].message, "c");
    }

    #[test]
    fn test_mid_file_corruption_is_an_error() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = open(&dir);
            log.append("a".into(), 1).unwrap();
            log.append("b".into(), 1).unwrap();
        }
        let log_path = dir.path().join("orders/partition-0/messages.log");
        let data = fs::read(&log_path).unwrap();
        let mut lines: Vec<&[u8]> = data.split_inclusive(|&b| b == b'\n').collect();
        let garbage = b"not json\n";
        lines[0] = garbage;
        fs::write(&log_path, lines.concat()).unwrap();

        assert!(matches!(
            TopicLog::open(dir.path(), "orders"),
            Err(StorageError::CorruptLog { line: 1, .. })
        ));
    }

    #[test]
    fn test_truncate_respects_hwm() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        for i in 0..5 {
            log.append(format!("m{i}"), 1).unwrap();
        }
        log.set_hwm(3).unwrap();

        assert!(matches!(
            log.truncate_to(2),
            Err(StorageError::TruncateBelowHwm { requested: 2, hwm: 3 })
        ));

        log.truncate_to(3).unwrap();
        assert_eq!(log.next_offset(), 3);

        // Survives reopen.
        drop(log);
        let log = open(&dir);
        assert_eq!(log.next_offset(), 3);
        assert_eq!(log.hwm(), 3);
    }

    #[test]
    fn test_truncate_beyond_end_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        log.append("a".into(), 1).unwrap();
        log.truncate_to(10).unwrap();
        assert_eq!(log.next_offset(), 1);
    }

    #[test]
    fn test_set_hwm_bounds() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        log.append("a".into(), 1).unwrap();
        log.append("b".into(), 1).unwrap();
        log.set_hwm(2).unwrap();

        assert!(matches!(log.set_hwm(1), Err(StorageError::InvalidHwm { .. })));
        assert!(matches!(log.set_hwm(3), Err(StorageError::InvalidHwm { .. })));
        assert_eq!(log.hwm(), 2);
    }

    #[test]
    fn test_epoch_regression_rejected() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        log.append("a".into(), 5).unwrap();
        assert!(matches!(
            log.append("b".into(), 4),
            Err(StorageError::EpochRegression { epoch: 4, log_end_epoch: 5 })
        ));
        assert_eq!(log.next_offset(), 1);
    }

    #[test]
    fn test_replica_append_must_continue_log() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        log.append("a".into(), 1).unwrap();

        let gap = Record {
            offset: 5,
            topic: "orders".into(),
            message: "x".into(),
            epoch: 1,
        };
        assert!(matches!(
            log.append_replica(gap),
            Err(StorageError::OffsetOutOfRange { requested: 5, .. })
        ));

        let next = Record {
            offset: 1,
            topic: "orders".into(),
            message: "y".into(),
            epoch: 2,
        };
        assert_eq!(log.append_replica(next).unwrap(), 1);
        assert_eq!(log.last_epoch(), 2);
    }
}
