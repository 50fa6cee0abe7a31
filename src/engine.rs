//! The storage engine: owns the log file, the in-memory index, and the
//! live/garbage byte counters. A single [`Mutex`] serializes every
//! mutation and the snapshot phase of range reads against each other and
//! against compaction, per the concurrency discipline this store relies on.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::compaction;
use crate::error::{KvsError, Result};
use crate::index::{Index, IndexEntry};
use crate::record::{decode_from, Decoded, Record, TOMBSTONE};

/// Returns the path of the sibling file a compaction pass writes to before
/// renaming it over the live data file.
pub(crate) fn tmp_path(data_path: &std::path::Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// The persistent key-value store.
///
/// Cloning an `Engine` is not supported; share it behind an [`std::sync::Arc`]
/// across connection handlers instead (see [`crate::server::Server`]).
pub struct Engine {
    data_path: PathBuf,
    /// Compaction runs once `deleted_size / data_size` exceeds this fraction.
    threshold: f64,
    state: Mutex<State>,
}

/// Everything the engine lock protects: the index, the open file handles,
/// and both byte counters.
pub(crate) struct State {
    pub(crate) index: Index,
    pub(crate) writer: BufWriterWithPos<File>,
    pub(crate) reader: BufReaderWithPos<File>,
    pub(crate) data_size: u64,
    pub(crate) deleted_size: u64,
}

impl Engine {
    /// Opens (creating if necessary) the store's data file at `data_path`
    /// and replays it to rebuild the in-memory index. `threshold` is the
    /// `deleted_size / data_size` fraction above which a put, delete, or
    /// batch put triggers a synchronous compaction.
    pub fn open(data_path: impl Into<PathBuf>, threshold: f64) -> Result<Self> {
        let data_path = data_path.into();

        let tmp = tmp_path(&data_path);
        if tmp.exists() {
            warn!(
                "removing stale compaction file left over from an interrupted run: {:?}",
                tmp
            );
            fs::remove_file(&tmp)?;
        }

        if !data_path.exists() {
            File::create(&data_path)?;
        }

        let (index, data_size, deleted_size) = replay(&data_path)?;
        info!(
            "recovered {} keys from {:?}: {} bytes live, {} bytes garbage",
            index.len(),
            data_path,
            data_size,
            deleted_size
        );

        let writer = BufWriterWithPos::new(
            OpenOptions::new().create(true).append(true).open(&data_path)?,
        )?;
        let reader = BufReaderWithPos::new(File::open(&data_path)?)?;

        Ok(Engine {
            data_path,
            threshold,
            state: Mutex::new(State {
                index,
                writer,
                reader,
                data_size,
                deleted_size,
            }),
        })
    }

    /// Sets `key` to `value`, overwriting any prior value.
    pub fn put(&self, key: String, value: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.maybe_compact(&mut state)?;
        self.append(&mut state, key, value.into_bytes())?;
        Ok(())
    }

    /// Looks up `key`. Returns `Ok(None)` both for an absent key and for a
    /// key whose latest record is a tombstone.
    pub fn read(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        let entry = match state.index.get(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let record = read_record_from(&mut state.reader, entry)?;
        if record.is_tombstone() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8(record.value)?))
        }
    }

    /// Deletes `key` by appending a tombstone record.
    ///
    /// # Errors
    ///
    /// Returns [`KvsError::KeyNotFound`] if `key` is not present in the index.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.index.contains(key) {
            return Err(KvsError::KeyNotFound);
        }
        self.maybe_compact(&mut state)?;
        self.append(&mut state, key.to_string(), TOMBSTONE.to_vec())?;
        // A delete's tombstone can itself push deleted_size over the
        // threshold, so compaction is reconsidered after the append too.
        self.maybe_compact(&mut state)?;
        Ok(())
    }

    /// Applies every (key, value) pair in `items` under a single lock
    /// acquisition, appending each to the log in order. Compaction is
    /// considered once, before the first item, not between items.
    pub fn batch_put(&self, items: Vec<(String, String)>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.maybe_compact(&mut state)?;
        for (key, value) in items {
            self.append(&mut state, key, value.into_bytes())?;
        }
        Ok(())
    }

    /// Returns every live (non-tombstoned) key in the inclusive range
    /// `[start, end]`, in ascending key order.
    ///
    /// The index snapshot is taken under the lock, which is then released
    /// before the per-record file reads; this is safe because compaction
    /// also holds the lock for its entire run, so the file a stale
    /// snapshot offset points into cannot move out from under a reader
    /// that raced it.
    pub fn range_read(&self, start: &str, end: &str) -> Result<Vec<(String, String)>> {
        let snapshot = {
            let state = self.state.lock().unwrap();
            let mut entries: Vec<(String, IndexEntry)> = state
                .index
                .iter()
                .filter(|(key, _)| key.as_str() >= start && key.as_str() <= end)
                .map(|(key, entry)| (key.clone(), *entry))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };

        let mut file = File::open(&self.data_path)?;
        let mut results = Vec::with_capacity(snapshot.len());
        for (key, entry) in snapshot {
            let record = read_record_from(&mut file, entry)?;
            if !record.is_tombstone() {
                results.push((key, String::from_utf8(record.value)?));
            }
        }
        Ok(results)
    }

    /// Returns the current `(data_size, deleted_size)` counters. Exposed
    /// mainly for tests asserting that the live/garbage byte counts stay
    /// consistent with the log file's actual contents.
    pub fn counters(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (state.data_size, state.deleted_size)
    }

    /// The number of keys currently live in the index.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().index.len()
    }

    /// Whether the index has no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_compact(&self, state: &mut State) -> Result<()> {
        if state.data_size > 0 && state.deleted_size as f64 / state.data_size as f64 > self.threshold {
            let started = Instant::now();
            info!(
                "compaction starting: data_size={} deleted_size={}",
                state.data_size, state.deleted_size
            );
            compaction::compact(state, &self.data_path)?;
            info!(
                "compaction finished in {:?}: data_size={}",
                started.elapsed(),
                state.data_size
            );
        }
        Ok(())
    }

    fn append(&self, state: &mut State, key: String, value: Vec<u8>) -> Result<()> {
        let timestamp = now_unix();
        let record = Record::new(timestamp, key.clone().into_bytes(), value);
        let pos = state.writer.pos;
        record.write_to(&mut state.writer)?;
        state.writer.flush()?;

        let len = record.len();
        if let Some(prior) = state.index.insert(
            key,
            IndexEntry {
                offset: pos,
                len,
                timestamp,
            },
        ) {
            state.deleted_size += prior.len;
        }
        state.data_size += len;
        Ok(())
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Reads the whole record referenced by `entry` from a seekable reader.
fn read_record_from<R: Read + Seek>(reader: &mut R, entry: IndexEntry) -> Result<Record> {
    reader.seek(SeekFrom::Start(entry.offset))?;
    let mut limited = reader.take(entry.len);
    match decode_from(&mut limited)? {
        Decoded::Record(record) => Ok(record),
        Decoded::EndOfLog | Decoded::TornTail => Err(KvsError::Corrupt(format!(
            "index points at offset {} but no complete record is there",
            entry.offset
        ))),
    }
}

/// Replays `data_path` from offset 0, rebuilding the index and tallying the
/// live/garbage byte counts. A torn tail at the end of the file ends replay
/// without error and truncates the file down to the last complete record.
fn replay(data_path: &std::path::Path) -> Result<(Index, u64, u64)> {
    let mut index = Index::new();
    let mut data_size = 0u64;
    let mut deleted_size = 0u64;

    let file = File::open(data_path)?;
    let mut reader = BufReader::new(file);

    loop {
        let pos = data_size;
        match decode_from(&mut reader)? {
            Decoded::Record(record) => {
                let len = record.len();
                let key = String::from_utf8(record.key)?;
                let entry = IndexEntry {
                    offset: pos,
                    len,
                    timestamp: record.timestamp,
                };
                if let Some(prior) = index.insert(key, entry) {
                    deleted_size += prior.len;
                }
                data_size += len;
            }
            Decoded::EndOfLog => break,
            Decoded::TornTail => {
                warn!(
                    "torn tail found at offset {} in {:?}, truncating",
                    data_size, data_path
                );
                let file = OpenOptions::new().write(true).open(data_path)?;
                file.set_len(data_size)?;
                break;
            }
        }
    }

    Ok((index, data_size, deleted_size))
}

/// A [`BufReader`] that tracks the absolute position it has read to, so
/// callers can snapshot an index entry's offset without a separate seek.
pub(crate) struct BufReaderWithPos<R: Read + Seek> {
    reader: BufReader<R>,
    pub(crate) pos: u64,
}

impl<R: Read + Seek> BufReaderWithPos<R> {
    pub(crate) fn new(mut inner: R) -> io::Result<Self> {
        let pos = inner.seek(SeekFrom::Current(0))?;
        Ok(BufReaderWithPos {
            reader: BufReader::new(inner),
            pos,
        })
    }
}

impl<R: Read + Seek> Read for BufReaderWithPos<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.reader.read(buf)?;
        self.pos += len as u64;
        Ok(len)
    }
}

impl<R: Read + Seek> Seek for BufReaderWithPos<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = self.reader.seek(pos)?;
        Ok(self.pos)
    }
}

/// A [`BufWriter`] that tracks the absolute position written to, so the
/// engine can capture a record's offset before writing it without a
/// separate syscall.
pub(crate) struct BufWriterWithPos<W: Write + Seek> {
    writer: BufWriter<W>,
    pub(crate) pos: u64,
}

impl<W: Write + Seek> BufWriterWithPos<W> {
    /// Seeks to the end of `inner` to establish the starting position:
    /// an append-mode file ignores its current cursor on every write, so
    /// this is the only way to learn where the *next* append will land.
    pub(crate) fn new(mut inner: W) -> io::Result<Self> {
        let pos = inner.seek(SeekFrom::End(0))?;
        Ok(BufWriterWithPos {
            writer: BufWriter::new(inner),
            pos,
        })
    }
}

impl<W: Write + Seek> Write for BufWriterWithPos<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.writer.write(buf)?;
        self.pos += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write + Seek> Seek for BufWriterWithPos<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = self.writer.seek(pos)?;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path) -> Engine {
        Engine::open(dir.join("store.dat"), 0.5).unwrap()
    }

    #[test]
    fn read_your_writes() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.put("k".into(), "v1".into()).unwrap();
        assert_eq!(engine.read("k").unwrap(), Some("v1".into()));
        engine.put("k".into(), "v2".into()).unwrap();
        assert_eq!(engine.read("k").unwrap(), Some("v2".into()));
    }

    #[test]
    fn delete_hides_then_put_restores() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.put("k".into(), "v".into()).unwrap();
        engine.delete("k").unwrap();
        assert_eq!(engine.read("k").unwrap(), None);
        engine.put("k".into(), "v2".into()).unwrap();
        assert_eq!(engine.read("k").unwrap(), Some("v2".into()));
    }

    #[test]
    fn delete_missing_key_is_key_not_found() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        match engine.delete("missing") {
            Err(KvsError::KeyNotFound) => {}
            other => panic!("expected KeyNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn read_missing_key_is_none() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        assert_eq!(engine.read("missing").unwrap(), None);
    }

    #[test]
    fn range_read_is_inclusive_and_ordered() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.put("a".into(), "1".into()).unwrap();
        engine.put("b".into(), "2".into()).unwrap();
        engine.put("c".into(), "3".into()).unwrap();
        let results = engine.range_read("a", "b").unwrap();
        assert_eq!(
            results,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn range_read_drops_tombstoned_keys() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.put("a".into(), "1".into()).unwrap();
        engine.put("b".into(), "2".into()).unwrap();
        engine.delete("a").unwrap();
        let results = engine.range_read("a", "b").unwrap();
        assert_eq!(results, vec![("b".to_string(), "2".to_string())]);
    }

    #[test]
    fn batch_put_installs_every_item() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine
            .batch_put(vec![
                ("a".into(), "1".into()),
                ("b".into(), "2".into()),
            ])
            .unwrap();
        assert_eq!(engine.read("a").unwrap(), Some("1".into()));
        assert_eq!(engine.read("b").unwrap(), Some("2".into()));
    }

    #[test]
    fn counters_track_live_and_garbage_bytes() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.put("k".into(), "v1".into()).unwrap();
        let (data_size, deleted_size) = engine.counters();
        assert_eq!(deleted_size, 0);
        assert!(data_size > 0);

        engine.put("k".into(), "v22".into()).unwrap();
        let (data_size2, deleted_size2) = engine.counters();
        assert!(data_size2 > data_size);
        assert_eq!(deleted_size2, data_size);
    }

    #[test]
    fn recovery_rebuilds_index_from_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.dat");
        {
            let engine = Engine::open(&path, 0.5).unwrap();
            engine.put("k".into(), "v1".into()).unwrap();
            engine.put("k".into(), "v2".into()).unwrap();
            engine.put("other".into(), "x".into()).unwrap();
        }
        let engine = Engine::open(&path, 0.5).unwrap();
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.read("k").unwrap(), Some("v2".into()));
        assert_eq!(engine.read("other").unwrap(), Some("x".into()));
    }

    #[test]
    fn recovery_ignores_a_torn_tail_and_truncates_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.dat");
        {
            let engine = Engine::open(&path, 0.5).unwrap();
            engine.put("k1".into(), "v1".into()).unwrap();
            engine.put("k2".into(), "v2".into()).unwrap();
        }

        let good_len = fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        }

        let engine = Engine::open(&path, 0.5).unwrap();
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.read("k1").unwrap(), Some("v1".into()));
        assert_eq!(engine.read("k2").unwrap(), Some("v2".into()));
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn compaction_triggers_and_shrinks_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.dat");
        let engine = Engine::open(&path, 0.5).unwrap();
        for i in 0..100 {
            engine.put("k".into(), format!("v{}", i)).unwrap();
            // A single overwritten key can never have more than one live
            // record; compaction may have already run by now.
            assert_eq!(engine.len(), 1);
        }

        // One more put is certain to cross the threshold (one live record
        // can be at most half the file only if the file holds exactly two
        // records) and compact.
        engine.put("k".into(), "v-final".into()).unwrap();

        let (data_size, deleted_size) = engine.counters();
        assert_eq!(deleted_size, 0);
        assert_eq!(engine.len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), data_size);
        assert_eq!(engine.read("k").unwrap(), Some("v-final".into()));
    }

    #[test]
    fn compaction_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.dat");
        let engine = Engine::open(&path, 0.5).unwrap();
        engine.put("a".into(), "1".into()).unwrap();
        engine.put("b".into(), "2".into()).unwrap();
        engine.put("a".into(), "1-again".into()).unwrap();

        {
            let mut state = engine.state.lock().unwrap();
            compaction::compact(&mut state, &engine.data_path).unwrap();
        }
        let len_after_first = fs::metadata(&path).unwrap().len();

        {
            let mut state = engine.state.lock().unwrap();
            compaction::compact(&mut state, &engine.data_path).unwrap();
        }
        let len_after_second = fs::metadata(&path).unwrap().len();

        assert_eq!(len_after_first, len_after_second);
        assert_eq!(engine.read("a").unwrap(), Some("1-again".into()));
        assert_eq!(engine.read("b").unwrap(), Some("2".into()));
    }
}
