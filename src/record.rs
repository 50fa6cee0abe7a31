//! The on-disk log record format: a fixed 16-byte header followed by the
//! raw key and value bytes.
//!
//! ```text
//! +-----------+----------+------------+-----+-------+
//! | timestamp | key_size | value_size | key | value |
//! |    u64    |   u32    |    u32     | ... |  ...  |
//! +-----------+----------+------------+-----+-------+
//! ```
//! All integers are big-endian. A record's total length on disk is always
//! `16 + key_size + value_size`.

use std::io::{self, Read, Write};

/// The value bytes that mark a record as a tombstone for its key.
pub const TOMBSTONE: &[u8] = b"DELETED";

const HEADER_LEN: u64 = 16;

/// A single decoded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Seconds since the Unix epoch when this record was written.
    pub timestamp: u64,
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

impl Record {
    /// Builds a record carrying the given key/value.
    pub fn new(timestamp: u64, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Record {
            timestamp,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Builds a tombstone record for `key`.
    pub fn tombstone(timestamp: u64, key: impl Into<Vec<u8>>) -> Self {
        Record::new(timestamp, key, TOMBSTONE.to_vec())
    }

    /// Total length this record occupies on disk.
    pub fn len(&self) -> u64 {
        HEADER_LEN + self.key.len() as u64 + self.value.len() as u64
    }

    /// Whether this record's value is the tombstone sentinel.
    pub fn is_tombstone(&self) -> bool {
        self.value == TOMBSTONE
    }

    /// Encodes this record to a contiguous byte buffer ready to append to the log.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len() as usize);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Writes this record to `writer`, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<u64> {
        let buf = self.encode();
        writer.write_all(&buf)?;
        Ok(buf.len() as u64)
    }
}

/// Outcome of attempting to decode one record from the current reader position.
pub enum Decoded {
    /// A complete record was decoded.
    Record(Record),
    /// The reader had nothing left to give: a clean end of the log.
    EndOfLog,
    /// A header or body was present but short: a partially written trailing
    /// record, almost certainly from a crash mid-append.
    TornTail,
}

/// Decodes one record from `reader`, which is assumed to be positioned at
/// the start of a record (or at end of file).
pub fn decode_from<R: Read>(reader: &mut R) -> io::Result<Decoded> {
    let mut header = [0u8; HEADER_LEN as usize];
    let n = read_fully(reader, &mut header)?;
    if n == 0 {
        return Ok(Decoded::EndOfLog);
    }
    if n < header.len() {
        return Ok(Decoded::TornTail);
    }

    let timestamp = u64::from_be_bytes(header[0..8].try_into().unwrap());
    let key_size = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
    let value_size = u32::from_be_bytes(header[12..16].try_into().unwrap()) as usize;

    let mut body = vec![0u8; key_size + value_size];
    let n = read_fully(reader, &mut body)?;
    if n < body.len() {
        return Ok(Decoded::TornTail);
    }

    let value = body.split_off(key_size);
    let key = body;

    Ok(Decoded::Record(Record {
        timestamp,
        key,
        value,
    }))
}

/// Reads into `buf` until it is full or the reader is exhausted, returning
/// the number of bytes actually read (short of `buf.len()` at end of stream).
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..])? {
            0 => break,
            n => read += n,
        }
    }
    Ok(read)
}
