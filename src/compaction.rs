//! Rewrites the log to contain only the records the index currently
//! references, then swaps the rewritten file in atomically.
//!
//! Tombstones are copied like any other live-indexed record: delete leaves
//! the key in the index pointing at its tombstone, and this pass drops no
//! record whose key is still indexed. The next put overwrites the
//! tombstone and a later compaction retires it for good.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom};
use std::path::Path;

use crate::engine::{tmp_path, BufReaderWithPos, BufWriterWithPos, State};
use crate::error::Result;

/// Rewrites `data_path` to contain exactly one record per indexed key,
/// updates every index entry's offset in place, and resets `deleted_size`
/// to zero.
pub(crate) fn compact(state: &mut State, data_path: &Path) -> Result<()> {
    let tmp = tmp_path(data_path);
    let mut new_len = 0u64;

    {
        let mut new_file = BufWriter::new(File::create(&tmp)?);
        for (_, entry) in state.index.iter_mut() {
            state.reader.seek(SeekFrom::Start(entry.offset))?;
            let mut limited = (&mut state.reader).take(entry.len);
            io::copy(&mut limited, &mut new_file)?;
            entry.offset = new_len;
            new_len += entry.len;
        }
        new_file.flush()?;
    }

    fs::rename(&tmp, data_path)?;

    // The rename invalidates neither handle on the inode they already
    // hold open, but both must point at the new file going forward:
    // reopen so subsequent appends/reads land in the right place.
    state.writer = BufWriterWithPos::new(
        OpenOptions::new().create(true).append(true).open(data_path)?,
    )?;
    state.reader = BufReaderWithPos::new(File::open(data_path)?)?;
    state.deleted_size = 0;
    state.data_size = new_len;

    Ok(())
}
