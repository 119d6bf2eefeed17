//! On-disk segment file format: a sequence of `u32`-little-endian-length-
//! prefixed payloads. One segment holds at most `segment_size` entries
//! (enforced by [`super::PersistentQueue`], not by this module).

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

const LEN_PREFIX_BYTES: usize = 4;

pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{index:020}.seg"))
}

pub fn list_segment_indices(dir: &Path) -> io::Result<Vec<u64>> {
    let mut indices = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".seg") {
            if let Ok(index) = stem.parse::<u64>() {
                indices.push(index);
            }
        }
    }
    Ok(indices)
}

/// Reads one length-prefixed payload, or `None` on clean EOF. A truncated
/// trailing write (fewer bytes than the length prefix promises) is treated
/// as EOF too, since it can only be an in-progress write interrupted by a
/// crash.
fn read_entry<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; LEN_PREFIX_BYTES];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => Ok(Some(payload)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_entry<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// A read-only view over a sealed segment file.
pub struct Segment {
    reader: BufReader<File>,
    total_count: usize,
    read_count: usize,
}

impl Segment {
    /// Opens `path`, scanning it to count complete entries. When `is_tail`
    /// is set (this is the most recently active segment before an open),
    /// a trailing partial write is truncated off the file so later appends
    /// don't corrupt the stream.
    pub fn open_and_recover(path: &Path, is_tail: bool) -> io::Result<Segment> {
        let mut total_count = 0usize;
        let mut valid_len: u64 = 0;
        {
            let file = File::open(path)?;
            let mut reader = BufReader::new(file);
            loop {
                let pos_before = reader.stream_position()?;
                match read_entry(&mut reader)? {
                    Some(_) => {
                        total_count += 1;
                        valid_len = reader.stream_position()?;
                        let _ = pos_before;
                    }
                    None => break,
                }
            }
        }

        if is_tail {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
        }

        let file = File::open(path)?;
        Ok(Segment {
            reader: BufReader::new(file),
            total_count,
            read_count: 0,
        })
    }

    pub fn read_next(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.read_count >= self.total_count {
            return Ok(None);
        }
        let entry = read_entry(&mut self.reader)?;
        if entry.is_some() {
            self.read_count += 1;
        }
        Ok(entry)
    }

    pub fn remaining(&self) -> usize {
        self.total_count - self.read_count
    }
}

/// The active, appendable segment: a write handle plus an independent read
/// cursor over the same file, so already-flushed entries can be dequeued
/// before the segment is sealed and rolled over.
pub struct SegmentWriter {
    index: u64,
    write_file: File,
    write_count: usize,
    read_reader: BufReader<File>,
    read_count: usize,
    turbo: bool,
}

impl SegmentWriter {
    pub fn open(dir: &Path, index: u64) -> io::Result<SegmentWriter> {
        let path = segment_path(dir, index);
        let write_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let read_file = File::open(&path)?;
        Ok(SegmentWriter {
            index,
            write_file,
            write_count: 0,
            read_reader: BufReader::new(read_file),
            read_count: 0,
            turbo: false,
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn count(&self) -> usize {
        self.write_count
    }

    pub fn set_turbo(&mut self, turbo: bool) {
        self.turbo = turbo;
    }

    pub fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        write_entry(&mut self.write_file, payload)?;
        if !self.turbo {
            self.write_file.sync_all()?;
        }
        self.write_count += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.write_file.sync_all()
    }

    /// Reads the next entry already flushed to disk, if any. Seeks the read
    /// cursor forward from the last position read, so interleaved
    /// append/read on the active segment stay consistent.
    pub fn read_next(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.read_count >= self.write_count {
            return Ok(None);
        }
        let entry = read_entry(&mut self.read_reader)?;
        if entry.is_some() {
            self.read_count += 1;
        }
        Ok(entry)
    }

    /// Converts a full active segment into a read-only sealed view,
    /// carrying forward the read cursor already advanced by `read_next` so
    /// entries dequeued before the seal aren't re-served from the reader.
    pub fn into_sealed(self) -> Segment {
        Segment {
            reader: self.read_reader,
            total_count: self.write_count,
            read_count: self.read_count,
        }
    }
}
