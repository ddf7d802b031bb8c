use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event as `[len][bincode][crc32]`. Returns the bytes written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// Fill `buf` completely. `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact entry and its encoded size. `Ok(None)` at end of
/// log, on a torn tail, or at the first entry whose checksum or payload
/// does not decode.
fn decode_next(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, payload.len() as u64 + 8)))
}

/// Every intact event plus the byte length they occupy from the start of the file.
fn read_intact(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact_len = 0;
    while let Some((event, size)) = decode_next(&mut reader)? {
        events.push(event);
        intact_len += size;
    }
    Ok((events, intact_len))
}

/// Append-only write-ahead log of catalog and reservation changes.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// Anything after the last intact entry (a torn write, a corrupt record) is
/// cut off when the log is opened, so new appends are always reachable.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful fsync.
    synced_len: u64,
    unsynced_len: u64,
    unsynced_appends: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay the log and open it for appends, truncated to its intact prefix.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, intact_len) = read_intact(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len > intact_len {
            tracing::warn!(
                "{}: discarding {} bytes after the last intact entry",
                path.display(),
                file_len - intact_len
            );
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len: intact_len,
            unsynced_len: 0,
            unsynced_appends: 0,
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Append and fsync one event. Tests only; the writer task batches.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing. Follow with `flush_sync()` for the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.unsynced_len += encode_event(&mut self.writer, event)?;
        self.unsynced_appends += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.unsynced_len;
        self.appends_since_compact += self.unsynced_appends;
        self.unsynced_len = 0;
        self.unsynced_appends = 0;
        Ok(())
    }

    /// Drop everything written since the last successful `flush_sync`, both
    /// the buffered bytes and whatever already reached the file.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        // `into_parts` hands back the buffer instead of flushing it on drop.
        let (stale, _buffered) = std::mem::replace(&mut self.writer, BufWriter::new(fresh)).into_parts();
        self.unsynced_len = 0;
        self.unsynced_appends = 0;
        stale.set_len(self.synced_len)?;
        stale.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a compacted log next to the live one and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted log over the live one and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.unsynced_len = 0;
        self.unsynced_appends = 0;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_intact(path).map(|(events, _)| events)
    }
}
