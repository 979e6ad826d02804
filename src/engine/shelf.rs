use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::mem;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Deserializer;
use tracing::{debug, info, instrument};

use super::{KvsEngine, OpenMode, Protocol, StoreBackend, StoreOptions};
use crate::{Result, ShelfError};

/// the size (in bytes) of stale data that will trigger a compaction when a writable store is closed
pub const COMPACTION_THRESHOLD: u64 = 1024 * 1024;

/// A key/value store kept in a single "command log" file.
///
/// Every `set` and `remove` is appended to the file as a serialized [`Command`]. When the store
/// is opened, the log is replayed to build an in-memory index that maps each key to the position
/// of its latest value within the file. Values are read from disk on demand.
///
/// A `ShelfStore` does no locking of its own. Opening it for writing while another handle has
/// it open will corrupt the log, so callers must serialize access, which is what
/// [`Shelf`](../struct.Shelf.html) does.
#[derive(Debug)]
pub struct ShelfStore {
    // path of the log file
    path: PathBuf,

    mode: OpenMode,

    options: StoreOptions,

    // reads values out of the log
    reader: BufReaderWithPos<File>,

    // appends to the log, `None` when opened read-only
    writer: Option<BufWriterWithPos>,

    // maps keys to their location within the log file
    index: BTreeMap<String, CommandPos>,

    // writeback cache, `Some(value)` for a pending set and `None` for a pending remove
    pending: BTreeMap<String, Option<String>>,

    // number of bytes representing "stale" commands that could be
    // deleted during a compaction.
    uncompacted: u64,
}

impl ShelfStore {
    /// opens the store kept in the file at `path`.
    ///
    /// `ReadOnly` and `Write` require the file to exist, `Create` creates it when missing and
    /// `New` always starts from an empty file.
    ///
    /// # Errors
    /// returns `ShelfError::StoreOpen` if the file could not be opened, or an error if the
    /// existing log could not be read back
    #[instrument(level = "debug", skip(options))]
    pub fn open(path: &Path, mode: OpenMode, options: StoreOptions) -> Result<ShelfStore> {
        let open_err = |source| ShelfError::StoreOpen {
            path: path.to_path_buf(),
            source,
        };

        // the writer is opened first so that `Create` and `New` can bring the file into existence
        let writer_file = match mode {
            OpenMode::ReadOnly => None,
            OpenMode::Write => Some(OpenOptions::new().append(true).open(path)),
            OpenMode::Create => Some(OpenOptions::new().create(true).append(true).open(path)),
            OpenMode::New => Some(
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(path),
            ),
        };
        let writer = match writer_file {
            Some(file) => Some(BufWriterWithPos::new(file.map_err(open_err)?)?),
            None => None,
        };

        let mut reader = BufReaderWithPos::new(File::open(path).map_err(open_err)?)?;
        let mut index = BTreeMap::new();
        let uncompacted = load(&mut reader, &mut index)?;
        debug!(keys = index.len(), uncompacted, "store loaded");

        Ok(ShelfStore {
            path: path.to_path_buf(),
            mode,
            options,
            reader,
            writer,
            index,
            pending: BTreeMap::new(),
            uncompacted,
        })
    }

    /// path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// the mode this store was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// writes any cached writeback entries to the log and flushes it to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        for (key, value) in mem::take(&mut self.pending) {
            match value {
                Some(value) => self.append(Command::Set { key, value })?,
                None => self.append(Command::Remove { key })?,
            }
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    /// Rewrites the log so that it only holds the latest value of every key.
    ///
    /// The live records are copied into a sibling file which then replaces the log.
    pub fn compact(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Err(ShelfError::ReadOnlyStore);
        }
        let compaction_path = build_compaction_path(&self.path);
        let mut compaction_writer = BufWriterWithPos::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&compaction_path)?,
        )?;

        let mut new_pos = 0; // pos in the new log file.

        // copy every live command into the compaction log
        for cmd_pos in self.index.values_mut() {
            if self.reader.pos != cmd_pos.pos {
                self.reader.seek(SeekFrom::Start(cmd_pos.pos))?;
            }
            let mut entry_reader = (&mut self.reader).take(cmd_pos.len);
            let len = io::copy(&mut entry_reader, &mut compaction_writer)?;
            *cmd_pos = (new_pos..new_pos + len).into();
            new_pos += len;
        }
        compaction_writer.sync()?;

        fs::rename(&compaction_path, &self.path)?;
        self.reader = BufReaderWithPos::new(File::open(&self.path)?)?;
        self.writer = Some(BufWriterWithPos::new(
            OpenOptions::new().append(true).open(&self.path)?,
        )?);
        info!(
            "compacted {:?}, dropped {} stale bytes",
            &self.path, self.uncompacted
        );
        self.uncompacted = 0;

        Ok(())
    }

    /// serializes `cmd`, appends it to the log and updates the index
    fn append(&mut self, cmd: Command) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(ShelfError::ReadOnlyStore)?;
        let pos = writer.pos;
        match self.options.protocol {
            Protocol::Compact => serde_json::to_writer(&mut *writer, &cmd)?,
            Protocol::Pretty => {
                serde_json::to_writer_pretty(&mut *writer, &cmd)?;
                writer.write_all(b"\n")?;
            }
        }
        writer.flush()?;
        let end = writer.pos;

        match cmd {
            Command::Set { key, .. } => {
                if let Some(old_command) = self.index.insert(key, (pos..end).into()) {
                    self.uncompacted += old_command.len;
                }
            }
            Command::Remove { key } => {
                if let Some(old_command) = self.index.remove(&key) {
                    self.uncompacted += old_command.len;
                }
                // the "remove" command itself can be deleted in the next compaction
                self.uncompacted += end - pos;
            }
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writer.is_some() {
            Ok(())
        } else {
            Err(ShelfError::ReadOnlyStore)
        }
    }
}

impl KvsEngine for ShelfStore {
    /// attempts to retrieve the value associated with `key`.
    /// returns `Ok(Some(value))` if the `key` was found, else returns `Ok(None)`
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.pending.get(key) {
            return Ok(value.clone());
        }
        if let Some(&CommandPos { pos, len }) = self.index.get(key) {
            self.reader.seek(SeekFrom::Start(pos))?;
            let cmd_reader = (&mut self.reader).take(len);
            if let Command::Set { value, .. } = serde_json::from_reader(cmd_reader)? {
                Ok(Some(value))
            } else {
                Err(ShelfError::StoreIo(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid command in log for key: {} pos: {} len: {}", key, pos, len),
                )))
            }
        } else {
            Ok(None)
        }
    }

    fn set(&mut self, key: String, value: String) -> Result<()> {
        self.ensure_writable()?;
        if self.options.writeback {
            self.pending.insert(key, Some(value));
            return Ok(());
        }
        self.append(Command::Set { key, value })
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        if !self.contains_key(key) {
            return Err(ShelfError::KeyNotFound);
        }
        if self.options.writeback {
            self.pending.insert(key.to_owned(), None);
            return Ok(());
        }
        self.append(Command::Remove {
            key: key.to_owned(),
        })
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<&String> = self.index.keys().collect();
        for (key, value) in &self.pending {
            if value.is_some() {
                keys.insert(key);
            } else {
                keys.remove(key);
            }
        }
        keys.into_iter().cloned().collect()
    }

    fn contains_key(&self, key: &str) -> bool {
        match self.pending.get(key) {
            Some(value) => value.is_some(),
            None => self.index.contains_key(key),
        }
    }

    #[instrument(level = "debug", skip(self), fields(path = ?self.path, mode = %self.mode))]
    fn close(mut self) -> Result<()> {
        if self.writer.is_some() {
            self.sync()?;
            if self.uncompacted > COMPACTION_THRESHOLD {
                self.compact()?;
            }
        }
        debug!("store closed");
        Ok(())
    }
}

/// Opens [`ShelfStore`]s, one file per store
#[derive(Debug, Copy, Clone, Default)]
pub struct FileBackend;

impl StoreBackend for FileBackend {
    type Engine = ShelfStore;

    fn open(&self, path: &Path, mode: OpenMode, options: &StoreOptions) -> Result<ShelfStore> {
        ShelfStore::open(path, mode, *options)
    }
}

/// loads the commands from the given reader into the given `index` map
/// returns the amount of bytes that could be compacted.
///
/// # Errors
/// IO Errors will be returned if the log could not be read, and a serialization error if it
/// holds a malformed command
fn load(
    reader: &mut BufReaderWithPos<File>,
    index: &mut BTreeMap<String, CommandPos>,
) -> Result<u64> {
    let mut pos = reader.seek(SeekFrom::Start(0))?;
    let mut uncompacted = 0_u64;
    let mut stream = Deserializer::from_reader(reader).into_iter::<Command>();

    while let Some(command) = stream.next() {
        let end = stream.byte_offset() as u64;
        match command? {
            Command::Set { key, .. } => {
                if let Some(old_command) = index.insert(key, (pos..end).into()) {
                    uncompacted += old_command.len;
                }
            }
            Command::Remove { key } => {
                if let Some(old_command) = index.remove(&key) {
                    uncompacted += old_command.len;
                }
                uncompacted += end - pos;
            }
        }
        pos = end;
    }

    Ok(uncompacted)
}

/// the path of the temporary file a compaction writes into, e.g. `data.db.compact`
fn build_compaction_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".compact");
    PathBuf::from(name)
}

/// These are the command types that will be recorded in the command log
#[derive(Serialize, Deserialize, Debug)]
enum Command {
    Set { key: String, value: String },
    Remove { key: String },
}

/// Holds position data for commands that have been written into the command log.
#[derive(Debug, Copy, Clone)]
struct CommandPos {
    // position of the command within the log (byte offset)
    pos: u64,
    // the total length of the command data
    len: u64,
}

/// enables conversion from a byte range `pos_start..pos_end` into a `CommandPos`
impl From<Range<u64>> for CommandPos {
    fn from(range: Range<u64>) -> Self {
        CommandPos {
            pos: range.start,
            len: range.end - range.start,
        }
    }
}

/// A struct that holds a BufferedReader along with the current seek `pos` of that BufferedReader
#[derive(Debug)]
struct BufReaderWithPos<R: Read + Seek> {
    reader: BufReader<R>,
    pos: u64,
}

impl<R: Read + Seek> BufReaderWithPos<R> {
    fn new(mut inner: R) -> Result<Self> {
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

/// A BufWriter over a log file that tracks the offset of the end of the log
#[derive(Debug)]
struct BufWriterWithPos {
    writer: BufWriter<File>,
    pos: u64,
}

impl BufWriterWithPos {
    // positions at the end of the file, an append-mode file reports 0 until its first write
    fn new(mut inner: File) -> Result<Self> {
        let pos = inner.seek(SeekFrom::End(0))?;
        Ok(BufWriterWithPos {
            writer: BufWriter::new(inner),
            pos,
        })
    }

    /// flushes the buffer and waits for the data to reach the disk
    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}

impl Write for BufWriterWithPos {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.writer.write(buf)?;
        self.pos += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
