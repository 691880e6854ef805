//! Journal persistence backends.
//!
//! A backend only stores and streams entries. Ordering rules live in the
//! [`Journal`](crate::Journal), which calls [`JournalBackend::persist`]
//! under its write lock and drives [`JournalBackend::replay`] at startup.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::codec::{decode_record, encode_line, encode_record, read_lines};
use crate::entry::{Entry, Index};
use crate::error::{DecodeError, JournalError, StoreError};
use crate::store::{Key, Store};

/// Durable storage for journal entries.
pub trait JournalBackend: Send + Sync {
    /// Durably store `entry`. Must not return `Ok` until the entry would
    /// survive a crash.
    fn persist(&self, entry: &Entry) -> Result<(), JournalError>;

    /// Read back a previously persisted entry.
    fn entry(&self, index: Index) -> Result<Option<Entry>, JournalError>;

    /// Whether anything has been persisted, including records left by an
    /// earlier process. A journal over a non-empty backend must replay
    /// before it writes.
    fn has_entries(&self) -> Result<bool, JournalError>;

    /// Stream every persisted entry, in index order, into `visit`.
    ///
    /// Stops at the first `visit` error and returns it. An undecodable final
    /// record ends the stream quietly; any earlier one is an error.
    fn replay(
        &self,
        visit: &mut dyn FnMut(Entry) -> Result<(), JournalError>,
    ) -> Result<(), JournalError>;
}

/// Append-only newline-delimited JSON file.
///
/// Each entry is one line written with a single `write_all` and, when
/// `sync_writes` is on, followed by `fsync`. A write that fails halfway is
/// rolled back by truncating the file to its previous length. If that
/// truncation fails too, the backend is poisoned: the next write first
/// retries the truncation and fails if it still cannot be done.
///
/// Entries are never overwritten. A file that already holds records
/// accepts writes only after [`replay`](JournalBackend::replay), and then
/// only for indices past the last one read or written.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    sync_writes: bool,
    writer: Mutex<FileWriter>,
    /// Starting byte offset of every known entry, ordered by index.
    offsets: RwLock<Vec<(Index, u64)>>,
}

#[derive(Debug)]
struct FileWriter {
    file: File,
    /// Length of the well-formed prefix of the file.
    len: u64,
    /// Highest index read back or written.
    high_water: Option<Index>,
    /// The file holds records that have not been replayed yet.
    unreplayed: bool,
    /// A failed write could not be rolled back; bytes past `len` are junk.
    poisoned: bool,
}

impl FileWriter {
    fn repair(&mut self, path: &Path) -> io::Result<()> {
        self.file.set_len(self.len)?;
        self.file.sync_all()?;
        self.poisoned = false;
        tracing::info!(path = %path.display(), len = self.len, "repaired journal file");
        Ok(())
    }
}

impl FileBackend {
    /// Open (or create) the journal file at `path`.
    ///
    /// Parent directories are created as needed. Existing records are not
    /// read until [`replay`](JournalBackend::replay).
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the file or its directory cannot be created
    /// or opened.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path,
            sync_writes,
            writer: Mutex::new(FileWriter {
                file,
                len,
                high_water: None,
                unreplayed: len > 0,
                poisoned: false,
            }),
            offsets: RwLock::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(&self, index: Index) -> Option<u64> {
        let offsets = self.offsets.read().unwrap_or_else(PoisonError::into_inner);
        offsets
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|pos| offsets[pos].1)
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, FileWriter> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn discard_tail(&self, valid_len: u64) -> io::Result<()> {
        let mut writer = self.lock_writer();
        writer.file.set_len(valid_len)?;
        writer.file.sync_all()?;
        writer.len = valid_len;
        Ok(())
    }
}

fn write_line(file: &mut File, line: &[u8], sync: bool) -> io::Result<()> {
    file.write_all(line)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

impl JournalBackend for FileBackend {
    fn persist(&self, entry: &Entry) -> Result<(), JournalError> {
        let line =
            encode_line(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut writer = self.lock_writer();
        if writer.unreplayed {
            return Err(JournalError::NotPrimed);
        }
        if let Some(high_water) = writer.high_water
            && entry.index() <= high_water
        {
            return Err(JournalError::AlreadyPersisted(entry.index()));
        }
        if writer.poisoned {
            writer.repair(&self.path)?;
        }

        let start = writer.len;
        if let Err(e) = write_line(&mut writer.file, &line, self.sync_writes) {
            if let Err(rollback) = writer.file.set_len(start) {
                writer.poisoned = true;
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial journal write"
                );
            }
            return Err(e.into());
        }
        writer.len = start + line.len() as u64;
        writer.high_water = Some(entry.index());
        drop(writer);

        self.offsets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((entry.index(), start));
        Ok(())
    }

    fn entry(&self, index: Index) -> Result<Option<Entry>, JournalError> {
        let Some(offset) = self.offset_of(index) else {
            return Ok(None);
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut line = Vec::new();
        BufReader::new(file).read_until(b'\n', &mut line)?;

        let decoded = match line.split_last() {
            Some((b'\n', record)) => decode_record(record),
            _ => Err(DecodeError::Unterminated),
        };
        decoded
            .map(Some)
            .map_err(|source| JournalError::Decode {
                location: format!("byte offset {offset}"),
                source,
            })
    }

    fn has_entries(&self) -> Result<bool, JournalError> {
        Ok(self.lock_writer().len > 0)
    }

    fn replay(
        &self,
        visit: &mut dyn FnMut(Entry) -> Result<(), JournalError>,
    ) -> Result<(), JournalError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.lock_writer().unreplayed = false;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut last = None;
        let summary = read_lines(BufReader::new(file), |offset, entry| {
            let index = entry.index();
            visit(entry)?;
            last = Some(index);
            self.offsets
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push((index, offset));
            Ok(())
        })?;

        if let Some(reason) = summary.torn_tail {
            tracing::warn!(
                path = %self.path.display(),
                valid_len = summary.valid_len,
                error = %reason,
                "discarding torn record at end of journal"
            );
            self.discard_tail(summary.valid_len)?;
        }

        let mut writer = self.lock_writer();
        writer.unreplayed = false;
        writer.high_water = writer.high_water.max(last);
        drop(writer);

        tracing::debug!(
            path = %self.path.display(),
            records = summary.records,
            "journal file replayed"
        );
        Ok(())
    }
}

/// Keeps entries in a [`Store`] under `[namespace, index]` composite keys.
///
/// The index part is the big-endian encoding of the index, so a prefix scan
/// over the namespace yields entries in index order.
#[derive(Debug)]
pub struct StoreBackend<S> {
    store: S,
    namespace: Vec<u8>,
}

impl<S: Store> StoreBackend<S> {
    pub const DEFAULT_NAMESPACE: &'static str = "journal";

    pub fn new(store: S) -> Self {
        Self::with_namespace(store, Self::DEFAULT_NAMESPACE)
    }

    /// Use `namespace` as the first key part, so several journals can share
    /// one store.
    pub fn with_namespace(store: S, namespace: impl AsRef<[u8]>) -> Self {
        Self {
            store,
            namespace: namespace.as_ref().to_vec(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key(&self, index: Index) -> Result<Key, StoreError> {
        Key::composite(2)
            .bind(&self.namespace)
            .bind(index.get().to_be_bytes())
            .complete()
    }
}

impl<S: Store> JournalBackend for StoreBackend<S> {
    fn persist(&self, entry: &Entry) -> Result<(), JournalError> {
        let key = self.key(entry.index())?;
        match self.store.get(&key) {
            Ok(_) => return Err(JournalError::AlreadyPersisted(entry.index())),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        let record =
            encode_record(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.store.put(&key, record)?;
        Ok(())
    }

    fn entry(&self, index: Index) -> Result<Option<Entry>, JournalError> {
        let record = match self.store.get(&self.key(index)?) {
            Ok(record) => record,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_record(&record)
            .map(Some)
            .map_err(|source| JournalError::Decode {
                location: format!("store key {index}"),
                source,
            })
    }

    fn has_entries(&self) -> Result<bool, JournalError> {
        Ok(!self.store.scan(&Key::composite(2).bind(&self.namespace))?.is_empty())
    }

    fn replay(
        &self,
        visit: &mut dyn FnMut(Entry) -> Result<(), JournalError>,
    ) -> Result<(), JournalError> {
        let records = self.store.scan(&Key::composite(2).bind(&self.namespace))?;
        let total = records.len();

        for (position, (key, record)) in records.into_iter().enumerate() {
            match decode_record(&record) {
                Ok(entry) => visit(entry)?,
                Err(reason) if position + 1 == total => {
                    tracing::warn!(
                        key = ?key,
                        error = %reason,
                        "skipping undecodable final journal record"
                    );
                    break;
                }
                Err(source) => {
                    return Err(JournalError::Decode {
                        location: format!("store key {key:?}"),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}
