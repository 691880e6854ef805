//! The journal: a single-writer, strictly ordered, append-only log.
//!
//! Every write (append, restore, replayed entry) goes through one pipeline
//! under one lock: validate the parent against the tip, persist (skipped
//! during replay), advance the tip, then notify observers synchronously in
//! registration order. When a write returns `Ok`, every observer has seen
//! the entry. Observers run while the write lock is held and must not write
//! back into the same journal.
//!
//! A journal opened over a backend that already holds entries refuses
//! writes until [`Journal::replay`] has brought its tip up to date.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::backend::{FileBackend, JournalBackend, StoreBackend};
use crate::entry::{Entry, Index};
use crate::error::JournalError;
use crate::store::MemoryStore;

/// Receives every entry the journal processes, in journal order.
///
/// Called synchronously from inside the journal's write path, for live
/// appends, restores and replay alike. Implementations must not panic on bad
/// input and must not call back into the journal's write methods. They may
/// [`subscribe`](Journal::subscribe) or [`unsubscribe`](Journal::unsubscribe);
/// such changes apply from the next entry on.
pub trait Observer: Send + Sync {
    fn on_entry(&self, entry: &Entry);
}

/// Handle returned by [`Journal::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

impl Subscription {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Clone)]
struct Subscriber {
    subscription: Subscription,
    /// Entries at or below this index are not delivered.
    after: Index,
    observer: Arc<dyn Observer>,
}

/// Append-only, strictly ordered log of entries.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Writes are
/// serialized. [`last_index`](Journal::last_index) and
/// [`get_entry`](Journal::get_entry) do not take the write lock.
pub struct Journal {
    root: Index,
    backend: Box<dyn JournalBackend>,
    /// Write lock; the guarded value is the tip.
    tip: Mutex<Index>,
    /// Mirror of the tip for lock-free readers.
    last_index: AtomicU64,
    /// Set while the backend holds entries that have not been replayed.
    unreplayed: AtomicBool,
    observers: RwLock<Vec<Subscriber>>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("root", &self.root)
            .field("last_index", &self.last_index())
            .finish_non_exhaustive()
    }
}

impl Journal {
    pub fn builder() -> JournalBuilder {
        JournalBuilder::new()
    }

    fn with_backend(root: Index, backend: Box<dyn JournalBackend>, unreplayed: bool) -> Self {
        Self {
            root,
            backend,
            tip: Mutex::new(root),
            last_index: AtomicU64::new(root.get()),
            unreplayed: AtomicBool::new(unreplayed),
            observers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// The configured root index. Never names a real entry.
    pub fn root(&self) -> Index {
        self.root
    }

    /// The highest index successfully appended, restored or replayed, or the
    /// root when the journal is empty.
    pub fn last_index(&self) -> Index {
        Index::new(self.last_index.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.last_index() == self.root
    }

    fn lock_tip(&self) -> MutexGuard<'_, Index> {
        self.tip.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a payload as the next entry.
    ///
    /// # Returns
    ///
    /// The index assigned to the new entry.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Persistence`] or [`JournalError::Store`] if
    /// the backend rejects the write. The tip does not move and no observer
    /// is notified. Returns [`JournalError::NotPrimed`] if the backend holds
    /// entries that have not been replayed yet.
    pub fn append(&self, payload: impl Into<Vec<u8>>) -> Result<Index, JournalError> {
        let mut tip = self.lock_tip();
        self.append_locked(&mut tip, payload.into())
    }

    /// Append several payloads back to back under one lock.
    ///
    /// Stops at the first failure and returns it; payloads before it stay
    /// appended.
    ///
    /// # Returns
    ///
    /// The index of the last appended entry, or the current tip if
    /// `payloads` is empty.
    pub fn append_batch<I, P>(&self, payloads: I) -> Result<Index, JournalError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        let mut tip = self.lock_tip();
        for payload in payloads {
            self.append_locked(&mut tip, payload.into())?;
        }
        Ok(*tip)
    }

    fn append_locked(&self, tip: &mut Index, payload: Vec<u8>) -> Result<Index, JournalError> {
        let index = tip.next().ok_or(JournalError::IndexOverflow(*tip))?;
        self.commit(tip, Entry::new(index, payload), true)
    }

    /// Accept an entry whose index was assigned elsewhere (replication, or
    /// re-applying a known entry).
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::MissingParent`] unless the entry's parent is
    /// the current tip and its index directly follows it. The error carries
    /// the tip so the sender can resend everything after it. State is left
    /// unchanged. Backend failures are reported as for
    /// [`append`](Journal::append).
    pub fn restore(&self, entry: Entry) -> Result<Index, JournalError> {
        let mut tip = self.lock_tip();
        self.commit(&mut tip, entry, true)
    }

    /// Restore several entries in order, stopping at the first error.
    pub fn restore_batch(
        &self,
        entries: impl IntoIterator<Item = Entry>,
    ) -> Result<Index, JournalError> {
        let mut tip = self.lock_tip();
        for entry in entries {
            self.commit(&mut tip, entry, true)?;
        }
        Ok(*tip)
    }

    /// Rebuild observer state from everything the backend holds.
    ///
    /// Feeds persisted entries, in index order, through the same
    /// validate/advance/notify pipeline as [`restore`](Journal::restore)
    /// without persisting them again. Register observers before calling
    /// this; observers subscribed later only see new traffic.
    ///
    /// # Returns
    ///
    /// The tip after replay.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::AlreadyPrimed`] if the journal already holds
    /// entries. Returns [`JournalError::Decode`] for a corrupt record that is
    /// not the last one, and [`JournalError::MissingParent`] if the persisted
    /// log has a gap. Observers may then hold a partial projection, which
    /// must not be served.
    pub fn replay(&self) -> Result<Index, JournalError> {
        let mut tip = self.lock_tip();
        if *tip != self.root {
            return Err(JournalError::AlreadyPrimed { tip: *tip });
        }

        let _span = tracing::info_span!("replay", root = %self.root).entered();
        let mut replayed = 0u64;
        self.backend.replay(&mut |entry| {
            self.commit(&mut tip, entry, false)?;
            replayed += 1;
            Ok(())
        })?;

        self.unreplayed.store(false, Ordering::Release);
        tracing::info!(replayed, last_index = %*tip, "journal replayed");
        Ok(*tip)
    }

    /// Validate, persist, advance, notify. Caller holds the write lock.
    fn commit(&self, tip: &mut Index, entry: Entry, persist: bool) -> Result<Index, JournalError> {
        if persist && self.unreplayed.load(Ordering::Acquire) {
            return Err(JournalError::NotPrimed);
        }

        if entry.parent_index() != *tip || entry.index().prev() != Some(*tip) {
            tracing::debug!(
                index = %entry.index(),
                parent = %entry.parent_index(),
                tip = %*tip,
                "rejecting entry with missing parent"
            );
            return Err(JournalError::MissingParent {
                index: entry.index(),
                parent: entry.parent_index(),
                tip: *tip,
            });
        }

        if persist {
            self.backend.persist(&entry)?;
        }

        *tip = entry.index();
        self.last_index.store(tip.get(), Ordering::Release);
        tracing::debug!(index = %entry.index(), persisted = persist, "entry committed");

        self.notify_all(&entry);
        Ok(*tip)
    }

    fn notify_all(&self, entry: &Entry) {
        // Snapshot, so observers can (un)subscribe without deadlocking.
        let subscribers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for subscriber in subscribers.iter().filter(|s| entry.index() > s.after) {
            tracing::trace!(
                subscription = subscriber.subscription.id(),
                index = %entry.index(),
                "notifying observer"
            );
            subscriber.observer.on_entry(entry);
        }
    }

    /// Register an observer for every entry processed from now on.
    ///
    /// Observers are notified in registration order.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        self.subscribe_from(observer, self.root)
    }

    /// Register an observer that skips every entry at or below `after`.
    ///
    /// For observers that keep their own durable state: subscribe with the
    /// last index they processed, then [`replay`](Journal::replay), and they
    /// only see what they have not seen before.
    pub fn subscribe_from(&self, observer: Arc<dyn Observer>, after: Index) -> Subscription {
        let subscription = Subscription(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                subscription,
                after,
                observer,
            });
        tracing::info!(subscription = subscription.id(), after = %after, "observer subscribed");
        subscription
    }

    /// Remove a previously registered observer.
    ///
    /// # Returns
    ///
    /// `true` if the subscription was active.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|s| s.subscription != subscription);
        let removed = observers.len() != before;
        if removed {
            tracing::info!(subscription = subscription.id(), "observer unsubscribed");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Read a committed entry.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotFound`] if `index` is the root, beyond the
    /// tip, or unknown to the backend.
    pub fn get_entry(&self, index: Index) -> Result<Entry, JournalError> {
        if index <= self.root || index > self.last_index() {
            return Err(JournalError::NotFound(index));
        }
        self.backend
            .entry(index)?
            .ok_or(JournalError::NotFound(index))
    }

    /// Every committed entry with an index greater than `index`, in order.
    ///
    /// This is what a replica that failed with
    /// [`MissingParent`](JournalError::MissingParent) at tip `index` needs
    /// to catch up.
    pub fn entries_after(&self, index: Index) -> Result<Vec<Entry>, JournalError> {
        let last = self.last_index();
        let mut entries = Vec::new();
        let mut cursor = index.max(self.root).next();
        while let Some(next) = cursor
            && next <= last
        {
            entries.push(self.get_entry(next)?);
            cursor = next.next();
        }
        Ok(entries)
    }
}

enum BackendChoice {
    Memory,
    File(PathBuf),
    Custom(Box<dyn JournalBackend>),
}

/// Builder for configuring and opening a [`Journal`].
///
/// # Examples
///
/// ```
/// use eventfold_journal::{Index, JournalBuilder};
///
/// # fn main() -> Result<(), eventfold_journal::JournalError> {
/// let journal = JournalBuilder::new().root(Index::new(100)).open()?;
/// assert_eq!(journal.append(b"first".to_vec())?, Index::new(101));
/// # Ok(())
/// # }
/// ```
pub struct JournalBuilder {
    root: Index,
    sync_writes: bool,
    backend: BackendChoice,
}

impl JournalBuilder {
    /// Defaults: root [`Index::ROOT`], `fsync` on every write, entries kept
    /// in a fresh in-memory store.
    pub fn new() -> Self {
        Self {
            root: Index::ROOT,
            sync_writes: true,
            backend: BackendChoice::Memory,
        }
    }

    /// Set the root index. The first entry gets `root + 1`.
    pub fn root(mut self, root: Index) -> Self {
        self.root = root;
        self
    }

    /// Persist to a newline-delimited JSON file at `path`.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.backend = BackendChoice::File(path.into());
        self
    }

    /// Whether the file backend `fsync`s after every entry.
    ///
    /// Defaults to `true`. Has no effect on other backends.
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Persist through a caller-supplied backend.
    pub fn backend(mut self, backend: impl JournalBackend + 'static) -> Self {
        self.backend = BackendChoice::Custom(Box::new(backend));
        self
    }

    /// Open the backend and build the journal.
    ///
    /// The journal starts empty at the root; call
    /// [`replay`](Journal::replay) after subscribing observers to load
    /// persisted entries. Until then, a journal over a non-empty backend
    /// rejects writes with [`JournalError::NotPrimed`].
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Persistence`] if the journal file cannot be
    /// opened, or the backend's error if it cannot tell whether it holds
    /// entries.
    pub fn open(self) -> Result<Journal, JournalError> {
        let backend: Box<dyn JournalBackend> = match self.backend {
            BackendChoice::Memory => Box::new(StoreBackend::new(MemoryStore::new())),
            BackendChoice::File(path) => {
                tracing::debug!(path = %path.display(), "opening journal file");
                Box::new(FileBackend::open(path, self.sync_writes)?)
            }
            BackendChoice::Custom(backend) => backend,
        };
        let unreplayed = backend.has_entries()?;
        Ok(Journal::with_backend(self.root, backend, unreplayed))
    }
}

impl Default for JournalBuilder {
    fn default() -> Self {
        Self::new()
    }
}
