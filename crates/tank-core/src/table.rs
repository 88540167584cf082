use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::Serialize;

use crate::error::{Result, TankError};
use crate::query::Query;
use crate::record::Record;
use crate::store::RecordStore;
use crate::wal::{Wal, WalEntry, WalFrame};

struct TableState<R: Record> {
    // insertion sequence -> record; iteration order is the select order
    rows: BTreeMap<u64, R>,
    index: BTreeMap<R::Key, u64>,
    next_seq: u64,
}

impl<R: Record> Default for TableState<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            index: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<R: Record> TableState<R> {
    fn get(&self, key: &R::Key) -> Option<&R> {
        self.index.get(key).and_then(|seq| self.rows.get(seq))
    }

    fn push(&mut self, record: R) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(record.key(), seq);
        self.rows.insert(seq, record);
        seq
    }

    fn apply(&mut self, entry: WalEntry<R>) {
        match entry {
            WalEntry::Put { record } => match self.index.get(&record.key()) {
                Some(&seq) => {
                    self.rows.insert(seq, record);
                }
                None => {
                    self.push(record);
                }
            },
            WalEntry::Delete { key } => {
                if let Some(seq) = self.index.remove(&key) {
                    self.rows.remove(&seq);
                }
            }
        }
    }
}

enum Undo<R: Record> {
    Inserted { key: R::Key },
    Replaced { seq: u64, previous: R },
    Removed { seq: u64, previous: R },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub rows: usize,
    pub durable: bool,
    pub wal_bytes: u64,
}

/// One record schema's rows, optionally backed by a write-ahead log.
pub struct Table<R: Record> {
    state: RwLock<TableState<R>>,
    wal: Option<Mutex<Wal>>,
}

impl<R: Record> Default for Table<R> {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<R: Record> Table<R> {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(TableState::default()),
            wal: None,
        }
    }

    /// Open `<dir>/<table>.wal`, replaying whatever it holds.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let mut wal = Wal::open(dir, R::TABLE)?;
        let mut state = TableState::default();
        let mut frames = 0usize;
        for frame in wal.replay::<R>()? {
            frames += 1;
            for entry in frame.entries {
                state.apply(entry);
            }
        }
        tracing::info!(
            table = R::TABLE,
            frames,
            rows = state.rows.len(),
            path = %wal.path().display(),
            "replayed wal"
        );
        Ok(Self {
            state: RwLock::new(state),
            wal: Some(Mutex::new(wal)),
        })
    }

    /// Start a write transaction. Holds the table's write lock until committed or dropped.
    pub fn begin(&self) -> Transaction<'_, R> {
        Transaction {
            state: self.state.write(),
            wal: self.wal.as_ref(),
            undo: Vec::new(),
            log: Vec::new(),
            committed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_durable(&self) -> bool {
        self.wal.is_some()
    }

    pub fn flush_wal(&self) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.lock().flush_sync()?;
        }
        Ok(())
    }

    /// Rewrite the log as one put per live record, in select order.
    pub fn compact(&self) -> Result<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let state = self.state.read();
        let frame = WalFrame {
            entries: state
                .rows
                .values()
                .cloned()
                .map(|record| WalEntry::Put { record })
                .collect(),
        };
        let mut wal = wal.lock();
        let before = wal.len();
        wal.rewrite(&frame)?;
        tracing::info!(
            table = R::TABLE,
            before,
            after = wal.len(),
            "compacted wal"
        );
        Ok(())
    }

    pub fn stats(&self) -> TableStats {
        let rows = self.state.read().rows.len();
        TableStats {
            rows,
            durable: self.is_durable(),
            wal_bytes: self.wal.as_ref().map(|w| w.lock().len()).unwrap_or(0),
        }
    }
}

/// Scoped write access to a table.
///
/// Changes apply to the table immediately and are visible only to this
/// transaction while it holds the lock. `commit` logs them; dropping the
/// transaction any other way (error return, panic) undoes them.
pub struct Transaction<'a, R: Record> {
    state: RwLockWriteGuard<'a, TableState<R>>,
    wal: Option<&'a Mutex<Wal>>,
    undo: Vec<Undo<R>>,
    log: Vec<WalEntry<R>>,
    committed: bool,
}

impl<R: Record> Transaction<'_, R> {
    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.state.get(key)
    }

    pub fn insert(&mut self, record: R) -> Result<()> {
        let key = record.key();
        if self.state.index.contains_key(&key) {
            return Err(TankError::Conflict {
                table: R::TABLE,
                key: key.to_string(),
            });
        }
        self.state.push(record.clone());
        self.undo.push(Undo::Inserted { key });
        self.log.push(WalEntry::Put { record });
        Ok(())
    }

    pub fn replace(&mut self, record: R) -> Result<()> {
        let key = record.key();
        let seq = *self
            .state
            .index
            .get(&key)
            .ok_or_else(|| TankError::NotFound {
                table: R::TABLE,
                key: key.to_string(),
            })?;
        if let Some(previous) = self.state.rows.insert(seq, record.clone()) {
            self.undo.push(Undo::Replaced { seq, previous });
        }
        self.log.push(WalEntry::Put { record });
        Ok(())
    }

    pub fn remove(&mut self, key: &R::Key) -> bool {
        let Some(seq) = self.state.index.remove(key) else {
            return false;
        };
        match self.state.rows.remove(&seq) {
            Some(previous) => {
                self.undo.push(Undo::Removed { seq, previous });
                self.log.push(WalEntry::Delete { key: key.clone() });
                true
            }
            None => false,
        }
    }

    pub fn commit(mut self) -> Result<()> {
        if let Some(wal) = self.wal {
            if !self.log.is_empty() {
                let frame = WalFrame {
                    entries: std::mem::take(&mut self.log),
                };
                wal.lock().append(&frame)?;
            }
        }
        self.committed = true;
        Ok(())
    }
}

impl<R: Record> Drop for Transaction<'_, R> {
    fn drop(&mut self) {
        if self.committed || self.undo.is_empty() {
            return;
        }
        let state = &mut *self.state;
        for undo in self.undo.drain(..).rev() {
            match undo {
                Undo::Inserted { key } => {
                    if let Some(seq) = state.index.remove(&key) {
                        state.rows.remove(&seq);
                    }
                }
                Undo::Replaced { seq, previous } => {
                    state.rows.insert(seq, previous);
                }
                Undo::Removed { seq, previous } => {
                    state.index.insert(previous.key(), seq);
                    state.rows.insert(seq, previous);
                }
            }
        }
        tracing::debug!(table = R::TABLE, "transaction rolled back");
    }
}

impl<R: Record> RecordStore<R> for Table<R> {
    fn select(&self, query: &Query) -> Result<Vec<R>> {
        let state = self.state.read();
        let limit = query.window.limit().unwrap_or(usize::MAX);
        let offset = query.window.offset();
        let mut out = Vec::new();
        let mut skipped = 0usize;
        for record in state.rows.values() {
            if out.len() >= limit {
                break;
            }
            if !query.matches(record)? {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(record.clone());
        }
        Ok(out)
    }

    fn select_by_key(&self, key: &R::Key) -> Result<Option<R>> {
        Ok(self.state.read().get(key).cloned())
    }

    fn insert(&self, record: &R) -> Result<()> {
        let mut tx = self.begin();
        tx.insert(record.clone())?;
        tx.commit()
    }

    fn update(&self, record: &R) -> Result<()> {
        let mut tx = self.begin();
        tx.replace(record.clone())?;
        tx.commit()
    }

    fn delete(&self, key: &R::Key) -> Result<bool> {
        let mut tx = self.begin();
        let existed = tx.remove(key);
        tx.commit()?;
        Ok(existed)
    }

    fn modify<E, F>(&self, key: &R::Key, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(Option<&R>) -> std::result::Result<R, E>,
        E: From<TankError>,
    {
        let mut tx = self.begin();
        let next = f(tx.get(key))?;
        if next.key() != *key {
            return Err(TankError::NotFound {
                table: R::TABLE,
                key: next.key().to_string(),
            }
            .into());
        }
        // unchanged records are neither rewritten nor logged
        if tx.get(key) != Some(&next) {
            tx.replace(next.clone())?;
            tx.commit()?;
        }
        Ok(next)
    }
}
