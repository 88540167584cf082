use crate::error::{Result, TankError};
use crate::query::Query;
use crate::record::Record;

/// Commands and queries the service needs from storage.
///
/// Writes are atomic: a failed `insert` or `update` leaves nothing behind.
/// Only `Conflict` and `NotFound` are classified; everything else is opaque.
pub trait RecordStore<R: Record>: Send + Sync {
    /// Records matching the predicate, windowed, in store order.
    fn select(&self, query: &Query) -> Result<Vec<R>>;

    fn select_by_key(&self, key: &R::Key) -> Result<Option<R>>;

    /// Fails with `Conflict` when the key is taken.
    fn insert(&self, record: &R) -> Result<()>;

    /// Replace every non-key field. Fails with `NotFound` when the key is absent.
    fn update(&self, record: &R) -> Result<()>;

    /// Returns whether a record was removed. Absent keys are not an error.
    fn delete(&self, key: &R::Key) -> Result<bool>;

    /// Read-modify-write of one record with no other write in between.
    ///
    /// `f` sees the stored record (`None` when absent) and returns its
    /// replacement, which must keep the key. An error from `f` writes nothing.
    fn modify<E, F>(&self, key: &R::Key, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(Option<&R>) -> std::result::Result<R, E>,
        E: From<TankError>;
}
