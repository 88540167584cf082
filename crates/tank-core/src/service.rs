//! Request orchestration over a [`RecordStore`].
//!
//! The service validates caller input, plans list queries against the
//! schema's filter allow-list, and maps store failures onto the small set of
//! caller-facing [`ErrorKind`]s. Nothing here knows about the transport.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorClass, TankError};
use crate::mask::{self, FieldMask, MaskError};
use crate::observe::{NoopObserver, Operation, ServiceObserver};
use crate::query::{Filter, Operator, OperatorCode, Pagination, Query, QueryError, Window};
use crate::record::{ColumnType, Record, Value};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<QueryError> for ServiceError {
    fn from(err: QueryError) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

impl From<MaskError> for ServiceError {
    fn from(err: MaskError) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// One list criterion as the caller sends it. The key is checked against the
/// schema's allow-list before it gets anywhere near a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub key: String,
    #[serde(default)]
    pub operator: OperatorCode,
    #[serde(default)]
    pub value: Value,
}

impl FilterSpec {
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound = "R: Record")]
pub struct UpdateRequest<R: Record> {
    pub record: R,
    #[serde(default)]
    pub mask: FieldMask,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record sink closed: {0}")]
pub struct SinkError(pub String);

/// Receiver of list results, one record at a time.
pub trait RecordSink<R> {
    fn send(&mut self, record: R) -> Result<(), SinkError>;
}

impl<R> RecordSink<R> for Vec<R> {
    fn send(&mut self, record: R) -> Result<(), SinkError> {
        self.push(record);
        Ok(())
    }
}

/// Why an atomic update did not happen.
enum UpdateFailure {
    Rejected(ServiceError),
    Store(TankError),
}

impl From<ServiceError> for UpdateFailure {
    fn from(err: ServiceError) -> Self {
        UpdateFailure::Rejected(err)
    }
}

impl From<TankError> for UpdateFailure {
    fn from(err: TankError) -> Self {
        UpdateFailure::Store(err)
    }
}

pub struct RecordService<R: Record, S: RecordStore<R>> {
    store: Arc<S>,
    observer: Arc<dyn ServiceObserver>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record, S: RecordStore<R>> Clone for RecordService<R, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            observer: Arc::clone(&self.observer),
            _record: PhantomData,
        }
    }
}

impl<R: Record, S: RecordStore<R>> RecordService<R, S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_observer(store, Arc::new(NoopObserver))
    }

    pub fn with_observer(store: Arc<S>, observer: Arc<dyn ServiceObserver>) -> Self {
        Self {
            store,
            observer,
            _record: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Turn a list request into a query. Keys outside the allow-list are
    /// dropped (and reported); unknown operators fall back to EQ.
    ///
    /// A rejected request is reported as a failed list; a planned one is
    /// reported once [`stream`](Self::stream) finishes.
    pub fn plan_list(&self, request: &ListRequest) -> ServiceResult<Query> {
        let planned = self.plan(request);
        if let Err(err) = &planned {
            self.observer
                .completed(R::TABLE, Operation::List, Some(err.kind()));
        }
        planned
    }

    fn plan(&self, request: &ListRequest) -> ServiceResult<Query> {
        let window = Window::from_pagination(request.pagination.as_ref())?;
        let mut filters = Vec::with_capacity(request.filters.len());
        for spec in &request.filters {
            let Some(column) = R::filter_column(&spec.key) else {
                self.observer.filter_dropped(R::TABLE, &spec.key);
                continue;
            };
            let (operator, fell_back) = spec.operator.resolve_or_eq();
            if fell_back {
                self.observer
                    .operator_fallback(R::TABLE, &spec.key, &spec.operator);
            }
            // substring search is always textual
            let kind = if operator == Operator::Contains {
                ColumnType::Text
            } else {
                column.kind
            };
            let value = kind
                .coerce(&spec.value)
                .ok_or_else(|| QueryError::InvalidValue {
                    key: spec.key.clone(),
                    expected: kind,
                })?;
            filters.push(Filter::new(column.name, operator, value));
        }
        let query = Query::new(&filters, window);
        tracing::debug!(table = R::TABLE, sql = %query.to_sql::<R>(), "planned list");
        Ok(query)
    }

    /// Run `query` and hand every record to `sink`. Returns how many were sent.
    pub fn stream(&self, query: &Query, sink: &mut dyn RecordSink<R>) -> ServiceResult<usize> {
        let result = self.stream_inner(query, sink);
        self.finish(Operation::List, &result);
        result
    }

    fn stream_inner(&self, query: &Query, sink: &mut dyn RecordSink<R>) -> ServiceResult<usize> {
        let records = self
            .store
            .select(query)
            .map_err(|err| self.store_error(Operation::List, err))?;
        let mut sent = 0;
        for record in records {
            if let Err(err) = sink.send(record) {
                self.observer
                    .stream_aborted(R::TABLE, sent, &err.to_string());
                return Err(ServiceError::internal(format!(
                    "failed to send {} list: {err}",
                    R::NAME
                )));
            }
            sent += 1;
        }
        self.observer.streamed(R::TABLE, sent);
        Ok(sent)
    }

    /// Plan and stream in one go.
    pub fn list(
        &self,
        request: &ListRequest,
        sink: &mut dyn RecordSink<R>,
    ) -> ServiceResult<usize> {
        let query = self.plan_list(request)?;
        self.stream(&query, sink)
    }

    pub fn get(&self, key: &R::Key) -> ServiceResult<R> {
        let result = self
            .store
            .select_by_key(key)
            .map_err(|err| self.store_error(Operation::Get, err))
            .and_then(|found| found.ok_or_else(|| self.missing(key)));
        self.finish(Operation::Get, &result);
        result
    }

    pub fn create(&self, record: R) -> ServiceResult<()> {
        let result = self.create_inner(&record);
        self.finish(Operation::Create, &result);
        result
    }

    fn create_inner(&self, record: &R) -> ServiceResult<()> {
        let key = record.key();
        if R::key_is_unset(&key) {
            return Err(ServiceError::invalid_argument(format!(
                "{} {} must be set",
                R::NAME,
                R::KEY
            )));
        }
        record.validate().map_err(ServiceError::invalid_argument)?;
        self.store.insert(record).map_err(|err| match err.class() {
            ErrorClass::Conflict => ServiceError::already_exists(format!(
                "{} with {} {key} already exists",
                R::NAME,
                R::KEY
            )),
            _ => self.store_error(Operation::Create, err),
        })
    }

    /// Merge the masked fields of `partial` onto the stored record for `key`.
    /// The key inside `partial` is ignored.
    pub fn update(&self, key: &R::Key, partial: &R, mask: &FieldMask) -> ServiceResult<R> {
        let result = self.update_inner(key, partial, mask);
        self.finish(Operation::Update, &result);
        result
    }

    fn update_inner(&self, key: &R::Key, partial: &R, mask: &FieldMask) -> ServiceResult<R> {
        // merge against the record as it is under the store's write lock
        let merged = self.store.modify(key, |current| -> Result<R, UpdateFailure> {
            let current = current.ok_or_else(|| self.missing(key))?;
            let merged = mask::merge(current, partial, mask).map_err(ServiceError::from)?;
            merged.validate().map_err(ServiceError::invalid_argument)?;
            Ok(merged)
        });
        merged.map_err(|failure| match failure {
            UpdateFailure::Rejected(err) => err,
            UpdateFailure::Store(err) => match err.class() {
                ErrorClass::NotFound => self.missing(key),
                _ => self.store_error(Operation::Update, err),
            },
        })
    }

    /// Succeeds whether or not the record existed.
    pub fn delete(&self, key: &R::Key) -> ServiceResult<()> {
        let result = match self.store.delete(key) {
            Ok(existed) => {
                if !existed {
                    tracing::debug!(table = R::TABLE, %key, "delete of absent record");
                }
                Ok(())
            }
            Err(err) => Err(self.store_error(Operation::Delete, err)),
        };
        self.finish(Operation::Delete, &result);
        result
    }

    fn missing(&self, key: &R::Key) -> ServiceError {
        ServiceError::not_found(format!("no {} with {} {key} found", R::NAME, R::KEY))
    }

    fn store_error(&self, op: Operation, err: TankError) -> ServiceError {
        self.observer.store_failed(R::TABLE, op, &err);
        ServiceError::internal(format!("failed to {op} {}", R::NAME))
    }

    fn finish<T>(&self, op: Operation, result: &ServiceResult<T>) {
        let kind = result.as_ref().err().map(ServiceError::kind);
        self.observer.completed(R::TABLE, op, kind);
    }
}
