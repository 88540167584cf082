pub mod error;
pub mod mask;
pub mod observe;
pub mod query;
pub mod record;
pub mod service;
pub mod store;
pub mod system;
pub mod table;
pub mod tank;
pub mod wal;

pub use error::{ErrorClass, Result, TankError};
pub use mask::{merge, FieldMask, MaskError};
pub use observe::{
    MetricsSnapshot, NoopObserver, Operation, ServiceMetrics, ServiceObserver, TracingObserver,
};
pub use query::{Filter, Operator, OperatorCode, Pagination, Query, QueryError, Window};
pub use record::{Column, ColumnType, Record, Value};
pub use service::{
    ErrorKind, FilterSpec, ListRequest, RecordService, RecordSink, ServiceError, ServiceResult,
    SinkError, UpdateRequest,
};
pub use store::RecordStore;
pub use system::{System, SystemType};
pub use table::{Table, TableStats, Transaction};
pub use tank::Tank;
