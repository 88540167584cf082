//! HTTP RPC surface over the tank and system record services.

pub mod config;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tank_core::{
    ErrorKind, ListRequest, Record, RecordService, RecordSink, ServiceError, ServiceMetrics,
    ServiceObserver, ServiceResult, SinkError, System, Table, TableStats, Tank, TracingObserver,
    UpdateRequest,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing_subscriber::EnvFilter;

pub use config::ServerConfig;

/// Shared handles for every route.
#[derive(Clone)]
pub struct AppState {
    tanks: Arc<Table<Tank>>,
    systems: Arc<Table<System>>,
    metrics: Arc<ServiceMetrics>,
    stream_buffer: usize,
}

impl AppState {
    pub fn new(tanks: Table<Tank>, systems: Table<System>, stream_buffer: usize) -> Self {
        Self {
            tanks: Arc::new(tanks),
            systems: Arc::new(systems),
            metrics: Arc::new(ServiceMetrics::new()),
            stream_buffer: stream_buffer.max(1),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Table::in_memory(),
            Table::in_memory(),
            config::DEFAULT_STREAM_BUFFER,
        )
    }

    pub fn open(config: &ServerConfig) -> anyhow::Result<Self> {
        let state = match &config.data_dir {
            Some(dir) => Self::new(Table::open(dir)?, Table::open(dir)?, config.stream_buffer),
            None => {
                tracing::warn!("TANK_DATA not set, records will not survive a restart");
                Self::new(Table::in_memory(), Table::in_memory(), config.stream_buffer)
            }
        };
        Ok(state)
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    fn observer(&self) -> Arc<dyn ServiceObserver> {
        Arc::new(TracingObserver::new(self.metrics.clone()))
    }

    fn kind<R: Record>(&self, table: &Arc<Table<R>>) -> Kind<R> {
        Kind {
            service: RecordService::with_observer(table.clone(), self.observer()),
            stream_buffer: self.stream_buffer,
        }
    }

    pub fn flush(&self) -> tank_core::Result<()> {
        self.tanks.flush_wal()?;
        self.systems.flush_wal()
    }

    pub fn compact(&self) -> tank_core::Result<()> {
        self.tanks.compact()?;
        self.systems.compact()
    }

    fn table_stats(&self) -> [(&'static str, TableStats); 2] {
        [
            (<Tank as Record>::TABLE, self.tanks.stats()),
            (<System as Record>::TABLE, self.systems.stats()),
        ]
    }
}

/// Per-schema route state.
#[derive(Clone)]
struct Kind<R: Record> {
    service: RecordService<R, Table<R>>,
    stream_buffer: usize,
}

pub fn router(state: AppState) -> Router {
    let tanks = record_routes(state.kind(&state.tanks));
    let systems = record_routes(state.kind(&state.systems));
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
        .nest("/v1/tanks", tanks)
        .nest("/v1/systems", systems)
}

fn record_routes<R: Record>(kind: Kind<R>) -> Router {
    Router::new()
        .route("/", post(create_record::<R>))
        .route("/list", post(list_records::<R>))
        .route(
            "/:key",
            get(get_record::<R>)
                .patch(update_record::<R>)
                .delete(delete_record::<R>),
        )
        .with_state(kind)
}

pub async fn serve() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env()?;
    run(config).await
}

/// Open the tables, start background maintenance and serve until ctrl-c.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let state = AppState::open(&config)?;

    // background WAL flusher (group commit).
    if config.data_dir.is_some() {
        let state = state.clone();
        let period = config.wal_flush;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                maintain(&state, "flush", AppState::flush).await;
            }
        });
    }

    if let (Some(_), Some(period)) = (&config.data_dir, config.compact_interval) {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                maintain(&state, "compaction", AppState::compact).await;
            }
        });
    }

    let app = router(state.clone());
    let listener = TcpListener::bind(config.listen).await?;
    tracing::info!(addr = %config.listen, durable = config.data_dir.is_some(), "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.flush()?;
    tracing::info!("shut down");
    Ok(())
}

/// One WAL maintenance pass on the blocking pool, since it fsyncs.
async fn maintain(
    state: &AppState,
    what: &'static str,
    job: fn(&AppState) -> tank_core::Result<()>,
) -> bool {
    let state = state.clone();
    match tokio::task::spawn_blocking(move || job(&state)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!("wal {what} failed: {e}");
            false
        }
        Err(e) => {
            tracing::warn!("wal {what} task failed: {e}");
            false
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.snapshot();
    let mut body = String::new();
    for op in &m.operations {
        let name = op.operation.as_str();
        let _ = writeln!(body, "tank_requests_total{{op=\"{name}\",outcome=\"ok\"}} {}", op.ok);
        let _ = writeln!(
            body,
            "tank_requests_total{{op=\"{name}\",outcome=\"error\"}} {}",
            op.failed
        );
    }
    let _ = writeln!(body, "tank_filters_dropped_total {}", m.filters_dropped);
    let _ = writeln!(body, "tank_operator_fallbacks_total {}", m.operator_fallbacks);
    let _ = writeln!(body, "tank_store_errors_total {}", m.store_errors);
    let _ = writeln!(body, "tank_streams_aborted_total {}", m.streams_aborted);
    let _ = writeln!(body, "tank_records_streamed_total {}", m.records_streamed);
    for (table, stats) in state.table_stats() {
        let _ = writeln!(body, "tank_table_rows{{table=\"{table}\"}} {}", stats.rows);
        let _ = writeln!(body, "tank_wal_bytes{{table=\"{table}\"}} {}", stats.wal_bytes);
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn list_records<R: Record>(
    State(kind): State<Kind<R>>,
    payload: Result<Json<ListRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let query = kind.service.plan_list(&request)?;
    let (tx, rx) = mpsc::channel(kind.stream_buffer);
    let service = kind.service.clone();
    tokio::task::spawn_blocking(move || {
        let mut sink = ChannelSink { tx };
        if let Err(err) = service.stream(&query, &mut sink) {
            // headers are gone already; failing the body is the only signal left
            let abort = std::io::Error::other(err.message().to_string());
            let _ = sink.tx.blocking_send(Err(abort));
        }
    });
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

/// Feeds list results into the response body, one JSON line per record.
struct ChannelSink {
    tx: mpsc::Sender<std::io::Result<String>>,
}

impl<R: Record> RecordSink<R> for ChannelSink {
    fn send(&mut self, record: R) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(&record).map_err(|e| SinkError(e.to_string()))?;
        line.push('\n');
        self.tx
            .blocking_send(Ok(line))
            .map_err(|_| SinkError("client went away".into()))
    }
}

async fn get_record<R: Record>(
    State(kind): State<Kind<R>>,
    key: Result<Path<R::Key>, PathRejection>,
) -> Result<Json<R>, ApiError> {
    let Path(key) = key?;
    let record = blocking(move || kind.service.get(&key)).await?;
    Ok(Json(record))
}

async fn create_record<R: Record>(
    State(kind): State<Kind<R>>,
    payload: Result<Json<R>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(record) = payload?;
    blocking(move || kind.service.create(record)).await?;
    Ok((StatusCode::CREATED, Json(json!({}))))
}

async fn update_record<R: Record>(
    State(kind): State<Kind<R>>,
    key: Result<Path<R::Key>, PathRejection>,
    payload: Result<Json<UpdateRequest<R>>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Path(key) = key?;
    let Json(request) = payload?;
    blocking(move || kind.service.update(&key, &request.record, &request.mask)).await?;
    Ok(Json(json!({})))
}

async fn delete_record<R: Record>(
    State(kind): State<Kind<R>>,
    key: Result<Path<R::Key>, PathRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Path(key) = key?;
    blocking(move || kind.service.delete(&key)).await?;
    Ok(Json(json!({})))
}

/// Run a store-touching service call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e)))?
        .map_err(ApiError::from)
}

#[derive(Debug)]
enum ApiError {
    Service(ServiceError),
    BadRequest(String),
    Internal(anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: ErrorKind,
    message: &'a str,
}

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        ApiError::Service(value)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        ApiError::BadRequest(value.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(value: PathRejection) -> Self {
        ApiError::BadRequest(value.body_text())
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match &self {
            ApiError::Service(err) => (err.kind(), err.message()),
            ApiError::BadRequest(msg) => (ErrorKind::InvalidArgument, msg.as_str()),
            ApiError::Internal(err) => {
                tracing::error!("api_error" = %err);
                (ErrorKind::Internal, "internal error")
            }
        };
        (status_for(code), Json(ErrorBody { code, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use super::*;

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, String)> {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = router(state.clone()).oneshot(req.body(body)?).await?;
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await?;
        Ok((status, String::from_utf8(bytes.to_vec())?))
    }

    async fn call_json(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, Value)> {
        let (status, text) = call(state, method, uri, body).await?;
        Ok((status, serde_json::from_str(&text)?))
    }

    fn tank(number: u32, system: &str, size: i32, fish_count: i32) -> Value {
        json!({
            "number": number,
            "system": system,
            "active": true,
            "size": size,
            "fish_count": fish_count,
        })
    }

    async fn list(state: &AppState, request: Value) -> anyhow::Result<Vec<u32>> {
        let (status, text) = call(state, "POST", "/v1/tanks/list", Some(request)).await?;
        assert_eq!(status, StatusCode::OK);
        text.lines()
            .map(|line| -> anyhow::Result<u32> {
                let record: Tank = serde_json::from_str(line)?;
                Ok(record.number)
            })
            .collect()
    }

    #[tokio::test]
    async fn health_is_ok() -> anyhow::Result<()> {
        let state = AppState::in_memory();
        assert_eq!(
            call(&state, "GET", "/healthz", None).await?,
            (StatusCode::OK, "ok".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn record_lifecycle_over_http() -> anyhow::Result<()> {
        let state = AppState::in_memory();

        let created = Some(tank(7, "A", 50, 10));
        let (status, body) = call_json(&state, "POST", "/v1/tanks", created).await?;
        assert_eq!((status, body), (StatusCode::CREATED, json!({})));

        let (status, body) = call_json(&state, "GET", "/v1/tanks/7", None).await?;
        assert_eq!((status, body), (StatusCode::OK, tank(7, "A", 50, 10)));

        let update = json!({ "record": { "fishCount": 20 }, "mask": ["fishCount"] });
        let (status, _) = call_json(&state, "PATCH", "/v1/tanks/7", Some(update)).await?;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call_json(&state, "GET", "/v1/tanks/7", None).await?;
        assert_eq!(body, tank(7, "A", 50, 20));

        for _ in 0..2 {
            let (status, body) = call_json(&state, "DELETE", "/v1/tanks/7", None).await?;
            assert_eq!((status, body), (StatusCode::OK, json!({})));
        }
        let (status, body) = call_json(&state, "GET", "/v1/tanks/7", None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
        assert_eq!(body["message"], "no tank with number 7 found");
        Ok(())
    }

    #[tokio::test]
    async fn error_kinds_map_to_status_codes() -> anyhow::Result<()> {
        let state = AppState::in_memory();
        call(&state, "POST", "/v1/tanks", Some(tank(1, "A", 10, 1))).await?;

        let created = Some(tank(1, "B", 10, 1));
        let (status, body) = call_json(&state, "POST", "/v1/tanks", created).await?;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "ALREADY_EXISTS");

        let created = Some(tank(0, "B", 10, 1));
        let (status, body) = call_json(&state, "POST", "/v1/tanks", created).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");

        let (status, _) = call_json(&state, "GET", "/v1/tanks/seven", None).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let update = json!({ "record": {}, "mask": ["colour"] });
        let (status, _) = call_json(&state, "PATCH", "/v1/tanks/1", Some(update)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let update = json!({ "record": { "size": 3 }, "mask": ["size"] });
        let (status, _) = call_json(&state, "PATCH", "/v1/tanks/2", Some(update)).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call_json(
            &state,
            "POST",
            "/v1/tanks/list",
            Some(json!({ "pagination": { "limit": 1, "offset": -1 } })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");
        Ok(())
    }

    #[tokio::test]
    async fn list_streams_filtered_window() -> anyhow::Result<()> {
        let state = AppState::in_memory();
        let rows = [
            (1, "rack-a", 10),
            (2, "rack-b", 40),
            (3, "rack-a", 60),
            (4, "shelf", 80),
        ];
        for (n, sys, size) in rows {
            call(&state, "POST", "/v1/tanks", Some(tank(n, sys, size, 0))).await?;
        }
        assert_eq!(list(&state, json!({})).await?, vec![1, 2, 3, 4]);
        let request = json!({
            "filters": [
                { "key": "system", "operator": "CONTAINS", "value": "rack" },
                { "key": "size", "operator": 2, "value": 40 },
                { "key": "colour", "value": "red" },
            ],
        });
        assert_eq!(list(&state, request).await?, vec![2, 3]);
        let request = json!({ "pagination": { "limit": 2, "offset": 1 } });
        assert_eq!(list(&state, request).await?, vec![2, 3]);
        let request = json!({ "pagination": { "limit": 0, "offset": 3 } });
        assert_eq!(list(&state, request).await?, vec![4]);

        let snapshot = state.metrics().snapshot();
        assert_eq!(snapshot.filters_dropped, 1);
        assert_eq!(snapshot.records_streamed, 4 + 2 + 2 + 1);
        Ok(())
    }

    #[tokio::test]
    async fn list_with_small_buffer_streams_everything() -> anyhow::Result<()> {
        let state = AppState::new(Table::in_memory(), Table::in_memory(), 1);
        for n in 1..=20 {
            call(&state, "POST", "/v1/tanks", Some(tank(n, "A", 1, 1))).await?;
        }
        assert_eq!(list(&state, json!({})).await?, (1..=20).collect::<Vec<u32>>());
        Ok(())
    }

    #[tokio::test]
    async fn systems_are_served_separately() -> anyhow::Result<()> {
        let state = AppState::in_memory();
        let system = json!({
            "name": "alpha",
            "location": "lab 2",
            "type": "techniplast",
            "responsible": "kim",
            "cleaningInterval": 14,
            "lastCleaned": "2024-05-01",
        });
        let (status, _) = call(&state, "POST", "/v1/systems", Some(system)).await?;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call_json(&state, "GET", "/v1/systems/alpha", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleaning_interval"], 14);
        assert_eq!(body["last_cleaned"], "2024-05-01");

        let request = json!({ "filters": [{ "key": "id", "value": "alpha" }] });
        let (status, text) = call(&state, "POST", "/v1/systems/list", Some(request)).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text.lines().count(), 1);

        let (status, _) = call(&state, "GET", "/v1/tanks/1", None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_lists_count_as_failed() -> anyhow::Result<()> {
        let state = AppState::in_memory();
        let request = json!({ "pagination": { "limit": 1, "offset": -1 } });
        let (status, _) = call(&state, "POST", "/v1/tanks/list", Some(request)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let request = json!({ "filters": [{ "key": "size", "value": "huge" }] });
        let (status, _) = call(&state, "POST", "/v1/tanks/list", Some(request)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, text) = call(&state, "GET", "/metrics", None).await?;
        assert!(text.contains("tank_requests_total{op=\"list\",outcome=\"error\"} 2"));
        assert!(text.contains("tank_requests_total{op=\"list\",outcome=\"ok\"} 0"));
        Ok(())
    }

    #[tokio::test]
    async fn metrics_report_counters_and_tables() -> anyhow::Result<()> {
        let state = AppState::in_memory();
        call(&state, "POST", "/v1/tanks", Some(tank(1, "A", 1, 1))).await?;
        call(&state, "GET", "/v1/tanks/2", None).await?;
        let (status, text) = call(&state, "GET", "/metrics", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("tank_requests_total{op=\"create\",outcome=\"ok\"} 1"));
        assert!(text.contains("tank_requests_total{op=\"get\",outcome=\"error\"} 1"));
        assert!(text.contains("tank_table_rows{table=\"tanks\"} 1"));
        assert!(text.contains("tank_table_rows{table=\"systems\"} 0"));
        Ok(())
    }

    #[tokio::test]
    async fn durable_state_survives_reopen() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let config = ServerConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        };
        {
            let state = AppState::open(&config)?;
            call(&state, "POST", "/v1/tanks", Some(tank(3, "A", 5, 2))).await?;
            call(&state, "POST", "/v1/tanks", Some(tank(4, "A", 5, 2))).await?;
            call(&state, "DELETE", "/v1/tanks/3", None).await?;
            state.flush()?;
            state.compact()?;
        }
        let state = AppState::open(&config)?;
        assert_eq!(list(&state, json!({})).await?, vec![4]);
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn maintenance_runs_beside_a_single_worker() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let config = ServerConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        };
        {
            let state = AppState::open(&config)?;
            call(&state, "POST", "/v1/tanks", Some(tank(5, "B", 1, 1))).await?;
            assert!(maintain(&state, "flush", AppState::flush).await);
            assert!(maintain(&state, "compaction", AppState::compact).await);
        }
        let state = AppState::open(&config)?;
        assert_eq!(list(&state, json!({})).await?, vec![5]);
        Ok(())
    }
}
