//! The client bridge: newline-delimited JSON over a local socket.
//!
//! One listener; every request line becomes a task on a bounded worker
//! pool. Requests beyond the queue limit are answered with `busy`.
//! Responses carry the request id, so clients may pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use nero_core::{RecordKey, BRIDGE_QUEUE_LIMIT, BRIDGE_WORKERS};
use nero_dht::{Engine, EngineError};
use nero_proto::{BridgeRequest, BridgeResponse, ErrorKind, RecordTag, Record};
use nero_store::{MappingsIndex, StoreError};

/// The bridge server state shared across connections.
pub struct BridgeServer {
    engine: Arc<Engine>,
    mappings: Arc<MappingsIndex>,
    workers: Arc<Semaphore>,
    queued: AtomicUsize,
}

impl BridgeServer {
    /// Creates a bridge over the engine and the mappings index.
    pub fn new(engine: Arc<Engine>, mappings: Arc<MappingsIndex>) -> Self {
        Self {
            engine,
            mappings,
            workers: Arc::new(Semaphore::new(BRIDGE_WORKERS)),
            queued: AtomicUsize::new(0),
        }
    }

    /// Accept loop over the local socket.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "bridge accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: tokio::net::UnixStream) {
        let (reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            if self.queued.load(Ordering::Relaxed) >= BRIDGE_QUEUE_LIMIT {
                let id = request_id_of(&line);
                let response = BridgeResponse::err(id, ErrorKind::Busy, "worker pool saturated");
                Self::write_response(&writer, &response).await;
                continue;
            }

            self.queued.fetch_add(1, Ordering::Relaxed);
            let server = self.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                let _permit = server.workers.acquire().await;
                let response = server.dispatch_line(&line).await;
                server.queued.fetch_sub(1, Ordering::Relaxed);
                Self::write_response(&writer, &response).await;
            });
        }
    }

    async fn write_response(
        writer: &Arc<Mutex<tokio::net::unix::OwnedWriteHalf>>,
        response: &BridgeResponse,
    ) {
        let mut line = serde_json::to_vec(response).unwrap_or_default();
        line.push(b'\n');
        let mut writer = writer.lock().await;
        if writer.write_all(&line).await.is_err() {
            debug!("bridge client went away mid-response");
        }
    }

    async fn dispatch_line(&self, line: &str) -> BridgeResponse {
        let request: BridgeRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return BridgeResponse::err(
                    request_id_of(line),
                    ErrorKind::Invalid,
                    format!("malformed request: {e}"),
                )
            }
        };
        self.dispatch(request).await
    }

    /// Executes one bridge request.
    pub async fn dispatch(&self, request: BridgeRequest) -> BridgeResponse {
        let id = request.id;
        debug!(id, method = %request.method, "bridge request");

        let result = match request.method.as_str() {
            "put" => self.handle_put(&request.params).await,
            "get" => self.handle_get(&request.params).await,
            "remove" => self.handle_remove(&request.params).await,
            "map" => self.handle_map(&request.params),
            "search" => self.handle_search(&request.params),
            "status" => self.handle_status(),
            "clear" => self.handle_clear(),
            other => Err((ErrorKind::Invalid, format!("unknown method: {other}"))),
        };

        match result {
            Ok(response) => BridgeResponse::ok(id, response),
            Err((code, message)) => BridgeResponse::err(id, code, message),
        }
    }

    async fn handle_put(&self, params: &Value) -> Result<Value, (ErrorKind, String)> {
        let key = parse_key(params, "key")?;
        let value = require_str(params, "value")?;
        let ttl = params.get("ttl").and_then(Value::as_u64).unwrap_or(0);

        if RecordKey::from_value(value.as_bytes()) != key {
            return Err((
                ErrorKind::Invalid,
                "key/value hash mismatch".to_string(),
            ));
        }

        let record = Record::new(value.to_string(), ttl, Some(*self.engine.self_id()));

        let stored = self
            .engine
            .publish(record)
            .await
            .map_err(engine_error)?;
        Ok(json!({ "stored": stored }))
    }

    async fn handle_get(&self, params: &Value) -> Result<Value, (ErrorKind, String)> {
        let key = parse_key(params, "key")?;
        let record = self
            .engine
            .iterative_find_value(&key)
            .await
            .map_err(engine_error)?;
        Ok(json!({ "value": record.value }))
    }

    async fn handle_remove(&self, params: &Value) -> Result<Value, (ErrorKind, String)> {
        let key = parse_key(params, "key")?;
        let removed = self.engine.remove_record(&key);
        let purged = self
            .mappings
            .purge_key(&key)
            .map_err(store_error)?;
        Ok(json!({ "removed": removed, "purged": purged }))
    }

    fn handle_map(&self, params: &Value) -> Result<Value, (ErrorKind, String)> {
        let term = require_str(params, "search_term")?;
        let key = parse_key(params, "key")?;
        let content = require_str(params, "content")?;

        content
            .parse::<RecordTag>()
            .map_err(|e| (ErrorKind::Invalid, e.to_string()))?;

        let mapped = self
            .mappings
            .add(term, &key, content)
            .map_err(store_error)?;
        Ok(json!({ "mapped": mapped }))
    }

    fn handle_search(&self, params: &Value) -> Result<Value, (ErrorKind, String)> {
        let term = require_str(params, "term")?;

        let mut rows = self.mappings.search(term).map_err(store_error)?;
        if rows.is_empty() {
            rows = self.mappings.search_text(term).map_err(store_error)?;
        }

        let results: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "search_term": row.search_term,
                    "key": row.key,
                    "content": row.content,
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }

    fn handle_status(&self) -> Result<Value, (ErrorKind, String)> {
        serde_json::to_value(self.engine.status())
            .map_err(|e| (ErrorKind::Storage, e.to_string()))
    }

    fn handle_clear(&self) -> Result<Value, (ErrorKind, String)> {
        let dropped = self.engine.store().len();
        self.engine.store().clear();
        Ok(json!({ "cleared": dropped }))
    }
}

fn request_id_of(line: &str) -> u64 {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64))
        .unwrap_or(0)
}

fn require_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, (ErrorKind, String)> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| (ErrorKind::Invalid, format!("missing parameter: {field}")))
}

fn parse_key(params: &Value, field: &str) -> Result<RecordKey, (ErrorKind, String)> {
    let hex = require_str(params, field)?;
    RecordKey::from_hex(hex).map_err(|e| (ErrorKind::Invalid, format!("bad key: {e}")))
}

fn engine_error(e: EngineError) -> (ErrorKind, String) {
    let code = match &e {
        EngineError::NotFound => ErrorKind::NotFound,
        EngineError::Timeout => ErrorKind::Timeout,
        EngineError::Rejected(_) => ErrorKind::Invalid,
        EngineError::Transport(_) | EngineError::UnexpectedResponse => ErrorKind::Transport,
    };
    (code, e.to_string())
}

fn store_error(e: StoreError) -> (ErrorKind, String) {
    (ErrorKind::Storage, e.to_string())
}
