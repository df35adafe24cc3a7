//! ==============================================================================
//! store.rs - realtime database client
//! ==============================================================================
//!
//! purpose:
//!     the node's only link to the cloud. the realtime database is a json
//!     tree addressed by key paths; the node needs five operations on it:
//!     - set   (PUT)  overwrite a location     -> latest, history, labs/{id}/ac
//!     - push  (POST) append under a new key   -> events/{id}
//!     - get   (GET)  read a boolean           -> labs/{id}/ac
//!     - query (GET)  last N children by field -> events/{id}
//!     - a connectivity probe                  -> readiness
//!
//! readiness:
//!     callers check `is_ready()` before every remote operation and skip the
//!     operation when it is false. the firebase client is ready once a probe
//!     succeeded; a transport failure (connect/timeout) drops it back to
//!     offline until the next successful probe.
//!
//! relationships:
//!     - used by: node.rs (control loop), main.rs (startup connect)
//!     - uses: reqwest (REST transport), paths.rs (key paths)
//!
//! ==============================================================================

use crate::config::DatabaseConfig;
use crate::paths::KeyPath;

use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store not ready")]
    NotReady,
    #[error("connection failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("unexpected payload: {0}")]
    Decode(String),
}

pub trait RemoteStore: Send + Sync {
    fn is_ready(&self) -> bool;

    /// one connectivity probe; marks the store ready on success
    fn connect(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set(&self, path: &KeyPath, value: &Value) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// returns the generated child key
    fn push(&self, path: &KeyPath, value: &Value) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// None when nothing is stored at `path`
    fn get_bool(&self, path: &KeyPath) -> impl Future<Output = Result<Option<bool>, StoreError>> + Send;

    /// the last `limit` children of `path` by their `order_by` field, oldest
    /// first, each with its key
    fn last_children(
        &self,
        path: &KeyPath,
        order_by: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(String, Value)>, StoreError>> + Send;
}

/// children without a numeric `order_by` field sort first
fn newest(mut children: Vec<(String, Value)>, order_by: &str, limit: usize) -> Vec<(String, Value)> {
    let rank = |child: &(String, Value)| child.1.get(order_by).and_then(Value::as_f64).unwrap_or(f64::MIN);
    children.sort_by(|a, b| rank(a).total_cmp(&rank(b)));
    let skip = children.len().saturating_sub(limit);
    children.split_off(skip)
}

// ==============================================================================
// firebase realtime database over REST
// ==============================================================================

pub struct FirebaseStore {
    client: reqwest::Client,
    base_url: String,
    secret: String,
    online: AtomicBool,
}

impl FirebaseStore {
    pub fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
            online: AtomicBool::new(false),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// startup connect: probe up to `attempts` times, `delay` apart
    pub async fn connect_with_retry(&self, attempts: u32, delay: Duration) -> Result<(), StoreError> {
        let mut last = StoreError::NotReady;
        for attempt in 1..=attempts.max(1) {
            match self.connect().await {
                Ok(()) => return Ok(()),
                // only a dead link is worth waiting for
                Err(StoreError::Transport(e)) => {
                    tracing::debug!("[STORE] probe {}/{} failed: {}", attempt, attempts, e);
                    last = StoreError::Transport(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    fn url(&self, path: &KeyPath) -> String {
        format!("{}{}.json", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &KeyPath) -> reqwest::RequestBuilder {
        let request = self.client.request(method, self.url(path));
        if self.secret.is_empty() {
            request
        } else {
            request.query(&[("auth", self.secret.as_str())])
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        if !self.is_configured() {
            return Err(StoreError::NotReady);
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    self.online.store(false, Ordering::SeqCst);
                }
                return Err(StoreError::Transport(e));
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(StoreError::Transport)?;
        if !status.is_success() {
            return Err(StoreError::Http { status: status.as_u16(), reason: error_reason(&body) });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

/// the database answers errors as `{"error": "..."}`; fall back to the raw body
fn error_reason(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

impl RemoteStore for FirebaseStore {
    fn is_ready(&self) -> bool {
        self.is_configured() && self.online.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), StoreError> {
        let probe = self
            .request(reqwest::Method::GET, &KeyPath::root())
            .query(&[("shallow", "true")]);
        self.send(probe).await?;
        self.online.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn set(&self, path: &KeyPath, value: &Value) -> Result<(), StoreError> {
        self.send(self.request(reqwest::Method::PUT, path).json(value)).await?;
        Ok(())
    }

    async fn push(&self, path: &KeyPath, value: &Value) -> Result<String, StoreError> {
        let created = self.send(self.request(reqwest::Method::POST, path).json(value)).await?;
        created
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Decode(format!("push response without name: {}", created)))
    }

    async fn get_bool(&self, path: &KeyPath) -> Result<Option<bool>, StoreError> {
        match self.send(self.request(reqwest::Method::GET, path)).await? {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(b)),
            other => Err(StoreError::Decode(format!("expected bool at {}, got {}", path, other))),
        }
    }

    /// needs an `.indexOn` rule for `order_by` in the database rules
    async fn last_children(&self, path: &KeyPath, order_by: &str, limit: usize) -> Result<Vec<(String, Value)>, StoreError> {
        let order_by_param = format!("\"{}\"", order_by);
        let limit_param = limit.to_string();
        let query = self
            .request(reqwest::Method::GET, path)
            .query(&[("orderBy", order_by_param.as_str()), ("limitToLast", limit_param.as_str())]);
        // the REST answer is an object keyed by child name, not in query order
        match self.send(query).await? {
            Value::Null => Ok(Vec::new()),
            Value::Object(children) => Ok(newest(children.into_iter().collect(), order_by, limit)),
            other => Err(StoreError::Decode(format!("expected children at {}, got {}", path, other))),
        }
    }
}

// ==============================================================================
// in-memory store (tests)
// ==============================================================================

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::{Mutex, MutexGuard};

    #[derive(Default)]
    struct Inner {
        ready: bool,
        values: BTreeMap<String, Value>,
        writes: Vec<(String, Value)>,
        pushes: Vec<(String, Value)>,
        reads: usize,
        connects: usize,
        failing: HashSet<String>,
        next_key: u64,
        latency: Duration,
    }

    /// records every operation; writes to `fail_writes_to` paths answer HTTP 500.
    /// `set_latency` slows down probes and reads the way a bad link does.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
    }

    impl MemoryStore {
        pub fn ready() -> Self {
            let store = Self::default();
            store.set_ready(true);
            store
        }

        fn inner(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap()
        }

        pub fn set_ready(&self, ready: bool) {
            self.inner().ready = ready;
        }

        /// an external writer (dashboard) changes a value
        pub fn put(&self, path: &str, value: Value) {
            self.inner().values.insert(path.to_string(), value);
        }

        pub fn value(&self, path: &str) -> Option<Value> {
            self.inner().values.get(path).cloned()
        }

        pub fn writes(&self) -> Vec<(String, Value)> {
            self.inner().writes.clone()
        }

        pub fn pushes(&self) -> Vec<(String, Value)> {
            self.inner().pushes.clone()
        }

        pub fn reads(&self) -> usize {
            self.inner().reads
        }

        pub fn connects(&self) -> usize {
            self.inner().connects
        }

        pub fn fail_writes_to(&self, path: &str) {
            self.inner().failing.insert(path.to_string());
        }

        pub fn set_latency(&self, latency: Duration) {
            self.inner().latency = latency;
        }

        async fn lag(&self) {
            let latency = self.inner().latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
        }
    }

    impl RemoteStore for MemoryStore {
        fn is_ready(&self) -> bool {
            self.inner().ready
        }

        async fn connect(&self) -> Result<(), StoreError> {
            self.lag().await;
            let mut inner = self.inner();
            inner.connects += 1;
            if inner.ready { Ok(()) } else { Err(StoreError::NotReady) }
        }

        async fn set(&self, path: &KeyPath, value: &Value) -> Result<(), StoreError> {
            let mut inner = self.inner();
            let key = path.to_string();
            if inner.failing.contains(&key) {
                return Err(StoreError::Http { status: 500, reason: "write rejected".to_string() });
            }
            inner.writes.push((key.clone(), value.clone()));
            inner.values.insert(key, value.clone());
            Ok(())
        }

        async fn push(&self, path: &KeyPath, value: &Value) -> Result<String, StoreError> {
            let mut inner = self.inner();
            inner.next_key += 1;
            let name = format!("-key{}", inner.next_key);
            inner.pushes.push((path.to_string(), value.clone()));
            inner.values.insert(format!("{}/{}", path, name), value.clone());
            Ok(name)
        }

        async fn get_bool(&self, path: &KeyPath) -> Result<Option<bool>, StoreError> {
            self.lag().await;
            let mut inner = self.inner();
            inner.reads += 1;
            match inner.values.get(&path.to_string()) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Bool(b)) => Ok(Some(*b)),
                Some(other) => Err(StoreError::Decode(other.to_string())),
            }
        }

        async fn last_children(&self, path: &KeyPath, order_by: &str, limit: usize) -> Result<Vec<(String, Value)>, StoreError> {
            let prefix = format!("{}/", path);
            let children = self
                .inner()
                .values
                .iter()
                .filter_map(|(key, value)| {
                    let name = key.strip_prefix(&prefix)?;
                    (!name.contains('/')).then(|| (name.to_string(), value.clone()))
                })
                .collect();
            Ok(newest(children, order_by, limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::DevicePaths;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const SECRET: &str = "test-secret";

    type Tree = Arc<Mutex<HashMap<String, Value>>>;
    type Reply = (StatusCode, Json<Value>);

    fn key(path: &str) -> Option<String> {
        path.strip_suffix(".json").map(|p| format!("/{}", p))
    }

    fn authorized(query: &HashMap<String, String>) -> bool {
        query.get("auth").map(String::as_str) == Some(SECRET)
    }

    fn denied() -> Reply {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Permission denied" })))
    }

    async fn read(State(tree): State<Tree>, Path(path): Path<String>, Query(q): Query<HashMap<String, String>>) -> Reply {
        if !authorized(&q) {
            return denied();
        }
        let Some(k) = key(&path) else {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing .json" })));
        };
        let tree = tree.lock().unwrap();
        if let Some(limit) = q.get("limitToLast").and_then(|l| l.parse::<usize>().ok()) {
            let Some(field) = q.get("orderBy").map(|o| o.trim_matches('"').to_string()) else {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": "limitToLast needs orderBy" })));
            };
            let prefix = format!("{}/", k);
            let mut children: Vec<(String, Value)> = tree
                .iter()
                .filter_map(|(key, value)| key.strip_prefix(&prefix).map(|name| (name.to_string(), value.clone())))
                .collect();
            let rank = |child: &(String, Value)| child.1[field.as_str()].as_f64().unwrap_or(0.0);
            children.sort_by(|a, b| rank(a).total_cmp(&rank(b)));
            let page = children.split_off(children.len().saturating_sub(limit));
            // keyed object in name order, like the real endpoint
            let page: serde_json::Map<String, Value> = page.into_iter().collect();
            return (StatusCode::OK, Json(Value::Object(page)));
        }
        (StatusCode::OK, Json(tree.get(&k).cloned().unwrap_or(Value::Null)))
    }

    async fn write(
        State(tree): State<Tree>,
        Path(path): Path<String>,
        Query(q): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> Reply {
        if !authorized(&q) {
            return denied();
        }
        let Some(k) = key(&path) else {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing .json" })));
        };
        tree.lock().unwrap().insert(k, body.clone());
        (StatusCode::OK, Json(body))
    }

    async fn append(
        State(tree): State<Tree>,
        Path(path): Path<String>,
        Query(q): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> Reply {
        if !authorized(&q) {
            return denied();
        }
        let mut tree = tree.lock().unwrap();
        let name = format!("-N{}", tree.len());
        tree.insert(format!("{}/{}", key(&path).unwrap_or_default(), name), body);
        (StatusCode::OK, Json(json!({ "name": name })))
    }

    /// a tiny stand-in for the database REST endpoint
    async fn spawn_database() -> (String, Tree) {
        let tree: Tree = Arc::default();
        let app = Router::new()
            .route("/*path", get(read).put(write).post(append))
            .with_state(tree.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/", addr), tree)
    }

    fn config(url: &str, secret: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            secret: secret.to_string(),
            timeout_ms: 2000,
            connect_attempts: 2,
            connect_retry_ms: 10,
            reconnect_interval_ms: 50,
        }
    }

    #[test]
    fn url_appends_json_suffix() {
        let store = FirebaseStore::new(&config("https://lab-rtdb.firebaseio.com/", "")).unwrap();
        let paths = DevicePaths::new("node").unwrap();
        assert_eq!(store.url(&paths.latest()), "https://lab-rtdb.firebaseio.com/devices/node/latest.json");
        assert_eq!(store.url(&KeyPath::root()), "https://lab-rtdb.firebaseio.com/.json");
    }

    #[test]
    fn error_reason_prefers_error_field() {
        assert_eq!(error_reason(r#"{"error": "Permission denied"}"#), "Permission denied");
        assert_eq!(error_reason("upstream timeout\n"), "upstream timeout");
    }

    #[tokio::test]
    async fn unconfigured_store_is_never_ready() {
        let store = FirebaseStore::new(&config("", "")).unwrap();
        assert!(!store.is_ready());
        assert!(matches!(store.connect().await, Err(StoreError::NotReady)));
        assert!(!store.is_ready());
    }

    #[tokio::test]
    async fn set_push_and_get_round_trip_through_rest() {
        let (url, tree) = spawn_database().await;
        let store = FirebaseStore::new(&config(&url, SECRET)).unwrap();
        let paths = DevicePaths::new("node").unwrap();

        assert!(!store.is_ready());
        store.connect_with_retry(2, Duration::from_millis(10)).await.unwrap();
        assert!(store.is_ready());

        store.set(&paths.latest(), &json!({ "temperature": 21.0 })).await.unwrap();
        assert_eq!(tree.lock().unwrap()["/devices/node/latest"], json!({ "temperature": 21.0 }));

        assert_eq!(store.get_bool(paths.ac()).await.unwrap(), None);
        store.set(paths.ac(), &json!(true)).await.unwrap();
        assert_eq!(store.get_bool(paths.ac()).await.unwrap(), Some(true));

        let name = store.push(paths.events(), &json!({ "type": "SECURITY_ALERT" })).await.unwrap();
        assert!(tree.lock().unwrap().contains_key(&format!("/events/node/{}", name)));
    }

    #[tokio::test]
    async fn rejected_request_reports_reason() {
        let (url, _) = spawn_database().await;
        let store = FirebaseStore::new(&config(&url, "wrong")).unwrap();

        match store.connect().await {
            Err(StoreError::Http { status, reason }) => {
                assert_eq!(status, 401);
                assert_eq!(reason, "Permission denied");
            }
            other => panic!("expected http error, got {:?}", other),
        }
        assert!(!store.is_ready());
    }

    #[tokio::test]
    async fn non_boolean_value_is_a_decode_error() {
        let (url, tree) = spawn_database().await;
        tree.lock().unwrap().insert("/labs/node/ac".to_string(), json!("on"));
        let store = FirebaseStore::new(&config(&url, SECRET)).unwrap();
        let paths = DevicePaths::new("node").unwrap();

        assert!(matches!(store.get_bool(paths.ac()).await, Err(StoreError::Decode(_))));
    }

    #[tokio::test]
    async fn last_children_come_back_oldest_first() {
        let (url, _) = spawn_database().await;
        let store = FirebaseStore::new(&config(&url, SECRET)).unwrap();
        let paths = DevicePaths::new("node").unwrap();

        for timestamp in [30, 10, 20] {
            store.push(paths.events(), &json!({ "type": "ACTION", "timestamp": timestamp })).await.unwrap();
        }

        let events = store.last_children(paths.events(), "timestamp", 2).await.unwrap();
        let stamps: Vec<_> = events.iter().map(|(_, e)| e["timestamp"].clone()).collect();
        assert_eq!(stamps, vec![json!(20), json!(30)]);
        assert!(events.iter().all(|(name, _)| name.starts_with("-N")));

        let empty = store.last_children(&paths.history(1), "timestamp", 5).await.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn newest_keeps_the_tail_and_ranks_missing_fields_first() {
        let children = vec![
            ("b".to_string(), json!({ "timestamp": 5 })),
            ("a".to_string(), json!({ "note": "no stamp" })),
            ("c".to_string(), json!({ "timestamp": 1 })),
        ];
        let names: Vec<_> = newest(children.clone(), "timestamp", 10).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
        let names: Vec<_> = newest(children, "timestamp", 1).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[tokio::test]
    async fn unreachable_database_exhausts_retries() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = FirebaseStore::new(&config(&format!("http://{}", addr), SECRET)).unwrap();
        let result = store.connect_with_retry(2, Duration::from_millis(5)).await;
        assert!(matches!(result, Err(StoreError::Transport(_))));
        assert!(!store.is_ready());
    }
}
