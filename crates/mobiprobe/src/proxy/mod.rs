//! Command proxy between the test process and the remote driver.
//!
//! Listens on an auto-assigned loopback port and forwards every request to
//! the remote server. On the way through it:
//!
//! - strips the path prefix (`/wd/hub` by default)
//! - appends `baseCommandId` once the command counter is non-zero
//! - attaches basic-auth credentials
//! - rewrites legacy-dialect session and error bodies to W3C
//! - counts successful session-scoped commands
//!
//! Upstream statuses pass through unchanged; a transport failure becomes
//! a `502 Bad Gateway` with a W3C error body.

mod dialect;
mod session;

pub use dialect::{
    is_legacy_body, legacy_error_code, normalize_session_body, session_id_of,
    translate_error_body,
};
pub use session::ProxySession;

use crate::config::ProbeConfig;
use crate::result::{ProbeError, ProbeResult};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use reqwest::Url;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Query parameter carrying the command counter
pub const BASE_COMMAND_ID: &str = "baseCommandId";

/// Proxy settings
#[derive(Debug, Clone)]
pub struct CommandProxy {
    upstream: String,
    prefix: String,
    authorization: Option<String>,
    timeout: Duration,
}

impl CommandProxy {
    /// Proxy forwarding to `upstream`
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into().trim_end_matches('/').to_string(),
            prefix: crate::config::DEFAULT_PATH_PREFIX.to_string(),
            authorization: None,
            timeout: Duration::from_secs(crate::config::DEFAULT_NEW_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Proxy for the configured remote server and credentials
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.remote_url.clone())
            .with_prefix(config.path_prefix.clone())
            .with_authorization(config.basic_auth())
            .with_timeout(Duration::from_secs(config.new_command_timeout_secs))
    }

    /// Path prefix to strip
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    /// `Authorization` header sent upstream
    #[must_use]
    pub fn with_authorization(mut self, header: Option<String>) -> Self {
        self.authorization = header;
        self
    }

    /// Upstream request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bind `127.0.0.1:0` and serve in a background task
    pub async fn start(self) -> ProbeResult<ProxyHandle> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let session = Arc::new(ProxySession::new());
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProbeError::Proxy {
                message: format!("cannot build upstream client: {e}"),
            })?;

        let state = ProxyState {
            upstream: self.upstream,
            prefix: self.prefix,
            authorization: self.authorization,
            client,
            session: Arc::clone(&session),
        };
        let app = Router::new().fallback(forward).with_state(state);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });
        info!(%addr, "command proxy listening");

        Ok(ProxyHandle {
            addr,
            session,
            shutdown,
            task: Some(task),
        })
    }
}

/// A running proxy
#[derive(Debug)]
pub struct ProxyHandle {
    addr: SocketAddr,
    session: Arc<ProxySession>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ProxyHandle {
    /// URL clients should connect to
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Listening port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Shared session record
    #[must_use]
    pub fn session(&self) -> Arc<ProxySession> {
        Arc::clone(&self.session)
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn stop(mut self) -> ProbeResult<()> {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| ProbeError::Proxy {
                message: format!("proxy task failed: {e}"),
            })??;
        }
        info!(addr = %self.addr, "command proxy stopped");
        Ok(())
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Clone)]
struct ProxyState {
    upstream: String,
    prefix: String,
    authorization: Option<String>,
    client: reqwest::Client,
    session: Arc<ProxySession>,
}

async fn forward(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = strip_path_prefix(uri.path(), &state.prefix).to_string();
    let counter = state.session.counter();
    let url = match upstream_url(&state.upstream, &path, uri.query(), counter) {
        Ok(url) => url,
        Err(err) => return bad_gateway(&err),
    };
    debug!(%method, %url, "forwarding command");

    let mut request = state.client.request(method.clone(), url);
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        request = request.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(auth) = state
        .authorization
        .as_deref()
        .map(str::to_string)
        .or_else(|| inbound_authorization(&headers))
    {
        request = request.header(header::AUTHORIZATION, auth);
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, %path, "upstream request failed");
            return bad_gateway(&err);
        }
    };
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => return bad_gateway(&err),
    };

    let body = postprocess(&state.session, &method, &path, status, bytes);
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn postprocess(
    session: &ProxySession,
    method: &Method,
    path: &str,
    status: StatusCode,
    body: Vec<u8>,
) -> Vec<u8> {
    if status.is_success() && *method == Method::POST && path == "/session" {
        return record_session(session, body);
    }
    if status.is_success() {
        if is_session_command(path) {
            session.increment();
        }
        return body;
    }
    if session.is_legacy() {
        if let Some(translated) = translate_error_body(&body) {
            return translated;
        }
    }
    body
}

fn record_session(session: &ProxySession, body: Vec<u8>) -> Vec<u8> {
    let Ok(parsed) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };
    let (rewritten, legacy) = match normalize_session_body(&parsed) {
        Some(modern) => (modern, true),
        None => (parsed, false),
    };
    session.mark_dialect(legacy);
    if let Some(id) = session_id_of(&rewritten) {
        info!(session = %id, legacy, "remote session created");
        if let Some(previous) = session.set_session_id(id) {
            debug!(previous = %previous, "replaced earlier remote session");
        }
    }
    if legacy {
        serde_json::to_vec(&rewritten).unwrap_or(body)
    } else {
        body
    }
}

/// Remove `prefix` when it is a whole leading path segment
fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return path;
    }
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

/// True for `/session/{id}/...`
fn is_session_command(path: &str) -> bool {
    path.strip_prefix("/session/")
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(id, command)| !id.is_empty() && !command.is_empty())
}

fn upstream_url(base: &str, path: &str, query: Option<&str>, counter: u64) -> ProbeResult<Url> {
    let mut url = Url::parse(&format!("{base}{path}")).map_err(|e| ProbeError::Proxy {
        message: format!("invalid upstream url {base}{path}: {e}"),
    })?;
    url.set_query(query);
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != BASE_COMMAND_ID)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_query(None);
    if !pairs.is_empty() || counter > 0 {
        let mut query = url.query_pairs_mut();
        query.extend_pairs(pairs);
        if counter > 0 {
            query.append_pair(BASE_COMMAND_ID, &counter.to_string());
        }
    }
    Ok(url)
}

fn inbound_authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn bad_gateway(err: &dyn std::fmt::Display) -> Response {
    let body = json!({
        "value": {
            "error": "unknown error",
            "message": format!("Could not reach the remote driver: {err}"),
            "stacktrace": "",
        }
    });
    (StatusCode::BAD_GATEWAY, axum::Json(body)).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Fake remote server answering in the legacy or W3C dialect
    async fn upstream(legacy: bool) -> (String, Log) {
        let log: Log = Arc::default();
        let recorded = Arc::clone(&log);
        let app = Router::new().fallback(move |method: Method, uri: Uri, headers: HeaderMap| {
            let recorded = Arc::clone(&recorded);
            async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-")
                    .to_string();
                recorded.lock().unwrap().push(format!("{method} {uri} {auth}"));
                fake_reply(legacy, &method, uri.path())
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), log)
    }

    fn fake_reply(legacy: bool, method: &Method, path: &str) -> Response {
        match (method.as_str(), path) {
            ("POST", "/session") if legacy => {
                axum::Json(json!({"status": 0, "sessionId": "abc", "value": {"cap": "x"}}))
                    .into_response()
            }
            ("POST", "/session") => {
                axum::Json(json!({"value": {"sessionId": "w3c", "capabilities": {}}}))
                    .into_response()
            }
            (_, p) if p.ends_with("/element") => (
                StatusCode::NOT_FOUND,
                axum::Json(json!({"status": 7, "value": {"message": "no element"}})),
            )
                .into_response(),
            _ => axum::Json(json!({"value": null})).into_response(),
        }
    }

    async fn call(client: &reqwest::Client, method: Method, url: String) -> (u16, Value) {
        let resp = client
            .request(method, url)
            .header(header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    mod helper_tests {
        use super::*;

        #[test]
        fn test_strip_path_prefix() {
            assert_eq!(strip_path_prefix("/wd/hub/session", "/wd/hub"), "/session");
            assert_eq!(strip_path_prefix("/wd/hubby", "/wd/hub"), "/wd/hubby");
            assert_eq!(strip_path_prefix("/session", "/wd/hub"), "/session");
            assert_eq!(strip_path_prefix("/session", ""), "/session");
        }

        #[test]
        fn test_session_command_detection() {
            assert!(is_session_command("/session/abc/element"));
            assert!(!is_session_command("/session/abc"));
            assert!(!is_session_command("/session"));
            assert!(!is_session_command("/status"));
        }

        #[test]
        fn test_upstream_url_query_handling() {
            let url = upstream_url("http://remote:4723", "/session/a/url", Some("x=1"), 0).unwrap();
            assert_eq!(url.as_str(), "http://remote:4723/session/a/url?x=1");

            let url = upstream_url("http://remote:4723", "/status", None, 0).unwrap();
            assert_eq!(url.as_str(), "http://remote:4723/status");

            let url = upstream_url(
                "http://remote:4723",
                "/session/a/url",
                Some("baseCommandId=3&x=1"),
                7,
            )
            .unwrap();
            assert_eq!(url.as_str(), "http://remote:4723/session/a/url?x=1&baseCommandId=7");
        }

        #[test]
        fn test_new_session_replaces_recorded_id() {
            let session = ProxySession::new();
            let first = serde_json::to_vec(&json!({"value": {"sessionId": "one", "capabilities": {}}}))
                .unwrap();
            let second = serde_json::to_vec(&json!({"value": {"sessionId": "two", "capabilities": {}}}))
                .unwrap();
            record_session(&session, first);
            assert_eq!(session.session_id().as_deref(), Some("one"));
            record_session(&session, second);
            assert_eq!(session.session_id().as_deref(), Some("two"));
            assert!(!session.is_legacy());
        }
    }

    mod forwarding_tests {
        use super::*;

        #[tokio::test]
        async fn test_legacy_session_normalized() {
            let (remote, _log) = upstream(true).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            let client = reqwest::Client::new();

            let (status, body) =
                call(&client, Method::POST, format!("{}/wd/hub/session", proxy.url())).await;
            assert_eq!(status, 200);
            assert_eq!(
                body,
                json!({"value": {"capabilities": {"cap": "x"}, "sessionId": "abc"}})
            );
            let session = proxy.session();
            assert!(session.is_legacy());
            assert_eq!(session.session_id().as_deref(), Some("abc"));
            proxy.stop().await.unwrap();
        }

        #[tokio::test]
        async fn test_modern_session_passes_through() {
            let (remote, _log) = upstream(false).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            let client = reqwest::Client::new();

            let (_, body) = call(&client, Method::POST, format!("{}/session", proxy.url())).await;
            assert_eq!(body["value"]["sessionId"], "w3c");
            assert!(!proxy.session().is_legacy());
            assert!(proxy.session().dialect_known());
        }

        #[tokio::test]
        async fn test_counter_and_base_command_id() {
            let (remote, log) = upstream(false).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            let client = reqwest::Client::new();

            call(&client, Method::POST, format!("{}/wd/hub/session/w3c/url", proxy.url())).await;
            assert_eq!(proxy.session().counter(), 1);
            call(&client, Method::GET, format!("{}/wd/hub/session/w3c/source", proxy.url())).await;
            assert_eq!(proxy.session().counter(), 2);

            let log = log.lock().unwrap().clone();
            assert_eq!(log[0], "POST /session/w3c/url -");
            assert_eq!(log[1], "GET /session/w3c/source?baseCommandId=1 -");
        }

        #[tokio::test]
        async fn test_failed_commands_do_not_count() {
            let (remote, _log) = upstream(false).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            let client = reqwest::Client::new();

            let (status, _) =
                call(&client, Method::POST, format!("{}/session/w3c/element", proxy.url())).await;
            assert_eq!(status, 404);
            assert_eq!(proxy.session().counter(), 0);
        }

        #[tokio::test]
        async fn test_counter_set_by_caller() {
            let (remote, log) = upstream(false).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            proxy.session().set_counter(41);
            let client = reqwest::Client::new();

            call(&client, Method::GET, format!("{}/status?x=1", proxy.url())).await;
            assert_eq!(log.lock().unwrap()[0], "GET /status?x=1&baseCommandId=41 -");
            assert_eq!(proxy.session().counter(), 41);
        }
    }

    mod dialect_tests {
        use super::*;

        #[tokio::test]
        async fn test_legacy_errors_translated() {
            let (remote, _log) = upstream(true).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            let client = reqwest::Client::new();

            call(&client, Method::POST, format!("{}/session", proxy.url())).await;
            let (status, body) =
                call(&client, Method::POST, format!("{}/session/abc/element", proxy.url())).await;
            assert_eq!(status, 404);
            assert_eq!(body["value"]["error"], "no such element");
            assert_eq!(body["value"]["message"], "no element");
        }

        #[tokio::test]
        async fn test_errors_untouched_in_w3c_mode() {
            let (remote, _log) = upstream(false).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            let client = reqwest::Client::new();

            call(&client, Method::POST, format!("{}/session", proxy.url())).await;
            let (_, body) =
                call(&client, Method::POST, format!("{}/session/w3c/element", proxy.url())).await;
            assert!(body["value"].get("error").is_none());
        }
    }

    mod auth_tests {
        use super::*;

        #[tokio::test]
        async fn test_configured_credentials_win() {
            let (remote, log) = upstream(false).await;
            let proxy = CommandProxy::new(remote)
                .with_authorization(Some("Basic Y29uZmln".to_string()))
                .start()
                .await
                .unwrap();
            reqwest::Client::new()
                .get(format!("{}/status", proxy.url()))
                .header(header::AUTHORIZATION, "Basic aW5ib3VuZA==")
                .send()
                .await
                .unwrap();
            assert_eq!(log.lock().unwrap()[0], "GET /status Basic Y29uZmln");
        }

        #[tokio::test]
        async fn test_inbound_credentials_forwarded() {
            let (remote, log) = upstream(false).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            reqwest::Client::new()
                .get(format!("{}/status", proxy.url()))
                .header(header::AUTHORIZATION, "Basic aW5ib3VuZA==")
                .send()
                .await
                .unwrap();
            assert_eq!(log.lock().unwrap()[0], "GET /status Basic aW5ib3VuZA==");
        }
    }

    mod failure_tests {
        use super::*;

        #[tokio::test]
        async fn test_unreachable_upstream_is_bad_gateway() {
            let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = closed.local_addr().unwrap().port();
            drop(closed);

            let proxy = CommandProxy::new(format!("http://127.0.0.1:{port}"))
                .start()
                .await
                .unwrap();
            let (status, body) =
                call(&reqwest::Client::new(), Method::GET, format!("{}/status", proxy.url())).await;
            assert_eq!(status, 502);
            assert_eq!(body["value"]["error"], "unknown error");
        }

        #[tokio::test]
        async fn test_stop_closes_listener() {
            let (remote, _log) = upstream(false).await;
            let proxy = CommandProxy::new(remote).start().await.unwrap();
            let url = proxy.url();
            proxy.stop().await.unwrap();
            assert!(reqwest::Client::new()
                .get(format!("{url}/status"))
                .send()
                .await
                .is_err());
        }
    }
}
