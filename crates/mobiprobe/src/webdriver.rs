//! HTTP implementation of [`AutomationDriver`] over the W3C wire protocol.
//!
//! Commands go either straight to the remote server or through the local
//! [`crate::proxy::CommandProxy`]; the client does not care which.

use crate::actions::ActionSequence;
use crate::config::ProbeConfig;
use crate::driver::AutomationDriver;
use crate::geometry::Rect;
use crate::locator::{ElementRef, Locator};
use crate::result::{ProbeError, ProbeResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// W3C WebDriver HTTP client bound to one session
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    base_url: String,
    client: reqwest::Client,
    authorization: Option<String>,
    session_id: Option<String>,
}

impl WebDriverClient {
    /// Create a client for the server at `base_url` (including any path prefix)
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            authorization: None,
            session_id: None,
        }
    }

    /// Client for the configured remote server, sending the configured credentials
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.remote_url.clone()).with_authorization(config.basic_auth())
    }

    /// Send this `Authorization` header with every request
    #[must_use]
    pub fn with_authorization(mut self, header: Option<String>) -> Self {
        self.authorization = header;
        self
    }

    /// Attach to an existing session
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Base URL commands are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current session id
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Create a session and remember its id
    pub async fn create_session(&mut self, capabilities: Value) -> ProbeResult<String> {
        let body = json!({
            "capabilities": { "alwaysMatch": capabilities, "firstMatch": [{}] },
            "desiredCapabilities": capabilities,
        });
        let response = self.send(Method::POST, "/session", Some(body)).await?;
        let session_id = response
            .get("value")
            .and_then(|v| v.get("sessionId"))
            .or_else(|| response.get("sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProbeError::unexpected("session response carries no sessionId"))?
            .to_string();
        info!(session = %session_id, "session created");
        self.session_id = Some(session_id.clone());
        Ok(session_id)
    }

    /// Delete the current session, if any
    pub async fn delete_session(&mut self) -> ProbeResult<()> {
        if let Some(id) = self.session_id.take() {
            self.send(Method::DELETE, &format!("/session/{id}"), None)
                .await?;
            info!(session = %id, "session deleted");
        }
        Ok(())
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> ProbeResult<Value> {
        let id = self
            .session_id
            .as_deref()
            .ok_or_else(|| ProbeError::config("no active session"))?;
        let response = self
            .send(method, &format!("/session/{id}{path}"), body)
            .await?;
        Ok(response.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> ProbeResult<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "driver command");
        let mut request = self.client.request(method, &url);
        if let Some(auth) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(command_error(path, status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn command_error(path: &str, status: u16, body: &str) -> ProbeError {
    if status == 401 || status == 403 {
        return ProbeError::from_status(status, body);
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let value = v.get("value")?;
            let error = value.get("error").and_then(Value::as_str).unwrap_or("error");
            let message = value.get("message").and_then(Value::as_str).unwrap_or("");
            Some(format!("{error}: {message}"))
        })
        .unwrap_or_else(|| body.to_string());
    ProbeError::Driver {
        command: path.to_string(),
        status,
        message,
    }
}

fn string_list(value: &Value) -> ProbeResult<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| ProbeError::unexpected(format!("expected a list, got {value}")))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ProbeError::unexpected(format!("expected a string, got {v}")))
        })
        .collect()
}

fn parse_rect(value: &Value) -> ProbeResult<Rect> {
    let num = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_f64)
            .map(|v| v.round() as i32)
            .ok_or_else(|| ProbeError::unexpected(format!("rect is missing {key}: {value}")))
    };
    Ok(Rect::new(num("x")?, num("y")?, num("width")?, num("height")?))
}

#[async_trait]
impl AutomationDriver for WebDriverClient {
    async fn navigate(&mut self, url: &str) -> ProbeResult<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn find_elements(&mut self, locator: &Locator) -> ProbeResult<Vec<ElementRef>> {
        let value = self
            .command(Method::POST, "/elements", Some(locator.to_wire()))
            .await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(ElementRef::from_json).collect())
            .unwrap_or_default())
    }

    async fn element_rect(&mut self, element: &ElementRef) -> ProbeResult<Rect> {
        let value = self
            .command(Method::GET, &format!("/element/{}/rect", element.id), None)
            .await?;
        parse_rect(&value)
    }

    async fn click(&mut self, element: &ElementRef) -> ProbeResult<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.id),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn execute_script(&mut self, script: &str, args: Vec<Value>) -> ProbeResult<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn contexts(&mut self) -> ProbeResult<Vec<String>> {
        let value = self.command(Method::GET, "/contexts", None).await?;
        string_list(&value)
    }

    async fn current_context(&mut self) -> ProbeResult<String> {
        let value = self.command(Method::GET, "/context", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProbeError::unexpected(format!("context name was {value}")))
    }

    async fn switch_context(&mut self, name: &str) -> ProbeResult<()> {
        self.command(Method::POST, "/context", Some(json!({ "name": name })))
            .await?;
        Ok(())
    }

    async fn window_handles(&mut self) -> ProbeResult<Vec<String>> {
        let value = self.command(Method::GET, "/window/handles", None).await?;
        string_list(&value)
    }

    async fn switch_window(&mut self, handle: &str) -> ProbeResult<()> {
        self.command(
            Method::POST,
            "/window",
            Some(json!({ "handle": handle, "name": handle })),
        )
        .await?;
        Ok(())
    }

    async fn page_source(&mut self) -> ProbeResult<String> {
        let value = self.command(Method::GET, "/source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn perform_actions(&mut self, actions: &[ActionSequence]) -> ProbeResult<()> {
        self.command(Method::POST, "/actions", Some(json!({ "actions": actions })))
            .await?;
        Ok(())
    }

    async fn send_keys(&mut self, text: &str) -> ProbeResult<()> {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        self.command(Method::POST, "/keys", Some(json!({ "value": chars })))
            .await?;
        Ok(())
    }

    async fn press_keycode(&mut self, code: u32) -> ProbeResult<()> {
        self.command(
            Method::POST,
            "/appium/device/press_keycode",
            Some(json!({ "keycode": code })),
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> ProbeResult<Vec<u8>> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| ProbeError::unexpected("screenshot is not a string"))?;
        let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(cleaned)
            .map_err(|e| ProbeError::unexpected(format!("screenshot is not base64: {e}")))
    }

    async fn set_implicit_wait(&mut self, wait: Duration) -> ProbeResult<()> {
        let ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self.command(Method::POST, "/timeouts", Some(json!({ "implicit": ms })))
            .await?;
        Ok(())
    }

    async fn is_keyboard_shown(&mut self) -> ProbeResult<bool> {
        let value = self
            .command(Method::GET, "/appium/device/is_keyboard_shown", None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn hide_keyboard(&mut self) -> ProbeResult<()> {
        self.command(Method::POST, "/appium/device/hide_keyboard", Some(json!({})))
            .await?;
        Ok(())
    }
}
