//! AutomationDriver - the remote driver capability interface.
//!
//! The session talks to the device only through [`AutomationDriver`].
//! [`crate::webdriver::WebDriverClient`] implements it over HTTP;
//! [`MockDriver`] implements it in memory for tests.
//!
//! The remote side serializes commands per session, so every method takes
//! `&mut self` and callers issue one command at a time.

use crate::actions::ActionSequence;
use crate::geometry::Rect;
use crate::locator::{ElementRef, Locator};
use crate::result::{ProbeError, ProbeResult};
use crate::scripts::{self, ElementOp};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Name of the native context
pub const NATIVE_CONTEXT: &str = "NATIVE_APP";

/// True for context names that host web content
#[must_use]
pub fn is_web_context(name: &str) -> bool {
    name.starts_with("WEBVIEW") || name == "CHROMIUM"
}

/// Remote automation driver operations
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Load a URL in the current web context
    async fn navigate(&mut self, url: &str) -> ProbeResult<()>;

    /// All elements matching `locator` in the current context
    async fn find_elements(&mut self, locator: &Locator) -> ProbeResult<Vec<ElementRef>>;

    /// Element rectangle in the current context's coordinates
    async fn element_rect(&mut self, element: &ElementRef) -> ProbeResult<Rect>;

    /// Click an element
    async fn click(&mut self, element: &ElementRef) -> ProbeResult<()>;

    /// Run a synchronous script in the current context
    async fn execute_script(&mut self, script: &str, args: Vec<Value>) -> ProbeResult<Value>;

    /// Available contexts, native first
    async fn contexts(&mut self) -> ProbeResult<Vec<String>>;

    /// Active context
    async fn current_context(&mut self) -> ProbeResult<String>;

    /// Switch context
    async fn switch_context(&mut self, name: &str) -> ProbeResult<()>;

    /// Window handles in the current context
    async fn window_handles(&mut self) -> ProbeResult<Vec<String>>;

    /// Switch window within the current context
    async fn switch_window(&mut self, handle: &str) -> ProbeResult<()>;

    /// Source of the current context (XML for native, HTML for web)
    async fn page_source(&mut self) -> ProbeResult<String>;

    /// Perform input action sequences
    async fn perform_actions(&mut self, actions: &[ActionSequence]) -> ProbeResult<()>;

    /// Type through the driver's keyboard endpoint
    async fn send_keys(&mut self, text: &str) -> ProbeResult<()>;

    /// Press an Android key code
    async fn press_keycode(&mut self, code: u32) -> ProbeResult<()>;

    /// Screenshot as PNG bytes
    async fn screenshot(&mut self) -> ProbeResult<Vec<u8>>;

    /// Set the implicit element wait
    async fn set_implicit_wait(&mut self, wait: Duration) -> ProbeResult<()>;

    /// Whether the soft keyboard is visible
    async fn is_keyboard_shown(&mut self) -> ProbeResult<bool>;

    /// Dismiss the soft keyboard
    async fn hide_keyboard(&mut self) -> ProbeResult<()>;
}

/// A fake element known to [`MockDriver`]
#[derive(Debug, Clone, PartialEq)]
pub struct MockElement {
    /// Element id
    pub id: String,
    /// Native rect, or the rect reported by the driver
    pub rect: Rect,
    /// Result of the in-page visibility check
    pub web_visible: bool,
    /// Bounding client rect reported by the in-page script (device pixels)
    pub client_rect: Option<Value>,
}

impl MockElement {
    /// Element with a rect
    #[must_use]
    pub fn new(id: impl Into<String>, rect: Rect) -> Self {
        Self {
            id: id.into(),
            rect,
            web_visible: true,
            client_rect: None,
        }
    }

    /// Web element reporting `client_rect` from the bounding-rect script
    #[must_use]
    pub fn web(id: impl Into<String>, client_rect: Value) -> Self {
        Self {
            client_rect: Some(client_rect),
            ..Self::new(id, Rect::new(0, 0, 1, 1))
        }
    }

    /// Mark as hidden to the in-page visibility check
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.web_visible = false;
        self
    }
}

/// In-memory driver for tests.
///
/// Sources, elements and hidden flags are keyed by scope: the context name,
/// or `context/window` once a window has been selected.
#[derive(Debug)]
pub struct MockDriver {
    /// Context list returned by `contexts`
    pub contexts: Vec<String>,
    /// Active context
    pub current_context: String,
    /// Window handles per context
    pub windows: HashMap<String, Vec<String>>,
    /// Active window
    pub current_window: Option<String>,
    /// Page source per scope
    pub sources: HashMap<String, String>,
    /// Scopes whose document is hidden
    pub hidden: HashSet<String>,
    /// Contexts that refuse to be switched to
    pub failing_contexts: HashSet<String>,
    /// Locators the server rejects, with the HTTP status it answers
    pub rejected_locators: HashMap<Locator, u16>,
    /// Elements per scope and locator
    pub elements: HashMap<(String, Locator), Vec<MockElement>>,
    /// Elements that appear once this many action sequences have run
    pub revealed_after_actions: Vec<(usize, String, Locator, MockElement)>,
    /// Viewport scale reported to the scale script
    pub viewport_scale: f64,
    /// Native rect of the viewport marker, registered when the marker is inserted
    pub marker_rect: Option<Rect>,
    /// Screenshot bytes
    pub screenshot_png: Vec<u8>,
    /// Current implicit wait
    pub implicit_wait: Duration,
    /// Keyboard visibility
    pub keyboard_shown: bool,
    /// Performed action sequences
    pub performed: Vec<ActionSequence>,
    /// Text sent through `send_keys`
    pub typed: Vec<String>,
    /// Key codes pressed
    pub keycodes: Vec<u32>,
    /// Call history for verification
    pub call_history: Vec<String>,
    next_id: usize,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            contexts: vec![NATIVE_CONTEXT.to_string()],
            current_context: NATIVE_CONTEXT.to_string(),
            windows: HashMap::new(),
            current_window: None,
            sources: HashMap::new(),
            hidden: HashSet::new(),
            failing_contexts: HashSet::new(),
            rejected_locators: HashMap::new(),
            elements: HashMap::new(),
            revealed_after_actions: Vec::new(),
            viewport_scale: 1.0,
            marker_rect: None,
            screenshot_png: Vec::new(),
            implicit_wait: Duration::ZERO,
            keyboard_shown: false,
            performed: Vec::new(),
            typed: Vec::new(),
            keycodes: Vec::new(),
            call_history: Vec::new(),
            next_id: 0,
        }
    }
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a context, optionally with windows
    pub fn add_context(&mut self, name: &str, windows: &[&str]) {
        self.contexts.push(name.to_string());
        if !windows.is_empty() {
            self.windows.insert(
                name.to_string(),
                windows.iter().map(|w| (*w).to_string()).collect(),
            );
        }
    }

    /// Set the page source of a scope
    pub fn set_source(&mut self, scope: &str, source: impl Into<String>) {
        self.sources.insert(scope.to_string(), source.into());
    }

    /// Register an element under a scope and locator
    pub fn add_element(&mut self, scope: &str, locator: Locator, element: MockElement) {
        self.elements
            .entry((scope.to_string(), locator))
            .or_default()
            .push(element);
    }

    /// Register an element that appears after `actions` gestures
    pub fn reveal_after(&mut self, actions: usize, scope: &str, locator: Locator, element: MockElement) {
        self.revealed_after_actions
            .push((actions, scope.to_string(), locator, element));
    }

    /// Use a blank PNG of the given size as the screenshot
    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        let image = image::DynamicImage::new_rgb8(width, height);
        let mut png = Vec::new();
        if image
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .is_ok()
        {
            self.screenshot_png = png;
        }
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.call_history
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.call_history.iter().any(|c| c.starts_with(method))
    }

    /// Number of calls starting with `method`
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.call_history
            .iter()
            .filter(|c| c.starts_with(method))
            .count()
    }

    /// Scope of the active context and window
    #[must_use]
    pub fn scope(&self) -> String {
        match &self.current_window {
            Some(window) => format!("{}/{window}", self.current_context),
            None => self.current_context.clone(),
        }
    }

    fn lookup(&self, locator: &Locator) -> Vec<MockElement> {
        let mut found = Vec::new();
        for scope in [self.scope(), self.current_context.clone()] {
            if let Some(elements) = self.elements.get(&(scope, locator.clone())) {
                found.extend(elements.iter().cloned());
                break;
            }
        }
        found
    }

    fn element(&self, element: &ElementRef) -> ProbeResult<MockElement> {
        self.elements
            .values()
            .flatten()
            .find(|e| e.id == element.id)
            .cloned()
            .ok_or_else(|| ProbeError::Driver {
                command: "element".to_string(),
                status: 404,
                message: format!("stale element {}", element.id),
            })
    }

    fn run_element_script(&self, args: &[Value]) -> ProbeResult<Value> {
        let element = args
            .first()
            .and_then(ElementRef::from_json)
            .ok_or_else(|| ProbeError::unexpected("missing element argument"))?;
        let op = args
            .get(1)
            .and_then(Value::as_str)
            .and_then(ElementOp::parse)
            .ok_or_else(|| ProbeError::unexpected("missing element operation"))?;
        let found = self.element(&element)?;
        Ok(match op {
            ElementOp::Visible => Value::from(if found.web_visible { "true" } else { "false" }),
            ElementOp::ScrollToCenter => Value::from("true"),
            ElementOp::Rect => {
                let rect = found.client_rect.unwrap_or_else(|| {
                    json!({
                        "x": found.rect.x, "y": found.rect.y,
                        "width": found.rect.width, "height": found.rect.height
                    })
                });
                Value::from(rect.to_string())
            }
        })
    }

    fn insert_marker(&mut self, args: &[Value]) -> Value {
        let label = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(rect) = self.marker_rect {
            self.next_id += 1;
            let element = MockElement::new(format!("marker-{}", self.next_id), rect);
            self.add_element(NATIVE_CONTEXT, Locator::accessibility_id(label.clone()), element);
        }
        Value::from(label)
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    async fn navigate(&mut self, url: &str) -> ProbeResult<()> {
        self.call_history.push(format!("navigate:{url}"));
        Ok(())
    }

    async fn find_elements(&mut self, locator: &Locator) -> ProbeResult<Vec<ElementRef>> {
        self.call_history.push(format!("find_elements:{locator}"));
        if let Some(status) = self.rejected_locators.get(locator) {
            return Err(ProbeError::from_status(*status, "invalid selector"));
        }
        Ok(self
            .lookup(locator)
            .into_iter()
            .map(|e| ElementRef::new(e.id))
            .collect())
    }

    async fn element_rect(&mut self, element: &ElementRef) -> ProbeResult<Rect> {
        self.call_history.push(format!("element_rect:{}", element.id));
        Ok(self.element(element)?.rect)
    }

    async fn click(&mut self, element: &ElementRef) -> ProbeResult<()> {
        self.call_history.push(format!("click:{}", element.id));
        Ok(())
    }

    async fn execute_script(&mut self, script: &str, args: Vec<Value>) -> ProbeResult<Value> {
        let scope = self.scope();
        if script == scripts::WEB_ELEMENT {
            let op = args.get(1).and_then(Value::as_str).unwrap_or_default();
            self.call_history.push(format!("execute_script:element:{op}"));
            return self.run_element_script(&args);
        }
        if script == scripts::VIEWPORT_SCALE {
            self.call_history.push("execute_script:viewport_scale".to_string());
            return Ok(Value::from(self.viewport_scale));
        }
        if script == scripts::DOCUMENT_HIDDEN {
            self.call_history.push(format!("execute_script:hidden:{scope}"));
            return Ok(Value::from(self.hidden.contains(&scope)));
        }
        if script == scripts::INSERT_MARKER {
            self.call_history.push("execute_script:insert_marker".to_string());
            return Ok(self.insert_marker(&args));
        }
        self.call_history.push(format!("execute_script:{script}"));
        Ok(Value::Null)
    }

    async fn contexts(&mut self) -> ProbeResult<Vec<String>> {
        self.call_history.push("contexts".to_string());
        Ok(self.contexts.clone())
    }

    async fn current_context(&mut self) -> ProbeResult<String> {
        Ok(self.current_context.clone())
    }

    async fn switch_context(&mut self, name: &str) -> ProbeResult<()> {
        self.call_history.push(format!("switch_context:{name}"));
        if self.failing_contexts.contains(name) || !self.contexts.iter().any(|c| c == name) {
            return Err(ProbeError::Driver {
                command: "context".to_string(),
                status: 500,
                message: format!("cannot switch to {name}"),
            });
        }
        self.current_context = name.to_string();
        self.current_window = None;
        Ok(())
    }

    async fn window_handles(&mut self) -> ProbeResult<Vec<String>> {
        Ok(self
            .windows
            .get(&self.current_context)
            .cloned()
            .unwrap_or_default())
    }

    async fn switch_window(&mut self, handle: &str) -> ProbeResult<()> {
        self.call_history.push(format!("switch_window:{handle}"));
        self.current_window = Some(handle.to_string());
        Ok(())
    }

    async fn page_source(&mut self) -> ProbeResult<String> {
        let scope = self.scope();
        self.call_history.push(format!("page_source:{scope}"));
        Ok(self.sources.get(&scope).cloned().unwrap_or_default())
    }

    async fn perform_actions(&mut self, actions: &[ActionSequence]) -> ProbeResult<()> {
        self.call_history.push("perform_actions".to_string());
        self.performed.extend(actions.iter().cloned());
        let count = self.performed.len();
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.revealed_after_actions)
            .into_iter()
            .partition(|(after, ..)| *after <= count);
        self.revealed_after_actions = pending;
        for (_, scope, locator, element) in ready {
            self.add_element(&scope, locator, element);
        }
        Ok(())
    }

    async fn send_keys(&mut self, text: &str) -> ProbeResult<()> {
        self.call_history.push("send_keys".to_string());
        self.typed.push(text.to_string());
        Ok(())
    }

    async fn press_keycode(&mut self, code: u32) -> ProbeResult<()> {
        self.call_history.push(format!("press_keycode:{code}"));
        self.keycodes.push(code);
        Ok(())
    }

    async fn screenshot(&mut self) -> ProbeResult<Vec<u8>> {
        self.call_history.push("screenshot".to_string());
        if self.screenshot_png.is_empty() {
            return Err(ProbeError::unexpected("No mock screenshot set"));
        }
        Ok(self.screenshot_png.clone())
    }

    async fn set_implicit_wait(&mut self, wait: Duration) -> ProbeResult<()> {
        self.call_history
            .push(format!("set_implicit_wait:{}", wait.as_millis()));
        self.implicit_wait = wait;
        Ok(())
    }

    async fn is_keyboard_shown(&mut self) -> ProbeResult<bool> {
        Ok(self.keyboard_shown)
    }

    async fn hide_keyboard(&mut self) -> ProbeResult<()> {
        self.call_history.push("hide_keyboard".to_string());
        self.keyboard_shown = false;
        Ok(())
    }
}
