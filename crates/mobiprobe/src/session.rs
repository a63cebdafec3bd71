//! Automation session facade.
//!
//! [`AutomationSession`] owns the driver together with everything a test
//! step needs around it: the platform profile, configuration, the cached
//! context and screen size, and the proxy's shared counter. Element search
//! lives in [`crate::locate`] and coordinate reconciliation in
//! [`crate::reconcile`]; both extend this type.

use crate::config::{ProbeConfig, RetrySetting};
use crate::context::{self, ContextCandidate};
use crate::diagnostics;
use crate::driver::{AutomationDriver, NATIVE_CONTEXT};
use crate::geometry::{Point, Rect, Size};
use crate::locator::ElementRef;
use crate::platform::{DevicePlatform, DeviceKey, KeyInput, KeyPress};
use crate::proxy::{CommandProxy, ProxyHandle, ProxySession};
use crate::result::{ProbeError, ProbeResult};
use crate::retry::{not_retryable, pause, retry, RetryPolicy};
use crate::webdriver::WebDriverClient;
use crate::actions;
use futures::future::BoxFuture;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A driver plus the state shared by every step of a run
pub struct AutomationSession<D> {
    pub(crate) driver: D,
    pub(crate) platform: Arc<dyn DevicePlatform>,
    pub(crate) config: ProbeConfig,
    current_context: Option<String>,
    screen: Option<Size>,
    proxy_session: Option<Arc<ProxySession>>,
    proxy: Option<ProxyHandle>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl<D> std::fmt::Debug for AutomationSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationSession")
            .field("platform", &self.platform.kind())
            .field("current_context", &self.current_context)
            .field("screen", &self.screen)
            .field("proxied", &self.proxy_session.is_some())
            .finish_non_exhaustive()
    }
}

impl AutomationSession<WebDriverClient> {
    /// Start the proxy (when enabled), create a remote session and apply
    /// the implicit wait.
    ///
    /// Session creation is retried with the device-wait budget, since a
    /// device cloud may need a while to allocate a device.
    pub async fn connect(config: ProbeConfig) -> ProbeResult<Self> {
        config.validate()?;
        let proxy = if config.use_proxy {
            Some(CommandProxy::from_config(&config).start().await?)
        } else {
            None
        };
        let mut client = match &proxy {
            Some(handle) => WebDriverClient::new(handle.url()),
            None => WebDriverClient::from_config(&config),
        };

        let capabilities = config.session_capabilities();
        let policy = config.retry.device_wait.policy().abort_when(not_retryable);
        retry(
            &mut client,
            &policy,
            move |c, attempt| {
                let capabilities = capabilities.clone();
                Box::pin(async move {
                    info!(attempt, "creating session");
                    c.create_session(capabilities).await
                })
            },
            |_, err, attempt| {
                let message = err.to_string();
                Box::pin(async move {
                    warn!(attempt, error = %message, "session creation failed");
                    Ok(())
                })
            },
        )
        .await?;
        client.set_implicit_wait(config.implicit_wait()).await?;

        let mut session = Self::new(client, config);
        if let Some(handle) = proxy {
            session.proxy_session = Some(handle.session());
            session.proxy = Some(handle);
        }
        Ok(session)
    }

    /// Delete the remote session and stop the proxy
    pub async fn quit(mut self) -> ProbeResult<()> {
        let deleted = self.driver.delete_session().await;
        if let Some(proxy) = self.proxy.take() {
            proxy.stop().await?;
        }
        deleted
    }
}

impl<D: AutomationDriver> AutomationSession<D> {
    /// Wrap an already connected driver
    pub fn new(driver: D, config: ProbeConfig) -> Self {
        let platform = config.platform.profile();
        Self {
            driver,
            platform,
            config,
            current_context: None,
            screen: None,
            proxy_session: None,
            proxy: None,
            cancel: None,
        }
    }

    /// Share the proxy's session record
    #[must_use]
    pub fn with_proxy_session(mut self, session: Arc<ProxySession>) -> Self {
        self.proxy_session = Some(session);
        self
    }

    /// Abort retry loops and waits when `token` is cancelled
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The underlying driver
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// The underlying driver, mutably
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Session configuration
    pub const fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Platform profile
    pub fn platform(&self) -> &dyn DevicePlatform {
        self.platform.as_ref()
    }

    /// Give back the driver
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Retry policy for a budget, carrying the session's cancellation token
    pub(crate) fn policy(&self, setting: RetrySetting) -> RetryPolicy {
        setting.policy().with_cancel_opt(self.cancel.clone())
    }

    /// Sleep, unless the session is cancelled first
    pub async fn sleep(&self, duration: Duration) -> ProbeResult<()> {
        debug!(ms = duration.as_millis() as u64, "sleep");
        pause(duration, self.cancel.as_ref()).await
    }

    // Contexts

    /// Context last switched to through this session
    pub fn current_context(&self) -> Option<&str> {
        self.current_context.as_deref()
    }

    /// True unless a web context is known to be active
    pub fn in_native_context(&self) -> bool {
        self.current_context
            .as_deref()
            .map_or(true, |c| c == NATIVE_CONTEXT)
    }

    /// Switch context; a no-op when it is already current
    pub async fn switch_context(&mut self, name: &str) -> ProbeResult<()> {
        if self.current_context.as_deref() == Some(name) {
            return Ok(());
        }
        info!(context = name, "switch context");
        self.driver.switch_context(name).await?;
        self.current_context = Some(name.to_string());
        Ok(())
    }

    /// Switch to the native context, asking the driver where it is first
    pub async fn switch_to_native(&mut self) -> ProbeResult<()> {
        let actual = self.driver.current_context().await?;
        if actual == NATIVE_CONTEXT {
            self.current_context = Some(actual);
            return Ok(());
        }
        self.current_context = Some(actual);
        self.switch_context(NATIVE_CONTEXT).await
    }

    /// Find the on-screen web context and switch to it, with the context retry budget
    pub async fn switch_to_web_context(&mut self) -> ProbeResult<ContextCandidate> {
        let policy = self.policy(self.config.retry.context);
        let geometry = self.config.platform_geometry().clone();
        let result = context::resolve_with_retry(&mut self.driver, &geometry, &policy).await;
        // the resolver leaves the driver wherever enumeration stopped
        self.current_context = result.as_ref().ok().map(|w| w.name.clone());
        result
    }

    // Screen

    /// Screen size in screenshot pixels, cached after the first call
    pub async fn screen_size(&mut self) -> ProbeResult<Size> {
        if let Some(size) = self.screen {
            return Ok(size);
        }
        let png = self.driver.screenshot().await?;
        let (width, height) = image::ImageReader::new(Cursor::new(png))
            .with_guessed_format()?
            .into_dimensions()?;
        let size = Size::new(
            i32::try_from(width).unwrap_or(i32::MAX),
            i32::try_from(height).unwrap_or(i32::MAX),
        );
        debug!(width = size.width, height = size.height, "screen size");
        self.screen = Some(size);
        Ok(size)
    }

    /// Screen size in pointer coordinates (screenshot pixels / retina scale)
    pub async fn logical_screen_size(&mut self) -> ProbeResult<Size> {
        Ok(self.screen_size().await?.unscaled(self.config.retina_scale))
    }

    /// Offset of a letterboxed app inside the screen; zero when not applicable
    pub async fn app_offset(&mut self) -> Point {
        match self.try_app_offset().await {
            Ok(offset) => offset,
            Err(err) => {
                warn!(error = %err, "cannot compute app offset");
                Point::default()
            }
        }
    }

    async fn try_app_offset(&mut self) -> ProbeResult<Point> {
        let Some(root) = self.platform.app_root() else {
            return Ok(Point::default());
        };
        let screen = self.logical_screen_size().await?;
        let element = self
            .driver
            .find_elements(&root)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProbeError::not_found(root.to_string()))?;
        let app = self.driver.element_rect(&element).await?;
        let gap = |screen: i32, app: i32| if screen > app { (screen - app) / 2 } else { 0 };
        Ok(Point::new(
            gap(screen.width, app.width),
            gap(screen.height, app.height),
        ))
    }

    /// Point at a fraction of the screen
    pub async fn absolute_point(&mut self, rx: f64, ry: f64) -> ProbeResult<Point> {
        let screen = self.logical_screen_size().await?;
        Ok(Point::new(
            (rx * f64::from(screen.width)).round() as i32,
            (ry * f64::from(screen.height)).round() as i32,
        ))
    }

    /// Point at a fraction of `rect`, shifted by the app offset
    pub async fn point_in_rect(&mut self, rx: f64, ry: f64, rect: Rect) -> Point {
        let offset = self.app_offset().await;
        Point::new(
            (f64::from(rect.x) + f64::from(rect.width) * rx) as i32 + offset.x,
            (f64::from(rect.y) + f64::from(rect.height) * ry) as i32 + offset.y,
        )
    }

    // Gestures

    /// Tap a point
    pub async fn tap(&mut self, point: Point) -> ProbeResult<()> {
        info!(x = point.x, y = point.y, "touch at point");
        self.driver.perform_actions(&[actions::tap(point)]).await
    }

    /// Tap at a fraction of the screen
    pub async fn tap_relative(&mut self, rx: f64, ry: f64) -> ProbeResult<()> {
        let point = self.absolute_point(rx, ry).await?;
        self.tap(point).await
    }

    /// Tap at a fraction of an element
    pub async fn tap_element(&mut self, element: &ElementRef, rx: f64, ry: f64) -> ProbeResult<()> {
        let rect = self.driver.element_rect(element).await?;
        let point = self.point_in_rect(rx, ry, rect).await;
        self.tap(point).await
    }

    /// Click an element
    pub async fn click(&mut self, element: &ElementRef) -> ProbeResult<()> {
        info!(element = %element.id, "click element");
        self.driver.click(element).await
    }

    /// Swipe between two points (accelerating)
    pub async fn swipe(&mut self, from: Point, to: Point, duration_ms: u64) -> ProbeResult<()> {
        info!(?from, ?to, duration_ms, "swipe");
        self.driver
            .perform_actions(&[actions::swipe(from, to, duration_ms)])
            .await
    }

    /// Swipe from `from` by a fraction of the screen
    pub async fn swipe_from_point(
        &mut self,
        from: Point,
        rdx: f64,
        rdy: f64,
        duration_ms: u64,
    ) -> ProbeResult<()> {
        let to = self.relative_target(from, rdx, rdy).await?;
        self.swipe(from, to, duration_ms).await
    }

    /// Fast swipe down to the bottom of the screen, scrolling content back to its top
    pub async fn swipe_to_top(&mut self, from: Point) -> ProbeResult<()> {
        let screen = self.logical_screen_size().await?;
        let to = Point::new(from.x, screen.height - 10);
        self.swipe(from, to, 100).await
    }

    /// Slow, non-flinging drag between two points
    pub async fn drag(&mut self, from: Point, to: Point) -> ProbeResult<()> {
        info!(?from, ?to, "drag");
        let sequence = self.platform.drag(from, to);
        self.driver.perform_actions(&[sequence]).await
    }

    /// Drag from `from` by a fraction of the screen
    pub async fn drag_from_point(&mut self, from: Point, rdx: f64, rdy: f64) -> ProbeResult<()> {
        let to = self.relative_target(from, rdx, rdy).await?;
        self.drag(from, to).await
    }

    async fn relative_target(&mut self, from: Point, rdx: f64, rdy: f64) -> ProbeResult<Point> {
        let screen = self.logical_screen_size().await?;
        let x = f64::from(from.x) + rdx * f64::from(screen.width);
        let y = f64::from(from.y) + rdy * f64::from(screen.height);
        Ok(Point::new(x.max(0.0) as i32, y.max(0.0) as i32))
    }

    // Keyboard

    /// Type text after the configured keyboard delay
    pub async fn send_keys(&mut self, text: &str) -> ProbeResult<()> {
        info!(len = text.chars().count(), "send keys");
        self.sleep(Duration::from_millis(self.config.send_keys_delay_ms))
            .await?;
        self.type_text(text).await
    }

    async fn type_text(&mut self, text: &str) -> ProbeResult<()> {
        match self.platform.key_input(text) {
            KeyInput::Actions(sequence) => self.driver.perform_actions(&[sequence]).await,
            KeyInput::Keys(keys) => self.driver.send_keys(&keys).await,
        }
    }

    /// Press a hardware or editing key
    pub async fn press(&mut self, key: DeviceKey) -> ProbeResult<()> {
        info!(?key, "press key");
        match self.platform.press(key)? {
            KeyPress::Keycode(code) => self.driver.press_keycode(code).await,
            KeyPress::Script { script, args } => {
                self.driver.execute_script(script, args).await?;
                Ok(())
            }
            KeyPress::Text(text) => self.type_text(&text).await,
        }
    }

    /// Press a key `count` times
    pub async fn press_times(&mut self, key: DeviceKey, count: usize) -> ProbeResult<()> {
        if let KeyPress::Text(text) = self.platform.press(key)? {
            return self.type_text(&text.repeat(count)).await;
        }
        for _ in 0..count {
            self.press(key).await?;
        }
        Ok(())
    }

    /// Delete up to `max_chars` characters from the focused field
    pub async fn clear_text_field(&mut self, max_chars: usize) -> ProbeResult<()> {
        self.press_times(DeviceKey::Delete, max_chars).await
    }

    /// Hide the soft keyboard if it is showing; failures are ignored
    pub async fn hide_keyboard(&mut self) {
        match self.driver.is_keyboard_shown().await {
            Ok(true) => {
                info!("keyboard is shown, hiding it");
                if let Err(err) = self.driver.hide_keyboard().await {
                    debug!(error = %err, "hide keyboard failed");
                }
            }
            Ok(false) => {}
            Err(err) => debug!(error = %err, "keyboard state unavailable"),
        }
    }

    // Waits

    /// Set the driver's implicit wait
    pub async fn set_implicit_wait(&mut self, wait: Duration) -> ProbeResult<()> {
        self.driver.set_implicit_wait(wait).await
    }

    /// Restore the configured implicit wait
    pub async fn restore_implicit_wait(&mut self) -> ProbeResult<()> {
        let wait = self.config.implicit_wait();
        self.driver.set_implicit_wait(wait).await
    }

    // Proxy counter

    /// Current proxy command counter; zero without a proxy
    pub fn command_counter(&self) -> u64 {
        self.proxy_session.as_ref().map_or(0, |s| s.counter())
    }

    /// Set the proxy command counter
    pub fn set_command_counter(&self, value: u64) {
        if let Some(session) = &self.proxy_session {
            session.set_counter(value);
        }
    }

    /// Reset the proxy command counter
    pub fn reset_command_counter(&self) {
        if let Some(session) = &self.proxy_session {
            session.reset_counter();
        }
    }

    /// Remote session id seen by the proxy
    pub fn remote_session_id(&self) -> Option<String> {
        self.proxy_session
            .as_ref()
            .and_then(|s| s.session_id())
    }

    // Steps

    /// Run one test step; on failure save a diagnostic bundle and return the error
    pub async fn run_step<T, F>(&mut self, name: &str, step: F) -> ProbeResult<T>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, ProbeResult<T>>,
    {
        info!(step = name, "running step");
        match step(self).await {
            Ok(value) => Ok(value),
            Err(ProbeError::Cancelled) => Err(ProbeError::Cancelled),
            Err(err) => {
                warn!(step = name, error = %err, "step failed");
                self.capture_diagnostics().await;
                Err(err)
            }
        }
    }

    /// Save page source and screenshot under the diagnostics directory
    pub async fn capture_diagnostics(&mut self) -> Option<PathBuf> {
        let dir = diagnostics::bundle_dir(
            &self.config.diagnostics_dir,
            &self.config.device_name,
            &self.config.platform_version,
        );
        diagnostics::capture(&mut self.driver, &dir).await
    }
}
