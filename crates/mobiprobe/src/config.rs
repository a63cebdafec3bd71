//! Session configuration.
//!
//! Everything here is static input: remote endpoint, credentials, retry
//! budgets and the per-platform geometry hints used by the reconciler.
//! Values load from YAML, then environment overrides apply.

use crate::platform::PlatformKind;
use crate::result::{ProbeError, ProbeResult};
use crate::retry::RetryPolicy;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default remote driver endpoint
pub const DEFAULT_REMOTE_URL: &str = "http://localhost:4723";

/// Path prefix stripped by the command proxy
pub const DEFAULT_PATH_PREFIX: &str = "/wd/hub";

/// Default implicit wait (30 seconds)
pub const DEFAULT_IMPLICIT_WAIT_MS: u64 = 30_000;

/// Default idle timeout the remote driver allows between commands (15 minutes)
pub const DEFAULT_NEW_COMMAND_TIMEOUT_SECS: u64 = 900;

/// Delay before typing, giving the keyboard time to appear
pub const DEFAULT_SEND_KEYS_DELAY_MS: u64 = 3_000;

/// Wait before re-resolving a web context that is still loading
pub const DEFAULT_WEB_LOAD_WAIT_MS: u64 = 10_000;

/// Prefix of the accessibility label given to the viewport marker
pub const DEFAULT_MARKER_PREFIX: &str = "mobiprobe-viewport-";

/// Attempts and spacing for one kind of retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySetting {
    /// Maximum attempts
    pub attempts: u32,
    /// Interval between attempts in milliseconds
    pub interval_ms: u64,
}

impl RetrySetting {
    /// Create a new setting
    #[must_use]
    pub const fn new(attempts: u32, interval_ms: u64) -> Self {
        Self {
            attempts,
            interval_ms,
        }
    }

    /// Build a retry policy from this setting
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.interval_ms))
    }
}

/// Retry budgets for every flaky operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Web context resolution (pages can take a long time to expose a context)
    pub context: RetrySetting,
    /// Visible web element search
    pub web_element: RetrySetting,
    /// Scroll-and-rediscover search
    pub scrollable: RetrySetting,
    /// Poll interval when several locators are tried together
    pub locator_poll_ms: u64,
    /// Wait before re-resolving a still-loading web context
    pub web_load_wait_ms: u64,
    /// Waiting for a device to come online
    pub device_wait: RetrySetting,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            context: RetrySetting::new(4, 10_000),
            web_element: RetrySetting::new(3, 3_000),
            scrollable: RetrySetting::new(5, 3_000),
            locator_poll_ms: 5_000,
            web_load_wait_ms: DEFAULT_WEB_LOAD_WAIT_MS,
            device_wait: RetrySetting::new(5, 30_000),
        }
    }
}

/// Native-tree hints for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformGeometry {
    /// Element types whose text feeds the context corpus
    pub text_element_types: Vec<String>,
    /// Attributes holding visible text, in preference order
    pub text_attributes: Vec<String>,
    /// Element types skipped when building the corpus
    pub skipped_element_types: Vec<String>,
    /// Element types that host web content
    pub webview_element_types: Vec<String>,
    /// Names and identifiers of browser toolbar elements
    pub toolbar_identifiers: Vec<String>,
    /// Whether the browser may overlay a toolbar on top of the content
    pub overlay_toolbar: bool,
}

impl PlatformGeometry {
    /// Defaults for iOS (XCUITest trees)
    #[must_use]
    pub fn ios() -> Self {
        Self {
            text_element_types: strings(&["XCUIElementTypeStaticText"]),
            text_attributes: strings(&["value", "label"]),
            skipped_element_types: strings(&[
                "XCUIElementTypeImage",
                "XCUIElementTypeSwitch",
                "XCUIElementTypeToggle",
            ]),
            webview_element_types: strings(&["XCUIElementTypeWebView"]),
            toolbar_identifiers: strings(&[
                "TopBrowserBar",
                "topBrowserBar",
                "TopBrowserToolbar",
                "URL",
                "TabBarItemTitle",
            ]),
            overlay_toolbar: true,
        }
    }

    /// Defaults for Android (UiAutomator2 trees)
    #[must_use]
    pub fn android() -> Self {
        Self {
            text_element_types: strings(&["android.widget.TextView"]),
            text_attributes: strings(&["text", "content-desc"]),
            skipped_element_types: strings(&[
                "android.widget.ImageView",
                "android.widget.Switch",
                "android.widget.ToggleButton",
                "android.widget.CheckBox",
            ]),
            webview_element_types: strings(&["android.webkit.WebView"]),
            toolbar_identifiers: strings(&[
                "com.android.chrome:id/toolbar",
                "com.android.chrome:id/url_bar",
                "com.android.chrome:id/tab_switcher_button",
                "com.sec.android.app.sbrowser:id/location_bar",
            ]),
            overlay_toolbar: false,
        }
    }
}

/// Geometry hints used by the coordinate reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// iOS hints
    pub ios: PlatformGeometry,
    /// Android hints
    pub android: PlatformGeometry,
    /// Prefix of the temporary viewport marker label
    pub marker_prefix: String,
    /// How long the marker stays in the page, in milliseconds
    pub marker_lifetime_ms: u64,
    /// How long to wait for the marker or webview to show up in the native tree
    pub native_lookup_ms: u64,
    /// Content height below which a toolbar-derived area is rejected, as a share of the screen
    pub min_content_height_ratio: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            ios: PlatformGeometry::ios(),
            android: PlatformGeometry::android(),
            marker_prefix: DEFAULT_MARKER_PREFIX.to_string(),
            marker_lifetime_ms: 5_000,
            native_lookup_ms: 1_000,
            min_content_height_ratio: 0.5,
        }
    }
}

impl GeometryConfig {
    /// Hints for one platform
    #[must_use]
    pub const fn for_platform(&self, kind: PlatformKind) -> &PlatformGeometry {
        match kind {
            PlatformKind::Ios => &self.ios,
            PlatformKind::Android => &self.android,
        }
    }
}

/// One-time-passcode service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Base URL of the OTP service
    pub api_url: String,
    /// Lookup retry budget
    pub retry: RetrySetting,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            retry: RetrySetting::new(12, 10_000),
            timeout_ms: 30_000,
        }
    }
}

/// Configuration for one automation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Remote automation server URL
    pub remote_url: String,
    /// Account name for basic auth
    pub username: Option<String>,
    /// API key for basic auth
    pub api_key: Option<String>,
    /// Path prefix the proxy strips before forwarding
    pub path_prefix: String,
    /// Route driver traffic through the local command proxy
    pub use_proxy: bool,
    /// Target platform
    pub platform: PlatformKind,
    /// Device name (used to label diagnostics)
    pub device_name: String,
    /// Platform version (used to label diagnostics)
    pub platform_version: String,
    /// Extra capabilities merged into the session request
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    /// Ratio between screenshot pixels and pointer coordinates
    pub retina_scale: f64,
    /// Implicit wait restored after every search
    pub implicit_wait_ms: u64,
    /// Remote idle timeout in seconds
    pub new_command_timeout_secs: u64,
    /// Delay before typing
    pub send_keys_delay_ms: u64,
    /// Retry budgets
    pub retry: RetryConfig,
    /// Reconciler hints
    pub geometry: GeometryConfig,
    /// Directory receiving diagnostic bundles
    pub diagnostics_dir: PathBuf,
    /// Directory holding recorded scroll references
    pub reference_dir: PathBuf,
    /// OTP service settings
    pub otp: OtpConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            username: None,
            api_key: None,
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            use_proxy: true,
            platform: PlatformKind::Android,
            device_name: String::new(),
            platform_version: String::new(),
            capabilities: serde_json::Map::new(),
            retina_scale: 1.0,
            implicit_wait_ms: DEFAULT_IMPLICIT_WAIT_MS,
            new_command_timeout_secs: DEFAULT_NEW_COMMAND_TIMEOUT_SECS,
            send_keys_delay_ms: DEFAULT_SEND_KEYS_DELAY_MS,
            retry: RetryConfig::default(),
            geometry: GeometryConfig::default(),
            diagnostics_dir: PathBuf::from("debug"),
            reference_dir: PathBuf::from("references"),
            otp: OtpConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML text
    pub fn from_yaml_str(text: &str) -> ProbeResult<Self> {
        let config: Self = serde_yaml_ng::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Apply `MOBIPROBE_*` environment overrides
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("MOBIPROBE_REMOTE_URL") {
            self.remote_url = url;
        }
        if let Some(user) = lookup("MOBIPROBE_USERNAME") {
            self.username = Some(user);
        }
        if let Some(key) = lookup("MOBIPROBE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("MOBIPROBE_OTP_API_URL") {
            self.otp.api_url = url;
        }
        self
    }

    /// Reject values the session cannot work with
    pub fn validate(&self) -> ProbeResult<()> {
        if self.remote_url.trim().is_empty() {
            return Err(ProbeError::config("remote_url must not be empty"));
        }
        if self.retina_scale.is_nan() || self.retina_scale <= 0.0 {
            return Err(ProbeError::config(format!(
                "retina_scale must be positive, got {}",
                self.retina_scale
            )));
        }
        if !(0.0..=1.0).contains(&self.geometry.min_content_height_ratio) {
            return Err(ProbeError::config(
                "geometry.min_content_height_ratio must be within 0..=1",
            ));
        }
        Ok(())
    }

    /// Set the remote URL
    #[must_use]
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = url.into();
        self
    }

    /// Set basic-auth credentials
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the platform
    #[must_use]
    pub const fn with_platform(mut self, platform: PlatformKind) -> Self {
        self.platform = platform;
        self
    }

    /// Set the retina scale
    #[must_use]
    pub const fn with_retina_scale(mut self, scale: f64) -> Self {
        self.retina_scale = scale;
        self
    }

    /// Set the implicit wait
    #[must_use]
    pub const fn with_implicit_wait_ms(mut self, ms: u64) -> Self {
        self.implicit_wait_ms = ms;
        self
    }

    /// Set the send-keys delay
    #[must_use]
    pub const fn with_send_keys_delay_ms(mut self, ms: u64) -> Self {
        self.send_keys_delay_ms = ms;
        self
    }

    /// Replace the retry budgets
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the diagnostics directory
    #[must_use]
    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = dir.into();
        self
    }

    /// Set the reference directory
    #[must_use]
    pub fn with_reference_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reference_dir = dir.into();
        self
    }

    /// Set device labels used for diagnostics
    #[must_use]
    pub fn with_device(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.device_name = name.into();
        self.platform_version = version.into();
        self
    }

    /// Set the OTP service URL
    #[must_use]
    pub fn with_otp_url(mut self, url: impl Into<String>) -> Self {
        self.otp.api_url = url.into();
        self
    }

    /// Implicit wait as a duration
    #[must_use]
    pub const fn implicit_wait(&self) -> Duration {
        Duration::from_millis(self.implicit_wait_ms)
    }

    /// Basic `Authorization` header value, when credentials are set
    #[must_use]
    pub fn basic_auth(&self) -> Option<String> {
        match (&self.username, &self.api_key) {
            (Some(user), Some(key)) => {
                let token =
                    base64::engine::general_purpose::STANDARD.encode(format!("{user}:{key}"));
                Some(format!("Basic {token}"))
            }
            _ => None,
        }
    }

    /// Geometry hints for the configured platform
    #[must_use]
    pub const fn platform_geometry(&self) -> &PlatformGeometry {
        self.geometry.for_platform(self.platform)
    }

    /// Capabilities for a new session, with the configured defaults filled in
    #[must_use]
    pub fn session_capabilities(&self) -> serde_json::Value {
        let mut caps = self.capabilities.clone();
        caps.entry("platformName")
            .or_insert_with(|| serde_json::Value::from(self.platform.name()));
        if !self.device_name.is_empty() {
            caps.entry("appium:deviceName")
                .or_insert_with(|| serde_json::Value::from(self.device_name.clone()));
        }
        if !self.platform_version.is_empty() {
            caps.entry("appium:platformVersion")
                .or_insert_with(|| serde_json::Value::from(self.platform_version.clone()));
        }
        caps.entry("appium:newCommandTimeout")
            .or_insert_with(|| serde_json::Value::from(self.new_command_timeout_secs));
        serde_json::Value::Object(caps)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
