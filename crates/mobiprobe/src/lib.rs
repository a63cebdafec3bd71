//! Mobiprobe: resilient mobile app automation over the W3C driver protocol
//!
//! Mobiprobe drives hybrid iOS and Android apps through a remote automation
//! server and smooths over what makes such runs flaky:
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌────────────────┐
//! │ Test steps   │   │ CommandProxy  │   │ Remote driver  │
//! │ (Automation  │──►│ 127.0.0.1:0   │──►│ (device cloud) │
//! │  Session)    │   │ counter/W3C   │   │                │
//! └──────────────┘   └───────────────┘   └────────────────┘
//!        │
//!        ├─ context:   pick the webview context showing the screen
//!        ├─ reconcile: web-document rect → native rect
//!        └─ locate:    polling, visibility and scroll-and-rediscover
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mobiprobe::prelude::*;
//!
//! let config = ProbeConfig::from_yaml_file("mobiprobe.yaml")?.apply_env();
//! let mut session = AutomationSession::connect(config).await?;
//! session.switch_to_web_context().await?;
//! let pay = session.find_web_element_rect(&[Locator::css("#pay")]).await?;
//! session.tap(pay.center()).await?;
//! session.quit().await?;
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_frames))]

mod actions;
mod config;
mod context;
mod diagnostics;
mod geometry;
mod locate;
mod locator;
mod otp;
mod platform;
mod reconcile;
mod result;
mod session;
mod snapshot;
mod webdriver;

/// Remote driver capability interface and the in-memory test driver
pub mod driver;

/// Local command proxy in front of the remote driver
#[allow(clippy::missing_errors_doc)]
pub mod proxy;

/// Bounded retry with a failure hook
pub mod retry;

/// JavaScript run inside web contexts
pub mod scripts;

pub use actions::{ActionSequence, KeyAction, Origin, PointerAction, PointerParameters};
pub use config::{
    GeometryConfig, OtpConfig, PlatformGeometry, ProbeConfig, RetryConfig, RetrySetting,
    DEFAULT_PATH_PREFIX, DEFAULT_REMOTE_URL,
};
pub use context::{
    body_text, resolve_web_context, resolve_with_retry, score, select_candidate, text_corpus,
    ContextCandidate, CONFIDENT_MATCH_PERCENT, HIGH_MATCH_PERCENT,
};
pub use diagnostics::{bundle_dir, capture, sanitize, SCREENSHOT_FILE, SOURCE_FILE};
pub use driver::{AutomationDriver, MockDriver, MockElement, NATIVE_CONTEXT};
pub use geometry::{Point, Rect, Size};
pub use locator::{describe, ElementRef, Locator, Strategy};
pub use otp::{OtpClient, OtpReservation, OtpTarget};
pub use platform::{DeviceKey, DevicePlatform, KeyInput, KeyPress, PlatformKind};
pub use proxy::{CommandProxy, ProxyHandle, ProxySession};
pub use result::{ProbeError, ProbeResult};
pub use retry::{retry, RetryPolicy};
pub use session::AutomationSession;
pub use snapshot::{reidentify, strip_prefix, NodeSnapshot, ScrollReference, COMPARABLE_ATTRIBUTES};
pub use webdriver::WebDriverClient;

#[cfg(any(test, feature = "proptest"))]
pub use geometry::strategies;

/// Everything a test script usually needs
pub mod prelude {
    pub use super::{
        AutomationDriver, AutomationSession, CommandProxy, DeviceKey, ElementRef, Locator,
        OtpClient, PlatformKind, Point, ProbeConfig, ProbeError, ProbeResult, Rect, RetryPolicy,
        Size, WebDriverClient,
    };
}
