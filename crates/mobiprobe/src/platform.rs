//! Platform profiles.
//!
//! Everything that differs between iOS and Android sessions sits behind
//! [`DevicePlatform`]. A profile is picked once, when the session is set up,
//! so callers never branch on the platform themselves.

use crate::actions::{self, ActionSequence};
use crate::config::PlatformGeometry;
use crate::geometry::Point;
use crate::locator::Locator;
use crate::result::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Supported device platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// iOS / XCUITest
    Ios,
    /// Android / UiAutomator2
    Android,
}

impl PlatformKind {
    /// Value of the `platformName` capability
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ios => "iOS",
            Self::Android => "Android",
        }
    }

    /// Parse a `platformName` capability, case-insensitively
    #[must_use]
    pub fn from_capability(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ios" => Some(Self::Ios),
            "android" => Some(Self::Android),
            _ => None,
        }
    }

    /// The profile for this platform
    #[must_use]
    pub fn profile(self) -> Arc<dyn DevicePlatform> {
        match self {
            Self::Ios => Arc::new(Ios),
            Self::Android => Arc::new(Android),
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Hardware and editing keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKey {
    /// Home button
    Home,
    /// Back navigation
    Back,
    /// Enter / return
    Enter,
    /// Backspace
    Delete,
    /// Recent apps
    AppSwitch,
}

/// How a key press reaches the device
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPress {
    /// Android key code
    Keycode(u32),
    /// Driver extension script with arguments
    Script {
        /// Script name
        script: &'static str,
        /// Arguments
        args: Vec<Value>,
    },
    /// Text typed through the keyboard
    Text(String),
}

/// How typed text reaches the device
#[derive(Debug, Clone, PartialEq)]
pub enum KeyInput {
    /// W3C key actions
    Actions(ActionSequence),
    /// The driver's send-keys endpoint
    Keys(String),
}

/// Behaviour that differs between platforms
pub trait DevicePlatform: Send + Sync + std::fmt::Debug {
    /// Which platform this is
    fn kind(&self) -> PlatformKind;

    /// Drag gesture tuned for the platform's gesture recognisers
    fn drag(&self, from: Point, to: Point) -> ActionSequence;

    /// Text input
    fn key_input(&self, text: &str) -> KeyInput;

    /// Hardware key press
    fn press(&self, key: DeviceKey) -> ProbeResult<KeyPress>;

    /// Root prefix some drivers put on recorded xpaths, which fails to match when searching
    fn redundant_xpath_prefix(&self) -> Option<&'static str>;

    /// Locator for the app root, when the app can be letterboxed
    fn app_root(&self) -> Option<Locator>;

    /// Locator for the first web-content container
    fn webview_locator(&self, geometry: &PlatformGeometry) -> Locator {
        let union = geometry
            .webview_element_types
            .iter()
            .map(|t| format!("//{t}"))
            .collect::<Vec<_>>()
            .join(" | ");
        Locator::xpath(format!("({union})[1]"))
    }

    /// Locator matching any configured toolbar element
    fn toolbar_locator(&self, geometry: &PlatformGeometry) -> Option<Locator> {
        if geometry.toolbar_identifiers.is_empty() {
            return None;
        }
        let predicates = geometry
            .toolbar_identifiers
            .iter()
            .flat_map(|id| {
                [
                    format!("@name='{id}'"),
                    format!("@resource-id='{id}'"),
                    format!("child::*[@name='{id}']"),
                ]
            })
            .collect::<Vec<_>>()
            .join(" or ");
        Some(Locator::xpath(format!("//*[{predicates}]")))
    }
}

/// iOS profile
#[derive(Debug, Clone, Copy, Default)]
pub struct Ios;

impl DevicePlatform for Ios {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Ios
    }

    fn drag(&self, from: Point, to: Point) -> ActionSequence {
        actions::hold_and_drag(from, to)
    }

    fn key_input(&self, text: &str) -> KeyInput {
        KeyInput::Keys(text.to_string())
    }

    fn press(&self, key: DeviceKey) -> ProbeResult<KeyPress> {
        match key {
            DeviceKey::Home => Ok(KeyPress::Script {
                script: "mobile: pressButton",
                args: vec![json!({"name": "home"})],
            }),
            DeviceKey::Enter => Ok(KeyPress::Text("\n".to_string())),
            DeviceKey::Delete => Ok(KeyPress::Text("\u{8}".to_string())),
            DeviceKey::Back | DeviceKey::AppSwitch => Err(ProbeError::config(format!(
                "{key:?} key is not available on iOS"
            ))),
        }
    }

    fn redundant_xpath_prefix(&self) -> Option<&'static str> {
        Some("/AppiumAUT")
    }

    fn app_root(&self) -> Option<Locator> {
        Some(Locator::xpath("//XCUIElementTypeApplication"))
    }
}

/// Android profile
#[derive(Debug, Clone, Copy, Default)]
pub struct Android;

impl DevicePlatform for Android {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Android
    }

    fn drag(&self, from: Point, to: Point) -> ActionSequence {
        actions::settle_and_drag(from, to)
    }

    fn key_input(&self, text: &str) -> KeyInput {
        KeyInput::Actions(actions::type_text(text))
    }

    fn press(&self, key: DeviceKey) -> ProbeResult<KeyPress> {
        let code = match key {
            DeviceKey::Home => 3,
            DeviceKey::Back => 4,
            DeviceKey::Enter => 66,
            DeviceKey::Delete => 67,
            DeviceKey::AppSwitch => 187,
        };
        Ok(KeyPress::Keycode(code))
    }

    fn redundant_xpath_prefix(&self) -> Option<&'static str> {
        None
    }

    fn app_root(&self) -> Option<Locator> {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parsing() {
        assert_eq!(PlatformKind::from_capability("IOS"), Some(PlatformKind::Ios));
        assert_eq!(
            PlatformKind::from_capability("android"),
            Some(PlatformKind::Android)
        );
        assert_eq!(PlatformKind::from_capability("tizen"), None);
    }

    #[test]
    fn test_profiles_match_kind() {
        assert_eq!(PlatformKind::Ios.profile().kind(), PlatformKind::Ios);
        assert_eq!(PlatformKind::Android.profile().kind(), PlatformKind::Android);
    }

    #[test]
    fn test_webview_locator_from_hints() {
        let locator = Android.webview_locator(&PlatformGeometry::android());
        assert_eq!(locator, Locator::xpath("(//android.webkit.WebView)[1]"));
    }

    #[test]
    fn test_toolbar_locator_covers_identifiers() {
        let locator = Ios.toolbar_locator(&PlatformGeometry::ios()).unwrap();
        assert!(locator.value.contains("@name='TopBrowserBar'"));
        assert!(locator.value.contains("child::*[@name='URL']"));
    }

    #[test]
    fn test_key_input_per_platform() {
        assert_eq!(Ios.key_input("hi"), KeyInput::Keys("hi".to_string()));
        assert!(matches!(Android.key_input("hi"), KeyInput::Actions(_)));
    }

    #[test]
    fn test_press_keys() {
        assert_eq!(Android.press(DeviceKey::Enter).unwrap(), KeyPress::Keycode(66));
        assert_eq!(
            Ios.press(DeviceKey::Enter).unwrap(),
            KeyPress::Text("\n".to_string())
        );
        assert!(Ios.press(DeviceKey::Back).is_err());
    }

    #[test]
    fn test_drag_shapes_differ() {
        let from = Point::new(100, 600);
        let to = Point::new(100, 200);
        assert_ne!(Ios.drag(from, to), Android.drag(from, to));
    }
}
