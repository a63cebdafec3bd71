//! JavaScript run inside web contexts.

use crate::geometry::Rect;
use crate::result::{ProbeError, ProbeResult};
use serde::Deserialize;
use serde_json::Value;

/// Element helper; arguments are `[element, operation]`
pub const WEB_ELEMENT: &str = include_str!("../resources/web_element.js");

/// Current pinch-zoom factor
pub const VIEWPORT_SCALE: &str =
    "return (window.visualViewport && window.visualViewport.scale) || 1;";

/// Whether the document is in a background tab or window
pub const DOCUMENT_HIDDEN: &str = "return document.hidden === true;";

/// Insert a fixed, viewport-sized element labelled `arguments[0]` that removes
/// itself after `arguments[1]` milliseconds
pub const INSERT_MARKER: &str = r#"
var label = arguments[0];
var lifetime = arguments[1];
var old = document.getElementById(label);
if (old) { old.remove(); }
var marker = document.createElement("div");
marker.id = label;
marker.setAttribute("role", "img");
marker.setAttribute("aria-label", label);
marker.style.cssText = "position:fixed;left:0;top:0;width:100vw;height:100vh;" +
  "pointer-events:none;background:transparent;z-index:2147483647;";
document.body.appendChild(marker);
setTimeout(function () { marker.remove(); }, lifetime);
return label;
"#;

/// Operations understood by [`WEB_ELEMENT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementOp {
    /// Returns `"true"` or `"false"`
    Visible,
    /// Scrolls the element to the middle of the window
    ScrollToCenter,
    /// Returns the bounding client rect as a JSON string, in device pixels
    Rect,
}

impl ElementOp {
    /// Operation name passed to the script
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::ScrollToCenter => "center",
            Self::Rect => "rect",
        }
    }

    /// Inverse of [`ElementOp::as_str`]
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "visible" => Some(Self::Visible),
            "center" => Some(Self::ScrollToCenter),
            "rect" => Some(Self::Rect),
            _ => None,
        }
    }
}

/// Bounding client rect reported by [`ElementOp::Rect`]
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRect {
    /// Left, device pixels
    pub x: f64,
    /// Top, device pixels
    pub y: f64,
    /// Width, device pixels
    pub width: f64,
    /// Height, device pixels
    pub height: f64,
    /// Window inner height, device pixels
    #[serde(default)]
    pub window_inner_height: Option<f64>,
}

impl ClientRect {
    /// Parse the script result, which may be a JSON string or an object
    pub fn from_script_result(value: &Value) -> ProbeResult<Self> {
        match value {
            Value::String(text) => Ok(serde_json::from_str(text)?),
            Value::Object(_) => Ok(serde_json::from_value(value.clone())?),
            other => Err(ProbeError::unexpected(format!(
                "bounding rect script returned {other}"
            ))),
        }
    }

    /// Convert to document pixels: height is clipped to the window, then
    /// everything is divided by the retina scale and floored
    #[must_use]
    pub fn to_document_rect(&self, retina_scale: f64) -> Rect {
        let height = match self.window_inner_height {
            Some(inner) if inner > 0.0 => self.height.min(inner),
            _ => self.height,
        };
        let scale = if retina_scale > 0.0 { retina_scale } else { 1.0 };
        let f = |v: f64| (v / scale).floor() as i32;
        Rect::new(f(self.x), f(self.y), f(self.width), f(height))
    }
}

/// Parse a truthy script result (`true`, `"true"`)
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Parse the viewport scale, defaulting to 1.0 when missing or non-positive
#[must_use]
pub fn parse_scale(value: &Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .filter(|s| *s > 0.0 && s.is_finite())
        .unwrap_or(1.0)
}

/// Unique label for a viewport marker
#[must_use]
pub fn marker_label(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}
