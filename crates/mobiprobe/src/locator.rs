//! Element locators and element references.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Key carrying an element id in W3C responses
pub const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52f-4f735466cecf";

/// Key carrying an element id in legacy responses
pub const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

/// How a locator value is interpreted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// XPath over the native tree or the DOM
    Xpath,
    /// Resource id / element id
    Id,
    /// Accessibility identifier
    AccessibilityId,
    /// Native class name
    ClassName,
    /// CSS selector (web contexts only)
    CssSelector,
    /// Element name
    Name,
    /// Tag name (web contexts only)
    TagName,
}

impl Strategy {
    /// Name used in the `using` field of find requests
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::Xpath => "xpath",
            Self::Id => "id",
            Self::AccessibilityId => "accessibility id",
            Self::ClassName => "class name",
            Self::CssSelector => "css selector",
            Self::Name => "name",
            Self::TagName => "tag name",
        }
    }
}

/// A strategy plus the value to search for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    /// Search strategy
    pub strategy: Strategy,
    /// Search value
    pub value: String,
}

impl Locator {
    /// Create a locator
    #[must_use]
    pub fn new(strategy: Strategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }

    /// XPath locator
    #[must_use]
    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(Strategy::Xpath, value)
    }

    /// Id locator
    #[must_use]
    pub fn id(value: impl Into<String>) -> Self {
        Self::new(Strategy::Id, value)
    }

    /// Accessibility id locator
    #[must_use]
    pub fn accessibility_id(value: impl Into<String>) -> Self {
        Self::new(Strategy::AccessibilityId, value)
    }

    /// Class name locator
    #[must_use]
    pub fn class_name(value: impl Into<String>) -> Self {
        Self::new(Strategy::ClassName, value)
    }

    /// CSS selector locator
    #[must_use]
    pub fn css(value: impl Into<String>) -> Self {
        Self::new(Strategy::CssSelector, value)
    }

    /// Tag name locator
    #[must_use]
    pub fn tag_name(value: impl Into<String>) -> Self {
        Self::new(Strategy::TagName, value)
    }

    /// Body of a find-element request
    #[must_use]
    pub fn to_wire(&self) -> Value {
        json!({ "using": self.strategy.wire_name(), "value": self.value })
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.strategy.wire_name(), self.value)
    }
}

/// Human-readable list of locators for error messages
#[must_use]
pub fn describe(locators: &[Locator]) -> String {
    let parts: Vec<String> = locators.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Opaque handle to an element held by the remote driver
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    /// Driver-assigned element id
    pub id: String,
}

impl ElementRef {
    /// Wrap an element id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Read an element reference in either dialect
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        value
            .get(W3C_ELEMENT_KEY)
            .or_else(|| value.get(LEGACY_ELEMENT_KEY))
            .and_then(Value::as_str)
            .map(Self::new)
    }

    /// Encode as a script argument understood by both dialects
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({ W3C_ELEMENT_KEY: self.id, LEGACY_ELEMENT_KEY: self.id })
    }
}
