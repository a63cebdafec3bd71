//! Result and error types for mobiprobe.

use thiserror::Error;

/// Result type for mobiprobe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that can occur while driving a device session
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No element matched any of the locators
    #[error("Element not found: {locator}")]
    ElementNotFound {
        /// Locator(s) that were tried
        locator: String,
    },

    /// Element exists but is not visible on screen
    #[error("Element is not visible: {locator}")]
    ElementNotVisible {
        /// Locator that matched
        locator: String,
    },

    /// A locator matched more than one element where exactly one was expected
    #[error("Expected exactly one element for {locator}, found {count}")]
    AmbiguousElement {
        /// Locator that matched
        locator: String,
        /// Number of matches
        count: usize,
    },

    /// The driver exposes no web content context at all
    #[error("No web context is available")]
    NoWebContext,

    /// Every web context was hidden or unusable
    #[error("Cannot find any usable web contexts")]
    NoUsableWebContext,

    /// The recorded scrollable container cannot be located
    #[error("Scrollable container not found: {xpath}")]
    ScrollableNotFound {
        /// XPath of the container
        xpath: String,
    },

    /// Webview bounds could not be resolved in native space
    #[error("Cannot resolve webview geometry: {message}")]
    WebviewGeometry {
        /// Error message
        message: String,
    },

    /// The remote driver returned an error for a command
    #[error("Driver command {command} failed ({status}): {message}")]
    Driver {
        /// Command path
        command: String,
        /// HTTP status
        status: u16,
        /// Error message
        message: String,
    },

    /// A collaborator answered 401 or 403
    #[error("Unauthorized ({status}): {message}")]
    Unauthorized {
        /// HTTP status
        status: u16,
        /// Error message
        message: String,
    },

    /// A collaborator answered with an unexpected status
    #[error("Remote error {status}: {body}")]
    Remote {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// A value came back in a shape we could not use
    #[error("Unexpected response: {message}")]
    UnexpectedResponse {
        /// Error message
        message: String,
    },

    /// The command proxy failed to start or serve
    #[error("Proxy error: {message}")]
    Proxy {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// A retry loop or wait was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Native page source could not be parsed
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Screenshot decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ProbeError {
    /// Create an element-not-found error
    #[must_use]
    pub fn not_found(locator: impl Into<String>) -> Self {
        Self::ElementNotFound {
            locator: locator.into(),
        }
    }

    /// Create a webview geometry error
    #[must_use]
    pub fn geometry(message: impl Into<String>) -> Self {
        Self::WebviewGeometry {
            message: message.into(),
        }
    }

    /// Create an unexpected-response error
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Map an HTTP failure status to the matching error kind
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 401 || status == 403 {
            Self::Unauthorized {
                status,
                message: body,
            }
        } else {
            Self::Remote { status, body }
        }
    }

    /// True for 401/403 answers, which must never be retried
    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// True for failures that may clear up on a later attempt
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Unauthorized { .. }
                | Self::Cancelled
                | Self::NoWebContext
                | Self::ScrollableNotFound { .. }
                | Self::WebviewGeometry { .. }
                | Self::Config { .. }
        )
    }
}
