//! Web-document to native coordinate reconciliation.
//!
//! A rect measured by in-page script lives in CSS pixels relative to the
//! visual viewport. Native gestures need device coordinates, so the
//! viewport's native origin has to be found first. The preferred way is a
//! temporary marker element covering the viewport, which shows up in the
//! native tree with its exact bounds. When the marker cannot be found the
//! content area is derived from the webview container, or from the browser
//! toolbars above it.

use crate::driver::AutomationDriver;
use crate::geometry::Rect;
use crate::locator::Locator;
use crate::result::{ProbeError, ProbeResult};
use crate::scripts;
use crate::session::AutomationSession;
use crate::snapshot::NodeSnapshot;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

impl<D: AutomationDriver> AutomationSession<D> {
    /// Map a rect from the current web context to native coordinates.
    ///
    /// The session must be in the web context that produced `web_rect`; it
    /// is left in the native context. The result always lies inside the
    /// resolved content area.
    pub async fn to_native_rect(&mut self, web_rect: Rect) -> ProbeResult<Rect> {
        let scale = scripts::parse_scale(
            &self
                .driver
                .execute_script(scripts::VIEWPORT_SCALE, Vec::new())
                .await?,
        );
        let label = self.insert_marker().await;
        self.switch_to_native().await?;

        let content = match label {
            Some(label) => match self.marker_rect(&label).await? {
                Some(rect) => rect,
                None => self.content_rect().await?,
            },
            None => self.content_rect().await?,
        };
        let native = web_rect
            .scaled(scale)
            .translate(content.x, content.y)
            .crop_to(&content);
        info!(%web_rect, %content, scale, %native, "reconciled web rect");
        Ok(native)
    }

    async fn insert_marker(&mut self) -> Option<String> {
        let geometry = &self.config.geometry;
        let label = scripts::marker_label(&geometry.marker_prefix);
        let args = vec![
            Value::from(label.clone()),
            Value::from(geometry.marker_lifetime_ms),
        ];
        match self.driver.execute_script(scripts::INSERT_MARKER, args).await {
            Ok(_) => Some(label),
            Err(err) => {
                warn!(error = %err, "cannot insert viewport marker");
                None
            }
        }
    }

    async fn marker_rect(&mut self, label: &str) -> ProbeResult<Option<Rect>> {
        let wait = Duration::from_millis(self.config.geometry.native_lookup_ms);
        let found = self.query(&Locator::accessibility_id(label), wait).await?;
        let Some(marker) = found.first() else {
            debug!(label, "viewport marker not in native tree");
            return Ok(None);
        };
        let rect = self.driver.element_rect(marker).await?;
        Ok(rect.is_visible().then_some(rect))
    }

    /// Native rect of the web content area, without the marker
    async fn content_rect(&mut self) -> ProbeResult<Rect> {
        let geometry = self.config.platform_geometry().clone();
        let wait = Duration::from_millis(self.config.geometry.native_lookup_ms);
        let locator = self.platform.webview_locator(&geometry);
        let webview = match self.query(&locator, wait).await?.first() {
            Some(element) => Some(self.driver.element_rect(element).await?),
            None => None,
        };

        match webview {
            Some(webview) if geometry.overlay_toolbar => {
                let top = match self.toolbar_bottom(Some(webview)).await? {
                    Some(bottom) => Some(bottom),
                    None => self.overlay_bottom_from_tree(webview).await?,
                };
                Ok(top.map_or(webview, |top| webview.with_top(top)))
            }
            Some(webview) => Ok(webview),
            None => self.content_below_toolbars().await,
        }
    }

    /// Lowest bottom edge among toolbar elements, optionally only those inside `within`
    async fn toolbar_bottom(&mut self, within: Option<Rect>) -> ProbeResult<Option<i32>> {
        let geometry = self.config.platform_geometry().clone();
        let Some(locator) = self.platform.toolbar_locator(&geometry) else {
            return Ok(None);
        };
        let found = self.query(&locator, Duration::ZERO).await?;
        let mut bottom = None;
        for element in &found {
            let rect = self.driver.element_rect(element).await?;
            let inside = within.map_or(true, |w| w.contains(&rect) && w != rect);
            if rect.is_visible() && inside {
                bottom = bottom.max(Some(rect.bottom()));
            }
        }
        Ok(bottom)
    }

    async fn content_below_toolbars(&mut self) -> ProbeResult<Rect> {
        let screen = Rect::from_size(self.logical_screen_size().await?);
        let Some(bottom) = self.toolbar_bottom(None).await? else {
            debug!("no webview or toolbar, using the whole screen");
            return Ok(screen);
        };
        let content = screen.with_top(bottom);
        let min_height =
            f64::from(screen.height) * self.config.geometry.min_content_height_ratio;
        if f64::from(content.height) < min_height {
            debug!(%content, "toolbar leaves too little room, using the whole screen");
            return Ok(screen);
        }
        Ok(content)
    }

    /// Bottom of the first overlay sibling found walking up from the webview
    async fn overlay_bottom_from_tree(&mut self, webview: Rect) -> ProbeResult<Option<i32>> {
        let source = self.driver.page_source().await?;
        let tree = NodeSnapshot::parse(&source)?;
        let types = &self.config.platform_geometry().webview_element_types;
        let is_webview =
            |node: &NodeSnapshot| types.contains(&node.tag) && node.rect() == Some(webview);
        let Some(path) = tree.path_to(&is_webview) else {
            return Err(ProbeError::geometry(format!(
                "webview {webview} not in page source"
            )));
        };
        for ancestor in path.iter().rev().skip(1) {
            let Some(first) = ancestor.children.first().and_then(NodeSnapshot::rect) else {
                continue;
            };
            if webview.contains(&first) && first != webview {
                return Ok(Some(first.bottom()));
            }
        }
        Ok(None)
    }
}
