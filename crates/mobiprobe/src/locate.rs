//! Resilient element location.
//!
//! Searches here survive slow pages and partial renders: several locators
//! can be polled together, web visibility is checked in the page itself,
//! and an element that is off screen is brought into view by scrolling its
//! recorded container until it shows up. When every locator fails, the
//! element is re-identified from a recorded snapshot of its subtree.

use crate::context::ContextCandidate;
use crate::driver::AutomationDriver;
use crate::geometry::Rect;
use crate::locator::{describe, ElementRef, Locator};
use crate::result::{ProbeError, ProbeResult};
use crate::retry::{ignore_failures, retry, RetryPolicy};
use crate::scripts::{self, ClientRect, ElementOp};
use crate::session::AutomationSession;
use crate::snapshot::{reidentify, strip_prefix, NodeSnapshot, ScrollReference};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

impl<D: AutomationDriver> AutomationSession<D> {
    /// One search with a temporary implicit wait, restored afterwards
    pub(crate) async fn query(
        &mut self,
        locator: &Locator,
        wait: Duration,
    ) -> ProbeResult<Vec<ElementRef>> {
        self.set_implicit_wait(wait).await?;
        let found = self.driver.find_elements(locator).await;
        let restored = self.restore_implicit_wait().await;
        let found = found?;
        restored?;
        Ok(found)
    }

    /// Find every element matching the first locator that matches anything.
    ///
    /// A single locator is queried once with `timeout` as the implicit wait.
    /// Several locators are polled together with no implicit wait, once per
    /// poll interval until `timeout` runs out.
    pub async fn find_elements(
        &mut self,
        locators: &[Locator],
        timeout: Duration,
    ) -> ProbeResult<Vec<ElementRef>> {
        match locators {
            [] => Err(ProbeError::config("at least one locator is required")),
            [single] => {
                let found = self.query(single, timeout).await?;
                if found.is_empty() {
                    return Err(ProbeError::not_found(single.to_string()));
                }
                Ok(found)
            }
            many => {
                let poll = Duration::from_millis(self.config.retry.locator_poll_ms.max(1));
                let attempts = (timeout.as_millis() / poll.as_millis()).max(1);
                let policy = RetryPolicy::new(u32::try_from(attempts).unwrap_or(u32::MAX), poll)
                    .with_cancel_opt(self.cancel.clone())
                    .abort_when(ProbeError::is_authorization);
                self.set_implicit_wait(Duration::ZERO).await?;
                let owned = many.to_vec();
                let found = retry(
                    &mut self.driver,
                    &policy,
                    move |driver, attempt| {
                        let locators = owned.clone();
                        Box::pin(async move {
                            debug!(attempt, locators = %describe(&locators), "polling locators");
                            for locator in &locators {
                                match driver.find_elements(locator).await {
                                    Ok(found) if !found.is_empty() => return Ok(found),
                                    Ok(_) => {}
                                    Err(err @ ProbeError::Cancelled) => return Err(err),
                                    Err(err) if err.is_authorization() => return Err(err),
                                    Err(err) => {
                                        debug!(%locator, error = %err, "locator lookup failed");
                                    }
                                }
                            }
                            Err(ProbeError::not_found(describe(&locators)))
                        })
                    },
                    ignore_failures,
                )
                .await;
                let restored = self.restore_implicit_wait().await;
                let found = found?;
                restored?;
                Ok(found)
            }
        }
    }

    /// Find exactly one element; a lone locator matching several is an error
    pub async fn find_element(
        &mut self,
        locators: &[Locator],
        timeout: Duration,
    ) -> ProbeResult<ElementRef> {
        let mut found = self.find_elements(locators, timeout).await?;
        if let [single] = locators {
            if found.len() > 1 {
                return Err(ProbeError::AmbiguousElement {
                    locator: single.to_string(),
                    count: found.len(),
                });
            }
        }
        Ok(found.swap_remove(0))
    }

    /// Find the first visible element.
    ///
    /// In the native context visibility means a non-empty rect with a
    /// non-negative origin, checked once. In a web context the page decides,
    /// and the search is retried with the web context re-resolved between
    /// attempts.
    pub async fn find_visible(&mut self, locators: &[Locator]) -> ProbeResult<ElementRef> {
        if self.in_native_context() {
            return self.find_visible_once(locators).await;
        }
        let policy = self.policy(self.config.retry.web_element);
        let max = policy.attempts();
        let owned = locators.to_vec();
        retry(
            self,
            &policy,
            move |s, _| {
                let locators = owned.clone();
                Box::pin(async move { s.find_visible_once(&locators).await })
            },
            move |s, _, attempt| {
                Box::pin(async move {
                    if attempt < max {
                        s.switch_to_web_context().await?;
                    }
                    Ok(())
                })
            },
        )
        .await
    }

    async fn find_visible_once(&mut self, locators: &[Locator]) -> ProbeResult<ElementRef> {
        let wait = self.config.implicit_wait();
        let found = self.find_elements(locators, wait).await?;
        let web = !self.in_native_context();
        for element in found {
            let visible = if web {
                self.is_web_element_visible(&element).await?
            } else {
                self.driver.element_rect(&element).await?.is_visible()
            };
            if visible {
                return Ok(element);
            }
        }
        Err(ProbeError::ElementNotVisible {
            locator: describe(locators),
        })
    }

    async fn run_element_op(&mut self, element: &ElementRef, op: ElementOp) -> ProbeResult<Value> {
        let args = vec![element.to_json(), Value::from(op.as_str())];
        self.driver.execute_script(scripts::WEB_ELEMENT, args).await
    }

    /// Ask the page whether a web element is visible
    pub async fn is_web_element_visible(&mut self, element: &ElementRef) -> ProbeResult<bool> {
        let result = self.run_element_op(element, ElementOp::Visible).await?;
        Ok(scripts::is_truthy(&result))
    }

    /// Scroll a web element to the middle of the window
    pub async fn scroll_into_view(&mut self, element: &ElementRef) -> ProbeResult<()> {
        self.run_element_op(element, ElementOp::ScrollToCenter).await?;
        Ok(())
    }

    /// Bounding rect of a web element in document pixels
    pub async fn web_element_rect(&mut self, element: &ElementRef) -> ProbeResult<Rect> {
        let result = self.run_element_op(element, ElementOp::Rect).await?;
        let client = ClientRect::from_script_result(&result)?;
        Ok(client.to_document_rect(self.config.retina_scale))
    }

    /// Center a web element, measure it and map it to native coordinates
    pub async fn web_element_native_rect(&mut self, element: &ElementRef) -> ProbeResult<Rect> {
        self.scroll_into_view(element).await?;
        let rect = self.web_element_rect(element).await?;
        self.to_native_rect(rect).await
    }

    /// Native rect of the first visible web element matching `locators`.
    ///
    /// The web context is resolved afresh on every attempt. The session ends
    /// in the native context.
    pub async fn find_web_element_rect(&mut self, locators: &[Locator]) -> ProbeResult<Rect> {
        let policy = self.policy(self.config.retry.web_element);
        let owned = locators.to_vec();
        let element = retry(
            self,
            &policy,
            move |s, attempt| {
                let locators = owned.clone();
                Box::pin(async move {
                    info!(attempt, locators = %describe(&locators), "finding web element");
                    s.switch_to_web_context().await?;
                    s.find_visible_once(&locators).await
                })
            },
            ignore_failures,
        )
        .await?;
        self.web_element_native_rect(&element).await
    }

    /// Find an element inside the recorded scrollable container of step
    /// `command_id`, scrolling until it is visible
    pub async fn find_on_scrollable(
        &mut self,
        locators: &[Locator],
        command_id: u64,
    ) -> ProbeResult<ElementRef> {
        let web = !self.in_native_context();
        self.scroll_search(locators, command_id, web).await
    }

    /// [`Self::find_on_scrollable`] for a web element, returning its native rect
    pub async fn find_web_element_rect_on_scrollable(
        &mut self,
        locators: &[Locator],
        command_id: u64,
    ) -> ProbeResult<Rect> {
        let element = self.scroll_search(locators, command_id, true).await?;
        self.web_element_native_rect(&element).await
    }

    async fn scroll_search(
        &mut self,
        locators: &[Locator],
        command_id: u64,
        web: bool,
    ) -> ProbeResult<ElementRef> {
        let reference = ScrollReference::load(&self.config.reference_dir, command_id)?;
        let policy = self.policy(self.config.retry.scrollable);
        let max = policy.attempts();
        let mut search = ScrollSearch {
            session: self,
            locators: locators.to_vec(),
            reference,
            web,
            web_target: None,
            container: None,
            scrolls: 0,
        };
        retry(
            &mut search,
            &policy,
            |s, attempt| Box::pin(s.attempt(attempt)),
            move |s, _, attempt| Box::pin(s.recover(attempt, max)),
        )
        .await
    }
}

/// State of one scroll-and-rediscover search
struct ScrollSearch<'s, D> {
    session: &'s mut AutomationSession<D>,
    locators: Vec<Locator>,
    reference: ScrollReference,
    web: bool,
    web_target: Option<ContextCandidate>,
    container: Option<Rect>,
    scrolls: u32,
}

impl<D: AutomationDriver> ScrollSearch<'_, D> {
    async fn attempt(&mut self, attempt: u32) -> ProbeResult<ElementRef> {
        if self.web && attempt == 1 {
            self.resolve_web().await?;
        }
        let locators = self.locators.clone();
        let err = match self.session.find_visible_once(&locators).await {
            Ok(element) => return Ok(element),
            Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
            Err(err) => err,
        };
        debug!(attempt, error = %err, "locators failed, trying the recorded snapshot");
        match self.reidentified().await {
            Ok(Some(locator)) => self.session.find_visible_once(&[locator]).await,
            Ok(None) => Err(err),
            Err(reason) => {
                debug!(error = %reason, "structural lookup failed");
                Err(err)
            }
        }
    }

    /// Locator for the recorded element found structurally in the current tree
    async fn reidentified(&mut self) -> ProbeResult<Option<Locator>> {
        if !self.session.in_native_context() {
            return Ok(None);
        }
        let Some(reference) = self.reference.touched_snapshot()? else {
            return Ok(None);
        };
        let source = self.session.driver.page_source().await?;
        let current = NodeSnapshot::parse(&source)?;
        let recorded = self
            .reference
            .touched_element_xpath
            .as_deref()
            .unwrap_or_default();
        let prefix = self.session.platform.redundant_xpath_prefix();
        Ok(reidentify(&current, &reference, recorded)
            .map(|node| Locator::xpath(strip_prefix(&node.xpath, prefix))))
    }

    async fn recover(&mut self, attempt: u32, max: u32) -> ProbeResult<()> {
        if self.web && attempt == 1 {
            let wait = Duration::from_millis(self.session.config.retry.web_load_wait_ms);
            info!(ms = wait.as_millis() as u64, "waiting for the page to load");
            self.session.sleep(wait).await?;
            return self.resolve_web().await;
        }
        if attempt >= max {
            return Ok(());
        }
        if self.web {
            self.session.switch_to_native().await?;
        }
        let container = self.container().await?;
        let screen = self.session.logical_screen_size().await?;
        let center = if container.is_visible() && Rect::from_size(screen).contains(&container) {
            container.center()
        } else {
            container.center().clamp_into(screen)
        };
        if self.scrolls == 0 {
            info!(?center, "scrolling container to the top");
            self.session.swipe_to_top(center).await?;
        } else {
            info!(?center, scrolls = self.scrolls, "scrolling container down");
            self.session.drag_from_point(center, 0.0, -0.5).await?;
        }
        self.scrolls += 1;
        if self.web {
            self.back_to_web().await?;
        }
        Ok(())
    }

    async fn resolve_web(&mut self) -> ProbeResult<()> {
        let target = self.session.switch_to_web_context().await?;
        self.web_target = Some(target);
        Ok(())
    }

    async fn back_to_web(&mut self) -> ProbeResult<()> {
        let Some(target) = self.web_target.clone() else {
            return self.resolve_web().await;
        };
        self.session.switch_context(&target.name).await?;
        if let Some(window) = &target.window {
            self.session.driver.switch_window(window).await?;
        }
        Ok(())
    }

    /// Rect of the recorded scrollable container, looked up once
    async fn container(&mut self) -> ProbeResult<Rect> {
        if let Some(rect) = self.container {
            return Ok(rect);
        }
        self.session.hide_keyboard().await;
        let prefix = self.session.platform.redundant_xpath_prefix();
        let xpath = strip_prefix(&self.reference.scrollable_element_xpath, prefix);
        let wait = self.session.config.implicit_wait();
        let found = self.session.query(&Locator::xpath(xpath.clone()), wait).await?;
        let Some(element) = found.first() else {
            return Err(ProbeError::ScrollableNotFound { xpath });
        };
        let rect = self.session.driver.element_rect(element).await?;
        debug!(%rect, "scrollable container");
        self.container = Some(rect);
        Ok(rect)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::actions::{ActionSequence, PointerAction};
    use crate::config::ProbeConfig;
    use crate::driver::{MockDriver, MockElement, NATIVE_CONTEXT};
    use serde_json::json;

    const WEB: &str = "WEBVIEW_1";

    fn session(driver: MockDriver) -> AutomationSession<MockDriver> {
        AutomationSession::new(driver, ProbeConfig::default().with_implicit_wait_ms(500))
    }

    fn pay() -> Locator {
        Locator::id("pay")
    }

    mod find_tests {
        use super::*;

        #[tokio::test]
        async fn test_single_locator_uses_timeout_as_implicit_wait() {
            let mut driver = MockDriver::new();
            driver.add_element(NATIVE_CONTEXT, pay(), MockElement::new("e1", Rect::new(0, 0, 10, 10)));
            let mut session = session(driver);
            let found = session
                .find_elements(&[pay()], Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(found, vec![ElementRef::new("e1")]);
            let waits: Vec<&str> = session
                .driver()
                .history()
                .iter()
                .map(String::as_str)
                .filter(|c| c.starts_with("set_implicit_wait"))
                .collect();
            assert_eq!(waits, vec!["set_implicit_wait:2000", "set_implicit_wait:500"]);
        }

        #[tokio::test]
        async fn test_single_locator_not_found() {
            let mut session = session(MockDriver::new());
            let err = session
                .find_elements(&[pay()], Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::ElementNotFound { ref locator } if locator == "id=pay"));
            assert_eq!(session.driver().implicit_wait, Duration::from_millis(500));
        }

        #[tokio::test(start_paused = true)]
        async fn test_multiple_locators_polled_until_timeout() {
            let mut session = session(MockDriver::new());
            let locators = [pay(), Locator::accessibility_id("Pay")];
            let err = session
                .find_elements(&locators, Duration::from_secs(10))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("[id=pay, accessibility id=Pay]"));
            assert_eq!(session.driver().call_count("find_elements"), 4);
            assert!(session.driver().was_called("set_implicit_wait:0"));
            assert_eq!(session.driver().implicit_wait, Duration::from_millis(500));
        }

        #[tokio::test]
        async fn test_second_locator_matches() {
            let mut driver = MockDriver::new();
            let label = Locator::accessibility_id("Pay");
            driver.add_element(NATIVE_CONTEXT, label.clone(), MockElement::new("e2", Rect::new(0, 0, 10, 10)));
            let mut session = session(driver);
            let found = session
                .find_elements(&[pay(), label], Duration::from_secs(10))
                .await
                .unwrap();
            assert_eq!(found[0].id, "e2");
        }

        #[tokio::test]
        async fn test_rejected_locator_falls_through_to_next() {
            let mut driver = MockDriver::new();
            let bad = Locator::xpath("//*[");
            let good = Locator::id("good");
            driver.rejected_locators.insert(bad.clone(), 400);
            driver.add_element(NATIVE_CONTEXT, good.clone(), MockElement::new("e1", Rect::new(0, 0, 10, 10)));
            let mut session = session(driver);
            let found = session
                .find_elements(&[bad, good], Duration::from_millis(300))
                .await
                .unwrap();
            assert_eq!(found, vec![ElementRef::new("e1")]);
            assert_eq!(session.driver().implicit_wait, Duration::from_millis(500));
        }

        #[tokio::test(start_paused = true)]
        async fn test_all_locators_rejected_reports_not_found() {
            let mut driver = MockDriver::new();
            driver.rejected_locators.insert(pay(), 400);
            driver.rejected_locators.insert(Locator::accessibility_id("Pay"), 500);
            let mut session = session(driver);
            let err = session
                .find_elements(&[pay(), Locator::accessibility_id("Pay")], Duration::from_secs(10))
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::ElementNotFound { .. }));
            assert_eq!(session.driver().call_count("find_elements"), 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_unauthorized_locator_fails_immediately() {
            let mut driver = MockDriver::new();
            driver.rejected_locators.insert(pay(), 401);
            driver.add_element(
                NATIVE_CONTEXT,
                Locator::accessibility_id("Pay"),
                MockElement::new("e2", Rect::new(0, 0, 10, 10)),
            );
            let mut session = session(driver);
            let err = session
                .find_elements(&[pay(), Locator::accessibility_id("Pay")], Duration::from_secs(10))
                .await
                .unwrap_err();
            assert!(err.is_authorization());
            assert_eq!(session.driver().call_count("find_elements"), 1);
            assert_eq!(session.driver().implicit_wait, Duration::from_millis(500));
        }

        #[tokio::test]
        async fn test_ambiguous_single_locator() {
            let mut driver = MockDriver::new();
            driver.add_element(NATIVE_CONTEXT, pay(), MockElement::new("a", Rect::new(0, 0, 10, 10)));
            driver.add_element(NATIVE_CONTEXT, pay(), MockElement::new("b", Rect::new(0, 20, 10, 10)));
            let mut session = session(driver);
            let err = session
                .find_element(&[pay()], Duration::ZERO)
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::AmbiguousElement { count: 2, .. }));
        }
    }

    mod visibility_tests {
        use super::*;

        #[tokio::test]
        async fn test_native_visibility_uses_rect() {
            let mut driver = MockDriver::new();
            driver.add_element(NATIVE_CONTEXT, pay(), MockElement::new("off", Rect::new(-5, 0, 10, 10)));
            driver.add_element(NATIVE_CONTEXT, pay(), MockElement::new("on", Rect::new(5, 0, 10, 10)));
            let mut session = session(driver);
            assert_eq!(session.find_visible(&[pay()]).await.unwrap().id, "on");
        }

        #[tokio::test]
        async fn test_native_invisible_fails_once() {
            let mut driver = MockDriver::new();
            driver.add_element(NATIVE_CONTEXT, pay(), MockElement::new("flat", Rect::new(0, 0, 10, 0)));
            let mut session = session(driver);
            let err = session.find_visible(&[pay()]).await.unwrap_err();
            assert!(matches!(err, ProbeError::ElementNotVisible { .. }));
            assert_eq!(session.driver().call_count("find_elements"), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_hidden_web_element_re_resolves_between_attempts() {
            let mut driver = MockDriver::new();
            driver.add_context(WEB, &[]);
            driver.set_source(NATIVE_CONTEXT, "<hierarchy/>");
            driver.add_element(WEB, pay(), MockElement::web("w", json!({})).hidden());
            let mut session = session(driver);
            session.switch_context(WEB).await.unwrap();

            let err = session.find_visible(&[pay()]).await.unwrap_err();
            assert!(matches!(err, ProbeError::ElementNotVisible { .. }));
            assert_eq!(session.driver().call_count("execute_script:element:visible"), 3);
            assert_eq!(session.driver().call_count("contexts"), 2);
        }
    }

    mod web_rect_tests {
        use super::*;

        #[tokio::test]
        async fn test_web_element_mapped_to_native() {
            let mut driver = MockDriver::new();
            driver.add_context(WEB, &[]);
            driver.set_source(NATIVE_CONTEXT, "<hierarchy/>");
            driver.marker_rect = Some(Rect::new(10, 80, 300, 500));
            driver.add_element(
                WEB,
                pay(),
                MockElement::web("w", json!({"x": 300, "y": 150, "width": 600, "height": 120})),
            );
            let config = ProbeConfig::default().with_retina_scale(3.0);
            let mut session = AutomationSession::new(driver, config);

            let rect = session.find_web_element_rect(&[pay()]).await.unwrap();
            assert_eq!(rect, Rect::new(110, 130, 200, 40));
            assert!(session.driver().was_called("execute_script:element:center"));
            assert_eq!(session.current_context(), Some(NATIVE_CONTEXT));
        }

        #[tokio::test]
        async fn test_client_rect_clipped_to_window() {
            let mut driver = MockDriver::new();
            driver.add_element(
                NATIVE_CONTEXT,
                pay(),
                MockElement::web(
                    "w",
                    json!({"x": 0, "y": 0, "width": 200, "height": 5000, "windowInnerHeight": 1600}),
                ),
            );
            let config = ProbeConfig::default().with_retina_scale(2.0);
            let mut session = AutomationSession::new(driver, config);
            let rect = session.web_element_rect(&ElementRef::new("w")).await.unwrap();
            assert_eq!(rect, Rect::new(0, 0, 100, 800));
        }
    }

    mod scroll_tests {
        use super::*;

        fn scroll_view() -> Locator {
            Locator::xpath("//android.widget.ScrollView")
        }

        fn reference_dir(reference: serde_json::Value) -> tempfile::TempDir {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("7.json"), reference.to_string()).unwrap();
            dir
        }

        fn scroll_session(driver: MockDriver, dir: &tempfile::TempDir) -> AutomationSession<MockDriver> {
            let config = ProbeConfig::default()
                .with_implicit_wait_ms(500)
                .with_reference_dir(dir.path());
            AutomationSession::new(driver, config)
        }

        fn pointer_actions(sequence: &ActionSequence) -> Vec<PointerAction> {
            match sequence {
                ActionSequence::Pointer { actions, .. } => actions.clone(),
                ActionSequence::Key { .. } => Vec::new(),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_scrolls_until_element_appears() {
            let dir = reference_dir(json!({"scrollableElementXpath": "//android.widget.ScrollView"}));
            let mut driver = MockDriver::new();
            driver.set_screen_size(1080, 2000);
            driver.add_element(
                NATIVE_CONTEXT,
                scroll_view(),
                MockElement::new("list", Rect::new(0, 300, 1080, 1200)),
            );
            driver.reveal_after(2, NATIVE_CONTEXT, pay(), MockElement::new("pay", Rect::new(40, 900, 200, 80)));
            let mut session = scroll_session(driver, &dir);

            let found = session.find_on_scrollable(&[pay()], 7).await.unwrap();
            assert_eq!(found.id, "pay");

            let driver = session.driver();
            assert_eq!(driver.performed.len(), 2);
            assert!(matches!(
                pointer_actions(&driver.performed[0])[2],
                PointerAction::PointerMove { duration: 100, x: 540, y: 1990, .. }
            ));
            assert!(matches!(
                pointer_actions(&driver.performed[1])[2],
                PointerAction::PointerMove { duration: 300, x: 540, y: 0, .. }
            ));
            assert_eq!(driver.call_count("element_rect:list"), 1);
        }

        #[tokio::test]
        async fn test_structural_fallback_finds_moved_element() {
            let dir = reference_dir(json!({
                "scrollableElementXpath": "//android.widget.ScrollView",
                "touchedElementSource": r#"<android.widget.Button class="android.widget.Button" text="Pay"/>"#,
                "touchedElementXpath": "/hierarchy/android.widget.FrameLayout[1]/android.widget.Button[1]"
            }));
            let mut driver = MockDriver::new();
            driver.set_source(
                NATIVE_CONTEXT,
                r#"<hierarchy><android.widget.FrameLayout>
                    <android.widget.Button class="android.widget.Button" text="Cancel"/>
                    <android.widget.Button class="android.widget.Button" text="Pay" resource-id="btn_new"/>
                </android.widget.FrameLayout></hierarchy>"#,
            );
            driver.add_element(
                NATIVE_CONTEXT,
                Locator::xpath("/hierarchy/android.widget.FrameLayout[1]/android.widget.Button[2]"),
                MockElement::new("moved", Rect::new(10, 10, 100, 40)),
            );
            let mut session = scroll_session(driver, &dir);

            let found = session.find_on_scrollable(&[pay()], 7).await.unwrap();
            assert_eq!(found.id, "moved");
            assert!(session.driver().performed.is_empty());
        }

        #[tokio::test]
        async fn test_missing_container_stops_search() {
            let dir = reference_dir(json!({"scrollableElementXpath": "/AppiumAUT//XCUIElementTypeTable"}));
            let mut driver = MockDriver::new();
            driver.set_screen_size(1170, 2532);
            let config = ProbeConfig::default()
                .with_platform(crate::platform::PlatformKind::Ios)
                .with_reference_dir(dir.path());
            let mut session = AutomationSession::new(driver, config);

            let err = session.find_on_scrollable(&[pay()], 7).await.unwrap_err();
            assert!(matches!(
                err,
                ProbeError::ScrollableNotFound { ref xpath } if xpath == "//XCUIElementTypeTable"
            ));
            assert_eq!(session.driver().call_count("find_elements:id=pay"), 1);
        }

        #[tokio::test]
        async fn test_missing_reference_is_config_error() {
            let dir = tempfile::tempdir().unwrap();
            let mut session = scroll_session(MockDriver::new(), &dir);
            let err = session.find_on_scrollable(&[pay()], 99).await.unwrap_err();
            assert!(matches!(err, ProbeError::Config { .. }));
        }
    }
}
