//! Web context resolution.
//!
//! An app can expose several web contexts at once (preloaded tabs, hidden
//! webviews, the browser's own pages). The one on screen is found by
//! matching visible native text against each context's body text:
//!
//! 1. collect the native text corpus
//! 2. score every web context (and window) by the share of the corpus its
//!    body contains, stopping early on a high match
//! 3. pick the best match when it is convincing, otherwise the largest
//!    document

use crate::config::PlatformGeometry;
use crate::driver::{is_web_context, AutomationDriver, NATIVE_CONTEXT};
use crate::result::{ProbeError, ProbeResult};
use crate::retry::{ignore_failures, not_retryable, retry, RetryPolicy};
use crate::scripts::{self, is_truthy};
use crate::snapshot::NodeSnapshot;
use scraper::{ElementRef, Html, Selector};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Match share that ends enumeration early
pub const HIGH_MATCH_PERCENT: u32 = 80;

/// Match share above which text matching beats document size
pub const CONFIDENT_MATCH_PERCENT: u32 = 40;

/// Scoring record for one web context or window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextCandidate {
    /// Context name, e.g. `WEBVIEW_com.example`
    pub name: String,
    /// Window handle inside the context, when windows are enumerable
    pub window: Option<String>,
    /// Length of the page source in bytes
    pub source_length: usize,
    /// Corpus entries found in the body text
    pub matched_count: usize,
    /// `matched_count * 100 / corpus size`, 0 for an empty corpus
    pub matched_percent: u32,
    /// `document.hidden` was true
    pub hidden: bool,
}

impl ContextCandidate {
    /// Visible candidate with the given score
    #[must_use]
    pub fn new(name: impl Into<String>, matched_percent: u32, source_length: usize) -> Self {
        Self {
            name: name.into(),
            window: None,
            source_length,
            matched_count: 0,
            matched_percent,
            hidden: false,
        }
    }

    /// Candidate for a hidden document
    #[must_use]
    pub fn hidden(name: impl Into<String>, window: Option<String>) -> Self {
        Self {
            window,
            hidden: true,
            ..Self::new(name, 0, 0)
        }
    }

    /// Set the window handle
    #[must_use]
    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = Some(window.into());
        self
    }

    /// `name` or `name/window`
    #[must_use]
    pub fn id(&self) -> String {
        match &self.window {
            Some(window) => format!("{}/{window}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Visible native text, lower-cased and whitespace-normalised.
///
/// Nodes of a text element type always contribute; other leaf nodes
/// contribute when they carry a text attribute. Skipped types never do.
pub fn text_corpus(native_source: &str, geometry: &PlatformGeometry) -> ProbeResult<Vec<String>> {
    let root = NodeSnapshot::parse(native_source)?;
    let corpus = root
        .descendants()
        .filter(|node| !geometry.skipped_element_types.contains(&node.tag))
        .filter(|node| node.is_leaf() || geometry.text_element_types.contains(&node.tag))
        .filter_map(|node| {
            geometry
                .text_attributes
                .iter()
                .filter_map(|attr| node.attr(attr))
                .map(normalize)
                .find(|text| !text.is_empty())
        })
        .collect();
    Ok(corpus)
}

/// Elements whose text never renders
const NON_RENDERED: [&str; 4] = ["script", "style", "noscript", "template"];

/// Lower-cased rendered text of the document body
#[must_use]
pub fn body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text = match Selector::parse("body") {
        Ok(selector) => document
            .select(&selector)
            .flat_map(rendered_text)
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => rendered_text(document.root_element()).join(" "),
    };
    normalize(&text)
}

fn rendered_text(element: ElementRef<'_>) -> Vec<&str> {
    element
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| NON_RENDERED.contains(&el.name()))
            });
            (!hidden).then_some(&**text)
        })
        .collect()
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Count corpus entries contained in `body` and the share they represent
#[must_use]
pub fn score(corpus: &[String], body: &str) -> (usize, u32) {
    if corpus.is_empty() {
        return (0, 0);
    }
    let matched = corpus.iter().filter(|text| body.contains(text.as_str())).count();
    let percent = matched * 100 / corpus.len();
    (matched, u32::try_from(percent).unwrap_or(100))
}

/// Pick the winner among scored candidates.
///
/// Hidden candidates are discarded. The best match wins when its share is
/// above [`CONFIDENT_MATCH_PERCENT`]; otherwise the largest document does.
/// Remaining ties go to the lexicographically smallest id.
pub fn select_candidate(candidates: &[ContextCandidate]) -> ProbeResult<&ContextCandidate> {
    let visible: Vec<&ContextCandidate> = candidates.iter().filter(|c| !c.hidden).collect();
    let by_name = |a: &ContextCandidate, b: &ContextCandidate| b.id().cmp(&a.id());
    let by_match = |a: &&ContextCandidate, b: &&ContextCandidate| -> Ordering {
        a.matched_percent
            .cmp(&b.matched_percent)
            .then(a.source_length.cmp(&b.source_length))
            .then_with(|| by_name(a, b))
    };
    let best = visible
        .iter()
        .copied()
        .max_by(by_match)
        .ok_or(ProbeError::NoUsableWebContext)?;
    if best.matched_percent > CONFIDENT_MATCH_PERCENT {
        return Ok(best);
    }
    visible
        .iter()
        .copied()
        .max_by(|a, b| {
            a.source_length
                .cmp(&b.source_length)
                .then(a.matched_percent.cmp(&b.matched_percent))
                .then_with(|| by_name(a, b))
        })
        .ok_or(ProbeError::NoUsableWebContext)
}

/// Find the web context showing on screen and switch to it.
///
/// Leaves the driver in the winning context (and window).
pub async fn resolve_web_context<D: AutomationDriver + ?Sized>(
    driver: &mut D,
    geometry: &PlatformGeometry,
) -> ProbeResult<ContextCandidate> {
    driver.switch_context(NATIVE_CONTEXT).await?;
    let native = driver.page_source().await?;
    let corpus = text_corpus(&native, geometry)?;
    debug!(entries = corpus.len(), "native text corpus");

    let web: Vec<String> = driver
        .contexts()
        .await?
        .into_iter()
        .filter(|c| is_web_context(c))
        .collect();
    if web.is_empty() {
        return Err(ProbeError::NoWebContext);
    }

    let mut candidates = Vec::new();
    'contexts: for context in &web {
        if let Err(err) = driver.switch_context(context).await {
            warn!(%context, error = %err, "bad context, skipping");
            continue;
        }
        let windows = driver.window_handles().await.unwrap_or_default();
        let targets: Vec<Option<String>> = if windows.is_empty() {
            vec![None]
        } else {
            windows.into_iter().map(Some).collect()
        };
        for window in targets {
            if let Some(handle) = &window {
                if let Err(err) = driver.switch_window(handle).await {
                    warn!(%context, window = %handle, error = %err, "bad window, skipping");
                    continue;
                }
            }
            match inspect(driver, context, window, &corpus).await {
                Ok(candidate) => {
                    debug!(
                        id = %candidate.id(),
                        percent = candidate.matched_percent,
                        length = candidate.source_length,
                        hidden = candidate.hidden,
                        "scored web context"
                    );
                    let done = candidate.matched_percent >= HIGH_MATCH_PERCENT;
                    candidates.push(candidate);
                    if done {
                        break 'contexts;
                    }
                }
                Err(err) => warn!(%context, error = %err, "cannot inspect context, skipping"),
            }
        }
    }

    let winner = select_candidate(&candidates)?.clone();
    driver.switch_context(&winner.name).await?;
    if let Some(window) = &winner.window {
        driver.switch_window(window).await?;
    }
    info!(context = %winner.id(), "switched to web context");
    Ok(winner)
}

async fn inspect<D: AutomationDriver + ?Sized>(
    driver: &mut D,
    context: &str,
    window: Option<String>,
    corpus: &[String],
) -> ProbeResult<ContextCandidate> {
    let hidden = driver
        .execute_script(scripts::DOCUMENT_HIDDEN, Vec::new())
        .await
        .map(|v| is_truthy(&v))
        .unwrap_or(false);
    if hidden {
        return Ok(ContextCandidate::hidden(context, window));
    }
    let source = driver.page_source().await?;
    let (matched_count, matched_percent) = score(corpus, &body_text(&source));
    Ok(ContextCandidate {
        name: context.to_string(),
        window,
        source_length: source.len(),
        matched_count,
        matched_percent,
        hidden: false,
    })
}

struct Resolution<'a, D: ?Sized> {
    driver: &'a mut D,
    geometry: &'a PlatformGeometry,
}

/// [`resolve_web_context`] under a retry policy.
///
/// Every attempt re-runs the full enumeration. A missing web context ends
/// the loop at once.
pub async fn resolve_with_retry<D: AutomationDriver + ?Sized>(
    driver: &mut D,
    geometry: &PlatformGeometry,
    policy: &RetryPolicy,
) -> ProbeResult<ContextCandidate> {
    let policy = policy.clone().abort_when(not_retryable);
    let mut state = Resolution { driver, geometry };
    retry(
        &mut state,
        &policy,
        |s, attempt| {
            Box::pin(async move {
                info!(attempt, "finding a web context");
                resolve_web_context(&mut *s.driver, s.geometry).await
            })
        },
        ignore_failures,
    )
    .await
}
