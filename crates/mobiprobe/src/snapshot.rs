//! Immutable snapshots of native view trees.
//!
//! A [`NodeSnapshot`] is parsed once from page-source XML and never mutated.
//! It backs three things: the text corpus used by context resolution, the
//! overlay-toolbar search in the reconciler, and structural
//! re-identification of a recorded scroll target.

use crate::geometry::Rect;
use crate::result::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Attributes compared during structural re-identification
pub const COMPARABLE_ATTRIBUTES: [&str; 9] = [
    "label",
    "text",
    "visible",
    "class",
    "name",
    "type",
    "resource-id",
    "content-desc",
    "accessibility-id",
];

/// One element of a native view tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Element type, e.g. `XCUIElementTypeButton`
    pub tag: String,
    /// All attributes
    pub attributes: BTreeMap<String, String>,
    /// Element children, in document order
    pub children: Vec<NodeSnapshot>,
    /// Absolute positional xpath, e.g. `/hierarchy/android.widget.FrameLayout[1]`
    pub xpath: String,
}

impl NodeSnapshot {
    /// Parse XML and snapshot its root element
    pub fn parse(xml: &str) -> ProbeResult<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        let xpath = format!("/{}", root.tag_name().name());
        Ok(Self::from_node(root, xpath))
    }

    fn from_node(node: roxmltree::Node<'_, '_>, xpath: String) -> Self {
        let attributes = node
            .attributes()
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect();
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        let children = node
            .children()
            .filter(roxmltree::Node::is_element)
            .map(|child| {
                let tag = child.tag_name().name();
                let index = seen.entry(tag).or_insert(0);
                *index += 1;
                Self::from_node(child, format!("{xpath}/{tag}[{index}]"))
            })
            .collect();
        Self {
            tag: node.tag_name().name().to_string(),
            attributes,
            children,
            xpath,
        }
    }

    /// Attribute value, if present
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// True when the node has no element children
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Rect from `x`/`y`/`width`/`height` or Android `bounds="[l,t][r,b]"`
    #[must_use]
    pub fn rect(&self) -> Option<Rect> {
        if let Some(bounds) = self.attr("bounds") {
            return parse_bounds(bounds);
        }
        let num = |name: &str| self.attr(name)?.trim().parse::<f64>().ok();
        Some(Rect::new(
            num("x")? as i32,
            num("y")? as i32,
            num("width")? as i32,
            num("height")? as i32,
        ))
    }

    /// Every node in pre-order, starting with `self`
    pub fn descendants(&self) -> impl Iterator<Item = &Self> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Chain from `self` down to the first node matching `predicate`
    #[must_use]
    pub fn path_to(&self, predicate: &dyn Fn(&Self) -> bool) -> Option<Vec<&Self>> {
        if predicate(self) {
            return Some(vec![self]);
        }
        self.children.iter().find_map(|child| {
            let mut path = child.path_to(predicate)?;
            path.insert(0, self);
            Some(path)
        })
    }

    /// Structural equality used to re-identify a recorded element.
    ///
    /// Tags must match; each comparable attribute must match when it is
    /// non-empty on both sides; child counts must match and children must be
    /// pairwise equal.
    #[must_use]
    pub fn structurally_equal(&self, other: &Self) -> bool {
        if self.tag != other.tag || self.children.len() != other.children.len() {
            return false;
        }
        let attrs_agree = COMPARABLE_ATTRIBUTES.iter().all(|name| {
            match (self.attr(name), other.attr(name)) {
                (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => a == b,
                _ => true,
            }
        });
        attrs_agree
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.structurally_equal(b))
    }
}

fn parse_bounds(bounds: &str) -> Option<Rect> {
    let nums: Vec<i32> = bounds
        .split(|c: char| !(c.is_ascii_digit() || c == '-'))
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    match nums.as_slice() {
        [left, top, right, bottom] => Some(Rect::new(*left, *top, right - left, bottom - top)),
        _ => None,
    }
}

/// Find the node in `current` matching `reference`.
///
/// Among structurally equal candidates, the one whose xpath equals
/// `recorded_xpath` (ignoring case) wins; otherwise the first in document
/// order.
#[must_use]
pub fn reidentify<'a>(
    current: &'a NodeSnapshot,
    reference: &NodeSnapshot,
    recorded_xpath: &str,
) -> Option<&'a NodeSnapshot> {
    let matches: Vec<&NodeSnapshot> = current
        .descendants()
        .filter(|node| node.tag == reference.tag && node.structurally_equal(reference))
        .collect();
    matches
        .iter()
        .find(|node| node.xpath.eq_ignore_ascii_case(recorded_xpath))
        .or_else(|| matches.first())
        .copied()
}

/// Remove a root prefix the driver cannot search with, keeping a leading slash
#[must_use]
pub fn strip_prefix(xpath: &str, prefix: Option<&str>) -> String {
    match prefix.and_then(|p| xpath.strip_prefix(p)) {
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        Some(rest) => format!("/{rest}"),
        None => xpath.to_string(),
    }
}

/// Recorded context for one scroll-and-rediscover step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollReference {
    /// XPath of the scrollable container
    pub scrollable_element_xpath: String,
    /// XML of the element that was touched while recording
    #[serde(default)]
    pub touched_element_source: Option<String>,
    /// XPath the touched element had while recording
    #[serde(default)]
    pub touched_element_xpath: Option<String>,
}

impl ScrollReference {
    /// Load `{command_id}.json` from `dir`
    pub fn load(dir: &Path, command_id: u64) -> ProbeResult<Self> {
        let path = dir.join(format!("{command_id}.json"));
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ProbeError::config(format!("cannot read scroll reference {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Parsed snapshot of the touched element, if one was recorded
    pub fn touched_snapshot(&self) -> ProbeResult<Option<NodeSnapshot>> {
        self.touched_element_source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(NodeSnapshot::parse)
            .transpose()
    }
}
