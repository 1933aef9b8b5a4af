//! Thin helpers over kuchiki shared by every DOM-based pass.
//!
//! Each pass parses its own copy of the markup and serializes it back; no tree
//! outlives a single call.

use kuchiki::traits::*;
use kuchiki::{ElementData, NodeDataRef, NodeRef};
use regex::Regex;
use std::sync::LazyLock;

use crate::generator::StepError;

static DOCUMENT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:!doctype|html|body)[\s>]").expect("DOCUMENT_MARKER: hardcoded regex is valid")
});

/// A parsed copy of some markup, remembering whether it was a whole document
/// or a fragment so it serializes back in the same shape.
pub struct Parsed {
    pub document: NodeRef,
    is_fragment: bool,
}

impl Parsed {
    pub fn parse(html: &str) -> Result<Self, StepError> {
        let document = kuchiki::parse_html().one(html);

        if document.select_first("body").is_err() {
            return Err(StepError::Parse("document has no body".to_string()));
        }

        Ok(Self {
            document,
            is_fragment: !DOCUMENT_MARKER.is_match(html),
        })
    }

    /// Every element currently in the tree, in document order.
    pub fn elements(&self) -> Vec<NodeDataRef<ElementData>> {
        self.document.descendants().elements().collect()
    }

    /// Whether `node` is still attached to this document.
    pub fn contains(&self, node: &NodeRef) -> bool {
        node.ancestors().last().is_some_and(|root| root == self.document)
    }

    pub fn serialize(&self) -> String {
        if !self.is_fragment {
            return self.document.to_string();
        }

        // Fragments come back without the implied html/head/body wrappers.
        // Anything the parser hoisted into <head> (leading <style> blocks)
        // is kept in front of the body content.
        let mut out = String::new();
        for section in ["head", "body"] {
            if let Ok(container) = self.document.select_first(section) {
                for child in container.as_node().children() {
                    out.push_str(&child.to_string());
                }
            }
        }
        out
    }
}

/// Lower-case tag name of an element.
pub fn tag_name(element: &ElementData) -> &str {
    &element.name.local
}

pub fn attr(element: &ElementData, name: &str) -> Option<String> {
    element.attributes.borrow().get(name).map(|value| value.to_string())
}

pub fn has_attr(element: &ElementData, name: &str) -> bool {
    element.attributes.borrow().contains(name)
}

pub fn set_attr(element: &ElementData, name: &str, value: impl Into<String>) {
    element.attributes.borrow_mut().insert(name, value.into());
}

pub fn remove_attr(element: &ElementData, name: &str) {
    element.attributes.borrow_mut().remove(name);
}

/// Replace `from` with `to` carrying a new value. Does nothing when the
/// element has no `from` attribute. Attributes serialize in name order, so
/// the renamed one may move.
pub fn rename_attr(element: &ElementData, from: &str, to: &str, value: impl Into<String>) {
    let mut attributes = element.attributes.borrow_mut();
    if attributes.remove(from).is_none() {
        return;
    }
    attributes.insert(to, value.into());
}

/// Whether the element's class attribute contains `needle` anywhere.
pub fn class_contains(element: &ElementData, needle: &str) -> bool {
    attr(element, "class").is_some_and(|class| class.contains(needle))
}

/// Whether the element's class list holds exactly `class`.
pub fn has_class(element: &ElementData, class: &str) -> bool {
    attr(element, "class").is_some_and(|value| value.split_whitespace().any(|c| c == class))
}

/// Replace `node` with its children.
pub fn unwrap_node(node: &NodeRef) {
    if node.parent().is_none() {
        return;
    }
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        node.insert_before(child);
    }
    node.detach();
}

/// Parse, run `f` over the tree, serialize.
pub fn transform(html: &str, f: impl FnOnce(&Parsed)) -> Result<String, StepError> {
    let parsed = Parsed::parse(html)?;
    f(&parsed);
    Ok(parsed.serialize())
}
