//! DOM cleaning for outbound email markup.
//!
//! Strips active content, neutralises dangerous attributes and reshapes the
//! block-template markup for email clients (Outlook image widths, Apple Mail
//! section widths, button padding) before pruning classes and ids that no
//! stylesheet in the document refers to.

pub mod style;
pub mod url;

use kuchiki::traits::*;
use kuchiki::{ElementData, NodeDataRef, NodeRef};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::dom::{
    Parsed, attr, class_contains, has_attr, has_class, remove_attr, set_attr, tag_name,
    unwrap_node,
};
use crate::generator::StepError;

pub use style::{StyleDeclarations, sanitize_inline_css};
pub use url::sanitize_url;

pub const BUTTON_WRAPPER_CLASS: &str = "noptin-button-block__wrapper";
pub const BUTTON_LINK_CLASS: &str = "noptin-button-link";
pub const BUTTON_LINK_WRAPPER_CLASS: &str = "noptin-button-link__wrapper";
pub const IMAGE_WRAPPER_CLASS: &str = "noptin-image-block__wrapper";
pub const COLUMN_CLASS: &str = "noptin-column";
/// Never kept, even when a stylesheet mentions it.
pub const MARGIN_WRAPPER_CLASS: &str = "noptin-block__margin-wrapper";

/// Width of the email body images are sized against.
const CONTAINER_WIDTH_PX: f64 = 600.0;

const DANGEROUS_TAGS: [&str; 8] = [
    "script", "svg", "iframe", "meta", "object", "embed", "applet", "link",
];

const BLOCK_TAGS: [&str; 11] = [
    "div", "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li",
];

const P_BREAKING_TAGS: [&str; 11] = [
    "div", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "table",
];

static PAIRED_DANGEROUS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DANGEROUS_TAGS
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*?>.*?</{tag}\s*>"))
                .expect("PAIRED_DANGEROUS: hardcoded regex is valid")
        })
        .collect()
});

static VOID_DANGEROUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:meta|link|embed)\b[^>]*>|<(?:script|svg|iframe|object|applet)\b[^>]*/>")
        .expect("VOID_DANGEROUS: hardcoded regex is valid")
});

static STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style[^>]*>(.*?)</style>").expect("STYLE_BLOCK: hardcoded regex is valid")
});

static CLASS_SELECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.([a-z0-9_-]+)").expect("CLASS_SELECTOR: hardcoded regex is valid")
});

static ID_SELECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#([a-z0-9_-]+)").expect("ID_SELECTOR: hardcoded regex is valid")
});

/// Clean email markup. Fragments come back as fragments, full documents as
/// full documents.
pub fn clean_html(html: &str) -> Result<String, StepError> {
    let html = strip_dangerous_elements(html);
    if html.trim().is_empty() {
        return Ok(html);
    }

    let live = LiveSelectors::collect(&html);
    let parsed = Parsed::parse(&html)?;

    for element in parsed.elements() {
        if parsed.contains(element.as_node()) {
            clean_element(&element);
        }
    }

    // Pruning runs last so structural markers stay visible to descendants.
    for element in parsed.elements() {
        live.prune(&element);
    }

    Ok(parsed.serialize())
}

/// Regex pre-pass removing active content before the parser sees it.
pub fn strip_dangerous_elements(html: &str) -> String {
    let mut html = html.to_string();
    for re in PAIRED_DANGEROUS.iter() {
        if re.is_match(&html) {
            html = re.replace_all(&html, "").into_owned();
        }
    }
    VOID_DANGEROUS.replace_all(&html, "").into_owned()
}

/// Class and id names referenced by the document's `<style>` blocks.
struct LiveSelectors {
    classes: HashSet<String>,
    ids: HashSet<String>,
}

impl LiveSelectors {
    fn collect(html: &str) -> Self {
        let mut classes = HashSet::new();
        let mut ids = HashSet::new();

        for block in STYLE_BLOCK.captures_iter(html) {
            let css = &block[1];
            classes.extend(CLASS_SELECTOR.captures_iter(css).map(|c| c[1].to_string()));
            ids.extend(ID_SELECTOR.captures_iter(css).map(|c| c[1].to_string()));
        }
        classes.remove(MARGIN_WRAPPER_CLASS);

        Self { classes, ids }
    }

    fn prune(&self, element: &ElementData) {
        if let Some(class) = attr(element, "class") {
            let styled: Vec<&str> = class
                .split_whitespace()
                .filter(|c| self.classes.contains(*c))
                .collect();
            if styled.is_empty() {
                remove_attr(element, "class");
            } else {
                set_attr(element, "class", styled.join(" "));
            }
        }

        if let Some(id) = attr(element, "id")
            && !self.ids.contains(&id)
        {
            remove_attr(element, "id");
        }
    }
}

fn clean_element(element: &NodeDataRef<ElementData>) {
    let node = element.as_node();
    let tag = tag_name(element).to_string();

    if DANGEROUS_TAGS.contains(&tag.as_str()) {
        node.detach();
        return;
    }

    sanitize_attributes(element);

    if has_attr(element, "data-remove") && remove_marked_ancestor(element) {
        return;
    }

    if BLOCK_TAGS.contains(&tag.as_str()) && !has_content(node) {
        node.detach();
        return;
    }

    match tag.as_str() {
        "td" => mirror_background_color(element),
        "table" => {
            mirror_background_color(element);
            if is_empty_wrapper_table(element) {
                node.detach();
                return;
            }
            widen_section_table(element);
        }
        "a" => {
            if class_contains(element, BUTTON_LINK_CLASS) {
                move_button_padding(element);
            }
            remove_attr(element, "target");
        }
        "p" => {
            let has_block_child = node
                .children()
                .elements()
                .any(|child| P_BREAKING_TAGS.contains(&tag_name(&child)));
            if has_block_child {
                unwrap_node(node);
            }
        }
        "img" if !has_attr(element, "width") => {
            let width = image_width(node);
            set_attr(element, "width", width);
        }
        _ => {}
    }
}

fn sanitize_attributes(element: &ElementData) {
    let names: Vec<String> = element
        .attributes
        .borrow()
        .map
        .keys()
        .map(|name| name.local.to_string())
        .collect();

    for name in names {
        let lower = name.to_ascii_lowercase();
        let Some(value) = attr(element, &name) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }

        if lower == "style" {
            set_attr(element, &name, sanitize_inline_css(&value));
        } else if lower.starts_with("on") {
            remove_attr(element, &name);
        } else if lower == "href" || lower == "src" {
            set_attr(element, &name, sanitize_url(&value));
        }
        // Every other value is escaped by the serializer on the way out.
    }
}

/// Remove the closest ancestor matching the element's `data-remove` value by
/// tag name, class substring or exact id. Returns whether anything was
/// removed.
fn remove_marked_ancestor(element: &NodeDataRef<ElementData>) -> bool {
    let Some(selector) = attr(element, "data-remove") else {
        return false;
    };
    let selector = selector.trim();
    if selector.is_empty() {
        return false;
    }

    let target = element.as_node().ancestors().elements().find(|ancestor| {
        tag_name(ancestor) == selector
            || class_contains(ancestor, selector)
            || attr(ancestor, "id").is_some_and(|id| id == selector)
    });

    match target {
        Some(ancestor) if !matches!(tag_name(&ancestor), "html" | "head" | "body") => {
            ancestor.as_node().detach();
            true
        }
        _ => false,
    }
}

/// An element child or a non-blank text child.
fn has_content(node: &NodeRef) -> bool {
    node.children().any(|child| {
        child.as_element().is_some()
            || child
                .as_text()
                .is_some_and(|text| !text.borrow().trim().is_empty())
    })
}

fn mirror_background_color(element: &ElementData) {
    if has_attr(element, "bgcolor") {
        return;
    }
    let Some(style) = attr(element, "style") else {
        return;
    };
    if let Some(color) = StyleDeclarations::parse(&style).get("background-color") {
        set_attr(element, "bgcolor", color.trim());
    }
}

/// Button tables whose link has nowhere to go, and image tables without an
/// image source.
fn is_empty_wrapper_table(element: &NodeDataRef<ElementData>) -> bool {
    let node = element.as_node();

    if class_contains(element, BUTTON_WRAPPER_CLASS) {
        let Ok(anchor) = node.select_first("a") else {
            return true;
        };
        let filled = |name: &str| attr(&anchor, name).is_some_and(|v| !v.trim().is_empty());
        if !filled("href") && !filled("data-href") {
            return true;
        }
    }

    if class_contains(element, IMAGE_WRAPPER_CLASS) {
        let has_source = node
            .select_first("img")
            .is_ok_and(|img| attr(&img, "src").is_some_and(|src| !src.trim().is_empty()));
        if !has_source {
            return true;
        }
    }

    false
}

/// Move padding from a button link onto its wrapper cell and drop legacy
/// declarations the link no longer needs.
fn move_button_padding(element: &NodeDataRef<ElementData>) {
    let Some(style) = attr(element, "style").filter(|s| !s.trim().is_empty()) else {
        return;
    };

    let mut link_style = StyleDeclarations::parse(&style);
    let padding = link_style.take_where(|p, _| p == "padding" || p.starts_with("padding-"));
    link_style.take_where(|p, v| p == "word-break" && v.eq_ignore_ascii_case("break-word"));
    link_style.remove("background-color");

    if link_style.is_empty() {
        remove_attr(element, "style");
    } else {
        set_attr(element, "style", link_style.to_string());
    }

    if padding.is_empty() {
        return;
    }

    let cell = element
        .as_node()
        .ancestors()
        .elements()
        .find(|ancestor| tag_name(ancestor) == "td");

    if let Some(cell) = cell
        && class_contains(&cell, BUTTON_LINK_WRAPPER_CLASS)
    {
        let mut cell_style = StyleDeclarations::parse(&attr(&cell, "style").unwrap_or_default());
        for (property, value) in padding {
            cell_style.set(&property, value);
        }
        set_attr(&cell, "style", cell_style.to_string());
    }
}

/// Pixel width for an image without one: the width of the enclosing column
/// if there is one, otherwise the full container.
fn image_width(node: &NodeRef) -> String {
    let mut width = "100%".to_string();

    for ancestor in node.ancestors().elements() {
        if has_class(&ancestor, COLUMN_CLASS)
            && let Some(style) = attr(&ancestor, "style")
        {
            if let Some(column_width) = StyleDeclarations::parse(&style).get("width") {
                width = column_width.to_string();
            }
            break;
        }
        if matches!(tag_name(&ancestor), "body" | "html") {
            break;
        }
    }

    to_pixels(&width)
}

fn to_pixels(width: &str) -> String {
    let width = width.trim();
    if width.contains('%') {
        let percentage = leading_number(width);
        let pixels = (percentage / 100.0 * CONTAINER_WIDTH_PX).round() as i64;
        return pixels.to_string();
    }
    width.replace("px", "").trim().to_string()
}

fn leading_number(value: &str) -> f64 {
    let end = value
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && *c == '-')))
        .map_or(value.len(), |(i, _)| i);
    value[..end].parse().unwrap_or(0.0)
}

/// Apple Mail ignores table width attributes in some layouts; make the table
/// fluid and cap it at its declared width instead.
fn widen_section_table(element: &ElementData) {
    if !has_attr(element, "width") {
        return;
    }
    let Some(style) = attr(element, "style") else {
        return;
    };

    let mut declarations = StyleDeclarations::parse(&style);
    let Some(width) = declarations.get("width").map(str::to_string) else {
        return;
    };
    if width == "100%" && declarations.contains("max-width") {
        return;
    }

    declarations.remove("width");
    declarations.remove("max-width");
    declarations.push("width", "100%");
    declarations.push("max-width", width);
    set_attr(element, "style", declarations.to_string());
}
