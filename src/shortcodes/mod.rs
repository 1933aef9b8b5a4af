//! Shortcode execution for email content.
//!
//! A shortcode is `[name attr="value" flag]`, optionally enclosing content as
//! `[name]inner[/name]`. A bracket directly preceded by `[` belongs to a merge
//! tag (`[[name]]`) and is never treated as a shortcode.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

pub type ShortcodeAttributes = BTreeMap<String, String>;

/// Renders a shortcode from its attributes and enclosed content.
pub type ShortcodeHandler = Arc<dyn Fn(&ShortcodeAttributes, Option<&str>) -> String + Send + Sync>;

static OPENING_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([A-Za-z0-9_-]+)((?:\s[^\[\]]*)?)\]").expect("OPENING_TAG: hardcoded regex is valid")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z0-9_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"']+))|"([^"]*)"|'([^']*)'|([^\s"'/]+)"#)
        .expect("ATTRIBUTE: hardcoded regex is valid")
});

const P_PADDING: &str = r"(?:[\r\n\t ]|\x{a0}|&nbsp;)*";

static WRAPPED_MERGE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"<p>{P_PADDING}(\[\[[^\[\]]*\]\]){P_PADDING}</p>"))
        .expect("WRAPPED_MERGE_TAG: hardcoded regex is valid")
});

static WRAPPED_SHORTCODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"<p>{P_PADDING}(\[/?([A-Za-z0-9_-]+)[^\[\]]*\]){P_PADDING}</p>"))
        .expect("WRAPPED_SHORTCODE: hardcoded regex is valid")
});

/// Selects handlers by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerPattern {
    pub prefix: String,
    pub contains: String,
}

impl HandlerPattern {
    pub fn new(prefix: impl Into<String>, contains: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            contains: contains.into(),
        }
    }

    /// Handlers that render subscriber lists.
    pub fn list_handlers() -> Self {
        Self::new("noptin_", "_list")
    }

    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix) && name.contains(&self.contains)
    }
}

#[derive(Clone, Default)]
pub struct ShortcodeRegistry {
    handlers: BTreeMap<String, ShortcodeHandler>,
}

impl fmt::Debug for ShortcodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShortcodeRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ShortcodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&ShortcodeAttributes, Option<&str>) -> String + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run `f` against a view holding only the handlers `pattern` selects.
    /// The registry itself is left untouched.
    pub fn with_restricted<R>(&self, pattern: &HandlerPattern, f: impl FnOnce(&Self) -> R) -> R {
        let view = Self {
            handlers: self
                .handlers
                .iter()
                .filter(|(name, _)| pattern.matches(name))
                .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
                .collect(),
        };
        f(&view)
    }

    /// Replace every registered shortcode in `content` with its rendering.
    /// Unknown shortcodes are left as written.
    pub fn execute(&self, content: &str) -> String {
        if self.handlers.is_empty() || !content.contains('[') {
            return content.to_string();
        }

        let mut out = String::with_capacity(content.len());
        let mut pos = 0;

        while let Some(caps) = OPENING_TAG.captures_at(content, pos) {
            let Some(tag) = caps.get(0) else {
                break;
            };
            let name = &caps[1];
            let is_merge_tag = content[..tag.start()].ends_with('[');

            let Some(handler) = self.handlers.get(name).filter(|_| !is_merge_tag) else {
                out.push_str(&content[pos..tag.end()]);
                pos = tag.end();
                continue;
            };

            out.push_str(&content[pos..tag.start()]);

            let attributes = parse_attributes(caps.get(2).map_or("", |m| m.as_str()));
            let closing = format!("[/{name}]");
            let (inner, end) = match content[tag.end()..].find(&closing) {
                Some(at) => (
                    Some(&content[tag.end()..tag.end() + at]),
                    tag.end() + at + closing.len(),
                ),
                None => (None, tag.end()),
            };

            out.push_str(&handler(&attributes, inner));
            pos = end;
        }

        out.push_str(&content[pos..]);
        out
    }
}

/// Parse `key="value" key='value' key=value flag` into a map. Flags map to an
/// empty string.
pub fn parse_attributes(raw: &str) -> ShortcodeAttributes {
    let mut attributes = ShortcodeAttributes::new();

    for caps in ATTRIBUTE.captures_iter(raw) {
        if let Some(key) = caps.get(1) {
            let value = caps
                .get(2)
                .or(caps.get(3))
                .or(caps.get(4))
                .map_or("", |m| m.as_str());
            attributes.insert(key.as_str().to_lowercase(), value.to_string());
        } else if let Some(flag) = caps.get(5).or(caps.get(6)).or(caps.get(7)) {
            attributes.insert(flag.as_str().to_string(), String::new());
        }
    }

    attributes
}

/// Drop paragraph wrapping around merge tags and registered shortcodes that
/// sit alone in a paragraph.
pub fn unautop(content: &str, registry: &ShortcodeRegistry) -> String {
    let content = WRAPPED_MERGE_TAG.replace_all(content, "${1}\n");

    if registry.is_empty() {
        return content.into_owned();
    }

    WRAPPED_SHORTCODE
        .replace_all(&content, |caps: &Captures| {
            if registry.is_registered(&caps[2]) {
                caps[1].to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ShortcodeRegistry {
        let mut registry = ShortcodeRegistry::new();
        registry.register("year", |_, _| "2026".to_string());
        registry.register("upper", |_, inner| inner.unwrap_or_default().to_uppercase());
        registry.register("greet", |attrs, _| {
            format!("Hello {}", attrs.get("name").map_or("friend", String::as_str))
        });
        registry.register("noptin_subscriber_list", |_, _| "<ul><li>a</li></ul>".to_string());
        registry
    }

    #[test]
    fn test_executes_self_closing_and_enclosing() {
        let out = registry().execute("(c) [year] [upper]shout[/upper] [greet name=\"Ada\"] [greet]");
        assert_eq!(out, "(c) 2026 SHOUT Hello Ada Hello friend");
    }

    #[test]
    fn test_leaves_merge_tags_and_unknown_codes() {
        let html = "[[first_name]] [[year]] [unknown a=1] [caption]x[/caption]";
        assert_eq!(registry().execute(html), html);
    }

    #[test]
    fn test_restricted_view_only_runs_matching_handlers() {
        let registry = registry();
        let out = registry.with_restricted(&HandlerPattern::list_handlers(), |view| {
            view.execute("[year] [noptin_subscriber_list]")
        });
        assert_eq!(out, "[year] <ul><li>a</li></ul>");
        assert!(registry.is_registered("year"));
    }

    #[test]
    fn test_handler_pattern() {
        let pattern = HandlerPattern::list_handlers();
        assert!(pattern.matches("noptin_subscriber_list"));
        assert!(pattern.matches("noptin_list_items"));
        assert!(!pattern.matches("noptin_button"));
        assert!(!pattern.matches("other_list"));
    }

    #[test]
    fn test_parse_attributes() {
        let attributes = parse_attributes(r#" Name="Ada Lovelace" size='2' count=3 bold /"#);
        assert_eq!(attributes["name"], "Ada Lovelace");
        assert_eq!(attributes["size"], "2");
        assert_eq!(attributes["count"], "3");
        assert_eq!(attributes["bold"], "");
        assert_eq!(attributes.len(), 4);
    }

    #[test]
    fn test_unautop() {
        let out = unautop("<p> [[first_name]]&nbsp;</p><p>[[a]] text</p>", &ShortcodeRegistry::new());
        assert_eq!(out, "[[first_name]]\n<p>[[a]] text</p>");

        let out = unautop("<p>[year]</p><p>[nope]</p>", &registry());
        assert_eq!(out, "[year]<p>[nope]</p>");
    }
}
