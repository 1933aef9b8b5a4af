//! String-level link passes: auto-linking bare URLs, tagging URL-text
//! anchors, protocol fixups, and the `href` backup/restore that shields
//! destinations from the inliner and the cleaner.

mod trackable;

use linkify::{LinkFinder, LinkKind};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

use crate::dom::{attr, rename_attr, transform};
use crate::generator::StepError;
use crate::sanitizer::sanitize_url;

pub use trackable::make_links_trackable;

/// Added to anchors whose visible text is their own URL.
pub const RAW_LINK_CLASS: &str = "noptin-raw-link";

/// Text inside these elements is never auto-linked.
const NO_LINK_TAGS: [&str; 6] = ["a", "style", "script", "pre", "code", "textarea"];

static TAG_OR_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<!--.*?-->|<(/?)([a-zA-Z][a-zA-Z0-9]*)(?:[^>"']|"[^"]*"|'[^']*')*>"#)
        .expect("TAG_OR_COMMENT: hardcoded regex is valid")
});

static URL_TEXT_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s+href=["'](http[^"']*)["']([^>]*)>(http[^<]*)</a>"#)
        .expect("URL_TEXT_ANCHOR: hardcoded regex is valid")
});

static CLASS_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bclass=(?:"([^"]*)"|'([^']*)')"#).expect("CLASS_ATTR: hardcoded regex is valid")
});

static BACKED_UP_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a(\s[^>]*?)data-href=(?:"([^"]*)"|'([^']*)')([^>]*)>"#)
        .expect("BACKED_UP_HREF: hardcoded regex is valid")
});

/// Wrap bare `http://` and `https://` URLs in text with anchors.
pub fn make_clickable(html: &str) -> String {
    let mut finder = LinkFinder::new();
    finder.kinds(&[LinkKind::Url]);

    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    let mut skip_depth = 0usize;

    for caps in TAG_OR_COMMENT.captures_iter(html) {
        let Some(tag) = caps.get(0) else {
            continue;
        };

        let text = &html[last..tag.start()];
        if skip_depth == 0 {
            link_text(&finder, text, &mut out);
        } else {
            out.push_str(text);
        }
        out.push_str(tag.as_str());
        last = tag.end();

        let Some(name) = caps.get(2) else {
            continue;
        };
        if !NO_LINK_TAGS.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        if caps.get(1).is_some_and(|slash| !slash.is_empty()) {
            skip_depth = skip_depth.saturating_sub(1);
        } else if !tag.as_str().ends_with("/>") {
            skip_depth += 1;
        }
    }

    let tail = &html[last..];
    if skip_depth == 0 {
        link_text(&finder, tail, &mut out);
    } else {
        out.push_str(tail);
    }
    out
}

fn link_text(finder: &LinkFinder, text: &str, out: &mut String) {
    for span in finder.spans(text) {
        let candidate = span.as_str();
        let is_web_url = span.kind().is_some()
            && ["http://", "https://"].iter().any(|scheme| {
                candidate
                    .get(..scheme.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
            });

        if is_web_url {
            out.push_str(&format!(r#"<a href="{candidate}">{candidate}</a>"#));
        } else {
            out.push_str(candidate);
        }
    }
}

/// Mark anchors whose text is a URL with [`RAW_LINK_CLASS`].
pub fn add_class_to_clickable_links(html: &str) -> String {
    URL_TEXT_ANCHOR
        .replace_all(html, |caps: &Captures| {
            let href = &caps[1];
            let rest = &caps[2];
            let text = &caps[3];

            let Some(class) = CLASS_ATTR.captures(rest) else {
                return format!(r#"<a href="{href}"{rest} class="{RAW_LINK_CLASS}">{text}</a>"#);
            };

            let existing = class.get(1).or(class.get(2)).map_or("", |m| m.as_str());
            if existing.split_whitespace().any(|c| c == RAW_LINK_CLASS) {
                return caps[0].to_string();
            }

            let merged = format!(r#"class="{} {RAW_LINK_CLASS}""#, existing.trim());
            let rest = CLASS_ATTR.replace(rest, merged.as_str());
            format!(r#"<a href="{href}"{rest}>{text}</a>"#)
        })
        .into_owned()
}

/// Collapse doubled protocols left behind when a merge tag holding a full URL
/// sits after a hard-coded `http://`.
pub fn fix_double_protocols(html: &str) -> String {
    let mut html = html.to_string();
    for quote in ['"', '\''] {
        for (doubled, single) in [
            ("http://http://", "http://"),
            ("https://https://", "https://"),
            ("http://https://", "https://"),
            ("https://http://", "http://"),
        ] {
            html = html.replace(&format!("{quote}{doubled}"), &format!("{quote}{single}"));
        }
    }
    html
}

/// Move every `href` into a sanitized `data-href` so later passes cannot
/// rewrite or drop it. Query-only hrefs are made absolute against `site_url`.
pub fn backup_hrefs(html: &str, site_url: &Url) -> Result<String, StepError> {
    let base = with_trailing_slash(site_url);

    transform(html, |parsed| {
        for element in parsed.elements() {
            let Some(href) = attr(&element, "href") else {
                continue;
            };
            let href = if href.starts_with('?') {
                format!("{base}{href}")
            } else {
                href
            };
            rename_attr(&element, "href", "data-href", sanitize_url(&href));
        }
    })
}

fn with_trailing_slash(url: &Url) -> String {
    let url = url.as_str();
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Turn `data-href` back into `href` on anchors.
pub fn restore_hrefs(html: &str) -> String {
    BACKED_UP_HREF
        .replace_all(html, |caps: &Captures| {
            let href = match (caps.get(2), caps.get(3)) {
                (Some(double), _) => double.as_str().to_string(),
                (None, Some(single)) => single.as_str().replace('"', "&quot;"),
                (None, None) => String::new(),
            };
            format!(r#"<a{}href="{}"{}>"#, &caps[1], href, &caps[4])
        })
        .into_owned()
}
