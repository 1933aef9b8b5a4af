use regex::Regex;
use scraper::{ElementRef, Html, Node};
use std::sync::LazyLock;

/// Appended to plain-text emails that carry no unsubscribe link.
pub const UNSUBSCRIBE_LINE: &str = "\n\n[Unsubscribe]([[unsubscribe_url]])";

const BLOCK_TAGS: [&str; 17] = [
    "p", "div", "table", "tr", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "pre", "section", "header", "footer",
];

const SKIPPED_TAGS: [&str; 4] = ["script", "style", "head", "title"];

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("EXCESS_NEWLINES: hardcoded regex is valid"));

static TRAILING_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").expect("TRAILING_SPACES: hardcoded regex is valid"));

/// Strip markup from an email body, keeping the text readable.
///
/// Entities are decoded, `<br>` becomes a newline, block elements are
/// separated by blank lines and links whose text is not their URL are written
/// as `text (url)`.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_fragment(html);
    let mut text = String::new();
    collect_text(document.root_element(), &mut text);

    let text = TRAILING_SPACES.replace_all(&text, "\n");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(data) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = data.name();

                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }

                match name {
                    "br" => out.push('\n'),
                    "a" => {
                        let mut label = String::new();
                        collect_text(child, &mut label);
                        out.push_str(&label);

                        let href = data.attr("href").unwrap_or_default().trim();
                        if !href.is_empty() && !href.starts_with('#') && label.trim() != href {
                            out.push_str(&format!(" ({href})"));
                        }
                    }
                    "li" => {
                        out.push_str("\n- ");
                        collect_text(child, out);
                        out.push('\n');
                    }
                    _ if BLOCK_TAGS.contains(&name) => {
                        out.push_str("\n\n");
                        collect_text(child, out);
                        out.push_str("\n\n");
                    }
                    _ => collect_text(child, out),
                }
            }
            _ => {}
        }
    }
}
