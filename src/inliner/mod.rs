//! Inlining of stylesheet rules into `style` attributes.

use kuchiki::Selectors;
use kuchiki::traits::*;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

use crate::dom::{Parsed, attr, set_attr, tag_name};
use crate::sanitizer::StyleDeclarations;

static CSS_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("CSS_COMMENT: hardcoded regex is valid"));

#[derive(Error, Debug)]
pub enum InlineError {
    #[error("could not parse markup: {0}")]
    Parse(String),

    #[error("inliner panicked")]
    Panicked,
}

/// Turns stylesheet rules into inline `style` attributes.
#[cfg_attr(test, mockall::automock)]
pub trait CssInliner: Send + Sync {
    fn inline(&self, html: &str, css: &str) -> Result<String, InlineError>;
}

/// Inliner backed by kuchiki's selector matching.
///
/// Only top-level style rules are inlined; at-rule blocks such as `@media`
/// stay behind in whatever `<style>` element carried them. A property set by
/// several rules takes the value of the most specific one, later rules
/// winning ties. Declarations already inline beat the sheet unless the sheet
/// marks its own as `!important`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectorInliner;

impl SelectorInliner {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Declaration {
    property: String,
    value: String,
    important: bool,
}

#[derive(Debug)]
struct Rule {
    selectors: String,
    declarations: Vec<Declaration>,
}

impl CssInliner for SelectorInliner {
    fn inline(&self, html: &str, css: &str) -> Result<String, InlineError> {
        let rules = parse_stylesheet(css);
        let parsed = Parsed::parse(html).map_err(|e| InlineError::Parse(e.to_string()))?;
        if rules.is_empty() {
            return Ok(parsed.serialize());
        }

        let elements: Vec<_> = parsed
            .elements()
            .into_iter()
            .filter(|element| {
                !matches!(tag_name(element), "html" | "head")
                    && !element
                        .as_node()
                        .ancestors()
                        .elements()
                        .any(|ancestor| tag_name(&ancestor) == "head")
            })
            .collect();

        let mut matched = vec![Vec::new(); elements.len()];

        for (order, rule) in rules.iter().enumerate() {
            let Ok(selectors) = Selectors::compile(&rule.selectors) else {
                debug!(selector = %rule.selectors, "skipping unsupported selector");
                continue;
            };

            for selector in &selectors.0 {
                let specificity = selector.specificity();
                for (index, element) in elements.iter().enumerate() {
                    if selector.matches(element) {
                        for declaration in &rule.declarations {
                            matched[index].push((
                                declaration.important,
                                specificity,
                                order,
                                declaration,
                            ));
                        }
                    }
                }
            }
        }

        for (element, mut declarations) in elements.iter().zip(matched) {
            if declarations.is_empty() {
                continue;
            }
            declarations.sort_by_key(|(important, specificity, order, _)| {
                (*important, *specificity, *order)
            });

            let mut style = StyleDeclarations::default();
            let mut important = HashSet::new();
            for (is_important, _, _, declaration) in declarations {
                style.set(&declaration.property, declaration.value.as_str());
                if is_important {
                    important.insert(declaration.property.as_str());
                }
            }

            let existing = StyleDeclarations::parse(&attr(element, "style").unwrap_or_default());
            for (property, value) in existing.iter() {
                let value = if important.contains(property)
                    && !value.to_ascii_lowercase().contains("!important")
                {
                    style.get(property).unwrap_or(value).to_string()
                } else {
                    value.to_string()
                };
                style.set(property, value);
            }

            set_attr(element, "style", style.to_string());
        }

        Ok(parsed.serialize())
    }
}

/// Top-level style rules of `css`, in source order.
fn parse_stylesheet(css: &str) -> Vec<Rule> {
    let css = CSS_COMMENT.replace_all(css, "");
    let mut rules = Vec::new();
    let mut rest: &str = &css;

    while let Some(open) = rest.find('{') {
        let body_start = open + 1;
        let mut depth = 1usize;
        let mut close = None;
        for (i, c) in rest[body_start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = close else {
            break;
        };

        // Statements like `@charset "utf-8";` can sit in front of a rule.
        let prelude = rest[..open].rsplit(';').next().unwrap_or_default().trim();
        if !prelude.is_empty() && !prelude.starts_with('@') {
            let declarations = parse_declarations(&rest[body_start..close]);
            if !declarations.is_empty() {
                rules.push(Rule {
                    selectors: prelude.to_string(),
                    declarations,
                });
            }
        }

        rest = &rest[close + 1..];
    }

    rules
}

fn parse_declarations(body: &str) -> Vec<Declaration> {
    StyleDeclarations::parse(body)
        .iter()
        .map(|(property, value)| {
            let (value, important) = match value.to_ascii_lowercase().rfind("!important") {
                Some(at) => (value[..at].trim_end(), true),
                None => (value, false),
            };
            Declaration {
                property: property.to_string(),
                value: value.to_string(),
                important,
            }
        })
        .filter(|declaration| !declaration.value.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(html: &str, css: &str) -> String {
        SelectorInliner::new().inline(html, css).unwrap()
    }

    #[test]
    fn test_inlines_matching_rules() {
        let html = inline("<p>x</p><span>y</span>", "p { color: red; margin: 0 }");
        assert_eq!(html, r#"<p style="color: red; margin: 0">x</p><span>y</span>"#);
    }

    #[test]
    fn test_more_specific_rule_wins() {
        let css = ".a { color: blue } p { color: red }";
        assert!(inline(r#"<p class="a">x</p>"#, css).contains(r#"style="color: blue""#));
    }

    #[test]
    fn test_later_rule_wins_ties() {
        let css = "p { color: red } p { color: green }";
        assert!(inline("<p>x</p>", css).contains(r#"style="color: green""#));
    }

    #[test]
    fn test_existing_inline_style_wins_unless_important() {
        let html = r#"<p style="color: green">x</p>"#;
        assert!(inline(html, "p { color: red; margin: 0 }").contains(r#"style="margin: 0; color: green""#));
        assert!(inline(html, "p { color: red !important }").contains(r#"style="color: red""#));
    }

    #[test]
    fn test_skips_at_rules_and_comments() {
        let css = "/* p { color: blue } */ @charset \"utf-8\"; @media (max-width: 600px) { p { color: red } } p { margin: 0 }";
        assert_eq!(inline("<p>x</p>", css), r#"<p style="margin: 0">x</p>"#);
    }

    #[test]
    fn test_skips_unsupported_selectors() {
        let css = "p::after { content: 'x' } p:::bad { color: red } p { margin: 0 }";
        assert_eq!(inline("<p>x</p>", css), r#"<p style="margin: 0">x</p>"#);
    }

    #[test]
    fn test_leaves_head_alone() {
        let html = "<html><head><title>t</title></head><body><p>x</p></body></html>";
        let out = inline(html, "* { color: red }");
        assert!(out.contains("<title>t</title>"));
        assert!(out.contains(r#"<body style="color: red"><p style="color: red">x</p></body>"#));
    }

    #[test]
    fn test_empty_stylesheet_keeps_markup() {
        assert_eq!(inline("<p>x</p>", ""), "<p>x</p>");
    }
}
