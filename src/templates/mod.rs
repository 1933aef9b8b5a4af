use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Name of the neutral template unknown names fall back to.
pub const FALLBACK_TEMPLATE: &str = "none";
/// Template used by block-based emails.
pub const VISUAL_TEMPLATE: &str = "noptin-visual";

pub const HEADING_PLACEHOLDER: &str = "{{heading}}";
pub const CONTENT_PLACEHOLDER: &str = "{{content}}";
pub const FOOTER_PLACEHOLDER: &str = "{{footer}}";

static STYLE_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*<style[^>]*>(.*)</style>\s*$").expect("STYLE_ELEMENT: hardcoded regex is valid")
});

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("BLANK_LINES: hardcoded regex is valid"));

/// Header, body and footer markup of an email template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSections {
    pub header: String,
    pub body: String,
    pub footer: String,
}

impl TemplateSections {
    pub fn new(
        header: impl Into<String>,
        body: impl Into<String>,
        footer: impl Into<String>,
    ) -> Self {
        Self {
            header: header.into(),
            body: body.into(),
            footer: footer.into(),
        }
    }

    /// Render header, body and footer in that order.
    pub fn render(&self, heading: &str, content: &str, footer_text: &str) -> String {
        let mut out = String::new();
        out.push_str(&self.header.replace(HEADING_PLACEHOLDER, heading));
        out.push_str(&self.body.replace(CONTENT_PLACEHOLDER, content));
        out.push_str(&self.footer.replace(FOOTER_PLACEHOLDER, footer_text));
        out
    }
}

/// Source of email templates and the stylesheet shared by them.
pub trait TemplateRegistry: Send + Sync {
    fn is_registered(&self, name: &str) -> bool;

    /// Local markup for `name`. `None` means the email is just its content.
    fn sections(&self, name: &str) -> Option<TemplateSections>;

    /// Stylesheet inlined into every HTML email; may be wrapped in a `<style>`
    /// element.
    fn email_styles(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct InMemoryTemplates {
    templates: HashMap<String, Option<TemplateSections>>,
    styles: String,
}

impl InMemoryTemplates {
    /// A registry knowing only the markup-less fallback template.
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(FALLBACK_TEMPLATE.to_string(), None);
        Self {
            templates,
            styles: String::new(),
        }
    }

    pub fn with_template(mut self, name: impl Into<String>, sections: TemplateSections) -> Self {
        self.templates.insert(name.into(), Some(sections));
        self
    }

    /// Register a template that has no local markup.
    pub fn with_bare_template(mut self, name: impl Into<String>) -> Self {
        self.templates.insert(name.into(), None);
        self
    }

    pub fn with_styles(mut self, styles: impl Into<String>) -> Self {
        self.styles = styles.into();
        self
    }
}

impl Default for InMemoryTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry for InMemoryTemplates {
    fn is_registered(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    fn sections(&self, name: &str) -> Option<TemplateSections> {
        self.templates.get(name).cloned().flatten()
    }

    fn email_styles(&self) -> String {
        self.styles.clone()
    }
}

/// The body of a stylesheet given either bare or wrapped in `<style>`.
pub fn extract_style_body(styles: &str) -> String {
    match STYLE_ELEMENT.captures(styles) {
        Some(caps) => caps[1].to_string(),
        None => styles.to_string(),
    }
}

/// Wrap plain text in paragraphs: blank lines start a new `<p>`, single
/// newlines become `<br />`. Text that already holds block markup is
/// returned trimmed.
pub fn autop(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let lower = text.to_ascii_lowercase();
    if ["<p", "<div", "<table", "<ul", "<ol", "<h1", "<h2", "<h3"]
        .iter()
        .any(|tag| lower.contains(tag))
    {
        return text.to_string();
    }

    BLANK_LINES
        .split(text)
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| format!("<p>{}</p>", paragraph.replace('\n', "<br />\n")))
        .collect::<Vec<_>>()
        .join("\n")
}
