use regex::Regex;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

static DANGEROUS_URL_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*['"]?\s*(?:javascript|vbscript|data)\s*:"#)
        .expect("DANGEROUS_URL_SCHEME: hardcoded regex is valid")
});

/// Ordered `(property, value)` pairs parsed from a `style` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleDeclarations {
    entries: Vec<(String, String)>,
}

impl StyleDeclarations {
    /// Parse a raw style value. Declarations without a `:` or with an empty
    /// property/value are dropped; property names are lower-cased.
    pub fn parse(style: &str) -> Self {
        let entries = style
            .split(';')
            .filter_map(|declaration| {
                let (property, value) = declaration.trim().split_once(':')?;
                let property = property.trim().to_lowercase();
                let value = value.trim();
                if property.is_empty() || value.is_empty() {
                    return None;
                }
                Some((property, value.to_string()))
            })
            .collect();

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), v.as_str()))
    }

    /// Value of the last declaration for `property`.
    pub fn get(&self, property: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, property: &str) -> bool {
        self.entries.iter().any(|(p, _)| p == property)
    }

    /// Replace every declaration of `property` with a single one appended at
    /// the end.
    pub fn set(&mut self, property: &str, value: impl Into<String>) {
        self.remove(property);
        self.entries.push((property.to_string(), value.into()));
    }

    pub fn push(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.entries.push((property.into(), value.into()));
    }

    pub fn remove(&mut self, property: &str) {
        self.entries.retain(|(p, _)| p != property);
    }

    /// Remove declarations matching `predicate` and return them in order.
    pub fn take_where(&mut self, predicate: impl Fn(&str, &str) -> bool) -> Vec<(String, String)> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(p, v)| predicate(p, v));
        self.entries = kept;
        taken
    }
}

impl Display for StyleDeclarations {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, (property, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", property, value)?;
        }
        Ok(())
    }
}

/// Sanitize a raw `style` attribute value.
///
/// Declarations carrying an old IE `expression(` are dropped entirely and
/// `url(javascript:…)`, `url(vbscript:…)` and `url(data:…)` lose their scheme.
pub fn sanitize_inline_css(style: &str) -> String {
    let mut safe = StyleDeclarations::default();

    for (property, value) in StyleDeclarations::parse(style).entries {
        if value.to_lowercase().contains("expression(") {
            continue;
        }

        let value = DANGEROUS_URL_SCHEME.replace_all(&value, "url(");
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        safe.push(property, value);
    }

    safe.to_string()
}
