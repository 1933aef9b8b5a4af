use html_escape::decode_html_entities;

/// Schemes allowed to survive in `href`/`src` attributes.
const ALLOWED_SCHEMES: [&str; 6] = ["http", "https", "mailto", "tel", "sms", "ftp"];

/// Drop URLs with a disallowed scheme.
///
/// Control characters and surrounding whitespace are stripped first so
/// `java\tscript:` tricks do not slip through, and the scheme is read after
/// decoding character references so `&#106;avascript:` is caught too.
/// Scheme-less values (relative paths, fragments, `?query` links, merge
/// tags) are kept.
pub fn sanitize_url(raw: &str) -> String {
    let url = strip_controls(raw);
    let decoded = strip_controls(&decode_html_entities(&url));

    match scheme_of(&decoded) {
        Some(scheme) if !ALLOWED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) => {
            String::new()
        }
        _ => url,
    }
}

fn strip_controls(value: &str) -> String {
    value.trim().chars().filter(|c| !c.is_control()).collect()
}

/// The scheme of `url`, if it has a well-formed one before any `/`, `?` or
/// `#`.
fn scheme_of(url: &str) -> Option<&str> {
    let end = url.find(':')?;
    let candidate = &url[..end];

    if candidate.contains(['/', '?', '#']) {
        return None;
    }

    let mut chars = candidate.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_valid = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    (starts_alpha && rest_valid).then_some(candidate)
}
