use html_escape::encode_double_quoted_attribute;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::debug;

use crate::generator::StepError;
use crate::tracking::{ACTION_MARKER, ActionUrls, TrackingContext, TrackingError};

static ANCHOR_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a((?:\s[^>]*?)?)\shref=(?:"([^"]*)"|'([^']*)')([^>]*)>"#)
        .expect("ANCHOR_HREF: hardcoded regex is valid")
});

/// Route every anchor through the click-tracking action.
///
/// Links already pointing at an action URL are left as they are. When any
/// link fails to seal, nothing is rewritten.
pub fn make_links_trackable(
    html: &str,
    context: &TrackingContext,
    actions: &dyn ActionUrls,
) -> Result<String, StepError> {
    if !context.can_track {
        return Ok(html.to_string());
    }

    let mut failure: Option<TrackingError> = None;
    let mut rewritten = 0usize;

    let tracked = ANCHOR_HREF.replace_all(html, |caps: &Captures| {
        let raw = caps.get(2).or(caps.get(3)).map_or("", |m| m.as_str());
        let url = raw.replace("&amp;", "&");

        let href = if url.trim().is_empty() || url.contains(ACTION_MARKER) {
            url
        } else {
            match context.click_url(actions, &url) {
                Ok(tracked) => {
                    rewritten += 1;
                    tracked
                }
                Err(err) => {
                    failure.get_or_insert(err);
                    url
                }
            }
        };

        format!(
            r#"<a{} href="{}"{}>"#,
            &caps[1],
            encode_double_quoted_attribute(&href),
            &caps[4]
        )
    });

    if let Some(err) = failure {
        return Err(StepError::Tracking(err));
    }

    debug!(links = rewritten, "rewrote links for click tracking");
    Ok(tracked.into_owned())
}
