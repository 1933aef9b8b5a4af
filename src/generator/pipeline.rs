//! The fixed sequence of passes every HTML email goes through.
//!
//! Each step maps a string to a string. A step that fails is logged and
//! skipped: its input moves on to the next step unchanged.

use html_escape::{decode_html_entities, encode_text};
use regex::{Captures, Regex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;
use tracing::{instrument, warn};

use super::{EmailGenerator, GenerationRequest, Hook, StepError};
use crate::dom::transform;
use crate::inliner::InlineError;
use crate::links::{
    add_class_to_clickable_links, backup_hrefs, fix_double_protocols, make_clickable,
    make_links_trackable, restore_hrefs,
};
use crate::sanitizer::clean_html;
use crate::shortcodes::{HandlerPattern, unautop};
use crate::templates::extract_style_body;
use crate::tracking::{ACTION_MARKER, ActionUrls, OPEN_ACTION, TrackingContext, tracking_pixel};

/// Inline style of the hidden preview text.
pub const PREHEADER_STYLE: &str = "display: none !important; max-width: 0; max-height: 0; overflow: hidden; font-size: 1px; line-height: 1px; color: #fff; opacity: 0";

/// Selector fragment older templates left in their stylesheets.
const LEGACY_STYLE_FRAGMENT: &str = "#noptin-email-content .main-content-wrapper .noptin-button-link,";

static BODY_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<body[^>]*>").expect("BODY_OPEN: hardcoded regex is valid"));

static LEADING_DIV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*<div\b[^>]*>([^<]*)</div>").expect("LEADING_DIV: hardcoded regex is valid")
});

static BODY_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</body[^>]*>").expect("BODY_CLOSE: hardcoded regex is valid"));

static CSS_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("CSS_COMMENT: hardcoded regex is valid"));

/// Run one step, keeping `html` when it fails.
pub(crate) fn run_step<F>(name: &'static str, html: String, step: F) -> String
where
    F: FnOnce(&str) -> Result<String, StepError>,
{
    match step(&html) {
        Ok(output) => output,
        Err(err) => {
            warn!(step = name, error = %err, "post-processing step failed, keeping its input");
            html
        }
    }
}

fn has_preheader(html: &str, preview: &str) -> bool {
    let Some(body) = BODY_OPEN.find(html) else {
        return false;
    };
    LEADING_DIV
        .captures(&html[body.end()..])
        .is_some_and(|caps| decode_html_entities(&caps[1]).trim() == preview)
}

/// Reparse and reserialize so every tag is closed and properly nested.
pub fn balance_tags(html: &str) -> Result<String, StepError> {
    transform(html, |_| {})
}

/// Put the hidden preview text right after the opening `<body>` tag.
///
/// A body whose first element is already a div holding the preview text is
/// left alone, whatever styles the inliner has since merged into it.
pub fn inject_preheader(html: &str, preview_text: &str) -> String {
    let preview = preview_text.trim();
    if preview.is_empty() || has_preheader(html, preview) {
        return html.to_string();
    }

    let preheader = format!(
        r#"<div class="preheader" style="{PREHEADER_STYLE};">{}</div>"#,
        encode_text(preview_text)
    );
    BODY_OPEN
        .replacen(html, 1, |caps: &Captures| format!("{}{preheader}", &caps[0]))
        .into_owned()
}

/// Put the open-tracking pixel right before the closing `</body>` tag.
pub fn inject_tracking_pixel(
    html: &str,
    context: &TrackingContext,
    actions: &dyn ActionUrls,
) -> Result<String, StepError> {
    if html.contains(&format!("{ACTION_MARKER}={OPEN_ACTION}")) || !BODY_CLOSE.is_match(html) {
        return Ok(html.to_string());
    }

    let pixel = tracking_pixel(context, actions)?;
    Ok(BODY_CLOSE
        .replacen(html, 1, |caps: &Captures| format!("{pixel}{}", &caps[0]))
        .into_owned())
}

/// Drop the legacy selector fragment from inline stylesheets.
pub fn remove_legacy_styles(html: &str) -> String {
    html.replace(LEGACY_STYLE_FRAGMENT, "")
}

impl EmailGenerator {
    /// Whether opens and clicks of this email may be tracked.
    pub fn can_track(&self, request: &GenerationRequest) -> bool {
        !request.recipient.is_empty()
            && request.track
            && self.config.track_campaign_stats()
            && self.hooks.allows_tracking(request)
    }

    /// Turn assembled email markup into the final HTML body.
    #[instrument(skip_all, fields(kind = %request.kind, campaign_id = ?request.campaign_id))]
    pub fn post_process(&self, html: &str, request: &GenerationRequest) -> String {
        if html.is_empty() {
            return String::new();
        }

        let tracking = request.tracking_context(self.can_track(request));
        let actions = self.actions.as_ref();
        let scope = self.merge_scope(request);
        let shortcodes = self.shortcodes.as_ref();

        let mut html = html.to_string();
        html = run_step("preheader", html, |h| {
            Ok(inject_preheader(h, &request.preview_text))
        });
        html = run_step("unautop", html, |h| Ok(unautop(h, shortcodes)));
        html = run_step("list shortcodes", html, |h| {
            Ok(shortcodes.with_restricted(&HandlerPattern::list_handlers(), |view| view.execute(h)))
        });
        html = run_step("merge tags", html, |h| Ok(self.merge_tags.substitute(h, &scope)));
        html = run_step("shortcodes", html, |h| Ok(shortcodes.execute(h)));
        html = run_step("make clickable", html, |h| Ok(make_clickable(h)));
        html = run_step("raw link class", html, |h| Ok(add_class_to_clickable_links(h)));
        if tracking.can_track {
            html = run_step("tracking pixel", html, |h| {
                inject_tracking_pixel(h, &tracking, actions)
            });
        }
        html = run_step("balance tags", html, balance_tags);
        html = run_step("double protocols", html, |h| Ok(fix_double_protocols(h)));
        html = run_step("backup hrefs", html, |h| backup_hrefs(h, self.config.site_url()));
        html = run_step("inline css", html, |h| self.inline_css(h));
        html = run_step("clean html", html, clean_html);
        html = run_step("legacy styles", html, |h| Ok(remove_legacy_styles(h)));
        html = run_step("restore hrefs", html, |h| Ok(restore_hrefs(h)));
        html = run_step("track links", html, |h| {
            make_links_trackable(h, &tracking, actions)
        });

        self.hooks.apply(Hook::PostProcess, html, request)
    }

    fn inline_css(&self, html: &str) -> Result<String, StepError> {
        let css = extract_style_body(&self.templates.email_styles());
        if css.trim().is_empty() {
            return Ok(html.to_string());
        }

        let content = CSS_COMMENT.replace_all(html, "");
        let inliner = self.inliner.as_ref();
        let inlined = panic::catch_unwind(AssertUnwindSafe(|| inliner.inline(&content, &css)))
            .map_err(|_| InlineError::Panicked)??;
        Ok(inlined)
    }
}
