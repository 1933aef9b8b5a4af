use scraper::{Html, Selector};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Arc;
use url::Url;

use crate::config::Config;
use crate::generator::{
    EmailGenerator, EmailKind, GenerateError, GenerationRequest, Hook, Hooks, PREHEADER_STYLE,
    RequestUpdate,
};
use crate::inliner::{InlineError, MockCssInliner};
use crate::shortcodes::ShortcodeRegistry;
use crate::templates::{InMemoryTemplates, TemplateSections};
use crate::tracking::{ACTION_MARKER, SignedActionUrls, TOKEN_PARAM};

const STYLES: &str = "<style>.headline { color: #111111 } p { line-height: 1.5 }</style>";

fn config() -> Config {
    Config::default().with_site_url(Url::parse("https://example.com").unwrap())
}

fn templates() -> InMemoryTemplates {
    InMemoryTemplates::new()
        .with_template(
            "paste",
            TemplateSections::new(
                "<div class=\"header\"><h1>{{heading}}</h1></div>",
                "<div class=\"body\">{{content}}</div>",
                "<div class=\"footer\">{{footer}}</div>",
            ),
        )
        .with_template(
            "noptin-visual",
            TemplateSections::new("<h1>{{heading}}</h1>", "<main>{{content}}</main>", "<footer>{{footer}}</footer>"),
        )
        .with_styles(STYLES)
}

fn generator() -> EmailGenerator {
    EmailGenerator::new(config()).with_templates(Arc::new(templates()))
}

fn recipient() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("email".to_string(), "ada@example.com".to_string()),
        ("first_name".to_string(), "Ada".to_string()),
    ])
}

fn newsletter_request() -> GenerationRequest {
    let html = fs::read_to_string("src/generator/tests/fixtures/newsletter.html")
        .expect("Failed to read test fixture");

    let mut request = GenerationRequest::new(EmailKind::RawHtml, html);
    request.recipient = recipient();
    request.campaign_id = Some(42);
    request.preview_text = "This week's picks".to_string();
    request
}

/// Destinations encoded in every tracked link, keyed by action.
fn tracked_destinations(html: &str) -> Vec<(String, String)> {
    let actions = SignedActionUrls::from_config(&config());
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a").unwrap();

    document
        .select(&anchors)
        .map(|anchor| {
            let href = anchor.value().attr("href").unwrap();
            let url = Url::parse(href).unwrap();
            let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
            let payload = actions.open(&pairs[TOKEN_PARAM]).unwrap();
            (
                pairs[ACTION_MARKER].clone(),
                payload["to"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[test]
fn test_raw_html_newsletter() {
    let html = generator().generate(newsletter_request()).unwrap();

    // Raw HTML emails carry no preheader.
    assert!(!html.contains(PREHEADER_STYLE));
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("Hello Ada"));

    assert!(!html.contains("<script"));
    assert!(!html.contains("<meta"));
    assert!(!html.contains("onclick"));
    assert!(!html.contains("javascript"));
    assert!(!html.contains("<p>   </p>"));
    assert!(!html.contains("Nowhere"));
    assert!(!html.contains("target="));
    assert!(!html.contains("unused"));
    assert!(!html.contains(".main-content-wrapper .noptin-button-link,"));

    assert!(html.contains(r#"width="300""#));
    assert!(html.contains(r##"bgcolor="#eeeeee""##));
    assert!(html.contains("width: 100%; max-width: 600px"));
    assert!(html.contains("color: #000000; padding: 12px 24px"));
    assert!(html.contains(r##"style="color: #ffffff""##));
    assert!(html.contains(r#"id="noptin-email-content""#));
    assert!(html.contains("color: #111111"));
    assert!(html.contains("line-height: 1.5"));

    assert_eq!(html.matches("noptin_ns=email_open").count(), 1);
}

#[test]
fn test_every_link_is_tracked() {
    let html = generator().generate(newsletter_request()).unwrap();

    let destinations: BTreeSet<(String, String)> = tracked_destinations(&html).into_iter().collect();
    let expected: BTreeSet<(String, String)> = [
        ("email_click", "https://example.org/story?id=7"),
        ("email_click", "https://example.org/shop?utm=mail&ref=1"),
        ("email_click", "https://example.com/?page=2"),
        ("unsubscribe", ""),
    ]
    .into_iter()
    .map(|(action, to)| (action.to_string(), to.to_string()))
    .collect();

    assert_eq!(destinations, expected);
}

#[test]
fn test_tracking_disabled_keeps_links() {
    let mut request = newsletter_request();
    request.track = false;
    let html = generator().generate(request).unwrap();

    assert!(html.contains(r#"href="https://example.org/story?id=7""#));
    assert!(html.contains(r#"href="https://example.com/?page=2""#));
    assert!(!html.contains("email_open"));
    assert!(!html.contains("email_click"));
}

#[test]
fn test_tracking_check_can_veto() {
    let mut hooks = Hooks::new();
    hooks.add_tracking_check(|request| request.campaign_id != Some(42));
    let generator = generator().with_hooks(hooks);

    assert!(!generator.can_track(&newsletter_request()));
    let html = generator.generate(newsletter_request()).unwrap();
    assert!(!html.contains("email_click"));
}

#[test]
fn test_post_process_is_idempotent() {
    let generator = generator();
    let mut request = newsletter_request();
    request.kind = EmailKind::Normal;
    request.template = "none".to_string();

    let once = generator.generate(request.clone()).unwrap();
    assert!(once.contains(PREHEADER_STYLE));

    let twice = generator.post_process(&once, &request);
    assert_eq!(twice, once);
}

#[test]
fn test_post_process_is_idempotent_with_important_styles() {
    let templates = InMemoryTemplates::new().with_styles("<style>div { color: red !important }</style>");
    let generator = EmailGenerator::new(config()).with_templates(Arc::new(templates));
    let mut request = newsletter_request();
    request.kind = EmailKind::Normal;
    request.template = "none".to_string();

    let once = generator.generate(request.clone()).unwrap();
    assert!(!once.contains(PREHEADER_STYLE));
    assert_eq!(once.matches("This week's picks").count(), 1);

    let twice = generator.post_process(&once, &request);
    assert_eq!(twice.matches("This week's picks").count(), 1);
    assert_eq!(twice, once);
}

#[test]
fn test_normal_email_uses_template_sections() {
    let mut request = GenerationRequest::new(EmailKind::Normal, "<p>Big news</p>");
    request.heading = "Monthly update".to_string();
    request.footer_text = "Sent with care\nfrom us".to_string();

    let html = generator().generate(request).unwrap();
    let heading = html.find("Monthly update").unwrap();
    let body = html.find("Big news").unwrap();
    let footer = html.find("Sent with care").unwrap();
    assert!(heading < body && body < footer);
    assert!(html.contains("<br>"));
    assert!(html.contains(r#"style="line-height: 1.5""#));
}

#[test]
fn test_unknown_template_falls_back_to_content() {
    let mut request = GenerationRequest::new(EmailKind::Normal, "<p>Just content</p>");
    request.template = "missing".to_string();
    request.heading = "Not used".to_string();

    let html = generator().generate(request).unwrap();
    assert!(!html.contains("Not used"));
    assert_eq!(html, r#"<p style="line-height: 1.5">Just content</p>"#);
}

#[test]
fn test_visual_email_uses_subject_and_blocks() {
    struct Upper;
    impl crate::generator::BlockRenderer for Upper {
        fn render(&self, content: &str) -> String {
            content.to_uppercase()
        }
    }

    let mut request = GenerationRequest::new(EmailKind::Visual, "<p>blocks</p>");
    request.subject = "Subject line".to_string();
    request.heading = "Ignored heading".to_string();
    request.footer_text = "Ignored footer".to_string();

    let html = generator()
        .with_block_renderer(Arc::new(Upper))
        .generate(request)
        .unwrap();

    assert!(html.contains("<h1>Subject line</h1>"));
    assert!(html.contains("BLOCKS"));
    assert!(!html.contains("Ignored"));
}

#[test]
fn test_plain_text_email() {
    let mut request = GenerationRequest::new(EmailKind::PlainText, "  Hello <b>World</b>  ");
    request.recipient = recipient();

    let text = generator().generate(request).unwrap();
    assert!(text.starts_with("Hello World\n\n[Unsubscribe](https://example.com/?noptin_ns=unsubscribe&nte="));
    assert!(!text.contains("<b>"));
    assert!(!text.contains("</b>"));
}

#[test]
fn test_plain_text_keeps_existing_unsubscribe_link() {
    let request = GenerationRequest::new(
        EmailKind::PlainText,
        "Bye. Leave: [[UNSUBSCRIBE_URL]]",
    );
    let text = generator().generate(request).unwrap();
    assert!(!text.contains("[Unsubscribe]"));

    let request = GenerationRequest::new(EmailKind::PlainText, "Hello");
    let generator = EmailGenerator::new(config().with_plain_text_unsubscribe(false));
    assert_eq!(generator.generate(request).unwrap(), "Hello");
}

#[test]
fn test_plain_text_fixes_double_protocols() {
    let mut request = GenerationRequest::new(
        EmailKind::PlainText,
        r#"<a href="http://[[site]]">Visit</a>"#,
    );
    request.recipient = BTreeMap::from([("site".to_string(), "https://shop.test".to_string())]);
    let generator = EmailGenerator::new(config().with_plain_text_unsubscribe(false));

    assert_eq!(generator.generate(request).unwrap(), "Visit (https://shop.test)");
}

#[test]
fn test_empty_content_is_an_error() {
    let result = generator().generate(GenerationRequest::new(EmailKind::Normal, ""));
    assert!(matches!(result, Err(GenerateError::EmptyContent)));
}

#[test]
fn test_unknown_kind_is_returned_as_given() {
    let content = r#"<p onclick="x()">Hi [[first_name]]</p><script>alert(1)</script>"#;
    let mut request = GenerationRequest::new(EmailKind::parse("sms"), content);
    request.recipient = recipient();

    let html = generator().generate(request).unwrap();
    assert_eq!(html, content);
}

#[test]
fn test_unknown_kind_is_cleaned_when_configured() {
    let request = GenerationRequest::new(
        EmailKind::parse("sms"),
        r#"<p onclick="x()">Hi [[first_name]]</p><script>alert(1)</script>"#,
    );
    let generator = EmailGenerator::new(config().with_clean_unknown_kinds(true));
    let html = generator.generate(request).unwrap();
    assert_eq!(html, "<p>Hi [[first_name]]</p>");
}

#[test]
fn test_generate_with_applies_update_first() {
    let request = GenerationRequest::new(EmailKind::Normal, "<p>old</p>");
    let html = generator()
        .generate_with(
            request,
            RequestUpdate {
                kind: Some(EmailKind::PlainText),
                content: Some("<p>new</p>".to_string()),
                ..RequestUpdate::default()
            },
        )
        .unwrap();
    assert!(html.starts_with("new"));
}

#[test]
fn test_hooks_filter_output() {
    let mut hooks = Hooks::new();
    hooks.add_filter(Hook::AfterTemplate, |html, _| html.replace("draft", "final"));
    hooks.add_filter(Hook::PostProcess, |html, _| format!("{html}<!-- processed -->"));
    hooks.add_filter(Hook::Generate, |html, request| format!("{html}<!-- {} -->", request.kind));

    let mut request = GenerationRequest::new(EmailKind::Normal, "<p>draft</p>");
    request.template = "none".to_string();

    let html = generator().with_hooks(hooks).generate(request).unwrap();
    assert_eq!(
        html,
        r#"<p style="line-height: 1.5">final</p><!-- processed --><!-- normal -->"#
    );
}

#[test]
fn test_list_shortcodes_run_before_merge_tags() {
    let mut shortcodes = ShortcodeRegistry::new();
    shortcodes.register("noptin_subscriber_list", |_, _| "<b>[[first_name]]</b>".to_string());
    shortcodes.register("echo_name", |_, _| "<i>[[first_name]]</i>".to_string());

    let mut request = GenerationRequest::new(
        EmailKind::RawHtml,
        "<p>[noptin_subscriber_list] [echo_name]</p>",
    );
    request.recipient = recipient();
    request.track = false;

    let html = generator().with_shortcodes(shortcodes).generate(request).unwrap();
    assert!(html.contains("<b>Ada</b>"));
    assert!(html.contains("<i>[[first_name]]</i>"));
}

#[test]
fn test_inliner_failure_keeps_content() {
    let mut inliner = MockCssInliner::new();
    inliner
        .expect_inline()
        .returning(|_, _| Err(InlineError::Parse("broken".to_string())));

    let html = generator()
        .with_inliner(Arc::new(inliner))
        .generate(GenerationRequest::new(EmailKind::RawHtml, "<p>Styled?</p>"))
        .unwrap();
    assert_eq!(html, "<p>Styled?</p>");
}

#[test]
fn test_inliner_panic_keeps_content() {
    let mut inliner = MockCssInliner::new();
    inliner
        .expect_inline()
        .returning(|_, _| panic!("inliner bug"));

    let html = generator()
        .with_inliner(Arc::new(inliner))
        .generate(GenerationRequest::new(EmailKind::RawHtml, "<p>Still sent</p>"))
        .unwrap();
    assert_eq!(html, "<p>Still sent</p>");
}

#[cfg(feature = "fuzz")]
mod fuzz {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_generate_never_panics(
            content in ".+",
            kind in prop::sample::select(vec!["normal", "plain_text", "raw_html", "visual", "other"]),
        ) {
            let mut request = GenerationRequest::new(EmailKind::parse(kind), content);
            request.recipient = recipient();
            prop_assert!(generator().generate(request).is_ok());
        }

        #[test]
        fn test_post_process_never_panics_on_markup(
            html in "(<(p|div|a|table|td|img|style|body)( [a-z-]{1,8}=\"[^\"]{0,12}\")?>|</(p|div|a|table|td|body)>|[a-zA-Z :/.?&;\\[\\]]{0,20}){0,30}",
        ) {
            let request = GenerationRequest::new(EmailKind::RawHtml, html.clone());
            let _ = generator().post_process(&html, &request);
        }
    }
}
