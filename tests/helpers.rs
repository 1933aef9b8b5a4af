use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

use postbox::{
    config::Config,
    generator::EmailGenerator,
    templates::{InMemoryTemplates, TemplateSections},
    tracking::{ACTION_MARKER, SignedActionUrls, TOKEN_PARAM},
};

pub const SECRET: &str = "integration-secret";

pub fn site_url() -> Url {
    Url::parse("https://example.com").unwrap()
}

pub fn config() -> Config {
    Config::new(site_url(), true, true, SECRET)
}

pub fn generator() -> EmailGenerator {
    let templates = InMemoryTemplates::new()
        .with_template(
            "paste",
            TemplateSections::new(
                "<table width=\"600\" style=\"width: 600px\"><tr><td><h1>{{heading}}</h1></td></tr>",
                "<tr><td>{{content}}</td></tr>",
                "<tr><td>{{footer}}</td></tr></table>",
            ),
        )
        .with_styles("h1 { margin: 0 }");

    EmailGenerator::new(config()).with_templates(Arc::new(templates))
}

pub fn recipient(email: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("email".to_string(), email.to_string()),
        ("first_name".to_string(), "Grace".to_string()),
    ])
}

/// Action name and payload behind an action URL.
pub fn open_action(href: &str) -> (String, Value) {
    let url = Url::parse(&href.replace("&amp;", "&")).unwrap();
    let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
    let payload = SignedActionUrls::new(site_url(), SECRET)
        .open(&pairs[TOKEN_PARAM])
        .unwrap();
    (pairs[ACTION_MARKER].clone(), payload)
}
