use html_escape::encode_double_quoted_attribute;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::warn;
use url::Url;

use crate::shortcodes::parse_attributes;
use crate::tracking::{ActionUrls, TrackingContext};

static MERGE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[\s*([A-Za-z0-9_.-]+)((?:\s[^\[\]]*)?)\]\]").expect("MERGE_TAG: hardcoded regex is valid")
});

/// What merge tags are resolved against for one email.
#[derive(Clone, Copy)]
pub struct MergeScope<'a> {
    pub recipient: &'a BTreeMap<String, String>,
    pub campaign_id: Option<i64>,
    pub actions: &'a dyn ActionUrls,
}

/// Replaces `[[name ...]]` placeholders. Content without placeholders must come
/// back unchanged.
pub trait MergeTags: Send + Sync {
    fn substitute(&self, content: &str, scope: &MergeScope<'_>) -> String;
}

/// Resolves tags from the recipient's fields plus a few built-ins:
/// `campaign_id`, `site_url` and `unsubscribe_url`.
#[derive(Debug, Clone)]
pub struct RecipientMergeTags {
    site_url: Url,
}

impl RecipientMergeTags {
    pub fn new(site_url: Url) -> Self {
        Self { site_url }
    }

    fn resolve(&self, name: &str, scope: &MergeScope<'_>) -> Option<String> {
        if let Some(value) = scope.recipient.get(name) {
            return Some(value.clone());
        }

        match name {
            "campaign_id" => scope.campaign_id.map(|id| id.to_string()),
            "site_url" => Some(self.site_url.to_string()),
            "unsubscribe_url" => {
                let context = TrackingContext::new(scope.recipient.clone(), scope.campaign_id, true);
                match context.unsubscribe_url(scope.actions) {
                    Ok(url) => Some(url),
                    Err(err) => {
                        warn!(error = %err, "could not build unsubscribe url");
                        None
                    }
                }
            }
            _ => None,
        }
    }
}

impl MergeTags for RecipientMergeTags {
    fn substitute(&self, content: &str, scope: &MergeScope<'_>) -> String {
        if !content.contains("[[") {
            return content.to_string();
        }

        MERGE_TAG
            .replace_all(content, |caps: &Captures| {
                let attributes = parse_attributes(caps.get(2).map_or("", |m| m.as_str()));
                let value = self
                    .resolve(&caps[1], scope)
                    .filter(|value| !value.is_empty())
                    .or_else(|| attributes.get("default").cloned())
                    .unwrap_or_default();
                encode_double_quoted_attribute(&value).into_owned()
            })
            .into_owned()
    }
}
