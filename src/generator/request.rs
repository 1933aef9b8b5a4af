use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::tracking::TrackingContext;

pub const DEFAULT_TEMPLATE: &str = "paste";

/// How an email body is produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EmailKind {
    #[default]
    Normal,
    PlainText,
    RawHtml,
    Visual,
    /// A type this crate has no strategy for.
    Other(String),
}

impl EmailKind {
    /// An empty name means [`EmailKind::Normal`].
    pub fn parse(kind: &str) -> Self {
        match kind.trim() {
            "" | "normal" => Self::Normal,
            "plain_text" => Self::PlainText,
            "raw_html" => Self::RawHtml,
            "visual" => Self::Visual,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Normal => "normal",
            Self::PlainText => "plain_text",
            Self::RawHtml => "raw_html",
            Self::Visual => "visual",
            Self::Other(kind) => kind,
        }
    }
}

impl From<String> for EmailKind {
    fn from(kind: String) -> Self {
        Self::parse(&kind)
    }
}

impl From<EmailKind> for String {
    fn from(kind: EmailKind) -> Self {
        kind.as_str().to_string()
    }
}

impl Display for EmailKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to render one email for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    #[serde(rename = "type")]
    pub kind: EmailKind,
    pub content: String,
    pub template: String,
    pub heading: String,
    pub footer_text: String,
    pub preview_text: String,
    /// Campaign subject; the heading of visual emails.
    pub subject: String,
    pub recipient: BTreeMap<String, String>,
    pub campaign_id: Option<i64>,
    pub track: bool,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            kind: EmailKind::Normal,
            content: String::new(),
            template: DEFAULT_TEMPLATE.to_string(),
            heading: String::new(),
            footer_text: String::new(),
            preview_text: String::new(),
            subject: String::new(),
            recipient: BTreeMap::new(),
            campaign_id: None,
            track: true,
        }
    }
}

impl GenerationRequest {
    pub fn new(kind: EmailKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Overwrite every field `update` sets.
    pub fn merge(&mut self, update: RequestUpdate) {
        let RequestUpdate {
            kind,
            content,
            template,
            heading,
            footer_text,
            preview_text,
            subject,
            recipient,
            campaign_id,
            track,
        } = update;

        if let Some(kind) = kind {
            self.kind = kind;
        }
        if let Some(content) = content {
            self.content = content;
        }
        if let Some(template) = template {
            self.template = template;
        }
        if let Some(heading) = heading {
            self.heading = heading;
        }
        if let Some(footer_text) = footer_text {
            self.footer_text = footer_text;
        }
        if let Some(preview_text) = preview_text {
            self.preview_text = preview_text;
        }
        if let Some(subject) = subject {
            self.subject = subject;
        }
        if let Some(recipient) = recipient {
            self.recipient = recipient;
        }
        if let Some(campaign_id) = campaign_id {
            self.campaign_id = Some(campaign_id);
        }
        if let Some(track) = track {
            self.track = track;
        }
    }

    pub fn tracking_context(&self, can_track: bool) -> TrackingContext {
        TrackingContext::new(self.recipient.clone(), self.campaign_id, can_track)
    }
}

/// Partial update applied to a request before generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestUpdate {
    #[serde(rename = "type")]
    pub kind: Option<EmailKind>,
    pub content: Option<String>,
    pub template: Option<String>,
    pub heading: Option<String>,
    pub footer_text: Option<String>,
    pub preview_text: Option<String>,
    pub subject: Option<String>,
    pub recipient: Option<BTreeMap<String, String>>,
    pub campaign_id: Option<i64>,
    pub track: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(EmailKind::parse(""), EmailKind::Normal);
        assert_eq!(EmailKind::parse("plain_text"), EmailKind::PlainText);
        assert_eq!(EmailKind::parse("raw_html"), EmailKind::RawHtml);
        assert_eq!(EmailKind::parse("visual"), EmailKind::Visual);
        assert_eq!(EmailKind::parse("sms"), EmailKind::Other("sms".to_string()));
        assert_eq!(EmailKind::Other("sms".to_string()).to_string(), "sms");
    }

    #[test]
    fn test_request_from_json_uses_defaults() {
        let request: GenerationRequest = serde_json::from_value(json!({
            "type": "",
            "content": "<p>Hi</p>",
            "recipient": {"email": "a@b.c"}
        }))
        .unwrap();

        assert_eq!(request.kind, EmailKind::Normal);
        assert_eq!(request.template, "paste");
        assert!(request.track);
        assert_eq!(request.recipient["email"], "a@b.c");
        assert_eq!(request.campaign_id, None);
    }

    #[test]
    fn test_merge_only_overwrites_given_fields() {
        let mut request = GenerationRequest::new(EmailKind::Normal, "body");
        request.heading = "Heading".to_string();

        request.merge(RequestUpdate {
            kind: Some(EmailKind::RawHtml),
            campaign_id: Some(9),
            track: Some(false),
            ..RequestUpdate::default()
        });

        assert_eq!(request.kind, EmailKind::RawHtml);
        assert_eq!(request.content, "body");
        assert_eq!(request.heading, "Heading");
        assert_eq!(request.campaign_id, Some(9));
        assert!(!request.track);
    }
}
