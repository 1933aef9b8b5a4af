use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use html_escape::encode_double_quoted_attribute;
use ring::aead::{Aad, CHACHA20_POLY1305, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::hkdf::{HKDF_SHA256, Prk, Salt};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

use crate::config::Config;

/// Query parameter naming the action; its presence marks a URL as already
/// routed through the site's action endpoint.
pub const ACTION_MARKER: &str = "noptin_ns";
/// Query parameter carrying the sealed payload.
pub const TOKEN_PARAM: &str = "nte";

pub const CLICK_ACTION: &str = "email_click";
pub const OPEN_ACTION: &str = "email_open";
pub const UNSUBSCRIBE_ACTION: &str = "unsubscribe";

const KEY_SALT: &[u8] = b"postbox action urls";
const KEY_INFO: &[&[u8]] = &[b"chacha20-poly1305"];

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("failed to seal or open payload")]
    Cipher,

    #[error("token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("token is too short")]
    Malformed,

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload must be a JSON object")]
    NotAnObject,
}

impl From<ring::error::Unspecified> for TrackingError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::Cipher
    }
}

/// Builds the URLs that route a reader through the site's action endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait ActionUrls: Send + Sync {
    /// Turn a JSON payload into an opaque token safe for a query string.
    fn seal(&self, payload: &Value) -> Result<String, TrackingError>;

    /// URL of `action` carrying `token`.
    fn action_url(&self, action: &str, token: &str) -> String;
}

/// Encrypts payloads with ChaCha20-Poly1305 under a key derived from the
/// action secret and points actions at the site root.
///
/// A token is `base64url(nonce || ciphertext || tag)`. Only a holder of the
/// secret can read or forge one.
pub struct SignedActionUrls {
    site_url: Url,
    prk: Prk,
    rng: SystemRandom,
}

impl SignedActionUrls {
    pub fn new(site_url: Url, secret: &str) -> Self {
        Self {
            site_url,
            prk: Salt::new(HKDF_SHA256, KEY_SALT).extract(secret.as_bytes()),
            rng: SystemRandom::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.site_url().clone(), config.action_secret())
    }

    fn key(&self) -> Result<LessSafeKey, TrackingError> {
        let okm = self.prk.expand(KEY_INFO, &CHACHA20_POLY1305)?;
        let key = UnboundKey::from(okm);
        Ok(LessSafeKey::new(key))
    }

    /// Decrypt and authenticate a token produced by [`ActionUrls::seal`] and
    /// return its payload.
    pub fn open(&self, token: &str) -> Result<Value, TrackingError> {
        let mut sealed = URL_SAFE_NO_PAD.decode(token)?;
        if sealed.len() < NONCE_LEN + CHACHA20_POLY1305.tag_len() {
            return Err(TrackingError::Malformed);
        }

        let mut ciphertext = sealed.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&sealed)?;
        let plaintext = self.key()?.open_in_place(nonce, Aad::empty(), &mut ciphertext)?;

        Ok(serde_json::from_slice(plaintext)?)
    }
}

impl ActionUrls for SignedActionUrls {
    fn seal(&self, payload: &Value) -> Result<String, TrackingError> {
        if !payload.is_object() {
            return Err(TrackingError::NotAnObject);
        }

        let mut nonce = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce)?;

        let mut in_out = serde_json::to_vec(payload)?;
        self.key()?.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::empty(),
            &mut in_out,
        )?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&in_out);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn action_url(&self, action: &str, token: &str) -> String {
        let mut url = self.site_url.clone();
        url.query_pairs_mut()
            .append_pair(ACTION_MARKER, action)
            .append_pair(TOKEN_PARAM, token);
        url.to_string()
    }
}

/// Per-call tracking state, derived from a generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingContext {
    pub recipient: BTreeMap<String, String>,
    pub campaign_id: Option<i64>,
    pub can_track: bool,
}

impl TrackingContext {
    pub fn new(
        recipient: BTreeMap<String, String>,
        campaign_id: Option<i64>,
        can_track: bool,
    ) -> Self {
        Self {
            recipient,
            campaign_id,
            can_track,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    fn payload(&self, extra: Option<(&str, &str)>) -> Value {
        let mut map: Map<String, Value> = self
            .recipient
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        if let Some((key, value)) = extra {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
        Value::Object(map)
    }

    /// Redirect URL recording a click on `to`.
    pub fn click_url(&self, actions: &dyn ActionUrls, to: &str) -> Result<String, TrackingError> {
        let token = actions.seal(&self.payload(Some(("to", to))))?;
        Ok(actions.action_url(CLICK_ACTION, &token))
    }

    pub fn open_url(&self, actions: &dyn ActionUrls) -> Result<String, TrackingError> {
        let token = actions.seal(&self.payload(None))?;
        Ok(actions.action_url(OPEN_ACTION, &token))
    }

    pub fn unsubscribe_url(&self, actions: &dyn ActionUrls) -> Result<String, TrackingError> {
        let token = actions.seal(&self.payload(None))?;
        Ok(actions.action_url(UNSUBSCRIBE_ACTION, &token))
    }
}

/// The 1×1 image recording an email open.
pub fn tracking_pixel(
    context: &TrackingContext,
    actions: &dyn ActionUrls,
) -> Result<String, TrackingError> {
    let url = context.open_url(actions)?;
    Ok(format!(
        r#"<img src="{}" height="1" width="1" alt="" style="border:0;display:inline">"#,
        encode_double_quoted_attribute(&url)
    ))
}
