//! OAuth 1.0a (HMAC-SHA1) request signing, as used for Twitter/X
//! user-context requests.

use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::Url;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 unreserved characters are the only ones left unescaped.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(s: &str) -> String {
    utf8_percent_encode(s, ENCODE_SET).to_string()
}

pub(crate) struct Credentials<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub token: &'a str,
    pub token_secret: &'a str,
}

impl Credentials<'_> {
    /// `Authorization` header value for a request. `form` holds
    /// url-encoded body parameters; JSON and multipart bodies are not signed.
    pub fn authorization(&self, method: &str, url: &Url, form: &[(&str, &str)]) -> Result<String, String> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_with(method, url, form, &nonce, &timestamp)
    }

    pub fn authorization_with(
        &self,
        method: &str,
        url: &Url,
        form: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, String> {
        let mut oauth: Vec<(&str, String)> = vec![
            ("oauth_consumer_key", self.consumer_key.to_string()),
            ("oauth_nonce", nonce.to_string()),
            ("oauth_signature_method", "HMAC-SHA1".to_string()),
            ("oauth_timestamp", timestamp.to_string()),
            ("oauth_token", self.token.to_string()),
            ("oauth_version", "1.0".to_string()),
        ];

        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (encode(&k), encode(&v)))
            .chain(form.iter().map(|(k, v)| (encode(k), encode(v))))
            .chain(oauth.iter().map(|(k, v)| (encode(k), encode(v))))
            .collect();
        params.sort();
        let param_string = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut base_url = url.clone();
        base_url.set_query(None);
        base_url.set_fragment(None);
        let base_string = format!(
            "{}&{}&{}",
            method.to_ascii_uppercase(),
            encode(base_url.as_str()),
            encode(&param_string)
        );

        let key = format!("{}&{}", encode(self.consumer_secret), encode(self.token_secret));
        let mut mac = HmacSha1::new_from_slice(key.as_bytes()).map_err(|e| e.to_string())?;
        mac.update(base_string.as_bytes());
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        oauth.push(("oauth_signature", signature));
        oauth.sort();

        let fields = oauth
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {fields}"))
    }
}
