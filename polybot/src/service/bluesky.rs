//! Bluesky (AT Protocol) adapter.
//!
//! Talks XRPC directly to the account's PDS:
//!   com.atproto.server.createSession   login
//!   com.atproto.server.refreshSession  renew an expired access token
//!   com.atproto.repo.uploadBlob        image upload
//!   com.atproto.repo.createRecord      app.bsky.feed.post record

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Limits, PostRef, Service, StrongRef, check_response, rate_limit_reset};
use crate::config::{BlueskyConfig, Config};
use crate::error::PostError;
use crate::image::Image;
use crate::prompt::Prompt;

pub const NAME: &str = "bluesky";

const POST_COLLECTION: &str = "app.bsky.feed.post";

pub fn limits() -> Limits {
    Limits {
        max_length: 300,
        max_length_image: 300,
        // As of 2024-12-03 Bluesky accepts images of at most 1 metric megabyte.
        max_image_size: 1_000_000,
        ..Limits::default()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    refresh_jwt: String,
    did: String,
    handle: String,
}

#[derive(Debug, Deserialize)]
struct UploadBlobOutput {
    blob: Value,
}

pub struct Bluesky {
    config: BlueskyConfig,
    live: bool,
    http: reqwest::Client,
    limits: Limits,
    session: Option<Session>,
    login_ratelimit_expiry: Option<DateTime<Utc>>,
}

impl Bluesky {
    pub fn new(config: BlueskyConfig, live: bool, http: reqwest::Client) -> Self {
        Self {
            config,
            live,
            http,
            limits: limits(),
            session: None,
            login_ratelimit_expiry: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.session.is_some()
    }

    /// When a login rate limit lifts, if one is in force.
    pub fn login_ratelimit_expiry(&self) -> Option<DateTime<Utc>> {
        self.login_ratelimit_expiry
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{method}", self.config.pds().trim_end_matches('/'))
    }

    async fn refresh_session(&mut self) -> Result<(), PostError> {
        let refresh_jwt = match &self.session {
            Some(s) => s.refresh_jwt.clone(),
            None => return Ok(()),
        };
        let resp = self
            .http
            .post(self.xrpc("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await?;
        match check_response(resp).await {
            Ok(resp) => {
                self.session = Some(resp.json().await?);
                tracing::debug!("Refreshed Bluesky session");
                Ok(())
            }
            Err(e) => {
                self.session = None;
                Err(e)
            }
        }
    }

    async fn create_post(
        &self,
        text: &str,
        images: &[Image],
        in_reply_to: Option<&PostRef>,
    ) -> Result<PostRef, PostError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| PostError::InvalidResponse("no Bluesky session".into()))?;

        let mut embed_images = Vec::with_capacity(images.len());
        for image in images {
            let resp = self
                .http
                .post(self.xrpc("com.atproto.repo.uploadBlob"))
                .bearer_auth(&session.access_jwt)
                .header(CONTENT_TYPE, &image.mime_type)
                .body(image.data.clone())
                .send()
                .await?;
            let uploaded: UploadBlobOutput = check_response(resp).await?.json().await?;
            let mut entry = json!({
                "alt": image.description.as_deref().unwrap_or(""),
                "image": uploaded.blob,
            });
            if let Ok((width, height)) = image.dimensions() {
                entry["aspectRatio"] = json!({ "width": width, "height": height });
            }
            embed_images.push(entry);
        }

        let mut record = json!({
            "$type": POST_COLLECTION,
            "text": text,
            "createdAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        let facets = link_facets(text);
        if !facets.is_empty() {
            record["facets"] = Value::Array(facets);
        }
        if !embed_images.is_empty() {
            record["embed"] = json!({
                "$type": "app.bsky.embed.images",
                "images": embed_images,
            });
        }
        match in_reply_to {
            Some(PostRef::Bluesky { root, parent }) => {
                record["reply"] = json!({ "root": root, "parent": parent });
            }
            Some(other) => {
                tracing::warn!(reply_to = ?other, "Ignoring non-Bluesky reply target");
            }
            None => {}
        }

        let resp = self
            .http
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "record": record,
            }))
            .send()
            .await?;
        let created: StrongRef = check_response(resp).await?.json().await?;

        let root = match in_reply_to {
            Some(PostRef::Bluesky { root, .. }) => root.clone(),
            _ => created.clone(),
        };
        Ok(PostRef::Bluesky {
            root,
            parent: created,
        })
    }
}

#[async_trait]
impl Service for Bluesky {
    fn name(&self) -> &'static str {
        NAME
    }

    fn limits(&self) -> &Limits {
        &self.limits
    }

    fn live(&self) -> bool {
        self.live
    }

    async fn auth(&mut self) -> anyhow::Result<()> {
        if let Some(expiry) = self.login_ratelimit_expiry {
            let now = Utc::now();
            if expiry > now {
                tracing::warn!(
                    "Not connecting to Bluesky as login rate limit is still active. \
                     Will re-attempt connection in {} seconds.",
                    (expiry - now).num_seconds()
                );
                return Ok(());
            }
        }

        let resp = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&json!({
                "identifier": self.config.email,
                "password": self.config.password,
            }))
            .send()
            .await
            .context("Failed to reach Bluesky")?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let expiry = rate_limit_reset(resp.headers())
                .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(5));
            self.login_ratelimit_expiry = Some(expiry);
            tracing::warn!(
                "Rate-limited by Bluesky when connecting. \
                 Will re-attempt connection in {} seconds.",
                (expiry - Utc::now()).num_seconds()
            );
            return Ok(());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Bluesky login failed {status}: {body}");
        }

        let session: Session = resp
            .json()
            .await
            .context("Failed to parse Bluesky session")?;
        tracing::info!(handle = %session.handle, did = %session.did, "Connected to Bluesky");
        self.session = Some(session);
        self.login_ratelimit_expiry = None;
        Ok(())
    }

    async fn do_post(
        &mut self,
        text: &str,
        images: &[Image],
        in_reply_to: Option<&PostRef>,
    ) -> Result<Option<PostRef>, PostError> {
        if !self.connected() {
            if let Err(e) = self.auth().await {
                tracing::warn!(error = %e, "Bluesky reconnect failed");
            }
        }
        if !self.connected() {
            tracing::warn!("Skipping Bluesky post, not connected");
            return Ok(None);
        }

        match self.create_post(text, images, in_reply_to).await {
            Err(PostError::Api { status: 400, message }) if message.contains("ExpiredToken") => {
                tracing::info!("Bluesky access token expired, refreshing");
                if self.refresh_session().await.is_err() {
                    self.auth()
                        .await
                        .map_err(|e| PostError::InvalidResponse(format!("re-login failed: {e}")))?;
                }
                self.create_post(text, images, in_reply_to).await.map(Some)
            }
            other => other.map(Some),
        }
    }
}

/// Link facets for every `http(s)://` URL in `text`, including ones glued
/// to leading punctuation like `(https://...)`. Offsets are UTF-8 byte
/// positions, as the AT Protocol requires.
pub fn link_facets(text: &str) -> Vec<Value> {
    let base = text.as_ptr() as usize;
    text.split_whitespace()
        .filter_map(|word| {
            let at = ["https://", "http://"]
                .iter()
                .filter_map(|scheme| word.find(*scheme))
                .min()?;
            let uri = word[at..].trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '"', '\'']);
            let (_, rest) = uri.split_once("://")?;
            if rest.is_empty() {
                return None;
            }
            let start = word.as_ptr() as usize - base + at;
            Some(json!({
                "index": { "byteStart": start, "byteEnd": start + uri.len() },
                "features": [{ "$type": "app.bsky.richtext.facet#link", "uri": uri }],
            }))
        })
        .collect()
}

pub(super) fn setup(config: &mut Config, prompt: &mut dyn Prompt) -> anyhow::Result<bool> {
    prompt.say("We need your Bluesky email (or handle) and an app password");
    let email = prompt.ask("Email: ")?;
    let password = prompt.ask("Password: ")?;
    if email.is_empty() || password.is_empty() {
        return Ok(false);
    }
    config.bluesky = Some(BlueskyConfig {
        email,
        password,
        pds: None,
    });
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Scripted;

    #[test]
    fn facets_use_byte_offsets() {
        let text = "héllo https://example.com/a, and http://x.org";
        let facets = link_facets(text);
        assert_eq!(facets.len(), 2);

        let first = &facets[0];
        let start = first["index"]["byteStart"].as_u64().unwrap() as usize;
        let end = first["index"]["byteEnd"].as_u64().unwrap() as usize;
        assert_eq!(&text[start..end], "https://example.com/a");
        assert_eq!(first["features"][0]["uri"], "https://example.com/a");

        let second = &facets[1];
        let start = second["index"]["byteStart"].as_u64().unwrap() as usize;
        let end = second["index"]["byteEnd"].as_u64().unwrap() as usize;
        assert_eq!(&text[start..end], "http://x.org");
    }

    #[test]
    fn facets_find_links_after_punctuation() {
        let text = "(https://x.org) see:https://a.b/c. bare https://";
        let facets = link_facets(text);
        assert_eq!(facets.len(), 2);
        let spans: Vec<&str> = facets
            .iter()
            .map(|f| {
                let start = f["index"]["byteStart"].as_u64().unwrap() as usize;
                let end = f["index"]["byteEnd"].as_u64().unwrap() as usize;
                &text[start..end]
            })
            .collect();
        assert_eq!(spans, vec!["https://x.org", "https://a.b/c"]);
        assert_eq!(facets[1]["features"][0]["uri"], "https://a.b/c");
    }

    #[test]
    fn no_links_no_facets() {
        assert!(link_facets("just some text about https").is_empty());
    }

    #[test]
    fn setup_stores_credentials() {
        let mut config = Config::default();
        let mut prompt = Scripted::new(["bot@example.com", "app-pass"]);
        assert!(setup(&mut config, &mut prompt).unwrap());
        let bsky = config.bluesky.unwrap();
        assert_eq!(bsky.email, "bot@example.com");
        assert_eq!(bsky.password, "app-pass");
    }

    #[test]
    fn setup_rejects_blank_answers() {
        let mut config = Config::default();
        let mut prompt = Scripted::new(["", ""]);
        assert!(!setup(&mut config, &mut prompt).unwrap());
        assert!(config.bluesky.is_none());
    }

    #[tokio::test]
    async fn rate_limited_login_is_not_retried_early() {
        let config = BlueskyConfig {
            email: "a".into(),
            password: "b".into(),
            // Nothing listens here; the request must not be made.
            pds: Some("http://127.0.0.1:9".into()),
        };
        let mut bsky = Bluesky::new(config, true, reqwest::Client::new());
        bsky.login_ratelimit_expiry = Some(Utc::now() + chrono::Duration::hours(1));
        bsky.auth().await.unwrap();
        assert!(!bsky.connected());
        let out = bsky.do_post("hi", &[], None).await.unwrap();
        assert!(out.is_none());
    }
}
