//! Mastodon adapter, using the instance's REST API with a user access token.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::Rng;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;

use super::{Limits, PostRef, Service, check_response};
use crate::config::{Config, MastodonConfig};
use crate::error::PostError;
use crate::image::Image;
use crate::prompt::Prompt;

pub const NAME: &str = "mastodon";

const OOB_REDIRECT: &str = "urn:ietf:wg:oauth:2.0:oob";
const SCOPES: &str = "read:accounts write:media write:statuses";
const MEDIA_POLL_ATTEMPTS: usize = 10;
const MEDIA_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub fn limits() -> Limits {
    Limits {
        max_length: 500,
        max_length_image: 500,
        max_image_size: 16_000_000,
        max_image_pixels: Some(8_294_400),
        ..Limits::default()
    }
}

#[derive(Debug, Deserialize)]
struct Account {
    acct: String,
}

#[derive(Debug, Deserialize)]
struct MediaAttachment {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostedStatus {
    id: String,
}

#[derive(Debug, Deserialize)]
struct App {
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct Token {
    access_token: String,
}

pub struct Mastodon {
    config: MastodonConfig,
    live: bool,
    http: reqwest::Client,
    limits: Limits,
    account: Option<String>,
}

impl Mastodon {
    pub fn new(config: MastodonConfig, live: bool, http: reqwest::Client) -> Self {
        Self {
            config,
            live,
            http,
            limits: limits(),
            account: None,
        }
    }

    /// Account the access token belongs to, once authenticated.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn upload_media(&self, image: &Image) -> Result<String, PostError> {
        let extension = image.mime_type.rsplit('/').next().unwrap_or("bin");
        let part = Part::bytes(image.data.clone())
            .file_name(format!("image.{extension}"))
            .mime_str(&image.mime_type)?;
        let mut form = Form::new().part("file", part);
        if let Some(description) = &image.description {
            form = form.text("description", description.clone());
        }

        let resp = self
            .http
            .post(self.url("/api/v2/media"))
            .bearer_auth(&self.config.access_token)
            .multipart(form)
            .send()
            .await?;
        let processing = resp.status() == reqwest::StatusCode::ACCEPTED;
        let media: MediaAttachment = check_response(resp).await?.json().await?;
        if processing && media.url.is_none() {
            self.wait_for_media(&media.id).await?;
        }
        Ok(media.id)
    }

    /// Large uploads are processed asynchronously; a status can only
    /// reference them once processing has finished.
    async fn wait_for_media(&self, id: &str) -> Result<(), PostError> {
        for _ in 0..MEDIA_POLL_ATTEMPTS {
            tokio::time::sleep(MEDIA_POLL_INTERVAL).await;
            let resp = self
                .http
                .get(self.url(&format!("/api/v1/media/{id}")))
                .bearer_auth(&self.config.access_token)
                .send()
                .await?;
            if resp.status() == reqwest::StatusCode::PARTIAL_CONTENT {
                continue;
            }
            let media: MediaAttachment = check_response(resp).await?.json().await?;
            if media.url.is_some() {
                return Ok(());
            }
        }
        Err(PostError::InvalidResponse(format!(
            "media {id} still processing"
        )))
    }
}

#[async_trait]
impl Service for Mastodon {
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
        let account = verify_credentials(&self.http, &self.config.base_url, &self.config.access_token)
            .await?;
        tracing::info!(account = %account.acct, "Connected to Mastodon");
        self.account = Some(account.acct);
        Ok(())
    }

    async fn do_post(
        &mut self,
        text: &str,
        images: &[Image],
        in_reply_to: Option<&PostRef>,
    ) -> Result<Option<PostRef>, PostError> {
        let mut media_ids = Vec::with_capacity(images.len());
        for image in images {
            media_ids.push(self.upload_media(image).await?);
        }

        let mut body = json!({ "status": text });
        if !media_ids.is_empty() {
            body["media_ids"] = json!(media_ids);
        }
        match in_reply_to {
            Some(PostRef::Id { id }) => body["in_reply_to_id"] = json!(id),
            Some(other) => tracing::warn!(reply_to = ?other, "Ignoring non-Mastodon reply target"),
            None => {}
        }

        let idempotency_key = format!("{:032x}", rand::thread_rng().r#gen::<u128>());
        let resp = self
            .http
            .post(self.url("/api/v1/statuses"))
            .bearer_auth(&self.config.access_token)
            .header("Idempotency-Key", idempotency_key)
            .json(&body)
            .send()
            .await?;
        let status: PostedStatus = check_response(resp).await?.json().await?;
        Ok(Some(PostRef::Id { id: status.id }))
    }
}

async fn verify_credentials(
    http: &reqwest::Client,
    base_url: &str,
    access_token: &str,
) -> anyhow::Result<Account> {
    let resp = http
        .get(format!(
            "{}/api/v1/accounts/verify_credentials",
            base_url.trim_end_matches('/')
        ))
        .bearer_auth(access_token)
        .send()
        .await
        .context("Failed to reach Mastodon instance")?;
    let resp = check_response(resp).await?;
    resp.json().await.context("Failed to parse Mastodon account")
}

/// Normalise user input like `mastodon.social/` into `https://mastodon.social`.
fn normalize_base_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

pub(super) async fn setup(
    config: &mut Config,
    prompt: &mut dyn Prompt,
    http: &reqwest::Client,
) -> anyhow::Result<bool> {
    let input = prompt.ask("Mastodon instance URL (e.g. https://mastodon.social): ")?;
    if input.is_empty() {
        return Ok(false);
    }
    let base_url = normalize_base_url(&input);

    let resp = http
        .post(format!("{base_url}/api/v1/apps"))
        .form(&[
            ("client_name", "polybot"),
            ("redirect_uris", OOB_REDIRECT),
            ("scopes", SCOPES),
        ])
        .send()
        .await
        .context("Failed to register application")?;
    let app: App = check_response(resp).await?.json().await?;

    let authorize = reqwest::Url::parse_with_params(
        &format!("{base_url}/oauth/authorize"),
        &[
            ("response_type", "code"),
            ("client_id", app.client_id.as_str()),
            ("redirect_uri", OOB_REDIRECT),
            ("scope", SCOPES),
        ],
    )?;
    prompt.say("Open this URL in a browser logged in as the bot account and authorise it:");
    prompt.say(authorize.as_str());
    let code = prompt.ask("Authorisation code: ")?;
    if code.is_empty() {
        return Ok(false);
    }

    let resp = http
        .post(format!("{base_url}/oauth/token"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
            ("redirect_uri", OOB_REDIRECT),
            ("scope", SCOPES),
        ])
        .send()
        .await
        .context("Failed to exchange authorisation code")?;
    let token: Token = check_response(resp).await?.json().await?;

    let account = verify_credentials(http, &base_url, &token.access_token).await?;
    prompt.say(&format!("Authenticated as {}", account.acct));

    config.mastodon = Some(MastodonConfig {
        base_url,
        access_token: token.access_token,
        client_id: Some(app.client_id),
        client_secret: Some(app.client_secret),
    });
    Ok(true)
}
