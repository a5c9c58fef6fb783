//! Twitter/X adapter over the v2 API, signed with OAuth 1.0a user tokens.

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::json;

use super::oauth1::Credentials;
use super::{Limits, PostRef, Service, check_response};
use crate::config::{Config, TwitterConfig};
use crate::error::PostError;
use crate::image::Image;
use crate::prompt::Prompt;

pub const NAME: &str = "twitter";

pub fn limits() -> Limits {
    Limits {
        max_length: 280,
        max_length_image: 280,
        max_image_size: 5_000_000,
        ..Limits::default()
    }
}

#[derive(Debug, Deserialize)]
struct Data<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

pub struct Twitter {
    config: TwitterConfig,
    live: bool,
    http: reqwest::Client,
    limits: Limits,
    username: Option<String>,
}

impl Twitter {
    pub fn new(config: TwitterConfig, live: bool, http: reqwest::Client) -> Self {
        Self {
            config,
            live,
            http,
            limits: limits(),
            username: None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    async fn upload_media(&self, image: &Image) -> Result<String, PostError> {
        let part = Part::bytes(image.data.clone())
            .file_name("media")
            .mime_str(&image.mime_type)?;
        let form = Form::new()
            .part("media", part)
            .text("media_category", "tweet_image")
            .text("media_type", image.mime_type.clone());
        let resp = signed(&self.http, &self.config, Method::POST, "/2/media/upload")?
            .multipart(form)
            .send()
            .await?;
        let uploaded: Data<Created> = check_response(resp).await?.json().await?;

        if let Some(description) = &image.description {
            let resp = signed(&self.http, &self.config, Method::POST, "/2/media/metadata")?
                .json(&json!({
                    "id": uploaded.data.id,
                    "metadata": { "alt_text": { "text": description } },
                }))
                .send()
                .await?;
            check_response(resp).await?;
        }
        Ok(uploaded.data.id)
    }
}

/// Build a request to `path` under the API base, carrying an OAuth 1.0a
/// signature.
fn signed(
    http: &reqwest::Client,
    config: &TwitterConfig,
    method: Method,
    path: &str,
) -> Result<RequestBuilder, PostError> {
    let url = Url::parse(&format!("{}{path}", config.api_base().trim_end_matches('/')))
        .map_err(|e| PostError::InvalidResponse(format!("bad Twitter API URL: {e}")))?;
    let creds = Credentials {
        consumer_key: &config.consumer_key,
        consumer_secret: &config.consumer_secret,
        token: &config.access_token,
        token_secret: &config.access_token_secret,
    };
    let authorization = creds
        .authorization(method.as_str(), &url, &[])
        .map_err(PostError::Signing)?;
    Ok(http.request(method, url).header(AUTHORIZATION, authorization))
}

async fn verify_credentials(http: &reqwest::Client, config: &TwitterConfig) -> anyhow::Result<String> {
    let resp = signed(http, config, Method::GET, "/2/users/me")?
        .send()
        .await
        .context("Failed to reach Twitter")?;
    let user: Data<User> = check_response(resp)
        .await?
        .json()
        .await
        .context("Failed to parse Twitter user")?;
    Ok(user.data.username)
}

#[async_trait]
impl Service for Twitter {
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
        let username = verify_credentials(&self.http, &self.config).await?;
        tracing::info!(username = %username, "Connected to Twitter");
        self.username = Some(username);
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

        let mut body = json!({ "text": text });
        if !media_ids.is_empty() {
            body["media"] = json!({ "media_ids": media_ids });
        }
        match in_reply_to {
            Some(PostRef::Id { id }) => body["reply"] = json!({ "in_reply_to_tweet_id": id }),
            Some(other) => tracing::warn!(reply_to = ?other, "Ignoring non-Twitter reply target"),
            None => {}
        }

        let resp = signed(&self.http, &self.config, Method::POST, "/2/tweets")?
            .json(&body)
            .send()
            .await?;
        let created: Data<Created> = check_response(resp).await?.json().await?;
        Ok(Some(PostRef::Id {
            id: created.data.id,
        }))
    }
}

pub(super) async fn setup(
    config: &mut Config,
    prompt: &mut dyn Prompt,
    http: &reqwest::Client,
) -> anyhow::Result<bool> {
    prompt.say("Create an app with read and write permissions in the X developer portal,");
    prompt.say("then generate an access token and secret for the bot account.");
    let consumer_key = prompt.ask("API key: ")?;
    let consumer_secret = prompt.ask("API key secret: ")?;
    let access_token = prompt.ask("Access token: ")?;
    let access_token_secret = prompt.ask("Access token secret: ")?;
    if [&consumer_key, &consumer_secret, &access_token, &access_token_secret]
        .iter()
        .any(|s| s.is_empty())
    {
        return Ok(false);
    }

    let twitter = TwitterConfig {
        consumer_key,
        consumer_secret,
        access_token,
        access_token_secret,
        api_base: None,
    };
    let username = verify_credentials(http, &twitter).await?;
    prompt.say(&format!("Authenticated as @{username}"));
    config.twitter = Some(twitter);
    Ok(true)
}
